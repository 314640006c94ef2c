//! Source text parser
//!
//! The source language is line-oriented. Blank lines and lines starting with
//! `#` are ignored; everything else is one construct per line:
//!
//! ```text
//! reference <Name>
//! type <vis> [abstract] [sealed] <kind> <FullName> [extends <sig>]
//!   generic T U
//!   implements <sig>
//!   attribute <TypeRef> [value...] [Name=value...]
//!   field <vis> [static] [initonly] <sig> <name>
//!   method <vis> [static] [virtual] [abstract] <ret> <Name>(<sig> a, <sig> b)
//!     generic T
//!     attribute ...
//!     local <sig>
//!     noinit
//!     label:
//!     <mnemonic> [operand]
//!   end
//!   type ... end
//! end
//! ```
//!
//! Operands use the same textual forms the artifact model displays, so any
//! instruction printed by [`Op`]'s `Display` parses back to itself. Branch
//! targets are labels or `IL_xxxx` offsets.

use crate::error::ParseError;
use asmproc_artifact::{
    AttrValue, CustomAttribute, FieldDef, MethodBody, MethodDef, MethodRef, Op, Param, SigParseError,
    TypeDef, TypeKind, TypeSig, Visibility,
};
use asmproc_codegen::GeneratedSource;
use std::collections::HashMap;
use std::str::FromStr;

/// Contents of one parsed source unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    /// Artifacts named by `reference` lines
    pub references: Vec<String>,
    /// Top-level types in declaration order
    pub types: Vec<TypeDef>,
}

/// Parse one generated source
///
/// # Errors
/// Returns [`ParseError`] with the source's display name and the line of the
/// first problem
pub fn parse(source: &GeneratedSource) -> Result<Unit, ParseError> {
    parse_text(&source.display_name(), &source.text)
}

/// Parse source text under a display name
///
/// # Errors
/// Returns [`ParseError`] with `name` and the line of the first problem
pub fn parse_text(name: &str, text: &str) -> Result<Unit, ParseError> {
    Parser::new(name, text).unit()
}

fn split_keyword(text: &str) -> (&str, &str) {
    text.split_once(char::is_whitespace)
        .map_or((text, ""), |(keyword, rest)| (keyword, rest.trim()))
}

fn is_label(text: &str) -> bool {
    text.len() > 1 && text.ends_with(':') && !text.contains(char::is_whitespace)
}

/// Whitespace-separated words with access to the unconsumed rest
#[derive(Debug, Clone, Copy)]
struct Words<'a> {
    rest: &'a str,
}

impl<'a> Words<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn next(&mut self) -> Option<&'a str> {
        let s = self.rest.trim_start();
        if s.is_empty() {
            return None;
        }
        let end = s.find(char::is_whitespace).unwrap_or(s.len());
        let (word, rest) = s.split_at(end);
        self.rest = rest;
        Some(word)
    }

    fn eat(&mut self, word: &str) -> bool {
        let mut lookahead = *self;
        if lookahead.next() == Some(word) {
            *self = lookahead;
            true
        } else {
            false
        }
    }

    fn rest(&self) -> &'a str {
        self.rest.trim()
    }
}

#[derive(Debug, Clone, Copy)]
enum BranchKind {
    Br,
    Brtrue,
    Brfalse,
}

#[derive(Debug, Clone)]
enum Target {
    Label(String),
    Offset(u32),
}

/// Instruction whose branch target may not be known yet
#[derive(Debug, Clone)]
enum Pending {
    Op(Op),
    Branch {
        kind: BranchKind,
        target: Target,
        line: usize,
    },
}

impl Pending {
    fn size(&self) -> u32 {
        match self {
            Self::Op(op) => op.size(),
            Self::Branch { .. } => Op::Br(0).size(),
        }
    }
}

#[derive(Debug, Default)]
struct BodyBuilder {
    no_init: bool,
    locals: Vec<TypeSig>,
    ops: Vec<Pending>,
    labels: HashMap<String, usize>,
}

struct Parser<'a> {
    source_name: &'a str,
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source_name: &'a str, text: &'a str) -> Self {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .collect();
        Self {
            source_name,
            lines,
            pos: 0,
        }
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos).copied();
        self.pos += 1;
        line
    }

    fn syntax(&self, line: usize, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            source_name: self.source_name.to_string(),
            line,
            message: message.into(),
        }
    }

    fn signature_error(&self, line: usize, source: SigParseError) -> ParseError {
        ParseError::Signature {
            source_name: self.source_name.to_string(),
            line,
            source,
        }
    }

    fn unterminated(&self, block: &'static str) -> ParseError {
        ParseError::Unterminated {
            source_name: self.source_name.to_string(),
            block,
        }
    }

    fn unit(mut self) -> Result<Unit, ParseError> {
        let mut unit = Unit::default();
        while let Some((line, text)) = self.next_line() {
            match split_keyword(text) {
                ("reference", name) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                    unit.references.push(name.to_string());
                }
                ("type", header) => unit.types.push(self.type_def(line, header, true)?),
                (other, _) => return Err(self.syntax(line, format!("unexpected '{other}' at top level"))),
            }
        }
        Ok(unit)
    }

    fn type_def(&mut self, line: usize, header: &str, top_level: bool) -> Result<TypeDef, ParseError> {
        let mut words = Words::new(header);
        let visibility = self.visibility(line, words.next())?;
        let is_abstract = words.eat("abstract");
        let is_sealed = words.eat("sealed");
        let kind = words
            .next()
            .and_then(TypeKind::from_keyword)
            .ok_or_else(|| self.syntax(line, "expected type kind"))?;
        let full_name = words
            .next()
            .ok_or_else(|| self.syntax(line, "expected type name"))?;
        let (namespace, name) = if top_level {
            full_name.rsplit_once('.').unwrap_or(("", full_name))
        } else {
            ("", full_name)
        };

        let mut def = TypeDef::new(namespace, name, visibility).with_kind(kind);
        def.is_abstract = is_abstract;
        def.is_sealed = is_sealed;
        if words.eat("extends") {
            def.base = Some(self.sig(line, words.rest())?);
        } else if !words.rest().is_empty() {
            return Err(self.syntax(line, format!("unexpected '{}' in type header", words.rest())));
        }

        loop {
            let (line, text) = self.next_line().ok_or_else(|| self.unterminated("type"))?;
            match split_keyword(text) {
                ("end", "") => return Ok(def),
                ("generic", names) => def
                    .generic_params
                    .extend(names.split_whitespace().map(str::to_string)),
                ("implements", sig) => def.interfaces.push(self.sig(line, sig)?),
                ("attribute", rest) => def.attributes.push(self.attribute(line, rest)?),
                ("field", rest) => def.fields.push(self.field(line, rest)?),
                ("method", rest) => {
                    let method = self.method(line, rest)?;
                    def.methods.push(method);
                }
                ("type", rest) => {
                    let nested = self.type_def(line, rest, false)?;
                    def.nested.push(nested);
                }
                (other, _) => return Err(self.syntax(line, format!("unexpected '{other}' in type body"))),
            }
        }
    }

    fn field(&self, line: usize, text: &str) -> Result<FieldDef, ParseError> {
        let mut words = Words::new(text);
        let visibility = self.visibility(line, words.next())?;
        let is_static = words.eat("static");
        let is_init_only = words.eat("initonly");
        let (ty, name) = self.sig_prefix(line, words.rest())?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(self.syntax(line, "expected a single field name"));
        }
        let mut field = FieldDef::new(name, ty, visibility);
        field.is_static = is_static;
        field.is_init_only = is_init_only;
        Ok(field)
    }

    fn method(&mut self, line: usize, header: &str) -> Result<MethodDef, ParseError> {
        let mut words = Words::new(header);
        let visibility = self.visibility(line, words.next())?;
        let is_static = words.eat("static");
        let is_virtual = words.eat("virtual");
        let is_abstract = words.eat("abstract");
        let (ret, rest) = self.sig_prefix(line, words.rest())?;
        let open = rest
            .find('(')
            .ok_or_else(|| self.syntax(line, "expected '(' after method name"))?;
        let name = rest[..open].trim();
        if name.is_empty() {
            return Err(self.syntax(line, "expected method name"));
        }
        let params = self.params(line, &rest[open + 1..])?;

        let mut method = MethodDef::new(name, visibility, params, ret);
        method.is_static = is_static;
        method.is_virtual = is_virtual;
        method.is_abstract = is_abstract;

        let mut body = BodyBuilder::default();
        loop {
            let (line, text) = self.next_line().ok_or_else(|| self.unterminated("method"))?;
            match split_keyword(text) {
                ("end", "") => break,
                ("generic", names) => method
                    .generic_params
                    .extend(names.split_whitespace().map(str::to_string)),
                ("attribute", rest) => method.attributes.push(self.attribute(line, rest)?),
                ("local", sig) => body.locals.push(self.sig(line, sig)?),
                ("noinit", "") => body.no_init = true,
                _ if is_label(text) => {
                    let label = &text[..text.len() - 1];
                    if body.labels.insert(label.to_string(), body.ops.len()).is_some() {
                        return Err(self.syntax(line, format!("duplicate label '{label}'")));
                    }
                }
                (mnemonic, operand) => body.ops.push(self.op(line, mnemonic, operand)?),
            }
        }
        method.body = self.finish_body(body)?;
        Ok(method)
    }

    fn params(&self, line: usize, src: &str) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        let mut rest = src.trim_start();
        if let Some(after) = rest.strip_prefix(')') {
            return if after.trim().is_empty() {
                Ok(params)
            } else {
                Err(self.syntax(line, "unexpected input after parameter list"))
            };
        }
        loop {
            let (ty, after) = self.sig_prefix(line, rest)?;
            let end = after
                .find(|c| c == ',' || c == ')')
                .ok_or_else(|| self.syntax(line, "unterminated parameter list"))?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(self.syntax(line, "expected parameter name"));
            }
            params.push(Param::new(name, ty));
            let closed = after[end..].starts_with(')');
            rest = after[end + 1..].trim_start();
            if closed {
                if !rest.is_empty() {
                    return Err(self.syntax(line, "unexpected input after parameter list"));
                }
                return Ok(params);
            }
        }
    }

    fn finish_body(&self, body: BodyBuilder) -> Result<Option<MethodBody>, ParseError> {
        if body.ops.is_empty() && body.locals.is_empty() {
            return Ok(None);
        }
        let mut offsets = Vec::with_capacity(body.ops.len());
        let mut offset = 0;
        for pending in &body.ops {
            offsets.push(offset);
            offset += pending.size();
        }

        let mut ops = Vec::with_capacity(body.ops.len());
        for pending in body.ops {
            let op = match pending {
                Pending::Op(op) => op,
                Pending::Branch { kind, target, line } => {
                    let target = match target {
                        Target::Label(label) => body
                            .labels
                            .get(&label)
                            .and_then(|index| offsets.get(*index).copied())
                            .ok_or_else(|| {
                                self.syntax(line, format!("label '{label}' does not mark an instruction"))
                            })?,
                        Target::Offset(offset) if offsets.contains(&offset) => offset,
                        Target::Offset(offset) => {
                            return Err(self.syntax(line, format!("IL_{offset:04x} is not an instruction offset")))
                        }
                    };
                    match kind {
                        BranchKind::Br => Op::Br(target),
                        BranchKind::Brtrue => Op::Brtrue(target),
                        BranchKind::Brfalse => Op::Brfalse(target),
                    }
                }
            };
            ops.push(op);
        }

        let mut built = MethodBody::from_ops(ops);
        built.init_locals = !body.no_init;
        built.locals = body.locals;
        Ok(Some(built))
    }

    fn op(&self, line: usize, mnemonic: &str, operand: &str) -> Result<Pending, ParseError> {
        let bare = |op: Op| {
            if operand.is_empty() {
                Ok(op)
            } else {
                Err(self.syntax(line, format!("'{mnemonic}' takes no operand")))
            }
        };
        let op = match mnemonic {
            "nop" => bare(Op::Nop)?,
            "ret" => bare(Op::Ret)?,
            "pop" => bare(Op::Pop)?,
            "dup" => bare(Op::Dup)?,
            "ldnull" => bare(Op::Ldnull)?,
            "ldc.i4" => Op::LdcI4(self.number(line, operand)?),
            "ldstr" => Op::Ldstr(self.string(line, operand)?),
            "ldarg" => Op::Ldarg(self.number(line, operand)?),
            "ldloc" => Op::Ldloc(self.number(line, operand)?),
            "stloc" => Op::Stloc(self.number(line, operand)?),
            "ldfld" => Op::Ldfld(self.member(line, operand)?),
            "stfld" => Op::Stfld(self.member(line, operand)?),
            "ldsfld" => Op::Ldsfld(self.member(line, operand)?),
            "stsfld" => Op::Stsfld(self.member(line, operand)?),
            "ldtoken" => Op::Ldtoken(self.sig(line, operand)?),
            "castclass" => Op::Castclass(self.sig(line, operand)?),
            "call" => Op::Call(self.member::<MethodRef>(line, operand)?),
            "callvirt" => Op::Callvirt(self.member(line, operand)?),
            "newobj" => Op::Newobj(self.member(line, operand)?),
            "ldftn" => Op::Ldftn(self.member(line, operand)?),
            "br" | "brtrue" | "brfalse" => {
                let kind = match mnemonic {
                    "br" => BranchKind::Br,
                    "brtrue" => BranchKind::Brtrue,
                    _ => BranchKind::Brfalse,
                };
                return Ok(Pending::Branch {
                    kind,
                    target: self.branch_target(line, operand)?,
                    line,
                });
            }
            other => return Err(self.syntax(line, format!("unknown instruction '{other}'"))),
        };
        Ok(Pending::Op(op))
    }

    fn branch_target(&self, line: usize, operand: &str) -> Result<Target, ParseError> {
        if operand.is_empty() || operand.contains(char::is_whitespace) {
            return Err(self.syntax(line, "expected branch target"));
        }
        let offset = operand
            .strip_prefix("IL_")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok());
        Ok(offset.map_or_else(|| Target::Label(operand.to_string()), Target::Offset))
    }

    fn attribute(&self, line: usize, text: &str) -> Result<CustomAttribute, ParseError> {
        let (sig, mut rest) = self.sig_prefix(line, text)?;
        let TypeSig::Named(ty) = sig else {
            return Err(self.syntax(line, "attribute type must be a named type"));
        };
        let mut args = Vec::new();
        let mut named = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some((name, after)) = named_prefix(rest) {
                let (value, after) = self.attr_value(line, after)?;
                named.push((name.to_string(), value));
                rest = after;
            } else {
                let (value, after) = self.attr_value(line, rest)?;
                args.push(value);
                rest = after;
            }
        }
        Ok(CustomAttribute::new(ty, args).with_named_args(named))
    }

    fn attr_value<'s>(&self, line: usize, s: &'s str) -> Result<(AttrValue, &'s str), ParseError> {
        if s.starts_with('"') {
            let (text, rest) = unquote_prefix(s).ok_or_else(|| self.syntax(line, "invalid string literal"))?;
            return Ok((AttrValue::Str(text), rest));
        }
        if let Some(inner) = s.strip_prefix("typeof(") {
            let (sig, rest) = self.sig_prefix(line, inner)?;
            let rest = rest
                .trim_start()
                .strip_prefix(')')
                .ok_or_else(|| self.syntax(line, "expected ')' after typeof"))?;
            return Ok((AttrValue::Type(sig), rest));
        }
        let end = s.find(char::is_whitespace).unwrap_or(s.len());
        let (word, rest) = s.split_at(end);
        let value = match word {
            "true" => AttrValue::Bool(true),
            "false" => AttrValue::Bool(false),
            _ => AttrValue::Int(
                word.parse()
                    .map_err(|_| self.syntax(line, format!("invalid attribute value '{word}'")))?,
            ),
        };
        Ok((value, rest))
    }

    fn visibility(&self, line: usize, word: Option<&str>) -> Result<Visibility, ParseError> {
        word.and_then(Visibility::from_keyword)
            .ok_or_else(|| self.syntax(line, format!("expected visibility, found '{}'", word.unwrap_or(""))))
    }

    fn number<T: FromStr>(&self, line: usize, text: &str) -> Result<T, ParseError> {
        text.trim()
            .parse()
            .map_err(|_| self.syntax(line, format!("invalid number '{text}'")))
    }

    fn string(&self, line: usize, text: &str) -> Result<String, ParseError> {
        match unquote_prefix(text) {
            Some((value, rest)) if rest.trim().is_empty() => Ok(value),
            _ => Err(self.syntax(line, "invalid string literal")),
        }
    }

    fn sig(&self, line: usize, text: &str) -> Result<TypeSig, ParseError> {
        text.trim().parse().map_err(|e| self.signature_error(line, e))
    }

    fn sig_prefix<'s>(&self, line: usize, text: &'s str) -> Result<(TypeSig, &'s str), ParseError> {
        TypeSig::parse_prefix(text.trim_start()).map_err(|e| self.signature_error(line, e))
    }

    fn member<T: FromStr<Err = SigParseError>>(&self, line: usize, text: &str) -> Result<T, ParseError> {
        text.trim().parse().map_err(|e| self.signature_error(line, e))
    }
}

/// `Name=` at the start of `s`, returning the name and what follows `=`
fn named_prefix(s: &str) -> Option<(&str, &str)> {
    let end = s.find(|c: char| !(c.is_alphanumeric() || c == '_'))?;
    if end == 0 || !s[end..].starts_with('=') {
        return None;
    }
    Some((&s[..end], &s[end + 1..]))
}

/// Decode a debug-quoted string at the start of `s`
fn unquote_prefix(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &body[i + 1..])),
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '0' => out.push('\0'),
                    '\\' | '"' | '\'' => out.push(escaped),
                    'u' => {
                        let (_, '{') = chars.next()? else {
                            return None;
                        };
                        let mut hex = String::new();
                        loop {
                            let (_, h) = chars.next()?;
                            if h == '}' {
                                break;
                            }
                            hex.push(h);
                        }
                        out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                    }
                    _ => return None,
                }
            }
            c => out.push(c),
        }
    }
    None
}
