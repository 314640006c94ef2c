//! Type and member references
//!
//! [`TypeSig`] is the tagged-variant description of a type as it appears in a
//! signature. [`TypeRef`] names a type definition, either in the current
//! artifact (`scope == None`) or in a referenced one.
//!
//! The `Display` impls render the textual syntax understood by the compiler:
//!
//! ```text
//! i32                                   primitive
//! Game.Player                           local type
//! [Engine.Core]Engine.Core.Dispatcher   type in a referenced artifact
//! Outer/Inner                           nested type
//! [corlib]System.Collections.Generic.List`1<Game.Player>
//! Game.Player[]                         single-dimension array
//! !T  !!T                               type / method generic parameter
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Built-in primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Primitive {
    Void,
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    NativeInt,
    String,
    Object,
}

impl Primitive {
    const ALL: [Primitive; 16] = [
        Self::Void,
        Self::Bool,
        Self::Char,
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::NativeInt,
        Self::String,
        Self::Object,
    ];

    /// Keyword used in the textual syntax
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::NativeInt => "native",
            Self::String => "string",
            Self::Object => "object",
        }
    }

    /// Lookup by keyword
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.keyword() == keyword)
    }

    /// Whether values of this primitive live inline (not a reference)
    #[must_use]
    pub const fn is_value_type(self) -> bool {
        !matches!(self, Self::String | Self::Object | Self::Void)
    }
}

/// Reference to a type definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    /// Defining artifact; `None` for the artifact that holds this reference
    pub scope: Option<String>,

    /// Full name: `Namespace.Name`, nested types as `Outer/Inner`
    pub full_name: String,
}

impl TypeRef {
    /// Reference to a type in the current artifact
    #[inline]
    #[must_use]
    pub fn local(full_name: impl Into<String>) -> Self {
        Self {
            scope: None,
            full_name: full_name.into(),
        }
    }

    /// Reference to a type in another artifact
    #[inline]
    #[must_use]
    pub fn external(scope: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            full_name: full_name.into(),
        }
    }

    /// Namespace of the outermost declaring type
    #[must_use]
    pub fn namespace(&self) -> &str {
        let outer = self.full_name.split('/').next().unwrap_or_default();
        outer.rsplit_once('.').map_or("", |(ns, _)| ns)
    }

    /// Simple name (innermost segment, generic arity suffix kept)
    #[must_use]
    pub fn name(&self) -> &str {
        let inner = self.full_name.rsplit('/').next().unwrap_or_default();
        if self.full_name.contains('/') {
            inner
        } else {
            inner.rsplit_once('.').map_or(inner, |(_, n)| n)
        }
    }

    /// Whether this names a nested type
    #[inline]
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.full_name.contains('/')
    }

    /// Declaring type of a nested type
    #[must_use]
    pub fn declaring(&self) -> Option<TypeRef> {
        self.full_name.rsplit_once('/').map(|(outer, _)| TypeRef {
            scope: self.scope.clone(),
            full_name: outer.to_string(),
        })
    }

    /// Generic arity encoded in the name (`List`1` → 1)
    #[must_use]
    pub fn generic_arity(&self) -> usize {
        self.name()
            .rsplit_once('`')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(0)
    }

    /// Same reference as seen from `artifact`: its own types become local
    #[must_use]
    pub fn relative_to(&self, artifact: &str) -> TypeRef {
        match &self.scope {
            Some(scope) if scope == artifact => TypeRef::local(self.full_name.clone()),
            _ => self.clone(),
        }
    }

    /// Same reference resolved against `owner`: local types get its scope
    #[must_use]
    pub fn anchored(&self, owner: &str) -> TypeRef {
        match &self.scope {
            None => TypeRef::external(owner, self.full_name.clone()),
            Some(_) => self.clone(),
        }
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "[{scope}]{}", self.full_name),
            None => f.write_str(&self.full_name),
        }
    }
}

/// Type as it appears in a signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeSig {
    /// Built-in primitive
    Primitive(Primitive),

    /// Non-generic (or open generic definition) type
    Named(TypeRef),

    /// Closed or partially closed generic instance
    Generic(TypeRef, Vec<TypeSig>),

    /// Single-dimension array
    Array(Box<TypeSig>),

    /// Generic parameter of the enclosing type (`!T`)
    Param(String),

    /// Generic parameter of the enclosing method (`!!T`)
    MethodParam(String),
}

impl TypeSig {
    /// `void`
    pub const VOID: TypeSig = TypeSig::Primitive(Primitive::Void);

    /// Named local type
    #[inline]
    #[must_use]
    pub fn local(full_name: impl Into<String>) -> Self {
        Self::Named(TypeRef::local(full_name))
    }

    /// Named external type
    #[inline]
    #[must_use]
    pub fn external(scope: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self::Named(TypeRef::external(scope, full_name))
    }

    /// Generic instance
    #[inline]
    #[must_use]
    pub fn generic(definition: TypeRef, args: Vec<TypeSig>) -> Self {
        Self::Generic(definition, args)
    }

    /// Array of `self`
    #[inline]
    #[must_use]
    pub fn array_of(self) -> Self {
        Self::Array(Box::new(self))
    }

    /// The type definition this signature points at, if any
    #[must_use]
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            Self::Named(r) | Self::Generic(r, _) => Some(r),
            _ => None,
        }
    }

    /// Generic arguments of an instance, empty otherwise
    #[must_use]
    pub fn generic_args(&self) -> &[TypeSig] {
        match self {
            Self::Generic(_, args) => args,
            _ => &[],
        }
    }

    /// Whether any generic parameter appears inside
    #[must_use]
    pub fn contains_generic_param(&self) -> bool {
        match self {
            Self::Param(_) | Self::MethodParam(_) => true,
            Self::Generic(_, args) => args.iter().any(Self::contains_generic_param),
            Self::Array(elem) => elem.contains_generic_param(),
            Self::Primitive(_) | Self::Named(_) => false,
        }
    }

    /// Replace type generic parameters by name
    #[must_use]
    pub fn substitute(&self, bindings: &HashMap<String, TypeSig>) -> TypeSig {
        match self {
            Self::Param(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Self::Generic(def, args) => Self::Generic(
                def.clone(),
                args.iter().map(|a| a.substitute(bindings)).collect(),
            ),
            Self::Array(elem) => Self::Array(Box::new(elem.substitute(bindings))),
            _ => self.clone(),
        }
    }

    /// Parse a signature at the start of `src`, returning the unparsed rest
    ///
    /// # Errors
    /// Returns [`SigParseError`] if `src` does not start with a signature
    pub fn parse_prefix(src: &str) -> Result<(TypeSig, &str), SigParseError> {
        let mut parser = SigParser { src, pos: 0 };
        let sig = parser.parse_sig()?;
        Ok((sig, &src[parser.pos..]))
    }

    /// Visit every [`TypeRef`] inside this signature
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut TypeRef)) {
        match self {
            Self::Named(r) => f(r),
            Self::Generic(r, args) => {
                f(r);
                for arg in args {
                    arg.for_each_ref_mut(f);
                }
            }
            Self::Array(elem) => elem.for_each_ref_mut(f),
            Self::Primitive(_) | Self::Param(_) | Self::MethodParam(_) => {}
        }
    }

    /// Visit every [`TypeRef`] inside this signature
    pub fn for_each_ref(&self, f: &mut dyn FnMut(&TypeRef)) {
        match self {
            Self::Named(r) => f(r),
            Self::Generic(r, args) => {
                f(r);
                for arg in args {
                    arg.for_each_ref(f);
                }
            }
            Self::Array(elem) => elem.for_each_ref(f),
            Self::Primitive(_) | Self::Param(_) | Self::MethodParam(_) => {}
        }
    }
}

impl From<TypeRef> for TypeSig {
    fn from(r: TypeRef) -> Self {
        Self::Named(r)
    }
}

impl From<Primitive> for TypeSig {
    fn from(p: Primitive) -> Self {
        Self::Primitive(p)
    }
}

impl Display for TypeSig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.write_str(p.keyword()),
            Self::Named(r) => write!(f, "{r}"),
            Self::Generic(r, args) => {
                write!(f, "{r}<")?;
                write_list(f, args)?;
                f.write_str(">")
            }
            Self::Array(elem) => write!(f, "{elem}[]"),
            Self::Param(name) => write!(f, "!{name}"),
            Self::MethodParam(name) => write!(f, "!!{name}"),
        }
    }
}

impl FromStr for TypeSig {
    type Err = SigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = SigParser { src: s, pos: 0 };
        let sig = parser.parse_sig()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(SigParseError::Trailing(s[parser.pos..].to_string()));
        }
        Ok(sig)
    }
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Errors parsing a textual type signature
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigParseError {
    /// Input ended early
    #[error("unexpected end of type signature")]
    UnexpectedEnd,

    /// Unexpected character
    #[error("unexpected '{found}' at position {pos} in type signature")]
    Unexpected { found: char, pos: usize },

    /// Unparsed input after a complete signature
    #[error("trailing input after type signature: '{0}'")]
    Trailing(String),
}

/// Recursive-descent parser over the signature syntax
pub(crate) struct SigParser<'a> {
    pub(crate) src: &'a str,
    pub(crate) pos: usize,
}

impl<'a> SigParser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    pub(crate) fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), SigParseError> {
        self.skip_ws();
        match self.peek() {
            Some(found) if found == c => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(found) => Err(SigParseError::Unexpected {
                found,
                pos: self.pos,
            }),
            None => Err(SigParseError::UnexpectedEnd),
        }
    }

    pub(crate) fn ident(&mut self) -> Result<&'a str, SigParseError> {
        let start = self.pos;
        // open `<` belonging to special names such as `<Module>`
        let mut special_depth = 0usize;
        while let Some(c) = self.peek() {
            let take = match c {
                '<' if self.is_special_name_start(start) => {
                    special_depth += 1;
                    true
                }
                '>' if special_depth > 0 => {
                    special_depth -= 1;
                    true
                }
                '.' | '_' | '`' | '/' | '$' | '-' => true,
                c => c.is_alphanumeric(),
            };
            if !take {
                break;
            }
            self.pos += c.len_utf8();
        }
        if start == self.pos {
            return match self.peek() {
                Some(found) => Err(SigParseError::Unexpected {
                    found,
                    pos: self.pos,
                }),
                None => Err(SigParseError::UnexpectedEnd),
            };
        }
        Ok(&self.src[start..self.pos])
    }

    /// Special names start with `<` at a segment boundary (`<Module>`, `Outer/<Closure>d__1`)
    fn is_special_name_start(&self, start: usize) -> bool {
        let before = &self.src[start..self.pos];
        before.is_empty() || before.ends_with('/') || before.ends_with('.')
    }

    pub(crate) fn parse_sig(&mut self) -> Result<TypeSig, SigParseError> {
        self.skip_ws();
        let mut sig = match self.peek() {
            None => return Err(SigParseError::UnexpectedEnd),
            Some('!') => {
                self.pos += 1;
                if self.peek() == Some('!') {
                    self.pos += 1;
                    TypeSig::MethodParam(self.ident()?.to_string())
                } else {
                    TypeSig::Param(self.ident()?.to_string())
                }
            }
            Some('[') => {
                self.pos += 1;
                let scope = self.ident()?.to_string();
                self.expect(']')?;
                let name = self.ident()?.to_string();
                self.generic_tail(TypeRef::external(scope, name))?
            }
            Some(_) => {
                let name = self.ident()?;
                match Primitive::from_keyword(name) {
                    Some(p) => TypeSig::Primitive(p),
                    None => {
                        let name = name.to_string();
                        self.generic_tail(TypeRef::local(name))?
                    }
                }
            }
        };
        loop {
            self.skip_ws();
            if self.src[self.pos..].starts_with("[]") {
                self.pos += 2;
                sig = sig.array_of();
            } else {
                break;
            }
        }
        Ok(sig)
    }

    fn generic_tail(&mut self, r: TypeRef) -> Result<TypeSig, SigParseError> {
        self.skip_ws();
        if self.peek() != Some('<') {
            return Ok(TypeSig::Named(r));
        }
        self.pos += 1;
        let mut args = Vec::new();
        loop {
            args.push(self.parse_sig()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('>') => {
                    self.pos += 1;
                    break;
                }
                Some(found) => {
                    return Err(SigParseError::Unexpected {
                        found,
                        pos: self.pos,
                    })
                }
                None => return Err(SigParseError::UnexpectedEnd),
            }
        }
        Ok(TypeSig::Generic(r, args))
    }
}

/// Reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    /// Declaring type (generic instance allowed)
    pub declaring: TypeSig,

    /// Field name
    pub name: String,

    /// Field type as declared
    pub ty: TypeSig,
}

impl FieldRef {
    /// Create field reference
    #[inline]
    #[must_use]
    pub fn new(declaring: impl Into<TypeSig>, name: impl Into<String>, ty: impl Into<TypeSig>) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
            ty: ty.into(),
        }
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.declaring, self.name)
    }
}

/// Reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    /// Declaring type (generic instance allowed)
    pub declaring: TypeSig,

    /// Method name
    pub name: String,

    /// Instance method
    pub has_this: bool,

    /// Parameter types
    pub params: Vec<TypeSig>,

    /// Return type
    pub ret: TypeSig,

    /// Generic method instantiation arguments
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Static method reference
    #[must_use]
    pub fn new_static(
        declaring: impl Into<TypeSig>,
        name: impl Into<String>,
        params: Vec<TypeSig>,
        ret: TypeSig,
    ) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
            has_this: false,
            params,
            ret,
            generic_args: Vec::new(),
        }
    }

    /// Instance method reference
    #[must_use]
    pub fn new_instance(
        declaring: impl Into<TypeSig>,
        name: impl Into<String>,
        params: Vec<TypeSig>,
        ret: TypeSig,
    ) -> Self {
        Self {
            has_this: true,
            ..Self::new_static(declaring, name, params, ret)
        }
    }

    /// Constructor reference
    #[must_use]
    pub fn ctor(declaring: impl Into<TypeSig>, params: Vec<TypeSig>) -> Self {
        Self::new_instance(declaring, crate::known::CTOR, params, TypeSig::VOID)
    }

    /// Instantiate as generic method
    #[inline]
    #[must_use]
    pub fn with_generic_args(mut self, args: Vec<TypeSig>) -> Self {
        self.generic_args = args;
        self
    }

    /// Whether this is a constructor reference
    #[inline]
    #[must_use]
    pub fn is_ctor(&self) -> bool {
        self.name == crate::known::CTOR
    }
}

impl Display for MethodRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.has_this {
            f.write_str("instance ")?;
        }
        write!(f, "{} {}::{}", self.ret, self.declaring, self.name)?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            write_list(f, &self.generic_args)?;
            f.write_str(">")?;
        }
        f.write_str("(")?;
        write_list(f, &self.params)?;
        f.write_str(")")
    }
}

impl SigParser<'_> {
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn member_name(&mut self) -> Result<String, SigParseError> {
        if !self.eat("::") {
            return match self.peek() {
                Some(found) => Err(SigParseError::Unexpected {
                    found,
                    pos: self.pos,
                }),
                None => Err(SigParseError::UnexpectedEnd),
            };
        }
        Ok(self.ident()?.to_string())
    }

    fn sig_list(&mut self, close: char) -> Result<Vec<TypeSig>, SigParseError> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_sig()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(found) => {
                    return Err(SigParseError::Unexpected {
                        found,
                        pos: self.pos,
                    })
                }
                None => return Err(SigParseError::UnexpectedEnd),
            }
        }
    }

    fn finish(&mut self) -> Result<(), SigParseError> {
        self.skip_ws();
        if self.pos == self.src.len() {
            Ok(())
        } else {
            Err(SigParseError::Trailing(self.src[self.pos..].to_string()))
        }
    }
}

impl FromStr for FieldRef {
    type Err = SigParseError;

    /// `type declaring::name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = SigParser { src: s, pos: 0 };
        let ty = p.parse_sig()?;
        let declaring = p.parse_sig()?;
        let name = p.member_name()?;
        p.finish()?;
        Ok(Self { declaring, name, ty })
    }
}

impl FromStr for MethodRef {
    type Err = SigParseError;

    /// `[instance ]ret declaring::name[<args>](params)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = SigParser { src: s, pos: 0 };
        let has_this = p.eat("instance ");
        let ret = p.parse_sig()?;
        let declaring = p.parse_sig()?;
        let name = p.member_name()?;
        let generic_args = if p.eat("<") { p.sig_list('>')? } else { Vec::new() };
        if !p.eat("(") {
            return Err(p.peek().map_or(SigParseError::UnexpectedEnd, |found| {
                SigParseError::Unexpected { found, pos: p.pos }
            }));
        }
        let params = p.sig_list(')')?;
        p.finish()?;
        Ok(Self {
            declaring,
            name,
            has_this,
            params,
            ret,
            generic_args,
        })
    }
}
