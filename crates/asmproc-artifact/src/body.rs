//! Method bodies: a lowered instruction list with byte offsets
//!
//! Every [`Op`] has a fixed encoded size. Branch targets are byte offsets of
//! other instructions in the same body, so any edit that changes layout goes
//! through [`MethodBody::recompute_offsets`] (directly or via the editing
//! helpers) to keep targets pointing at the same instructions.

use crate::types::{FieldRef, MethodRef, TypeRef, TypeSig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

/// Lowered instruction set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Nop,
    Ret,
    Pop,
    Dup,
    Ldnull,
    LdcI4(i32),
    Ldstr(String),
    Ldarg(u16),
    Ldloc(u16),
    Stloc(u16),
    Ldfld(FieldRef),
    Stfld(FieldRef),
    Ldsfld(FieldRef),
    Stsfld(FieldRef),
    Ldtoken(TypeSig),
    Call(MethodRef),
    Callvirt(MethodRef),
    Newobj(MethodRef),
    Ldftn(MethodRef),
    Br(u32),
    Brtrue(u32),
    Brfalse(u32),
    Castclass(TypeSig),
}

impl Op {
    /// Encoded size in bytes
    #[must_use]
    pub const fn size(&self) -> u32 {
        match self {
            Self::Nop | Self::Ret | Self::Pop | Self::Dup | Self::Ldnull => 1,
            Self::Ldarg(_) | Self::Ldloc(_) | Self::Stloc(_) => 4,
            Self::Ldftn(_) => 6,
            _ => 5,
        }
    }

    /// Textual mnemonic
    #[must_use]
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Ret => "ret",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Ldnull => "ldnull",
            Self::LdcI4(_) => "ldc.i4",
            Self::Ldstr(_) => "ldstr",
            Self::Ldarg(_) => "ldarg",
            Self::Ldloc(_) => "ldloc",
            Self::Stloc(_) => "stloc",
            Self::Ldfld(_) => "ldfld",
            Self::Stfld(_) => "stfld",
            Self::Ldsfld(_) => "ldsfld",
            Self::Stsfld(_) => "stsfld",
            Self::Ldtoken(_) => "ldtoken",
            Self::Call(_) => "call",
            Self::Callvirt(_) => "callvirt",
            Self::Newobj(_) => "newobj",
            Self::Ldftn(_) => "ldftn",
            Self::Br(_) => "br",
            Self::Brtrue(_) => "brtrue",
            Self::Brfalse(_) => "brfalse",
            Self::Castclass(_) => "castclass",
        }
    }

    /// Branch target, if this is a branch
    #[must_use]
    pub const fn branch_target(&self) -> Option<u32> {
        match self {
            Self::Br(t) | Self::Brtrue(t) | Self::Brfalse(t) => Some(*t),
            _ => None,
        }
    }

    fn branch_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Self::Br(t) | Self::Brtrue(t) | Self::Brfalse(t) => Some(t),
            _ => None,
        }
    }

    /// Method operand of call-like ops
    #[must_use]
    pub const fn method(&self) -> Option<&MethodRef> {
        match self {
            Self::Call(m) | Self::Callvirt(m) | Self::Newobj(m) | Self::Ldftn(m) => Some(m),
            _ => None,
        }
    }

    /// Field operand of field ops
    #[must_use]
    pub const fn field(&self) -> Option<&FieldRef> {
        match self {
            Self::Ldfld(f) | Self::Stfld(f) | Self::Ldsfld(f) | Self::Stsfld(f) => Some(f),
            _ => None,
        }
    }

    /// Net evaluation stack change
    #[must_use]
    pub fn stack_delta(&self) -> i32 {
        let count = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
        match self {
            Self::Nop | Self::Ret | Self::Br(_) | Self::Ldfld(_) | Self::Castclass(_) => 0,
            Self::Pop | Self::Stloc(_) | Self::Stsfld(_) | Self::Brtrue(_) | Self::Brfalse(_) => -1,
            Self::Stfld(_) => -2,
            Self::Dup
            | Self::Ldnull
            | Self::LdcI4(_)
            | Self::Ldstr(_)
            | Self::Ldarg(_)
            | Self::Ldloc(_)
            | Self::Ldsfld(_)
            | Self::Ldtoken(_) => 1,
            // ldftn takes the target object only for virtual lookups, never here
            Self::Ldftn(_) => 1,
            Self::Call(m) | Self::Callvirt(m) => {
                let pushes = i32::from(m.ret != TypeSig::VOID);
                pushes - count(m.params.len()) - i32::from(m.has_this)
            }
            Self::Newobj(m) => 1 - count(m.params.len()),
        }
    }

    /// Visit every type reference in the operand
    pub fn for_each_ref_mut(&mut self, f: &mut dyn FnMut(&mut TypeRef)) {
        match self {
            Self::Ldfld(field) | Self::Stfld(field) | Self::Ldsfld(field) | Self::Stsfld(field) => {
                field.declaring.for_each_ref_mut(f);
                field.ty.for_each_ref_mut(f);
            }
            Self::Call(m) | Self::Callvirt(m) | Self::Newobj(m) | Self::Ldftn(m) => {
                m.declaring.for_each_ref_mut(f);
                m.ret.for_each_ref_mut(f);
                for sig in m.params.iter_mut().chain(m.generic_args.iter_mut()) {
                    sig.for_each_ref_mut(f);
                }
            }
            Self::Ldtoken(sig) | Self::Castclass(sig) => sig.for_each_ref_mut(f),
            _ => {}
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        match self {
            Self::LdcI4(v) => write!(f, " {v}"),
            Self::Ldstr(s) => write!(f, " {s:?}"),
            Self::Ldarg(i) | Self::Ldloc(i) | Self::Stloc(i) => write!(f, " {i}"),
            Self::Ldfld(field) | Self::Stfld(field) | Self::Ldsfld(field) | Self::Stsfld(field) => {
                write!(f, " {field}")
            }
            Self::Call(m) | Self::Callvirt(m) | Self::Newobj(m) | Self::Ldftn(m) => write!(f, " {m}"),
            Self::Br(t) | Self::Brtrue(t) | Self::Brfalse(t) => write!(f, " IL_{t:04x}"),
            Self::Ldtoken(sig) | Self::Castclass(sig) => write!(f, " {sig}"),
            _ => Ok(()),
        }
    }
}

/// Source location of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequencePoint {
    pub document: String,
    pub line: u32,
    pub column: u32,
}

/// One instruction at a byte offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: u32,
    pub op: Op,
    /// Stored in the symbol companion, not in the artifact payload
    #[serde(skip)]
    pub sequence_point: Option<SequencePoint>,
}

impl Instruction {
    /// Instruction without location information
    #[inline]
    #[must_use]
    pub fn new(offset: u32, op: Op) -> Self {
        Self {
            offset,
            op,
            sequence_point: None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.op)
    }
}

/// Method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBody {
    pub init_locals: bool,
    pub locals: Vec<TypeSig>,
    pub instructions: Vec<Instruction>,
    pub max_stack: u16,
}

impl MethodBody {
    /// Body from ops laid out sequentially; branch targets must already be
    /// offsets in that layout
    #[must_use]
    pub fn from_ops(ops: Vec<Op>) -> Self {
        let mut offset = 0;
        let instructions = ops
            .into_iter()
            .map(|op| {
                let ins = Instruction::new(offset, op);
                offset += ins.op.size();
                ins
            })
            .collect();
        let mut body = Self {
            init_locals: true,
            locals: Vec::new(),
            instructions,
            max_stack: 0,
        };
        body.max_stack = body.compute_max_stack();
        body
    }

    /// Total encoded size
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.instructions.iter().map(|i| i.op.size()).sum()
    }

    /// Index of the instruction at `offset`
    #[must_use]
    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        self.instructions.iter().position(|i| i.offset == offset)
    }

    /// Index of the last `ret`
    #[must_use]
    pub fn last_ret(&self) -> Option<usize> {
        self.instructions.iter().rposition(|i| i.op == Op::Ret)
    }

    /// Highest stack depth reached by a linear walk of the body
    #[must_use]
    pub fn compute_max_stack(&self) -> u16 {
        let mut depth = 0i32;
        let mut max = 0i32;
        for ins in &self.instructions {
            depth = (depth + ins.op.stack_delta()).max(0);
            max = max.max(depth);
        }
        u16::try_from(max).unwrap_or(u16::MAX)
    }

    /// Lay instructions out again from offset zero and remap branch targets
    ///
    /// Returns the old→new offset map.
    pub fn recompute_offsets(&mut self) -> HashMap<u32, u32> {
        let origins = self.instructions.iter().map(|i| Some(i.offset)).collect();
        self.relayout(origins, &HashMap::new())
    }

    /// Splice `ops` in front of the instruction at `index`
    ///
    /// Branches that targeted the anchor instruction land on the first
    /// inserted op instead, so inserted code runs on every path reaching the
    /// anchor. Branch ops inside `ops` use the pre-insertion offsets.
    ///
    /// # Panics
    /// Panics if `index` is past the end of the body.
    pub fn insert_before(&mut self, index: usize, ops: Vec<Op>) {
        if ops.is_empty() {
            return;
        }
        let anchor = self.instructions[index].offset;
        let mut origins: Vec<Option<u32>> = self.instructions.iter().map(|i| Some(i.offset)).collect();
        let count = ops.len();
        self.instructions
            .splice(index..index, ops.into_iter().map(|op| Instruction::new(0, op)));
        origins.splice(index..index, std::iter::repeat(None).take(count));
        let redirect = HashMap::from([(anchor, index)]);
        self.relayout(origins, &redirect);
    }

    /// Splice `ops` after the instruction at `index`
    ///
    /// # Panics
    /// Panics if `index` is past the end of the body.
    pub fn insert_after(&mut self, index: usize, ops: Vec<Op>) {
        let mut origins: Vec<Option<u32>> = self.instructions.iter().map(|i| Some(i.offset)).collect();
        let count = ops.len();
        self.instructions
            .splice(index + 1..index + 1, ops.into_iter().map(|op| Instruction::new(0, op)));
        origins.splice(index + 1..index + 1, std::iter::repeat(None).take(count));
        self.relayout(origins, &HashMap::new());
    }

    /// Replace the op at `index`, keeping its identity as a branch target
    ///
    /// # Panics
    /// Panics if `index` is past the end of the body.
    pub fn replace(&mut self, index: usize, op: Op) {
        self.instructions[index].op = op;
        self.recompute_offsets();
    }

    /// Remove the instruction at `index`; branches to it fall through to the
    /// next instruction
    ///
    /// # Panics
    /// Panics if `index` is past the end of the body.
    pub fn remove(&mut self, index: usize) -> Op {
        let removed = self.instructions.remove(index);
        let origins = self.instructions.iter().map(|i| Some(i.offset)).collect();
        let redirect = HashMap::from([(removed.offset, index)]);
        self.relayout(origins, &redirect);
        removed.op
    }

    /// `redirect` maps an old offset to the index (in the new layout) that
    /// now answers for it; an index equal to the length means "end of body"
    fn relayout(&mut self, origins: Vec<Option<u32>>, redirect: &HashMap<u32, usize>) -> HashMap<u32, u32> {
        let mut map = HashMap::with_capacity(self.instructions.len());
        let mut new_offsets = Vec::with_capacity(self.instructions.len());
        let mut offset = 0;
        for (ins, origin) in self.instructions.iter_mut().zip(origins) {
            if let Some(old) = origin {
                map.insert(old, offset);
            }
            ins.offset = offset;
            new_offsets.push(offset);
            offset += ins.op.size();
        }
        for (&old, &index) in redirect {
            let target = new_offsets.get(index).copied().unwrap_or(offset);
            map.insert(old, target);
        }
        for ins in &mut self.instructions {
            if let Some(target) = ins.op.branch_target_mut() {
                if let Some(&new) = map.get(target) {
                    *target = new;
                }
            }
        }
        self.max_stack = self.max_stack.max(self.compute_max_stack());
        map
    }
}
