//! A small SSA representation of the code the comparison pass works on.
//!
//! It models just enough of a compiler IR for the rewrite: integer and vector types, `icmp`
//! with LLVM's predicates, stores to globals, calls to declared functions and simple control
//! flow. Instructions live in a per-function arena and are linked into blocks by id, so an id
//! stays valid for the whole life of the function even after it is unlinked.

use std::io::{Read, Write};

use gcmp::{CmpPredicate, Signedness};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A scalar integer of the given bit width
    Int(u32),
    /// A vector of integers
    Vector {
        /// Number of lanes
        lanes: u32,
        /// Width of every lane
        elem_bits: u32,
    },
    /// An opaque pointer
    Ptr,
    /// No value
    Void,
}

impl Type {
    /// The type of a comparison result
    pub const BOOL: Type = Type::Int(1);

    /// The bit width of a scalar integer type
    #[must_use]
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }
}

/// Index of an instruction in its function's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

/// Index of a block in its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Index of a global in its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// Index of a function declaration in its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// An operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// A constant; `bits` holds the value truncated to the type's width
    Const {
        /// The constant's type
        ty: Type,
        /// The raw bits
        bits: u64,
    },
    /// The n-th function parameter
    Arg(u32),
    /// The result of an instruction
    Inst(InstId),
}

impl Value {
    /// A 32 bit constant
    #[must_use]
    pub fn i32(v: u32) -> Self {
        Value::Const {
            ty: Type::Int(32),
            bits: u64::from(v),
        }
    }
}

/// Integer comparison predicates, as in LLVM's `icmp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntPredicate {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// unsigned `>`
    Ugt,
    /// unsigned `>=`
    Uge,
    /// unsigned `<`
    Ult,
    /// unsigned `<=`
    Ule,
    /// signed `>`
    Sgt,
    /// signed `>=`
    Sge,
    /// signed `<`
    Slt,
    /// signed `<=`
    Sle,
}

impl IntPredicate {
    /// The relational predicate and operand ordering, or `None` for (in)equality.
    #[must_use]
    pub fn relational(self) -> Option<(CmpPredicate, Signedness)> {
        match self {
            Self::Eq | Self::Ne => None,
            Self::Ugt => Some((CmpPredicate::Gt, Signedness::Unsigned)),
            Self::Uge => Some((CmpPredicate::Ge, Signedness::Unsigned)),
            Self::Ult => Some((CmpPredicate::Lt, Signedness::Unsigned)),
            Self::Ule => Some((CmpPredicate::Le, Signedness::Unsigned)),
            Self::Sgt => Some((CmpPredicate::Gt, Signedness::Signed)),
            Self::Sge => Some((CmpPredicate::Ge, Signedness::Signed)),
            Self::Slt => Some((CmpPredicate::Lt, Signedness::Signed)),
            Self::Sle => Some((CmpPredicate::Le, Signedness::Signed)),
        }
    }

    /// Compare two `bits` wide operands given as raw bit patterns.
    #[must_use]
    pub fn evaluate(self, bits: u32, a: u64, b: u64) -> bool {
        let a = truncate(bits, a);
        let b = truncate(bits, b);
        match self.relational() {
            None => (a == b) == (self == Self::Eq),
            Some((predicate, Signedness::Unsigned)) => predicate.holds(a, b),
            Some((predicate, Signedness::Signed)) => {
                predicate.holds(sign_extend(bits, a), sign_extend(bits, b))
            }
        }
    }
}

/// Keep the low `bits` bits of `v`.
#[must_use]
pub fn truncate(bits: u32, v: u64) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1_u64 << bits) - 1)
    }
}

fn sign_extend(bits: u32, v: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

/// Two-operand integer arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Wrapping `+`
    Add,
    /// Wrapping `-`
    Sub,
    /// Wrapping `*`
    Mul,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

/// What an instruction does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    /// Integer comparison. Operands are a list so malformed comparisons can be represented.
    ICmp {
        /// The predicate
        predicate: IntPredicate,
        /// The compared values, normally two
        operands: Vec<Value>,
    },
    /// Integer arithmetic
    Binary {
        /// The operation
        op: BinOp,
        /// Left operand
        lhs: Value,
        /// Right operand
        rhs: Value,
    },
    /// `cond ? on_true : on_false`
    Select {
        /// The condition
        cond: Value,
        /// Picked if `cond` is non-zero
        on_true: Value,
        /// Picked if `cond` is zero
        on_false: Value,
    },
    /// Store a value to a global
    Store {
        /// The destination
        global: GlobalId,
        /// The stored value
        value: Value,
    },
    /// Call a declared function
    Call {
        /// The callee
        callee: DeclId,
        /// The arguments
        args: Vec<Value>,
    },
    /// Unconditional branch
    Br {
        /// The successor
        target: BlockId,
    },
    /// Conditional branch
    CondBr {
        /// The condition
        cond: Value,
        /// Taken if `cond` is non-zero
        on_true: BlockId,
        /// Taken if `cond` is zero
        on_false: BlockId,
    },
    /// Return from the function
    Ret {
        /// The returned value, if any
        value: Option<Value>,
    },
}

impl InstKind {
    /// All values read by this instruction
    #[must_use]
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::ICmp { operands, .. } => operands.clone(),
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            InstKind::Store { value, .. } => vec![*value],
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Ret { value } => value.iter().copied().collect(),
            InstKind::Br { .. } => vec![],
        }
    }

    fn for_each_operand_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Value),
    {
        match self {
            InstKind::ICmp { operands, .. } => operands.iter_mut().for_each(f),
            InstKind::Call { args, .. } => args.iter_mut().for_each(f),
            InstKind::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Store { value, .. } => f(value),
            InstKind::CondBr { cond, .. } => f(cond),
            InstKind::Ret { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            InstKind::Br { .. } => {}
        }
    }
}

/// An instruction and the type of its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// What it does
    pub kind: InstKind,
    /// Result type, [`Type::Void`] if it produces nothing
    pub ty: Type,
}

/// A basic block: an ordered list of instructions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Label, for humans
    pub name: String,
    /// The linked instructions, in execution order
    pub insts: Vec<InstId>,
}

/// A function with a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name
    pub name: String,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
    /// Blocks, the first one is the entry
    pub blocks: Vec<Block>,
    arena: Vec<Instruction>,
}

impl Function {
    /// A function without blocks
    #[must_use]
    pub fn new(name: &str, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.to_string(),
            params,
            ret,
            blocks: vec![],
            arena: vec![],
        }
    }

    /// Append an empty block
    pub fn add_block(&mut self, name: &str) -> BlockId {
        self.blocks.push(Block {
            name: name.to_string(),
            insts: vec![],
        });
        BlockId((self.blocks.len() - 1) as u32)
    }

    /// Append an instruction to the end of `block`.
    pub fn push(&mut self, block: BlockId, kind: InstKind, ty: Type) -> Result<InstId, Error> {
        let id = self.alloc(kind, ty);
        self.blocks
            .get_mut(block.0 as usize)
            .ok_or_else(|| Error::key_not_found(format!("block {} in `{}`", block.0, self.name)))?
            .insts
            .push(id);
        Ok(id)
    }

    fn alloc(&mut self, kind: InstKind, ty: Type) -> InstId {
        self.arena.push(Instruction { kind, ty });
        InstId((self.arena.len() - 1) as u32)
    }

    /// The instruction behind `id`, linked or not
    pub fn inst(&self, id: InstId) -> Result<&Instruction, Error> {
        self.arena
            .get(id.0 as usize)
            .ok_or_else(|| Error::key_not_found(format!("instruction {} in `{}`", id.0, self.name)))
    }

    /// The type of a value in the context of this function
    pub fn value_type(&self, value: &Value) -> Result<Type, Error> {
        match value {
            Value::Const { ty, .. } => Ok(*ty),
            Value::Arg(n) => self.params.get(*n as usize).copied().ok_or_else(|| {
                Error::key_not_found(format!("argument {n} of `{}`", self.name))
            }),
            Value::Inst(id) => Ok(self.inst(*id)?.ty),
        }
    }

    /// Linked instructions, block by block, in order
    #[must_use]
    pub fn instructions(&self) -> Vec<InstId> {
        self.blocks
            .iter()
            .flat_map(|block| block.insts.iter().copied())
            .collect()
    }

    fn position(&self, id: InstId) -> Result<(usize, usize), Error> {
        self.blocks
            .iter()
            .enumerate()
            .find_map(|(b, block)| block.insts.iter().position(|i| *i == id).map(|p| (b, p)))
            .ok_or_else(|| {
                Error::illegal_argument(format!(
                    "instruction {} is not linked into `{}`",
                    id.0, self.name
                ))
            })
    }

    /// Link a new instruction right before `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: InstId,
        kind: InstKind,
        ty: Type,
    ) -> Result<InstId, Error> {
        let (block, pos) = self.position(anchor)?;
        let id = self.alloc(kind, ty);
        self.blocks[block].insts.insert(pos, id);
        Ok(id)
    }

    /// Unlink `id` from its block. Its arena slot stays, so ids remain stable.
    pub fn remove(&mut self, id: InstId) -> Result<(), Error> {
        let (block, pos) = self.position(id)?;
        self.blocks[block].insts.remove(pos);
        Ok(())
    }

    /// Make every linked user of `old` read `new` instead. Returns the number of operands changed.
    pub fn replace_all_uses_with(&mut self, old: InstId, new: Value) -> usize {
        let mut replaced = 0;
        for id in self.instructions() {
            self.arena[id.0 as usize].kind.for_each_operand_mut(|value| {
                if *value == Value::Inst(old) {
                    *value = new;
                    replaced += 1;
                }
            });
        }
        replaced
    }
}

/// A function implemented elsewhere, e.g. in the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// Symbol name
    pub name: String,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
}

/// A global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    /// Symbol name
    pub name: String,
    /// Value type
    pub ty: Type,
    /// Initial value
    pub init: u64,
    /// Defined outside this module (the linker resolves it)
    pub external: bool,
}

/// A translation unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    /// Module name
    pub name: String,
    /// Globals
    pub globals: Vec<Global>,
    /// External functions
    pub declarations: Vec<FunctionDecl>,
    /// Functions with bodies
    pub functions: Vec<Function>,
}

impl Module {
    /// An empty module
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Find a declaration by symbol name
    #[must_use]
    pub fn find_declaration(&self, name: &str) -> Option<DeclId> {
        self.declarations
            .iter()
            .position(|decl| decl.name == name)
            .map(|i| DeclId(i as u32))
    }

    /// Add a declaration; the caller checks it is not a duplicate.
    pub fn declare_function(&mut self, decl: FunctionDecl) -> DeclId {
        self.declarations.push(decl);
        DeclId((self.declarations.len() - 1) as u32)
    }

    /// The declaration behind `id`
    pub fn declaration(&self, id: DeclId) -> Result<&FunctionDecl, Error> {
        self.declarations
            .get(id.0 as usize)
            .ok_or_else(|| Error::key_not_found(format!("declaration {}", id.0)))
    }

    /// The global behind `id`
    pub fn global(&self, id: GlobalId) -> Result<&Global, Error> {
        self.globals
            .get(id.0 as usize)
            .ok_or_else(|| Error::key_not_found(format!("global {}", id.0)))
    }

    /// Find the global called `name`, or add it as an external one.
    /// Fails if it exists with a different type.
    pub fn get_or_insert_global(&mut self, name: &str, ty: Type) -> Result<GlobalId, Error> {
        if let Some(i) = self.globals.iter().position(|g| g.name == name) {
            let existing = &self.globals[i];
            if existing.ty != ty {
                return Err(Error::illegal_state(format!(
                    "global `{name}` has type {:?}, expected {ty:?}",
                    existing.ty
                )));
            }
            return Ok(GlobalId(i as u32));
        }
        self.globals.push(Global {
            name: name.to_string(),
            ty,
            init: 0,
            external: true,
        });
        Ok(GlobalId((self.globals.len() - 1) as u32))
    }

    /// Find a function by name
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Read a module from JSON
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, Error> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write the module as pretty JSON
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), Error> {
        Ok(serde_json::to_writer_pretty(writer, self)?)
    }
}
