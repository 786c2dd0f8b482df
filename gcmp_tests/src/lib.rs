/*!
Glue for the end-to-end tests: an [`ExternResolver`] that routes the calls and stores of a
rewritten module into the `gcmp_targets` runtime of this process, and a few sample modules.
*/
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions
)]

use gcmp_cc::{
    ir::{BinOp, BlockId, Function, FunctionDecl, Global, InstKind, IntPredicate, Module, Type, Value},
    passes::LOCATION_GLOBAL,
    Error, ExternResolver,
};
use gcmp_targets::{resolve_symbol, set_location, ResolvedDistanceFn};
use log::trace;

/// Runs distance-function calls on the real runtime, and forwards stores to the location global.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeResolver {
    /// Number of distance calls made
    pub calls: usize,
}

impl ExternResolver for RuntimeResolver {
    fn call(&mut self, decl: &FunctionDecl, args: &[u64]) -> Result<u64, Error> {
        let resolved = resolve_symbol(&decl.name)
            .ok_or_else(|| Error::key_not_found(format!("no runtime function `{}`", decl.name)))?;
        self.calls += 1;
        let result = match (resolved, args) {
            (ResolvedDistanceFn::Global(f), [a, b]) => f(*a, *b),
            (ResolvedDistanceFn::Explicit(f), [loc, a, b]) => f(*loc as u32, *a, *b),
            _ => {
                return Err(Error::illegal_argument(format!(
                    "`{}` called with {} arguments",
                    decl.name,
                    args.len()
                )))
            }
        };
        Ok(u64::from(result))
    }

    fn store(&mut self, global: &Global, value: u64) -> Result<(), Error> {
        if global.name == LOCATION_GLOBAL {
            trace!("location <- {value:#x}");
            // The interpreter runs on this thread; nothing else touches the runtime meanwhile.
            unsafe { set_location(value as u32) };
        }
        Ok(())
    }
}

fn cmp(
    f: &mut Function,
    block: BlockId,
    predicate: IntPredicate,
    lhs: Value,
    rhs: Value,
) -> Result<Value, Error> {
    f.push(
        block,
        InstKind::ICmp {
            predicate,
            operands: vec![lhs, rhs],
        },
        Type::BOOL,
    )
    .map(Value::Inst)
}

/// A module with one function, `check(x: i32, y: u8, z: u64) -> i32`:
///
/// ```text
/// if x > 1000 {
///     if y <= 7 { 3 } else if z >= 1 << 40 { 2 } else { 1 }
/// } else if x == 0 {
///     -1
/// } else {
///     0
/// }
/// ```
pub fn check_module() -> Result<Module, Error> {
    let mut f = Function::new(
        "check",
        vec![Type::Int(32), Type::Int(8), Type::Int(64)],
        Type::Int(32),
    );
    let entry = f.add_block("entry");
    let big = f.add_block("big");
    let small = f.add_block("small");
    let low_y = f.add_block("low_y");
    let high_y = f.add_block("high_y");
    let zero = f.add_block("zero");
    let other = f.add_block("other");

    let x_big = cmp(&mut f, entry, IntPredicate::Sgt, Value::Arg(0), Value::i32(1000))?;
    f.push(
        entry,
        InstKind::CondBr {
            cond: x_big,
            on_true: big,
            on_false: small,
        },
        Type::Void,
    )?;

    let y_low = cmp(
        &mut f,
        big,
        IntPredicate::Ule,
        Value::Arg(1),
        Value::Const {
            ty: Type::Int(8),
            bits: 7,
        },
    )?;
    f.push(
        big,
        InstKind::CondBr {
            cond: y_low,
            on_true: low_y,
            on_false: high_y,
        },
        Type::Void,
    )?;
    f.push(
        low_y,
        InstKind::Ret {
            value: Some(Value::i32(3)),
        },
        Type::Void,
    )?;

    let z_huge = cmp(
        &mut f,
        high_y,
        IntPredicate::Uge,
        Value::Arg(2),
        Value::Const {
            ty: Type::Int(64),
            bits: 1 << 40,
        },
    )?;
    let one_more = f.push(
        high_y,
        InstKind::Binary {
            op: BinOp::Add,
            lhs: Value::i32(1),
            rhs: Value::i32(1),
        },
        Type::Int(32),
    )?;
    let picked = f.push(
        high_y,
        InstKind::Select {
            cond: z_huge,
            on_true: Value::Inst(one_more),
            on_false: Value::i32(1),
        },
        Type::Int(32),
    )?;
    f.push(
        high_y,
        InstKind::Ret {
            value: Some(Value::Inst(picked)),
        },
        Type::Void,
    )?;

    let x_zero = cmp(&mut f, small, IntPredicate::Eq, Value::Arg(0), Value::i32(0))?;
    f.push(
        small,
        InstKind::CondBr {
            cond: x_zero,
            on_true: zero,
            on_false: other,
        },
        Type::Void,
    )?;
    f.push(
        zero,
        InstKind::Ret {
            value: Some(Value::i32(0xffff_ffff)),
        },
        Type::Void,
    )?;
    f.push(
        other,
        InstKind::Ret {
            value: Some(Value::i32(0)),
        },
        Type::Void,
    )?;

    let mut module = Module::new("check");
    module.functions.push(f);
    Ok(module)
}

/// A module whose only comparisons cannot be instrumented: a three operand `icmp`, a 128 bit
/// `icmp` and a vector `icmp`.
pub fn ineligible_module() -> Result<Module, Error> {
    let mut f = Function::new(
        "odd",
        vec![
            Type::Int(128),
            Type::Int(128),
            Type::Vector {
                lanes: 4,
                elem_bits: 32,
            },
        ],
        Type::Void,
    );
    let entry = f.add_block("entry");
    f.push(
        entry,
        InstKind::ICmp {
            predicate: IntPredicate::Sgt,
            operands: vec![Value::Arg(0), Value::Arg(1), Value::Arg(0)],
        },
        Type::BOOL,
    )?;
    f.push(
        entry,
        InstKind::ICmp {
            predicate: IntPredicate::Ult,
            operands: vec![Value::Arg(0), Value::Arg(1)],
        },
        Type::BOOL,
    )?;
    f.push(
        entry,
        InstKind::ICmp {
            predicate: IntPredicate::Sle,
            operands: vec![Value::Arg(2), Value::Arg(2)],
        },
        Type::BOOL,
    )?;
    f.push(entry, InstKind::Ret { value: None }, Type::Void)?;

    let mut module = Module::new("odd");
    module.functions.push(f);
    Ok(module)
}
