//! Executes IR functions on concrete integer arguments.
//!
//! Values are carried as raw `u64` bit patterns truncated to their type's width, so only scalar
//! integers up to 64 bits can be computed. Calls to declared functions and stores to globals are
//! handed to an [`ExternResolver`].

use std::collections::HashMap;

use crate::{
    ir::{truncate, BinOp, FunctionDecl, Global, InstId, InstKind, Module, Type, Value},
    Error,
};

/// Default bound on executed instructions per [`Interpreter::run`]
pub const DEFAULT_MAX_STEPS: usize = 1 << 20;

/// Provides everything a module references but does not define.
pub trait ExternResolver {
    /// Call the declared function `decl`.
    fn call(&mut self, decl: &FunctionDecl, args: &[u64]) -> Result<u64, Error>;

    /// Observe a store to `global`. The interpreter keeps its own copy either way.
    fn store(&mut self, _global: &Global, _value: u64) -> Result<(), Error> {
        Ok(())
    }
}

/// A resolver for modules that call nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExterns;

impl ExternResolver for NoExterns {
    fn call(&mut self, decl: &FunctionDecl, _args: &[u64]) -> Result<u64, Error> {
        Err(Error::key_not_found(format!(
            "no implementation for `{}`",
            decl.name
        )))
    }
}

/// Runs functions of a [`Module`]
#[derive(Debug)]
pub struct Interpreter<'m, R> {
    module: &'m Module,
    resolver: R,
    globals: Vec<u64>,
    max_steps: usize,
}

fn bits_of(ty: Type) -> u32 {
    ty.int_bits().unwrap_or(64)
}

impl<'m, R> Interpreter<'m, R>
where
    R: ExternResolver,
{
    /// Create a new [`Interpreter`], globals start at their initial values
    #[must_use]
    pub fn new(module: &'m Module, resolver: R) -> Self {
        Self {
            module,
            resolver,
            globals: module.globals.iter().map(|g| g.init).collect(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Bound the number of instructions a single run may execute
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// The current value of the global called `name`
    #[must_use]
    pub fn global_value(&self, name: &str) -> Option<u64> {
        self.module
            .globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| self.globals[i])
    }

    /// The resolver
    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    /// Run the function `name`. Returns its return value, if it has one.
    pub fn run(&mut self, name: &str, args: &[u64]) -> Result<Option<u64>, Error> {
        let module = self.module;
        let function = module
            .function(name)
            .ok_or_else(|| Error::key_not_found(format!("function `{name}`")))?;
        if args.len() != function.params.len() {
            return Err(Error::illegal_argument(format!(
                "`{name}` takes {} arguments, got {}",
                function.params.len(),
                args.len()
            )));
        }
        let args: Vec<u64> = args
            .iter()
            .zip(&function.params)
            .map(|(v, ty)| truncate(bits_of(*ty), *v))
            .collect();

        let mut results: HashMap<InstId, u64> = HashMap::new();
        let eval = |results: &HashMap<InstId, u64>, value: &Value| -> Result<u64, Error> {
            match value {
                Value::Const { ty, bits } => Ok(truncate(bits_of(*ty), *bits)),
                Value::Arg(n) => args.get(*n as usize).copied().ok_or_else(|| {
                    Error::key_not_found(format!("argument {n} of `{name}`"))
                }),
                Value::Inst(id) => results.get(id).copied().ok_or_else(|| {
                    Error::illegal_state(format!(
                        "instruction {} of `{name}` used before it was computed",
                        id.0
                    ))
                }),
            }
        };

        let mut steps = 0;
        let mut block = 0_usize;
        'blocks: loop {
            let insts = &function
                .blocks
                .get(block)
                .ok_or_else(|| Error::key_not_found(format!("block {block} of `{name}`")))?
                .insts;
            for id in insts {
                steps += 1;
                if steps > self.max_steps {
                    return Err(Error::illegal_state(format!(
                        "`{name}` did not return within {} steps",
                        self.max_steps
                    )));
                }

                let inst = function.inst(*id)?;
                match &inst.kind {
                    InstKind::ICmp {
                        predicate,
                        operands,
                    } => {
                        let [lhs, rhs] = operands.as_slice() else {
                            return Err(Error::unsupported(format!(
                                "icmp with {} operands",
                                operands.len()
                            )));
                        };
                        let bits = match function.value_type(lhs)? {
                            Type::Int(bits) if bits <= 64 => bits,
                            ty => {
                                return Err(Error::unsupported(format!(
                                    "cannot execute an icmp on {ty:?}"
                                )))
                            }
                        };
                        let a = eval(&results, lhs)?;
                        let b = eval(&results, rhs)?;
                        results.insert(*id, u64::from(predicate.evaluate(bits, a, b)));
                    }
                    InstKind::Binary { op, lhs, rhs } => {
                        let a = eval(&results, lhs)?;
                        let b = eval(&results, rhs)?;
                        let v = match op {
                            BinOp::Add => a.wrapping_add(b),
                            BinOp::Sub => a.wrapping_sub(b),
                            BinOp::Mul => a.wrapping_mul(b),
                            BinOp::And => a & b,
                            BinOp::Or => a | b,
                            BinOp::Xor => a ^ b,
                        };
                        results.insert(*id, truncate(bits_of(inst.ty), v));
                    }
                    InstKind::Select {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let v = if eval(&results, cond)? == 0 {
                            eval(&results, on_false)?
                        } else {
                            eval(&results, on_true)?
                        };
                        results.insert(*id, v);
                    }
                    InstKind::Store { global, value } => {
                        let g = module.global(*global)?;
                        let v = truncate(bits_of(g.ty), eval(&results, value)?);
                        self.globals[global.0 as usize] = v;
                        self.resolver.store(g, v)?;
                    }
                    InstKind::Call { callee, args } => {
                        let decl = module.declaration(*callee)?;
                        let values = args
                            .iter()
                            .map(|v| eval(&results, v))
                            .collect::<Result<Vec<_>, _>>()?;
                        let ret = self.resolver.call(decl, &values)?;
                        results.insert(*id, truncate(bits_of(decl.ret), ret));
                    }
                    InstKind::Br { target } => {
                        block = target.0 as usize;
                        continue 'blocks;
                    }
                    InstKind::CondBr {
                        cond,
                        on_true,
                        on_false,
                    } => {
                        let target = if eval(&results, cond)? == 0 {
                            on_false
                        } else {
                            on_true
                        };
                        block = target.0 as usize;
                        continue 'blocks;
                    }
                    InstKind::Ret { value } => {
                        return value.as_ref().map(|v| eval(&results, v)).transpose();
                    }
                }
            }
            return Err(Error::illegal_state(format!(
                "block {block} of `{name}` has no terminator"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        interp::{Interpreter, NoExterns},
        ir::{BinOp, Function, InstKind, IntPredicate, Module, Type, Value},
    };

    /// `fn clamp(x: i32) -> i32 { if x > 100 { 100 } else { x + 1 } }`
    fn clamp_module() -> Module {
        let mut f = Function::new("clamp", vec![Type::Int(32)], Type::Int(32));
        let entry = f.add_block("entry");
        let big = f.add_block("big");
        let small = f.add_block("small");
        let cmp = f
            .push(
                entry,
                InstKind::ICmp {
                    predicate: IntPredicate::Sgt,
                    operands: vec![Value::Arg(0), Value::i32(100)],
                },
                Type::BOOL,
            )
            .unwrap();
        f.push(
            entry,
            InstKind::CondBr {
                cond: Value::Inst(cmp),
                on_true: big,
                on_false: small,
            },
            Type::Void,
        )
        .unwrap();
        f.push(
            big,
            InstKind::Ret {
                value: Some(Value::i32(100)),
            },
            Type::Void,
        )
        .unwrap();
        let inc = f
            .push(
                small,
                InstKind::Binary {
                    op: BinOp::Add,
                    lhs: Value::Arg(0),
                    rhs: Value::i32(1),
                },
                Type::Int(32),
            )
            .unwrap();
        f.push(
            small,
            InstKind::Ret {
                value: Some(Value::Inst(inc)),
            },
            Type::Void,
        )
        .unwrap();

        let mut module = Module::new("clamp");
        module.functions.push(f);
        module
    }

    #[test]
    fn test_runs_branches() {
        let module = clamp_module();
        let mut interp = Interpreter::new(&module, NoExterns);
        assert_eq!(interp.run("clamp", &[5]).unwrap(), Some(6));
        assert_eq!(interp.run("clamp", &[500]).unwrap(), Some(100));
        // -1 is not > 100 signed
        assert_eq!(interp.run("clamp", &[0xffff_ffff]).unwrap(), Some(0));
    }

    #[test]
    fn test_rejects_bad_calls() {
        let module = clamp_module();
        let mut interp = Interpreter::new(&module, NoExterns);
        assert!(interp.run("clamp", &[]).is_err());
        assert!(interp.run("missing", &[1]).is_err());
    }

    #[test]
    fn test_step_limit() {
        let mut f = Function::new("spin", vec![], Type::Void);
        let entry = f.add_block("entry");
        f.push(entry, InstKind::Br { target: entry }, Type::Void)
            .unwrap();
        let mut module = Module::new("spin");
        module.functions.push(f);

        let mut interp = Interpreter::new(&module, NoExterns).with_max_steps(100);
        assert!(interp.run("spin", &[]).is_err());
    }
}
