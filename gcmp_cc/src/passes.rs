//! Module passes. [`CmpDistancePass`] rewrites relational integer comparisons into calls to the
//! `gcmp_targets` distance functions.

use core::fmt;

use gcmp::{CmpWidth, DistanceShape, LocationConvention};
use gcmp_bolts::rands::{Rand, StdRand};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    ir::{DeclId, Function, FunctionDecl, InstId, InstKind, IntPredicate, Module, Type, Value},
    Error,
};

/// The global the runtime reads the current location from
pub const LOCATION_GLOBAL: &str = "__gcmp_program_loc";

/// Seed used when none is configured, so builds are reproducible
pub const DEFAULT_SEED: u64 = 0x6763_6d70;

/// Location identifiers are drawn from `0..DEFAULT_MAP_SIZE` unless configured otherwise.
/// Matches the runtime's default distance map size.
pub const DEFAULT_MAP_SIZE: u32 = 65536;

/// A transformation over a whole [`Module`]
pub trait ModulePass {
    /// The pass name, for logs
    fn name(&self) -> &str;

    /// Run the pass. On error the module is left as it was.
    fn run(&mut self, module: &mut Module) -> Result<PassReport, Error>;
}

/// Why a comparison was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// `icmp` with other than two operands
    OperandCount(usize),
    /// The two operands have different types
    OperandTypeMismatch,
    /// Vector, pointer or other non-scalar operands
    NonIntegerOperand,
    /// Integer width without a distance function
    UnsupportedWidth(u32),
    /// `==`, `!=`
    UnsupportedPredicate(IntPredicate),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OperandCount(n) => write!(f, "icmp found with {n} operands"),
            SkipReason::OperandTypeMismatch => write!(f, "operand types differ"),
            SkipReason::NonIntegerOperand => write!(f, "operands are not scalar integers"),
            SkipReason::UnsupportedWidth(bits) => write!(f, "{bits} bit operands"),
            SkipReason::UnsupportedPredicate(p) => write!(f, "predicate {p:?}"),
        }
    }
}

/// The verdict on a single comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Rewrite it with the distance function for this shape
    Eligible(DistanceShape),
    /// Leave it as it is
    Ineligible(SkipReason),
}

/// Decide whether the instruction `id` of `function` gets instrumented.
/// Returns `None` for anything that is not an `icmp`.
pub fn classify(function: &Function, id: InstId) -> Result<Option<Eligibility>, Error> {
    let InstKind::ICmp {
        predicate,
        operands,
    } = &function.inst(id)?.kind
    else {
        return Ok(None);
    };

    let [lhs, rhs] = operands.as_slice() else {
        return Ok(Some(Eligibility::Ineligible(SkipReason::OperandCount(
            operands.len(),
        ))));
    };

    let Some((cmp, signedness)) = predicate.relational() else {
        return Ok(Some(Eligibility::Ineligible(
            SkipReason::UnsupportedPredicate(*predicate),
        )));
    };

    let ty = function.value_type(lhs)?;
    if ty != function.value_type(rhs)? {
        return Ok(Some(Eligibility::Ineligible(
            SkipReason::OperandTypeMismatch,
        )));
    }
    let Some(bits) = ty.int_bits() else {
        return Ok(Some(Eligibility::Ineligible(SkipReason::NonIntegerOperand)));
    };
    let Ok(width) = CmpWidth::try_from(bits) else {
        return Ok(Some(Eligibility::Ineligible(SkipReason::UnsupportedWidth(
            bits,
        ))));
    };

    Ok(Some(Eligibility::Eligible(DistanceShape::new(
        cmp, width, signedness,
    ))))
}

/// Configuration of [`CmpDistancePass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct CmpDistanceOptions {
    /// Seed for the location identifier generator
    #[builder(default = DEFAULT_SEED)]
    pub seed: u64,
    /// Identifiers are drawn from `0..map_size`
    #[builder(default = DEFAULT_MAP_SIZE)]
    pub map_size: u32,
    /// How the identifier reaches the distance function
    #[builder(default)]
    pub convention: LocationConvention,
}

impl Default for CmpDistanceOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A rewritten comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentedSite {
    /// The function containing it
    pub function: String,
    /// The call that replaced the comparison
    pub call: InstId,
    /// Which distance function is called
    pub shape: DistanceShape,
    /// The location identifier of the site
    pub location: u32,
}

/// A comparison that was left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSite {
    /// The function containing it
    pub function: String,
    /// The untouched comparison
    pub inst: InstId,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// What a pass did to a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Rewritten comparisons, in program order
    pub instrumented: Vec<InstrumentedSite>,
    /// Comparisons left alone
    pub skipped: Vec<SkippedSite>,
    /// Distance functions this run added declarations for
    pub declared: Vec<String>,
}

/// Rewrites every eligible `icmp` into a call to the matching distance function.
///
/// For each eligible comparison the pass picks a location identifier, emits the hand-off of that
/// identifier (a store to [`LOCATION_GLOBAL`], or an extra leading argument), calls the distance
/// function on the original operands, and points every user of the comparison at the call.
#[derive(Debug)]
pub struct CmpDistancePass {
    options: CmpDistanceOptions,
    rand: StdRand,
}

impl CmpDistancePass {
    /// Create a new [`CmpDistancePass`]
    pub fn new(options: CmpDistanceOptions) -> Result<Self, Error> {
        if options.map_size == 0 {
            return Err(Error::illegal_argument(
                "the location map size must not be 0",
            ));
        }
        Ok(Self {
            rand: StdRand::with_seed(options.seed),
            options,
        })
    }

    /// The options this pass runs with
    #[must_use]
    pub fn options(&self) -> &CmpDistanceOptions {
        &self.options
    }

    fn next_location(&mut self) -> u32 {
        self.rand.below(u64::from(self.options.map_size)) as u32
    }

    fn signature(&self, shape: DistanceShape) -> FunctionDecl {
        let operand = Type::Int(shape.width.bits());
        let params = match self.options.convention {
            LocationConvention::Global => vec![operand, operand],
            LocationConvention::Explicit => vec![Type::Int(32), operand, operand],
        };
        FunctionDecl {
            name: shape.symbol(self.options.convention),
            params,
            ret: Type::BOOL,
        }
    }

    /// Find or declare the distance function for `shape`, caching it in `table`.
    fn resolve(
        &self,
        module: &mut Module,
        table: &mut [Option<DeclId>; DistanceShape::COUNT],
        shape: DistanceShape,
        report: &mut PassReport,
    ) -> Result<DeclId, Error> {
        if let Some(id) = table[shape.index()] {
            return Ok(id);
        }

        let wanted = self.signature(shape);
        let id = if let Some(id) = module.find_declaration(&wanted.name) {
            let existing = module.declaration(id)?;
            if existing.params != wanted.params || existing.ret != wanted.ret {
                return Err(Error::illegal_state(format!(
                    "`{}` is already declared as ({:?}) -> {:?}, but the distance function is ({:?}) -> {:?}",
                    wanted.name, existing.params, existing.ret, wanted.params, wanted.ret
                )));
            }
            id
        } else {
            report.declared.push(wanted.name.clone());
            module.declare_function(wanted)
        };

        table[shape.index()] = Some(id);
        Ok(id)
    }

    fn instrument(&mut self, module: &mut Module) -> Result<PassReport, Error> {
        // Only added once something is instrumented, so untouched modules stay identical.
        let mut location_global = None;
        let mut table = [None; DistanceShape::COUNT];
        let mut report = PassReport::default();

        for f in 0..module.functions.len() {
            let sites = {
                let function = &module.functions[f];
                let mut sites = vec![];
                for id in function.instructions() {
                    if let Some(eligibility) = classify(function, id)? {
                        sites.push((id, eligibility));
                    }
                }
                sites
            };

            for (id, eligibility) in sites {
                let shape = match eligibility {
                    Eligibility::Eligible(shape) => shape,
                    Eligibility::Ineligible(reason) => {
                        let name = &module.functions[f].name;
                        match reason {
                            SkipReason::OperandCount(_) | SkipReason::OperandTypeMismatch => {
                                warn!("Warning: {reason} in `{name}`, not instrumented");
                            }
                            _ => debug!("skipping icmp {} in `{name}`: {reason}", id.0),
                        }
                        report.skipped.push(SkippedSite {
                            function: name.clone(),
                            inst: id,
                            reason,
                        });
                        continue;
                    }
                };

                let callee = self.resolve(module, &mut table, shape, &mut report)?;
                let location = self.next_location();
                if self.options.convention == LocationConvention::Global
                    && location_global.is_none()
                {
                    location_global =
                        Some(module.get_or_insert_global(LOCATION_GLOBAL, Type::Int(32))?);
                }
                let function = &mut module.functions[f];

                let InstKind::ICmp { operands, .. } = &function.inst(id)?.kind else {
                    return Err(Error::illegal_state("classified instruction is not an icmp"));
                };
                let (lhs, rhs) = (operands[0], operands[1]);

                let args = if let Some(global) = location_global {
                    function.insert_before(
                        id,
                        InstKind::Store {
                            global,
                            value: Value::i32(location),
                        },
                        Type::Void,
                    )?;
                    vec![lhs, rhs]
                } else {
                    vec![Value::i32(location), lhs, rhs]
                };

                let call = function.insert_before(id, InstKind::Call { callee, args }, Type::BOOL)?;
                function.replace_all_uses_with(id, Value::Inst(call));
                function.remove(id)?;

                report.instrumented.push(InstrumentedSite {
                    function: function.name.clone(),
                    call,
                    shape,
                    location,
                });
            }
        }

        Ok(report)
    }
}

impl ModulePass for CmpDistancePass {
    fn name(&self) -> &str {
        "cmp-distance"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassReport, Error> {
        // Work on copies so a failed run leaves both the module and the id sequence untouched.
        let mut work = module.clone();
        let rand = self.rand;
        let report = match self.instrument(&mut work) {
            Ok(report) => report,
            Err(err) => {
                self.rand = rand;
                return Err(err);
            }
        };
        *module = work;

        info!(
            "{}: instrumented {} comparisons in `{}`, skipped {}, declared {} distance functions",
            self.name(),
            report.instrumented.len(),
            module.name,
            report.skipped.len(),
            report.declared.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use gcmp::{CmpPredicate, CmpWidth, DistanceShape, LocationConvention, Signedness};

    use crate::{
        ir::{Function, FunctionDecl, InstKind, IntPredicate, Module, Type, Value},
        passes::{
            classify, CmpDistanceOptions, CmpDistancePass, Eligibility, ModulePass, SkipReason,
            LOCATION_GLOBAL,
        },
    };

    /// One function comparing its two `ty` arguments with `predicate` and returning the result.
    fn single_cmp(ty: Type, predicate: IntPredicate, operands: Vec<Value>) -> Module {
        let mut f = Function::new("f", vec![ty, ty, ty], Type::BOOL);
        let entry = f.add_block("entry");
        let cmp = f
            .push(entry, InstKind::ICmp { predicate, operands }, Type::BOOL)
            .unwrap();
        f.push(
            entry,
            InstKind::Ret {
                value: Some(Value::Inst(cmp)),
            },
            Type::Void,
        )
        .unwrap();
        let mut module = Module::new("m");
        module.functions.push(f);
        module
    }

    fn two_args() -> Vec<Value> {
        vec![Value::Arg(0), Value::Arg(1)]
    }

    #[test]
    fn test_classify() {
        let cases = [
            (
                Type::Int(32),
                IntPredicate::Sgt,
                two_args(),
                Eligibility::Eligible(DistanceShape::new(
                    CmpPredicate::Gt,
                    CmpWidth::W32,
                    Signedness::Signed,
                )),
            ),
            (
                Type::Int(8),
                IntPredicate::Ule,
                two_args(),
                Eligibility::Eligible(DistanceShape::new(
                    CmpPredicate::Le,
                    CmpWidth::W8,
                    Signedness::Unsigned,
                )),
            ),
            (
                Type::Int(32),
                IntPredicate::Eq,
                two_args(),
                Eligibility::Ineligible(SkipReason::UnsupportedPredicate(IntPredicate::Eq)),
            ),
            (
                Type::Int(128),
                IntPredicate::Slt,
                two_args(),
                Eligibility::Ineligible(SkipReason::UnsupportedWidth(128)),
            ),
            (
                Type::Int(1),
                IntPredicate::Ult,
                two_args(),
                Eligibility::Ineligible(SkipReason::UnsupportedWidth(1)),
            ),
            (
                Type::Vector {
                    lanes: 4,
                    elem_bits: 32,
                },
                IntPredicate::Sgt,
                two_args(),
                Eligibility::Ineligible(SkipReason::NonIntegerOperand),
            ),
            (
                Type::Int(32),
                IntPredicate::Sge,
                vec![Value::Arg(0), Value::Arg(1), Value::Arg(2)],
                Eligibility::Ineligible(SkipReason::OperandCount(3)),
            ),
            (
                Type::Int(16),
                IntPredicate::Sge,
                vec![Value::Arg(0), Value::i32(7)],
                Eligibility::Ineligible(SkipReason::OperandTypeMismatch),
            ),
        ];

        for (ty, predicate, operands, expected) in cases {
            let module = single_cmp(ty, predicate, operands);
            let f = &module.functions[0];
            let cmp = f.instructions()[0];
            assert_eq!(classify(f, cmp).unwrap(), Some(expected), "{ty:?} {predicate:?}");
            let ret = f.instructions()[1];
            assert_eq!(classify(f, ret).unwrap(), None);
        }
    }

    #[test]
    fn test_rewrites_with_store_then_call() {
        let mut module = single_cmp(Type::Int(32), IntPredicate::Sgt, two_args());
        let mut pass = CmpDistancePass::new(CmpDistanceOptions::default()).unwrap();
        let report = pass.run(&mut module).unwrap();

        assert_eq!(report.instrumented.len(), 1);
        assert_eq!(report.declared, vec!["__gcmp_gt32".to_string()]);
        let site = &report.instrumented[0];
        assert!(site.location < 65536);

        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name, LOCATION_GLOBAL);

        let f = &module.functions[0];
        let insts = f.instructions();
        assert_eq!(insts.len(), 3);
        assert_eq!(
            f.inst(insts[0]).unwrap().kind,
            InstKind::Store {
                global: crate::ir::GlobalId(0),
                value: Value::i32(site.location),
            }
        );
        assert_eq!(insts[1], site.call);
        assert_eq!(
            f.inst(insts[1]).unwrap().kind,
            InstKind::Call {
                callee: crate::ir::DeclId(0),
                args: two_args(),
            }
        );
        assert_eq!(
            f.inst(insts[2]).unwrap().kind,
            InstKind::Ret {
                value: Some(Value::Inst(site.call)),
            }
        );
    }

    #[test]
    fn test_explicit_convention_passes_location() {
        let mut module = single_cmp(Type::Int(64), IntPredicate::Uge, two_args());
        let options = CmpDistanceOptions::builder()
            .convention(LocationConvention::Explicit)
            .build();
        let report = CmpDistancePass::new(options).unwrap().run(&mut module).unwrap();

        assert!(module.globals.is_empty());
        assert_eq!(report.declared, vec!["__gcmp_uge64_at".to_string()]);
        let decl = &module.declarations[0];
        assert_eq!(decl.params, vec![Type::Int(32), Type::Int(64), Type::Int(64)]);

        let f = &module.functions[0];
        let call = f.inst(report.instrumented[0].call).unwrap();
        assert_eq!(
            call.kind,
            InstKind::Call {
                callee: crate::ir::DeclId(0),
                args: vec![
                    Value::i32(report.instrumented[0].location),
                    Value::Arg(0),
                    Value::Arg(1)
                ],
            }
        );
    }

    #[test]
    fn test_same_shape_shares_one_declaration() {
        let mut f = Function::new("f", vec![Type::Int(32), Type::Int(32)], Type::Int(1));
        let entry = f.add_block("entry");
        let mut last = None;
        for _ in 0..3 {
            last = Some(
                f.push(
                    entry,
                    InstKind::ICmp {
                        predicate: IntPredicate::Slt,
                        operands: two_args(),
                    },
                    Type::BOOL,
                )
                .unwrap(),
            );
        }
        f.push(
            entry,
            InstKind::Ret {
                value: last.map(Value::Inst),
            },
            Type::Void,
        )
        .unwrap();
        let mut module = Module::new("m");
        module.functions.push(f);

        let report = CmpDistancePass::new(CmpDistanceOptions::default())
            .unwrap()
            .run(&mut module)
            .unwrap();
        assert_eq!(report.instrumented.len(), 3);
        assert_eq!(module.declarations.len(), 1);
        assert_eq!(module.declarations[0].name, "__gcmp_lt32");
    }

    #[test]
    fn test_same_seed_same_locations() {
        let options = CmpDistanceOptions::builder().seed(99).map_size(1024).build();
        let mut a = single_cmp(Type::Int(16), IntPredicate::Sle, two_args());
        let mut b = a.clone();
        let ra = CmpDistancePass::new(options).unwrap().run(&mut a).unwrap();
        let rb = CmpDistancePass::new(options).unwrap().run(&mut b).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(a, b);
        assert!(ra.instrumented[0].location < 1024);
    }

    #[test]
    fn test_ineligible_compares_are_untouched() {
        for (ty, predicate, operands) in [
            (Type::Int(32), IntPredicate::Ne, two_args()),
            (Type::Int(128), IntPredicate::Sgt, two_args()),
            (
                Type::Vector {
                    lanes: 2,
                    elem_bits: 64,
                },
                IntPredicate::Ult,
                two_args(),
            ),
            (
                Type::Int(32),
                IntPredicate::Sgt,
                vec![Value::Arg(0), Value::Arg(1), Value::Arg(2)],
            ),
        ] {
            let original = single_cmp(ty, predicate, operands);
            let mut module = original.clone();
            let report = CmpDistancePass::new(CmpDistanceOptions::default())
                .unwrap()
                .run(&mut module)
                .unwrap();
            assert!(report.instrumented.is_empty());
            assert_eq!(report.skipped.len(), 1);
            assert_eq!(module.functions, original.functions);
            assert!(module.declarations.is_empty());
        }
    }

    #[test]
    fn test_conflicting_declaration_aborts_module() {
        let mut module = single_cmp(Type::Int(32), IntPredicate::Sgt, two_args());
        module.declare_function(FunctionDecl {
            name: "__gcmp_gt32".to_string(),
            params: vec![Type::Int(64), Type::Int(64)],
            ret: Type::BOOL,
        });
        let original = module.clone();

        let res = CmpDistancePass::new(CmpDistanceOptions::default())
            .unwrap()
            .run(&mut module);
        assert!(res.is_err());
        assert_eq!(module, original);
    }

    #[test]
    fn test_failed_run_does_not_consume_locations() {
        let clean = single_cmp(Type::Int(32), IntPredicate::Sgt, two_args());
        let mut conflicting = clean.clone();
        // The first site draws a location before the second one hits the bad declaration.
        conflicting.functions[0] = {
            let mut f = Function::new("f", vec![Type::Int(8), Type::Int(8)], Type::BOOL);
            let entry = f.add_block("entry");
            f.push(
                entry,
                InstKind::ICmp {
                    predicate: IntPredicate::Ult,
                    operands: two_args(),
                },
                Type::BOOL,
            )
            .unwrap();
            let cmp = f
                .push(
                    entry,
                    InstKind::ICmp {
                        predicate: IntPredicate::Sgt,
                        operands: two_args(),
                    },
                    Type::BOOL,
                )
                .unwrap();
            f.push(
                entry,
                InstKind::Ret {
                    value: Some(Value::Inst(cmp)),
                },
                Type::Void,
            )
            .unwrap();
            f
        };
        conflicting.declare_function(FunctionDecl {
            name: "__gcmp_gt8".to_string(),
            params: vec![Type::Int(32)],
            ret: Type::BOOL,
        });

        let options = CmpDistanceOptions::builder().seed(5).build();
        let mut reused = CmpDistancePass::new(options).unwrap();
        assert!(reused.run(&mut conflicting).is_err());

        let mut a = clean.clone();
        let mut b = clean;
        let after_abort = reused.run(&mut a).unwrap();
        let fresh = CmpDistancePass::new(options).unwrap().run(&mut b).unwrap();
        assert_eq!(after_abort, fresh);
        assert_eq!(a, b);
    }

    #[test]
    fn test_matching_declaration_is_reused() {
        let mut module = single_cmp(Type::Int(32), IntPredicate::Sgt, two_args());
        module.declare_function(FunctionDecl {
            name: "__gcmp_gt32".to_string(),
            params: vec![Type::Int(32), Type::Int(32)],
            ret: Type::BOOL,
        });
        let report = CmpDistancePass::new(CmpDistanceOptions::default())
            .unwrap()
            .run(&mut module)
            .unwrap();
        assert!(report.declared.is_empty());
        assert_eq!(module.declarations.len(), 1);
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let options = CmpDistanceOptions::builder().map_size(0).build();
        assert!(CmpDistancePass::new(options).is_err());
    }
}
