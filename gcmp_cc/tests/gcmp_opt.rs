use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

use gcmp::LocationConvention;
use gcmp_cc::{
    ir::{BinOp, Function, InstKind, IntPredicate, Type, Value},
    CmpDistanceOptions, CmpDistancePass, Module, ModulePass, PassReport,
};

/// `f(a: i32, b: i32, c: u16)` with a signed and an unsigned relational compare.
fn module() -> Module {
    let params = vec![Type::Int(32), Type::Int(32), Type::Int(16)];
    let mut f = Function::new("f", params, Type::BOOL);
    let entry = f.add_block("entry");
    let lt = f
        .push(
            entry,
            InstKind::ICmp {
                predicate: IntPredicate::Slt,
                operands: vec![Value::Arg(0), Value::Arg(1)],
            },
            Type::BOOL,
        )
        .unwrap();
    let ge = f
        .push(
            entry,
            InstKind::ICmp {
                predicate: IntPredicate::Uge,
                operands: vec![Value::Arg(2), Value::Arg(2)],
            },
            Type::BOOL,
        )
        .unwrap();
    let both = f
        .push(
            entry,
            InstKind::Binary {
                op: BinOp::And,
                lhs: Value::Inst(lt),
                rhs: Value::Inst(ge),
            },
            Type::BOOL,
        )
        .unwrap();
    f.push(
        entry,
        InstKind::Ret {
            value: Some(Value::Inst(both)),
        },
        Type::Void,
    )
    .unwrap();
    let mut module = Module::new("opt");
    module.functions.push(f);
    module
}

/// Writes [`module`] to a file of its own under the temp dir.
fn input(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("gcmp-opt-{}-{name}.json", std::process::id()));
    let mut bytes = vec![];
    module().to_writer(&mut bytes).unwrap();
    fs::write(&path, bytes).unwrap();
    path
}

fn gcmp_opt() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gcmp-opt"));
    cmd.env_remove("RUST_LOG")
        .env_remove("GCMP_SEED")
        .env_remove("GCMP_DISTANCE_MAP_SIZE");
    cmd
}

fn in_process(options: CmpDistanceOptions) -> (Module, PassReport) {
    let mut module = module();
    let report = CmpDistancePass::new(options)
        .unwrap()
        .run(&mut module)
        .unwrap();
    (module, report)
}

fn success(output: Output) -> Output {
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

#[test]
fn test_flags_drive_the_pass() {
    let path = input("flags");
    let output = success(
        gcmp_opt()
            .arg(&path)
            .args(["--seed", "99", "--map-size", "256", "--report"])
            .output()
            .unwrap(),
    );

    let module = Module::from_reader(output.stdout.as_slice()).unwrap();
    let report: PassReport = serde_json::from_slice(&output.stderr).unwrap();
    let (expected, expected_report) =
        in_process(CmpDistanceOptions::builder().seed(99).map_size(256).build());

    assert_eq!(module, expected);
    assert_eq!(report, expected_report);
    assert_eq!(report.instrumented.len(), 2);
    assert!(report.instrumented.iter().all(|s| s.location < 256));
    assert_eq!(report.declared, vec!["__gcmp_lt32", "__gcmp_uge16"]);

    fs::remove_file(path).unwrap();
}

#[test]
fn test_environment_and_explicit_location() {
    let path = input("env");
    let out = path.with_extension("out.json");
    let output = success(
        gcmp_opt()
            .env("GCMP_SEED", "7")
            .env("GCMP_DISTANCE_MAP_SIZE", "16")
            .arg(&path)
            .arg("--explicit-location")
            .arg("--output")
            .arg(&out)
            .output()
            .unwrap(),
    );
    // no report unless asked for
    assert!(output.stderr.is_empty());

    let module = Module::from_reader(fs::read(&out).unwrap().as_slice()).unwrap();
    let (expected, report) = in_process(
        CmpDistanceOptions::builder()
            .seed(7)
            .map_size(16)
            .convention(LocationConvention::Explicit)
            .build(),
    );

    assert_eq!(module, expected);
    assert!(module.globals.is_empty());
    assert!(module.declarations.iter().all(|d| d.name.ends_with("_at")));
    assert!(report.instrumented.iter().all(|s| s.location < 16));

    fs::remove_file(path).unwrap();
    fs::remove_file(out).unwrap();
}

#[test]
fn test_zero_map_size_is_rejected() {
    let path = input("zero");
    let output = gcmp_opt()
        .arg(&path)
        .args(["--map-size", "0"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());

    fs::remove_file(path).unwrap();
}
