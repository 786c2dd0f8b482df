//! Reads a JSON module, rewrites its comparisons into distance-function calls and writes it back.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
};

use clap::Parser;
use gcmp::LocationConvention;
use gcmp_cc::{
    passes::{DEFAULT_MAP_SIZE, DEFAULT_SEED},
    CmpDistanceOptions, CmpDistancePass, Error, Module, ModulePass,
};

#[derive(Parser, Debug)]
#[command(
    name = "gcmp-opt",
    about = "Instrument relational comparisons with gcmp distance functions"
)]
struct Opt {
    #[arg(help = "The module to instrument, as JSON")]
    input: PathBuf,

    #[arg(short, long, help = "Where to write the instrumented module, defaults to stdout")]
    output: Option<PathBuf>,

    #[arg(long, env = "GCMP_SEED", default_value_t = DEFAULT_SEED, help = "Seed for location identifiers")]
    seed: u64,

    #[arg(
        long,
        env = "GCMP_DISTANCE_MAP_SIZE",
        default_value_t = DEFAULT_MAP_SIZE,
        help = "Location identifiers are drawn below this bound"
    )]
    map_size: u32,

    #[arg(long, help = "Pass the location as first argument instead of through the global")]
    explicit_location: bool,

    #[arg(long, help = "Print the pass report as JSON to stderr")]
    report: bool,
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let opt = Opt::parse();

    let mut module = Module::from_reader(BufReader::new(File::open(&opt.input)?))?;

    let convention = if opt.explicit_location {
        LocationConvention::Explicit
    } else {
        LocationConvention::Global
    };
    let options = CmpDistanceOptions::builder()
        .seed(opt.seed)
        .map_size(opt.map_size)
        .convention(convention)
        .build();
    let report = CmpDistancePass::new(options)?.run(&mut module)?;

    if opt.report {
        serde_json::to_writer_pretty(io::stderr(), &report)?;
        eprintln!();
    }

    match &opt.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            module.to_writer(&mut out)?;
            out.flush()?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            module.to_writer(&mut out)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
