/*!
The compile-time half of `gcmp`.

[`passes::CmpDistancePass`] walks a [`ir::Module`] and replaces each relational integer `icmp`
with a call to the runtime distance function of the same shape, handing over a per-site location
identifier. [`interp::Interpreter`] executes modules, so rewritten code can be run against the
runtime in-process.
*/
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]

pub mod interp;
pub mod ir;
pub mod passes;

pub use gcmp_bolts::Error;
pub use interp::{ExternResolver, Interpreter, NoExterns};
pub use ir::Module;
pub use passes::{CmpDistanceOptions, CmpDistancePass, ModulePass, PassReport};
