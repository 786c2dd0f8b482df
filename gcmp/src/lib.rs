/*!
`gcmp` turns relational integer comparisons into a distance signal for coverage-guided fuzzers.

This crate holds the pieces shared by the compile-time rewrite (`gcmp_cc`) and the runtime
linked into the target (`gcmp_targets`): the vocabulary of comparison shapes, the
[`observers::DistanceMap`] min-reduced feedback table, and the engine-side
[`feedbacks::MinMapFeedback`] that decides whether an execution reached a new minimum.
*/
#![no_std]
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

#[cfg(feature = "std")]
#[macro_use]
extern crate std;

#[allow(unused_imports)]
#[macro_use]
extern crate alloc;

pub mod feedbacks;
pub mod observers;
pub mod shape;

pub use gcmp_bolts::{Error, Named};
pub use shape::{CmpPredicate, CmpWidth, DistanceShape, LocationConvention, Signedness};
