//! `gcmp_targets` contains runtime code, linked into the target itself after the comparison rewrite.
#![no_std]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_must_use,
))]

#[cfg(any(test, feature = "std"))]
#[macro_use]
extern crate std;

#[allow(unused_imports)]
#[macro_use]
extern crate alloc;

include!(concat!(env!("OUT_DIR"), "/constants.rs"));

/// The location global written before every distance call
pub mod location;
pub use location::*;

/// The process-wide distance feedback map
pub mod map;
pub use map::*;

/// One distance-recording function per comparison shape
pub mod distance;
pub use distance::*;
