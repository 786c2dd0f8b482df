//! Distance-recording replacements for relational integer comparisons.
//!
//! Every `__gcmp_*` function returns exactly what the comparison it replaces would have returned,
//! and folds the distance of its operands into the [`crate::__gcmp_dsf_map`].
//!
//! | predicate | distance when false |
//! |---|---|
//! | `a > b`  | `b - a + 1` |
//! | `a >= b` | `b - a` |
//! | `a < b`  | `a - b + 1` |
//! | `a <= b` | `a - b` |
//!
//! The distance is `0` when the predicate holds. Differences are computed on `i128`, then
//! saturated to `u32::MAX` if they do not fit the 32 bit slot.

use core::fmt::LowerHex;

use gcmp::{CmpPredicate, DistanceShape, LocationConvention};
use paste::paste;

use crate::{location::current_location, map::reduce_min};

/// An integer operand of an instrumented comparison.
pub trait CmpOperand: Copy + Ord + LowerHex {
    /// The value, losslessly widened.
    fn widen(self) -> i128;
}

macro_rules! impl_cmp_operand {
    ($($t:ty),*) => {
        $(
            impl CmpOperand for $t {
                #[inline]
                fn widen(self) -> i128 {
                    i128::from(self)
                }
            }
        )*
    };
}

impl_cmp_operand!(i8, i16, i32, i64, u8, u16, u32, u64);

#[inline]
fn saturate(distance: i128) -> u32 {
    u32::try_from(distance).unwrap_or(u32::MAX)
}

/// Distance of `a > b` from holding
#[inline]
#[must_use]
pub fn distance_gt<T: CmpOperand>(a: T, b: T) -> u32 {
    if a > b {
        0
    } else {
        saturate(b.widen() - a.widen() + 1)
    }
}

/// Distance of `a >= b` from holding
#[inline]
#[must_use]
pub fn distance_ge<T: CmpOperand>(a: T, b: T) -> u32 {
    if a >= b {
        0
    } else {
        saturate(b.widen() - a.widen())
    }
}

/// Distance of `a < b` from holding
#[inline]
#[must_use]
pub fn distance_lt<T: CmpOperand>(a: T, b: T) -> u32 {
    if a < b {
        0
    } else {
        saturate(a.widen() - b.widen() + 1)
    }
}

/// Distance of `a <= b` from holding
#[inline]
#[must_use]
pub fn distance_le<T: CmpOperand>(a: T, b: T) -> u32 {
    if a <= b {
        0
    } else {
        saturate(a.widen() - b.widen())
    }
}

/// Distance of `predicate(a, b)` from holding
#[inline]
#[must_use]
pub fn distance<T: CmpOperand>(predicate: CmpPredicate, a: T, b: T) -> u32 {
    match predicate {
        CmpPredicate::Gt => distance_gt(a, b),
        CmpPredicate::Ge => distance_ge(a, b),
        CmpPredicate::Lt => distance_lt(a, b),
        CmpPredicate::Le => distance_le(a, b),
    }
}

/// Record the distance at `loc` and hand back the real comparison result.
#[inline]
fn record<T: CmpOperand>(predicate: CmpPredicate, loc: u32, a: T, b: T) -> bool {
    let d = distance(predicate, a, b);
    // Safety: targets execute instrumented comparisons on a single thread per iteration.
    unsafe {
        reduce_min(loc, d);
    }
    #[cfg(feature = "gcmp_debug")]
    log::trace!(
        "pc({loc:#010x}): {a:#x} {} {b:#x} ? (distance {d})",
        predicate.operator()
    );
    predicate.holds(a, b)
}

macro_rules! distance_fn {
    ($name:ident, $variant:ident, $bits:literal, $sty:ty, $uty:ty) => {
        paste! {
            #[doc = concat!("Signed ", stringify!($bits), " bit `", stringify!($name), "`, keyed by the program location.")]
            #[no_mangle]
            pub extern "C" fn [<__gcmp_ $name $bits>](a: $sty, b: $sty) -> bool {
                record(CmpPredicate::$variant, unsafe { current_location() }, a, b)
            }

            #[doc = concat!("Unsigned ", stringify!($bits), " bit `", stringify!($name), "`, keyed by the program location.")]
            #[no_mangle]
            pub extern "C" fn [<__gcmp_u $name $bits>](a: $uty, b: $uty) -> bool {
                record(CmpPredicate::$variant, unsafe { current_location() }, a, b)
            }

            #[doc = concat!("Signed ", stringify!($bits), " bit `", stringify!($name), "`, keyed by `loc`.")]
            #[no_mangle]
            pub extern "C" fn [<__gcmp_ $name $bits _at>](loc: u32, a: $sty, b: $sty) -> bool {
                record(CmpPredicate::$variant, loc, a, b)
            }

            #[doc = concat!("Unsigned ", stringify!($bits), " bit `", stringify!($name), "`, keyed by `loc`.")]
            #[no_mangle]
            pub extern "C" fn [<__gcmp_u $name $bits _at>](loc: u32, a: $uty, b: $uty) -> bool {
                record(CmpPredicate::$variant, loc, a, b)
            }
        }
    };
}

macro_rules! distance_fns_for_width {
    ($bits:literal, $sty:ty, $uty:ty) => {
        distance_fn!(gt, Gt, $bits, $sty, $uty);
        distance_fn!(ge, Ge, $bits, $sty, $uty);
        distance_fn!(lt, Lt, $bits, $sty, $uty);
        distance_fn!(le, Le, $bits, $sty, $uty);
    };
}

distance_fns_for_width!(8, i8, u8);
distance_fns_for_width!(16, i16, u16);
distance_fns_for_width!(32, i32, u32);
distance_fns_for_width!(64, i64, u64);

/// A distance function taking its operands as raw 64 bit patterns; bits above the width are dropped.
pub type ErasedDistanceFn = fn(a: u64, b: u64) -> bool;

/// An `_at` distance function taking its operands as raw 64 bit patterns.
pub type ErasedDistanceAtFn = fn(loc: u32, a: u64, b: u64) -> bool;

macro_rules! erased_row {
    ($name:ident, $t8:ty, $t16:ty, $t32:ty, $t64:ty) => {
        paste! {
            [
                (|a: u64, b: u64| [<$name 8>](a as $t8, b as $t8)) as ErasedDistanceFn,
                (|a: u64, b: u64| [<$name 16>](a as $t16, b as $t16)) as ErasedDistanceFn,
                (|a: u64, b: u64| [<$name 32>](a as $t32, b as $t32)) as ErasedDistanceFn,
                (|a: u64, b: u64| [<$name 64>](a as $t64, b as $t64)) as ErasedDistanceFn,
            ]
        }
    };
}

macro_rules! erased_at_row {
    ($name:ident, $t8:ty, $t16:ty, $t32:ty, $t64:ty) => {
        paste! {
            [
                (|loc: u32, a: u64, b: u64| [<$name 8 _at>](loc, a as $t8, b as $t8)) as ErasedDistanceAtFn,
                (|loc: u32, a: u64, b: u64| [<$name 16 _at>](loc, a as $t16, b as $t16)) as ErasedDistanceAtFn,
                (|loc: u32, a: u64, b: u64| [<$name 32 _at>](loc, a as $t32, b as $t32)) as ErasedDistanceAtFn,
                (|loc: u32, a: u64, b: u64| [<$name 64 _at>](loc, a as $t64, b as $t64)) as ErasedDistanceAtFn,
            ]
        }
    };
}

// Rows are ordered like `DistanceShape::index`: signedness, then predicate, then width.
#[allow(clippy::cast_possible_wrap, trivial_numeric_casts)]
static DISTANCE_FNS: [[ErasedDistanceFn; 4]; 8] = [
    erased_row!(__gcmp_gt, i8, i16, i32, i64),
    erased_row!(__gcmp_ge, i8, i16, i32, i64),
    erased_row!(__gcmp_lt, i8, i16, i32, i64),
    erased_row!(__gcmp_le, i8, i16, i32, i64),
    erased_row!(__gcmp_ugt, u8, u16, u32, u64),
    erased_row!(__gcmp_uge, u8, u16, u32, u64),
    erased_row!(__gcmp_ult, u8, u16, u32, u64),
    erased_row!(__gcmp_ule, u8, u16, u32, u64),
];

#[allow(clippy::cast_possible_wrap, trivial_numeric_casts)]
static DISTANCE_AT_FNS: [[ErasedDistanceAtFn; 4]; 8] = [
    erased_at_row!(__gcmp_gt, i8, i16, i32, i64),
    erased_at_row!(__gcmp_ge, i8, i16, i32, i64),
    erased_at_row!(__gcmp_lt, i8, i16, i32, i64),
    erased_at_row!(__gcmp_le, i8, i16, i32, i64),
    erased_at_row!(__gcmp_ugt, u8, u16, u32, u64),
    erased_at_row!(__gcmp_uge, u8, u16, u32, u64),
    erased_at_row!(__gcmp_ult, u8, u16, u32, u64),
    erased_at_row!(__gcmp_ule, u8, u16, u32, u64),
];

/// The distance function for `shape`, keyed by the program location.
#[must_use]
pub fn distance_fn(shape: DistanceShape) -> ErasedDistanceFn {
    let index = shape.index();
    DISTANCE_FNS[index >> 2][index & 3]
}

/// The `_at` distance function for `shape`, keyed by an explicit location.
#[must_use]
pub fn distance_at_fn(shape: DistanceShape) -> ErasedDistanceAtFn {
    let index = shape.index();
    DISTANCE_AT_FNS[index >> 2][index & 3]
}

/// Either flavour of erased distance function
#[derive(Debug, Clone, Copy)]
pub enum ResolvedDistanceFn {
    /// Reads the program location global
    Global(ErasedDistanceFn),
    /// Takes the location as first argument
    Explicit(ErasedDistanceAtFn),
}

/// Look up the runtime function a rewritten module calls by `symbol`.
#[must_use]
pub fn resolve_symbol(symbol: &str) -> Option<ResolvedDistanceFn> {
    DistanceShape::all().find_map(|shape| {
        if symbol == shape.symbol(LocationConvention::Global) {
            Some(ResolvedDistanceFn::Global(distance_fn(shape)))
        } else if symbol == shape.symbol(LocationConvention::Explicit) {
            Some(ResolvedDistanceFn::Explicit(distance_at_fn(shape)))
        } else {
            None
        }
    })
}
