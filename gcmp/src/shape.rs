//! The shape of an instrumented comparison: which relation, at which width, with which signedness.
//!
//! A [`DistanceShape`] names exactly one runtime distance function. Both the rewrite pass and
//! the runtime index their function tables by [`DistanceShape::index`], so the two sides agree
//! on identity without going through strings.

use alloc::string::String;
use core::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

use crate::Error;

/// A relational comparison that can be instrumented.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    /// `a > b`
    Gt = 0,
    /// `a >= b`
    Ge = 1,
    /// `a < b`
    Lt = 2,
    /// `a <= b`
    Le = 3,
}

impl CmpPredicate {
    /// Evaluate the predicate on two ordered values.
    #[inline]
    #[must_use]
    pub fn holds<T: Ord>(self, a: T, b: T) -> bool {
        match self {
            Self::Gt => a > b,
            Self::Ge => a >= b,
            Self::Lt => a < b,
            Self::Le => a <= b,
        }
    }

    /// The source-level operator, for traces.
    #[must_use]
    pub fn operator(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Operand widths with a distance function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum CmpWidth {
    /// 8 bit operands
    W8 = 0,
    /// 16 bit operands
    W16 = 1,
    /// 32 bit operands
    W32 = 2,
    /// 64 bit operands
    W64 = 3,
}

impl CmpWidth {
    /// The width in bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Keep only the low `bits()` bits of `v`.
    #[inline]
    #[must_use]
    pub const fn truncate(self, v: u64) -> u64 {
        match self {
            Self::W64 => v,
            _ => v & ((1_u64 << self.bits()) - 1),
        }
    }

    /// Interpret the low `bits()` bits of `v` as a two's complement number.
    #[inline]
    #[must_use]
    pub const fn sign_extend(self, v: u64) -> i64 {
        let shift = 64 - self.bits();
        ((v << shift) as i64) >> shift
    }
}

impl TryFrom<u32> for CmpWidth {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(Self::W8),
            16 => Ok(Self::W16),
            32 => Ok(Self::W32),
            64 => Ok(Self::W64),
            _ => Err(Error::unsupported(format!(
                "no distance function for {bits} bit operands"
            ))),
        }
    }
}

/// How the operands of a comparison are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum Signedness {
    /// Two's complement ordering
    Signed = 0,
    /// Plain binary ordering
    Unsigned = 1,
}

/// How instrumented code hands the location identifier to the distance function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocationConvention {
    /// Store the identifier into the process-wide location global, then call `f(a, b)`.
    #[default]
    Global,
    /// Pass the identifier as the first argument: `f(loc, a, b)`. The location global is untouched.
    Explicit,
}

/// Identifies a single distance function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistanceShape {
    /// The relation
    pub predicate: CmpPredicate,
    /// The operand width
    pub width: CmpWidth,
    /// The operand ordering
    pub signedness: Signedness,
}

impl DistanceShape {
    /// The number of distinct shapes
    pub const COUNT: usize = 32;

    /// Create a new [`DistanceShape`]
    #[must_use]
    pub const fn new(predicate: CmpPredicate, width: CmpWidth, signedness: Signedness) -> Self {
        Self {
            predicate,
            width,
            signedness,
        }
    }

    /// A dense index in `0..Self::COUNT`.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        (self.signedness as usize) * 16 + (self.predicate as usize) * 4 + self.width as usize
    }

    /// The inverse of [`DistanceShape::index`].
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().find(|shape| shape.index() == index)
    }

    /// Every shape, in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        Signedness::iter().flat_map(|signedness| {
            CmpPredicate::iter().flat_map(move |predicate| {
                CmpWidth::iter().map(move |width| Self::new(predicate, width, signedness))
            })
        })
    }

    /// The name of the runtime function implementing this shape under `convention`.
    #[must_use]
    pub fn symbol(&self, convention: LocationConvention) -> String {
        let suffix = match convention {
            LocationConvention::Global => "",
            LocationConvention::Explicit => "_at",
        };
        format!("__gcmp_{self}{suffix}")
    }

    /// The comparison result on two raw operand bit patterns.
    /// Bits above the width are ignored.
    #[must_use]
    pub fn evaluate(&self, a: u64, b: u64) -> bool {
        match self.signedness {
            Signedness::Signed => self
                .predicate
                .holds(self.width.sign_extend(a), self.width.sign_extend(b)),
            Signedness::Unsigned => self
                .predicate
                .holds(self.width.truncate(a), self.width.truncate(b)),
        }
    }
}

impl fmt::Display for DistanceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.signedness {
            Signedness::Signed => "",
            Signedness::Unsigned => "u",
        };
        let predicate: &'static str = self.predicate.into();
        write!(f, "{sign}{predicate}{}", self.width.bits())
    }
}
