//! The seeded generator that hands out comparison site locations.
//!
//! A rewrite with a fixed seed must assign the same location to the same site on every build,
//! so the stream depends on the seed alone.
use core::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The generator `gcmp` draws locations from. Not cryptographically secure.
pub type StdRand = RomuDuoJrRand;

/// Map `rand` into `0..n` by multiply-shift, without the bias of `rand % n` for small `n`.
#[inline]
#[must_use]
pub fn fast_bound(rand: u64, n: u64) -> u64 {
    debug_assert_ne!(n, 0);
    let mul = u128::from(rand).wrapping_mul(u128::from(n));
    (mul >> 64) as u64
}

/// A seedable stream of 64 bit values.
pub trait Rand: Debug + Serialize + DeserializeOwned {
    /// Restart the stream from `seed`
    fn set_seed(&mut self, seed: u64);

    /// The next value of the stream
    fn next(&mut self) -> u64;

    /// The next value, reduced into `0..upper_bound_excl`
    #[inline]
    fn below(&mut self, upper_bound_excl: u64) -> u64 {
        fast_bound(self.next(), upper_bound_excl)
    }
}

// https://prng.di.unimi.it/splitmix64.c
fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Romu `DuoJr`, see <https://arxiv.org/pdf/2002.11331.pdf>
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomuDuoJrRand {
    x_state: u64,
    y_state: u64,
}

impl RomuDuoJrRand {
    /// A generator whose stream is fully determined by `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let mut rand = Self {
            x_state: 0,
            y_state: 0,
        };
        rand.set_seed(seed);
        rand
    }
}

impl Rand for RomuDuoJrRand {
    fn set_seed(&mut self, mut seed: u64) {
        self.x_state = splitmix64(&mut seed);
        self.y_state = splitmix64(&mut seed);
    }

    #[inline]
    fn next(&mut self) -> u64 {
        let xp = self.x_state;
        self.x_state = 15241094284759029579_u64.wrapping_mul(self.y_state);
        self.y_state = self.y_state.wrapping_sub(xp).rotate_left(27);
        xp
    }
}
