//! The distance feedback map of the current process.
//!
//! Allocated once for the process lifetime, reset by the engine between executions.

use alloc::vec::Vec;
use core::ptr::addr_of_mut;

use gcmp::observers::{DistanceMap, DistanceMapObserver, DISTANCE_SENTINEL};

use crate::GCMP_MAP_SIZE;

/// The distance map for the current `gcmp` target.
#[no_mangle]
#[allow(non_upper_case_globals)]
#[allow(clippy::large_stack_arrays)]
pub static mut __gcmp_dsf_map: [u32; GCMP_MAP_SIZE] = [DISTANCE_SENTINEL; GCMP_MAP_SIZE];

const _: () = assert!(GCMP_MAP_SIZE > 0, "the distance map needs at least one slot");

/// A view of [`__gcmp_dsf_map`].
///
/// Views never borrow the map, so the engine's observer and the distance functions can each hold
/// one at the same time.
///
/// # Safety
///
/// The map is a `static mut` written by every instrumented comparison, without synchronisation.
/// Views must not be used from another thread while instrumented code runs.
#[inline]
#[must_use]
pub unsafe fn distance_map_mut() -> DistanceMap<'static> {
    DistanceMap::from_raw_parts_mut(addr_of_mut!(__gcmp_dsf_map).cast::<u32>(), GCMP_MAP_SIZE)
}

/// Fold `value` into the slot of `key`: `slot = min(slot, value)`.
///
/// # Safety
///
/// See [`distance_map_mut`].
#[inline]
pub unsafe fn reduce_min(key: u32, value: u32) {
    distance_map_mut().reduce_min(key, value);
}

/// Restore every slot of [`__gcmp_dsf_map`] to the sentinel.
///
/// # Safety
///
/// See [`distance_map_mut`].
pub unsafe fn reset_distance_map() {
    distance_map_mut().reset();
}

/// Copy [`__gcmp_dsf_map`] out.
///
/// # Safety
///
/// See [`distance_map_mut`].
#[must_use]
pub unsafe fn distance_map_snapshot() -> Vec<u32> {
    distance_map_mut().snapshot()
}

/// Create a new [`DistanceMapObserver`] of the [`__gcmp_dsf_map`].
///
/// # Safety
///
/// See [`distance_map_mut`].
#[must_use]
pub unsafe fn distance_map_observer(name: &str) -> DistanceMapObserver<'static> {
    DistanceMapObserver::new(name, distance_map_mut())
}
