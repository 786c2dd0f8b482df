//! Observers for the distance feedback map.
//!
//! The map holds one `u32` per location key. Every slot starts at [`DISTANCE_SENTINEL`] and is
//! only ever lowered during an execution, through [`MinReducer`].

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use core::marker::PhantomData;

use gcmp_bolts::{MinReducer, Named, Reducer};

use crate::Error;

/// The initial value of every slot: no distance was recorded this execution.
/// Equal to the largest representable distance.
pub const DISTANCE_SENTINEL: u32 = u32::MAX;

/// A view over a min-reduced distance table.
///
/// The view holds a raw pointer and a length, never a reference, so several views of the same
/// table (the engine's observer and the runtime writing from inside the target) can coexist.
/// Every access reads or writes a single slot through the pointer.
#[derive(Debug)]
pub struct DistanceMap<'a> {
    ptr: *mut u32,
    len: usize,
    phantom: PhantomData<&'a mut [u32]>,
}

impl<'a> DistanceMap<'a> {
    /// Wrap `map`. The contents are left as they are.
    pub fn new(map: &'a mut [u32]) -> Result<Self, Error> {
        if map.is_empty() {
            return Err(Error::illegal_argument(
                "a distance map needs at least one slot",
            ));
        }
        Ok(Self {
            ptr: map.as_mut_ptr(),
            len: map.len(),
            phantom: PhantomData,
        })
    }

    /// Create a new [`DistanceMap`] from a raw pointer and length
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned, and point to `len > 0` initialised `u32`s that stay valid
    /// for `'a`. Nothing may hold a Rust reference into them while this view is used.
    #[must_use]
    pub unsafe fn from_raw_parts_mut(ptr: *mut u32, len: usize) -> Self {
        debug_assert!(!ptr.is_null() && len > 0);
        Self {
            ptr,
            len,
            phantom: PhantomData,
        }
    }

    /// The slot a location key lands in. Keys wrap around the map length.
    #[inline]
    #[must_use]
    pub fn key_index(&self, key: u32) -> usize {
        key as usize % self.len
    }

    /// The value at slot `idx`.
    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> u32 {
        assert!(idx < self.len, "slot {idx} out of {} slots", self.len);
        // Safety: in bounds, and the pointer is valid for `len` slots.
        unsafe { self.ptr.add(idx).read() }
    }

    #[inline]
    fn set(&mut self, idx: usize, value: u32) {
        assert!(idx < self.len, "slot {idx} out of {} slots", self.len);
        unsafe { self.ptr.add(idx).write(value) }
    }

    /// `slot[key] = min(slot[key], value)`
    #[inline]
    pub fn reduce_min(&mut self, key: u32, value: u32) {
        let idx = self.key_index(key);
        let reduced = MinReducer::reduce(self.get(idx), value);
        self.set(idx, reduced);
    }

    /// Restore every slot to [`DISTANCE_SENTINEL`].
    pub fn reset(&mut self) {
        for idx in 0..self.len {
            self.set(idx, DISTANCE_SENTINEL);
        }
    }

    /// An owned copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        (0..self.len).map(|idx| self.get(idx)).collect()
    }

    /// The current value for `key`.
    #[must_use]
    pub fn slot(&self, key: u32) -> u32 {
        self.get(self.key_index(key))
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`, empty maps are refused on creation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots holding a recorded distance.
    #[must_use]
    pub fn filled(&self) -> usize {
        (0..self.len)
            .filter(|idx| self.get(*idx) != DISTANCE_SENTINEL)
            .count()
    }
}

/// Hooks run by the engine around every execution of the target.
pub trait Observer: Named {
    /// Called right before the target runs.
    fn pre_exec(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Called right after the target returned.
    fn post_exec(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// An observer exposing a map of `u32` entries to feedbacks.
pub trait MapObserver: Observer {
    /// The value every entry holds before the target runs.
    fn initial(&self) -> u32;

    /// Number of entries
    fn len(&self) -> usize;

    /// `true` if there are no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry at `idx`
    fn get(&self, idx: usize) -> u32;

    /// Copy all entries out.
    fn to_vec(&self) -> Vec<u32>;
}

/// Observes a [`DistanceMap`]: resets it before each execution so the engine only
/// ever sees the distances of the run that just finished.
#[derive(Debug)]
pub struct DistanceMapObserver<'a> {
    map: DistanceMap<'a>,
    name: String,
}

impl<'a> DistanceMapObserver<'a> {
    /// Creates a new [`DistanceMapObserver`]
    #[must_use]
    pub fn new(name: &str, map: DistanceMap<'a>) -> Self {
        Self {
            map,
            name: name.to_string(),
        }
    }

    /// The observed map
    #[must_use]
    pub fn map(&self) -> &DistanceMap<'a> {
        &self.map
    }

    /// The observed map, mutable
    pub fn map_mut(&mut self) -> &mut DistanceMap<'a> {
        &mut self.map
    }

    /// An owned copy of the distances of the last execution.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        self.map.snapshot()
    }
}

impl Named for DistanceMapObserver<'_> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Observer for DistanceMapObserver<'_> {
    #[inline]
    fn pre_exec(&mut self) -> Result<(), Error> {
        self.map.reset();
        Ok(())
    }
}

impl MapObserver for DistanceMapObserver<'_> {
    #[inline]
    fn initial(&self) -> u32 {
        DISTANCE_SENTINEL
    }

    #[inline]
    fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    fn get(&self, idx: usize) -> u32 {
        self.map.get(idx)
    }

    fn to_vec(&self) -> Vec<u32> {
        self.map.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use crate::observers::{
        DistanceMap, DistanceMapObserver, MapObserver, Observer, DISTANCE_SENTINEL,
    };

    #[test]
    fn test_reduce_min_keeps_smallest() {
        let mut slots = [DISTANCE_SENTINEL; 16];
        let mut map = DistanceMap::new(&mut slots).unwrap();
        map.reduce_min(7, 6);
        assert_eq!(map.slot(7), 6);
        map.reduce_min(7, 2);
        assert_eq!(map.slot(7), 2);
        map.reduce_min(7, 9);
        assert_eq!(map.slot(7), 2);
        assert_eq!(map.filled(), 1);
    }

    #[test]
    fn test_reduce_min_order_independent() {
        let writes = [(3_u32, 40_u32), (3, 12), (5, 1), (3, 99), (5, 0), (3, 12)];

        let mut a = [DISTANCE_SENTINEL; 8];
        let mut b = [DISTANCE_SENTINEL; 8];
        let mut fwd = DistanceMap::new(&mut a).unwrap();
        let mut rev = DistanceMap::new(&mut b).unwrap();
        for (k, v) in writes {
            fwd.reduce_min(k, v);
        }
        for (k, v) in writes.iter().rev() {
            rev.reduce_min(*k, *v);
        }
        assert_eq!(fwd.snapshot(), rev.snapshot());
        assert_eq!(fwd.slot(3), 12);
        assert_eq!(fwd.slot(5), 0);
    }

    #[test]
    fn test_keys_wrap_around() {
        let mut slots = [DISTANCE_SENTINEL; 4];
        let mut map = DistanceMap::new(&mut slots).unwrap();
        map.reduce_min(6, 10);
        assert_eq!(map.key_index(6), 2);
        assert_eq!(map.get(2), 10);
    }

    #[test]
    fn test_reset_then_snapshot_is_all_sentinel() {
        let mut slots = [0_u32; 32];
        let mut map = DistanceMap::new(&mut slots).unwrap();
        map.reduce_min(1, 5);
        map.reset();
        assert!(map.snapshot().iter().all(|v| *v == DISTANCE_SENTINEL));
        assert_eq!(map.filled(), 0);
    }

    #[test]
    fn test_empty_map_rejected() {
        let mut slots: [u32; 0] = [];
        assert!(DistanceMap::new(&mut slots).is_err());
    }

    #[test]
    fn test_views_of_one_table_see_each_other() {
        let mut slots = [DISTANCE_SENTINEL; 8];
        let ptr = slots.as_mut_ptr();
        let mut observer = DistanceMapObserver::new("distances", unsafe {
            DistanceMap::from_raw_parts_mut(ptr, 8)
        });
        let mut writer = unsafe { DistanceMap::from_raw_parts_mut(ptr, 8) };

        observer.pre_exec().unwrap();
        writer.reduce_min(11, 5);
        assert_eq!(observer.get(3), 5);
        writer.reduce_min(3, 7);
        assert_eq!(observer.snapshot()[3], 5);
        assert_eq!(observer.map().filled(), 1);
    }

    #[test]
    fn test_observer_resets_before_execution() {
        let mut slots = [3_u32; 8];
        let mut observer =
            DistanceMapObserver::new("distances", DistanceMap::new(&mut slots).unwrap());
        observer.pre_exec().unwrap();
        assert!(observer.to_vec().iter().all(|v| *v == observer.initial()));
        observer.map_mut().reduce_min(2, 4);
        observer.post_exec().unwrap();
        assert_eq!(observer.get(2), 4);
        assert_eq!(observer.snapshot()[2], 4);
    }
}
