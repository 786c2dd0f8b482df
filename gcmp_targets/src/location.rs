//! The identifier of the comparison site that is about to call a distance function.
//!
//! Instrumented code stores a site's identifier here right before the call, and the call reads
//! it to pick the map slot. There is no synchronisation: a target that runs instrumented
//! comparisons on several threads at once can attribute a distance to the wrong site.

/// The current program location. Written by instrumented code, read by the distance functions.
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static mut __gcmp_program_loc: u32 = 0;

/// Set the current program location.
///
/// # Safety
///
/// Writes an unsynchronised `static mut`. Must not race with instrumented code on other threads.
#[inline]
pub unsafe fn set_location(loc: u32) {
    __gcmp_program_loc = loc;
}

/// The most recently written program location.
///
/// # Safety
///
/// Reads an unsynchronised `static mut`. Must not race with instrumented code on other threads.
#[inline]
#[must_use]
pub unsafe fn current_location() -> u32 {
    __gcmp_program_loc
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use crate::location::{current_location, set_location};

    #[test]
    #[serial]
    fn test_last_write_wins() {
        unsafe {
            set_location(0x1234);
            set_location(0xbeef);
            assert_eq!(current_location(), 0xbeef);
        }
    }
}
