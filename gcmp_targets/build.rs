// build.rs

use std::{env, fs::File, io::Write, path::Path};

const DEFAULT_DISTANCE_MAP_SIZE: usize = 65536;

fn main() {
    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("constants.rs");

    let map_size: usize = env::var("GCMP_DISTANCE_MAP_SIZE").map_or(
        DEFAULT_DISTANCE_MAP_SIZE,
        |s| {
            s.parse()
                .expect("Could not parse GCMP_DISTANCE_MAP_SIZE as a number")
        },
    );
    assert!(
        map_size.is_power_of_two(),
        "GCMP_DISTANCE_MAP_SIZE must be a power of two, got {map_size}"
    );

    let mut constants_file = File::create(dest_path).expect("Could not create file");
    write!(
        constants_file,
        "// These constants are autogenerated by build.rs

/// The size of the distance feedback map: one slot per location identifier.
pub const GCMP_MAP_SIZE: usize = {map_size};
"
    )
    .expect("Could not write file");

    println!("cargo:rerun-if-env-changed=GCMP_DISTANCE_MAP_SIZE");
    println!("cargo:rerun-if-changed=build.rs");
}
