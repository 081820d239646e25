fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Version and build time for the health endpoint
    if let Err(e) = built::write_built_file() {
        panic!("failed to write build info: {e}");
    }
}
