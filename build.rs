use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=memory.x");

    // Host builds (unit and integration tests) need no linker script.
    let target = env::var("TARGET").unwrap_or_default();
    if !target.starts_with("riscv64") {
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::copy(manifest_dir.join("memory.x"), out_dir.join("memory.x"))
        .expect("failed to copy memory.x");

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
}
