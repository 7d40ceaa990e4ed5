fn main() {
    // With a prebuilt RocksDB (`ROCKSDB_LIB_DIR`), librocksdb-sys skips its own
    // C++ build and never asks cargo to link the C++ runtime, so test and bench
    // binaries fail at link time. Emit the link directive here instead.
    println!("cargo:rerun-if-env-changed=ROCKSDB_LIB_DIR");
    if std::env::var("ROCKSDB_LIB_DIR").is_ok() {
        let target = std::env::var("TARGET").unwrap_or_default();
        if target.contains("musl") {
            // musl builds never use the cached library
        } else if target.contains("linux") {
            println!("cargo:rustc-link-lib=stdc++");
        } else if !target.contains("windows") {
            println!("cargo:rustc-link-lib=c++");
        }
    }
}
