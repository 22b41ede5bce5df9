fn main() {
    // The reference engine needs nothing native.
    #[cfg(feature = "onnxruntime")]
    build_shim();
}

#[cfg(feature = "onnxruntime")]
fn build_shim() {
    println!("cargo:rerun-if-changed=csrc/ort_shim.c");
    println!("cargo:rerun-if-env-changed=ORT_INCLUDE_DIR");
    println!("cargo:rerun-if-env-changed=ORT_LIB_DIR");

    if let Ok(dir) = std::env::var("ORT_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib=onnxruntime");

    let mut build = cc::Build::new();
    build.file("csrc/ort_shim.c");
    if let Ok(dir) = std::env::var("ORT_INCLUDE_DIR") {
        build.include(dir);
    }
    build.compile("ort_shim");
}
