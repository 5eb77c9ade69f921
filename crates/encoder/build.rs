//! Build script for vmi-encoder
//!
//! With the `netint` feature, generates struct layouts for the xcoder
//! headers using bindgen. Functions are resolved at runtime, so only
//! types and constants are emitted and nothing is linked.
//!
//! Header discovery:
//! - `XCODER_INCLUDE_DIR`
//! - /usr/local/include
//! - /usr/include

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "netint")]
    xcoder::generate();
}

#[cfg(feature = "netint")]
mod xcoder {
    use std::env;
    use std::path::PathBuf;

    const HEADER: &str = "ni_device_api.h";

    fn find_headers() -> Option<PathBuf> {
        if let Ok(dir) = env::var("XCODER_INCLUDE_DIR") {
            let path = PathBuf::from(&dir);
            if path.join(HEADER).exists() {
                println!("cargo:warning=Found xcoder headers via XCODER_INCLUDE_DIR: {}", dir);
                return Some(path);
            }
        }
        ["/usr/local/include", "/usr/include"]
            .iter()
            .map(PathBuf::from)
            .find(|dir| dir.join(HEADER).exists())
    }

    pub fn generate() {
        println!("cargo:rerun-if-env-changed=XCODER_INCLUDE_DIR");
        println!("cargo:rerun-if-changed=src/netint/wrapper.h");

        let include = find_headers().expect(
            "xcoder headers not found; install libxcoder or set XCODER_INCLUDE_DIR",
        );

        let bindings = bindgen::Builder::default()
            .header("src/netint/wrapper.h")
            .clang_arg(format!("-I{}", include.display()))
            .allowlist_type("ni_session_context_t")
            .allowlist_type("ni_session_data_io_t")
            .allowlist_type("ni_encoder_params_t")
            .allowlist_type("ni_device_context_t")
            .allowlist_type("ni_frame_t")
            .allowlist_type("ni_packet_t")
            .allowlist_var("NI_.*")
            .derive_debug(true)
            .derive_default(true)
            .layout_tests(false)
            .generate()
            .expect("Unable to generate xcoder bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
        bindings
            .write_to_file(out_path.join("xcoder_bindings.rs"))
            .expect("Couldn't write xcoder bindings");
    }
}
