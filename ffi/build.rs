use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let (Ok(crate_dir), Ok(out_dir)) = (env::var("CARGO_MANIFEST_DIR"), env::var("OUT_DIR")) else {
        return;
    };
    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("COURIER_H".to_string()),
        ..Default::default()
    };

    // A header failure must not break the library build itself.
    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(PathBuf::from(out_dir).join("courier.h"));
        }
        Err(e) => println!("cargo:warning=could not generate courier.h: {e}"),
    }
}
