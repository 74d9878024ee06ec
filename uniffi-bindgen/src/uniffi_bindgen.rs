//! Generates Kotlin and Swift bindings for `carlink_security_core`.

fn main() {
    uniffi::uniffi_bindgen_main();
}
