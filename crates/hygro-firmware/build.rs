fn main() {
    println!("cargo:rerun-if-changed=.env");

    // Forward .env entries as compile-time env vars for `option_env!`.
    // A missing file is fine: defaults apply and WiFi stays unconfigured.
    if let Ok(entries) = dotenvy::dotenv_iter() {
        for (key, value) in entries.flatten() {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
