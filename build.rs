fn main() {
    // ESP-IDF build configuration (device builds only, host builds run the unit tests)
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    // Set build timestamp for version tracking
    use std::process::Command;
    let timestamp = Command::new("date")
        .arg("+%Y-%m-%d %H:%M:%S UTC")
        .env("TZ", "UTC")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", timestamp);

    // Re-run if this file or the embedded node configuration changes
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=config/node.json");
    println!("cargo:rerun-if-env-changed=ROUTER_SSID");
    println!("cargo:rerun-if-env-changed=ROUTER_PASSWORD");
}
