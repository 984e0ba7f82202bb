fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pkg_version = if let Ok(date) = std::env::var("DATE") {
        format!("{}.{}", env!("CARGO_PKG_VERSION"), date)
    } else {
        env!("CARGO_PKG_VERSION").to_string()
    };

    println!("cargo:rustc-env=CARGO_PKG_VERSION={}", pkg_version);

    let source_version = std::env::var("SOURCE_VERSION").unwrap_or_else(|_| "unknown".into());
    println!(
        "cargo:rustc-env=FULL_VERSION={} {} ({})",
        env!("CARGO_PKG_NAME"),
        pkg_version,
        source_version
    );
    println!("cargo:rustc-env=SIMPLE_VERSION={}", pkg_version);
    println!("cargo:rerun-if-env-changed=DATE");
    println!("cargo:rerun-if-env-changed=SOURCE_VERSION");

    Ok(())
}
