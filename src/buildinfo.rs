// https://doc.rust-lang.org/cargo/reference/environment-variables.html#environment-variables-cargo-sets-for-crates

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// `name version`, as shown in the health endpoint and startup log.
pub fn version_full() -> String {
    format!("{} {}", name(), version())
}
