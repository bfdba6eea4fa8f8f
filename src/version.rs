const fn version_or_package(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Build version, overridable at compile time through `DASHBOARD_VERSION`.
pub const VERSION: &str = version_or_package(option_env!("DASHBOARD_VERSION"));
