/// Crate version, overridable at build time through `RELAY_VERSION` so
/// packaged builds can carry their release tag.
pub const VERSION: &str = match option_env!("RELAY_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
