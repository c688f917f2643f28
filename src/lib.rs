pub mod relay_modules;
pub mod version;
