pub mod config;
pub mod connection;
pub mod dedup;
pub mod dispatcher;
pub mod logging;
pub mod pipeline;
pub mod protocol;
pub mod reporting;
pub mod shutdown;
pub mod side_effects;
pub mod trigger;
pub mod workers;
