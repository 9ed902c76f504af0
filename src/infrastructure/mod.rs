//! Infrastructure layer: transports, configuration, REST surface, logging.

pub mod agents;
pub mod api;
pub mod config;
pub mod logging;
