//! HTTP control surface for submitting and observing workflows.

pub mod handlers;

pub use handlers::{router, serve, ApiState};
