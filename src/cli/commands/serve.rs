//! `maestro serve` - run the REST control API.

use std::sync::Arc;

use anyhow::Result;

use crate::cli::exit_codes;
use crate::infrastructure::agents::AgentFactory;
use crate::infrastructure::api::{serve, ApiState};

pub async fn handle_serve(bind: &str) -> Result<i32> {
    let state = ApiState::new(Arc::new(AgentFactory::new()));
    serve(state, bind).await?;
    Ok(exit_codes::COMPLETED)
}
