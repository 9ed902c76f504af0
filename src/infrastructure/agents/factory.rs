//! Agent factory: maps an agent descriptor to a constructed transport.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentKind, AgentSpec, WorkflowSpec};
use crate::domain::ports::Agent;

use super::{ChatAgent, HttpAgent, JsonRpcAgent};

/// Constructor registered for a custom agent driver.
pub type AgentConstructor =
    dyn Fn(&AgentSpec) -> DomainResult<Arc<dyn Agent>> + Send + Sync;

/// Builds agent instances from descriptors.
///
/// The three built-in transports are always available; `custom` agents
/// resolve the constructor named by their `driver` parameter from the
/// plug-in table.
#[derive(Default)]
pub struct AgentFactory {
    custom: HashMap<String, Box<AgentConstructor>>,
}

impl AgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom agent driver under a name.
    pub fn register(
        &mut self,
        driver: impl Into<String>,
        constructor: impl Fn(&AgentSpec) -> DomainResult<Arc<dyn Agent>> + Send + Sync + 'static,
    ) {
        self.custom.insert(driver.into(), Box::new(constructor));
    }

    /// Construct the agent for one descriptor.
    pub fn build(&self, spec: &AgentSpec) -> DomainResult<Arc<dyn Agent>> {
        match spec.kind {
            AgentKind::ChatLlm => Ok(Arc::new(ChatAgent::from_spec(spec)?)),
            AgentKind::JsonrpcTool => Ok(Arc::new(JsonRpcAgent::from_spec(spec)?)),
            AgentKind::GenericHttp => Ok(Arc::new(HttpAgent::from_spec(spec)?)),
            AgentKind::Custom => {
                let driver = spec
                    .parameters
                    .get("driver")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DomainError::ConfigInvalid(format!(
                            "custom agent '{}' is missing a 'driver' parameter",
                            spec.name
                        ))
                    })?;
                let constructor = self.custom.get(driver).ok_or_else(|| {
                    DomainError::ConfigInvalid(format!(
                        "custom agent '{}' references unknown driver '{driver}'",
                        spec.name
                    ))
                })?;
                constructor(spec)
            }
        }
    }
}

/// Construct one agent instance per descriptor of a workflow.
pub fn build_agents(
    spec: &WorkflowSpec,
    factory: &AgentFactory,
) -> DomainResult<HashMap<String, Arc<dyn Agent>>> {
    let mut agents = HashMap::new();
    for agent_spec in &spec.agents {
        let agent = factory.build(agent_spec)?;
        agents.insert(agent_spec.name.clone(), agent);
    }
    Ok(agents)
}
