//! Loop context - wires the production components together
//!
//! LoopContext owns the status store, the registry of supervised loops and
//! the controller built on the agent step. Creating one sweeps stale
//! `running` records left by earlier processes.

use std::sync::Arc;

use chrono::Utc;

use crate::agent::{AgentStep, JsonBacklog};
use crate::config::Config;
use crate::error::Result;
use crate::liveness::ProcessProbe;
use crate::manager::{LoopController, LoopControllerConfig, LoopRegistry, StatusReconciler};
use crate::storage::JsonlStatusStore;

/// The controller as wired for real projects
pub type AgentLoopController = LoopController<JsonlStatusStore, JsonBacklog, AgentStep<JsonBacklog>>;

pub struct LoopContext {
    pub config: Config,
    pub store: Arc<JsonlStatusStore>,
    pub registry: Arc<LoopRegistry>,
    pub backlog: Arc<JsonBacklog>,
    pub controller: Arc<AgentLoopController>,
}

impl LoopContext {
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, false)
    }

    /// Like `new`, with agent progress echoed to stdout
    pub fn interactive(config: Config) -> Result<Self> {
        Self::build(config, true)
    }

    fn build(config: Config, echo: bool) -> Result<Self> {
        let store = Arc::new(JsonlStatusStore::new(&config.storage.data_dir)?);
        let registry = Arc::new(LoopRegistry::new());
        let backlog = Arc::new(JsonBacklog::new(config.backlog.file.clone()));

        let step = Arc::new(
            AgentStep::new(config.agent.clone(), backlog.clone(), config.storage.logs_dir()).with_echo(echo),
        );

        let reconciler = StatusReconciler::new(store.clone(), registry.clone(), Arc::new(ProcessProbe), Utc::now());
        let controller = Arc::new(LoopController::with_reconciler(
            store.clone(),
            registry.clone(),
            reconciler,
            backlog.clone(),
            step,
            LoopControllerConfig {
                event_capacity: config.events.capacity,
                ..Default::default()
            },
        ));

        let healed = controller.recover()?;
        for (project, reason) in &healed {
            log::info!("Recovered stale loop for {}: {}", project, reason);
        }

        Ok(Self {
            config,
            store,
            registry,
            backlog,
            controller,
        })
    }
}
