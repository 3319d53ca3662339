use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::client::{AgentDirectory, AgentTransport};
use crate::agent::coordinator::{CaptureSessionCoordinator, RestartPolicy};
use crate::agent::poller::{AgentStatusPoller, PollCadence, PollHandle};
use crate::models::agent::{Agent, AgentSnapshot, DirectoryAgent};
use crate::utils::error::{AppError, AppResult};

/// Timing knobs shared by every agent in the registry
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub roster_interval: Duration,
    pub focused_interval: Duration,
    pub restart: RestartPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            roster_interval: Duration::from_secs(10),
            focused_interval: Duration::from_secs(3),
            restart: RestartPolicy::default(),
        }
    }
}

struct RegisteredAgent {
    coordinator: Arc<CaptureSessionCoordinator>,
    poller: PollHandle,
    /// Configured locally, never removed by a directory refresh
    pinned: bool,
}

/// Outcome of a directory refresh
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Every known agent with its coordinator and poller
pub struct AgentRegistry {
    transport: Arc<dyn AgentTransport>,
    directory: Option<Arc<dyn AgentDirectory>>,
    agents: DashMap<String, RegisteredAgent>,
    settings: RegistrySettings,
    updates: broadcast::Sender<AgentSnapshot>,
}

impl AgentRegistry {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        directory: Option<Arc<dyn AgentDirectory>>,
        settings: RegistrySettings,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            transport,
            directory,
            agents: DashMap::new(),
            settings,
            updates,
        }
    }

    /// Register an agent that is not managed by the directory
    pub fn add_static(&self, record: &DirectoryAgent) {
        let id = record.agent_id();
        info!("Registering static agent {} at {}", id, record.url);
        let entry = self.register(Agent::from_directory(record), true);
        self.agents.insert(id, entry);
    }

    /// Sync the registry with the directory server. On failure the
    /// registry is left as it was.
    pub async fn refresh(&self) -> AppResult<RefreshSummary> {
        let directory = match &self.directory {
            Some(directory) => directory.clone(),
            None => return Ok(RefreshSummary::default()),
        };

        let records = directory.list_agents().await.map_err(|e| {
            warn!("Failed to load agents from directory: {}", e);
            e
        })?;

        let mut summary = RefreshSummary::default();
        let mut listed = HashSet::new();
        for record in &records {
            let id = record.agent_id();
            listed.insert(id.clone());

            // a concurrent refresh must not replace a coordinator it did not create
            match self.agents.entry(id) {
                Entry::Occupied(existing) => {
                    existing.get().coordinator.update_descriptor(record);
                    summary.updated += 1;
                }
                Entry::Vacant(slot) => {
                    info!("Discovered agent {} at {}", slot.key(), record.url);
                    slot.insert(self.register(Agent::from_directory(record), false));
                    summary.added += 1;
                }
            }
        }

        let before = self.agents.len();
        self.agents.retain(|id, entry| {
            let keep = entry.pinned || listed.contains(id);
            if !keep {
                info!("Agent {} no longer listed, removing", id);
            }
            keep
        });
        summary.removed = before - self.agents.len();

        debug!("Directory refresh: {:?}, {} agents known", summary, self.len());
        Ok(summary)
    }

    pub fn get(&self, id: &str) -> AppResult<Arc<CaptureSessionCoordinator>> {
        self.agents
            .get(id)
            .map(|entry| entry.coordinator.clone())
            .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", id)))
    }

    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        let mut list: Vec<AgentSnapshot> = self
            .agents
            .iter()
            .map(|entry| entry.coordinator.snapshot())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Switch an agent between roster and focused polling
    pub fn set_cadence(&self, id: &str, cadence: PollCadence) -> AppResult<()> {
        let mut entry = self
            .agents
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", id)))?;
        if entry.poller.cadence() == cadence && entry.poller.is_running() {
            return Ok(());
        }
        info!("Agent {} now polled at {:?} cadence", id, cadence);
        // the old handle is dropped, which cancels it
        entry.poller = self.spawn_poller(entry.coordinator.clone(), cadence);
        Ok(())
    }

    pub fn cadence(&self, id: &str) -> Option<PollCadence> {
        self.agents.get(id).map(|entry| entry.poller.cadence())
    }

    /// Snapshots published on every agent state change
    pub fn subscribe(&self) -> broadcast::Receiver<AgentSnapshot> {
        self.updates.subscribe()
    }

    /// Stop every poller and forget all agents
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<PollHandle> = ids
            .iter()
            .filter_map(|id| self.agents.remove(id))
            .map(|(_, entry)| entry.poller)
            .collect();
        info!("Stopping {} agent pollers", handles.len());
        join_all(handles.into_iter().map(PollHandle::stop)).await;
    }

    /// Refresh from the directory every `period` until the handle is dropped
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> RefreshHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // failures are logged inside refresh
                let _ = registry.refresh().await;
            }
            debug!("Directory refresh loop stopped");
        });
        RefreshHandle {
            token,
            task: Some(task),
        }
    }

    fn register(&self, agent: Agent, pinned: bool) -> RegisteredAgent {
        let coordinator = Arc::new(
            CaptureSessionCoordinator::new(agent, self.transport.clone(), self.settings.restart)
                .with_updates(self.updates.clone()),
        );
        let poller = self.spawn_poller(coordinator.clone(), PollCadence::Roster);
        RegisteredAgent {
            coordinator,
            poller,
            pinned,
        }
    }

    fn spawn_poller(&self, coordinator: Arc<CaptureSessionCoordinator>, cadence: PollCadence) -> PollHandle {
        let period = match cadence {
            PollCadence::Roster => self.settings.roster_interval,
            PollCadence::Focused => self.settings.focused_interval,
        };
        AgentStatusPoller::new(self.transport.clone(), coordinator).spawn(period, cadence)
    }
}

/// Background directory refresh; dropping the handle stops it
pub struct RefreshHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
