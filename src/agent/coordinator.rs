use log::{debug, error, info, trace, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use crate::agent::client::{AgentTransport, StartCaptureRequest};
use crate::filter::compiler;
use crate::models::agent::{Agent, AgentSnapshot, CaptureState, DirectoryAgent, ObservedStatus};
use crate::models::filter::FilterSpec;
use crate::utils::error::{AppError, AppResult};

/// How a filter change on a live capture waits for the agent to let go of
/// the interface before capturing again
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Give up when the agent still reports capturing after this long
    pub release_timeout: Duration,

    /// Pause between status checks while waiting
    pub poll_interval: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

struct SessionState {
    agent: Agent,

    /// When the most recent local command finished. Poll snapshots requested
    /// at or before this instant are stale for the fields commands set.
    last_command_at: Option<Instant>,
}

/// Owns one agent's capture session.
///
/// Commands are serialised through `commands`; the state lock is only held
/// for field updates and never across a network call, so a poll landing in
/// the middle of a command is merged by [`reconcile`](Self::reconcile)'s
/// precedence rule rather than blocked.
pub struct CaptureSessionCoordinator {
    transport: Arc<dyn AgentTransport>,
    state: RwLock<SessionState>,
    commands: Mutex<()>,
    restart: RestartPolicy,
    updates: Option<broadcast::Sender<AgentSnapshot>>,
}

impl CaptureSessionCoordinator {
    pub fn new(agent: Agent, transport: Arc<dyn AgentTransport>, restart: RestartPolicy) -> Self {
        Self {
            transport,
            state: RwLock::new(SessionState {
                agent,
                last_command_at: None,
            }),
            commands: Mutex::new(()),
            restart,
            updates: None,
        }
    }

    /// Publish a snapshot on `updates` after every state change
    pub fn with_updates(mut self, updates: broadcast::Sender<AgentSnapshot>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn id(&self) -> String {
        self.state.read().agent.id.clone()
    }

    pub fn url(&self) -> String {
        self.state.read().agent.url.clone()
    }

    pub fn agent(&self) -> Agent {
        self.state.read().agent.clone()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        self.state.read().agent.snapshot()
    }

    pub fn update_descriptor(&self, record: &DirectoryAgent) {
        self.state.write().agent.update_descriptor(record);
    }

    /// Select the interface the agent captures on
    pub async fn set_interface(&self, name: &str) -> AppResult<AgentSnapshot> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("No interface selected".to_string()));
        }

        let _guard = self.commands.lock().await;
        let (id, url) = self.target();
        info!("Setting interface of agent {} to {}", id, name);

        let result = self.transport.set_interface(&url, name).await;
        let snapshot = self.commit(|agent| match &result {
            Ok(()) => {
                agent.interface = Some(name.to_string());
                agent.error = None;
                agent.connected = true;
            }
            Err(e) => agent.error = Some(e.operator_message()),
        });
        Self::log_outcome(&id, "set interface", &result);
        result.map(|_| snapshot)
    }

    /// Start capturing on `interface`. `filter` becomes the active filter on
    /// success; structured filters are compiled to BPF first.
    pub async fn start_capture(&self, interface: &str, filter: Option<FilterSpec>) -> AppResult<AgentSnapshot> {
        let _guard = self.commands.lock().await;
        self.start_locked(interface, filter).await
    }

    pub async fn stop_capture(&self) -> AppResult<AgentSnapshot> {
        let _guard = self.commands.lock().await;
        self.stop_locked(true).await
    }

    /// Make `filter` the active filter. A running capture is restarted with
    /// it: stop, wait for the agent to report idle, start on the same
    /// interface.
    pub async fn apply_filter(&self, filter: FilterSpec) -> AppResult<AgentSnapshot> {
        let _guard = self.commands.lock().await;

        let (id, capturing, interface) = {
            let mut state = self.state.write();
            state.agent.active_filter = Some(filter.clone());
            (
                state.agent.id.clone(),
                state.agent.state == CaptureState::Capturing,
                state.agent.interface.clone(),
            )
        };
        self.notify();

        if !capturing {
            debug!("Agent {} is not capturing, filter stored for the next start", id);
            return Ok(self.snapshot());
        }

        let interface = interface
            .filter(|i| !i.is_empty())
            .ok_or_else(|| AppError::Validation("No interface selected".to_string()))?;

        info!("Restarting capture on agent {} ({}) with new filter", id, interface);
        // the new filter stays active even if the restart fails
        self.stop_locked(false).await?;
        self.await_release(&interface).await?;
        self.start_locked(&interface, Some(filter)).await
    }

    /// Merge a polled status snapshot requested at `requested_at`.
    ///
    /// Interfaces and reachability are always taken. Capture state, packet
    /// count and interface are only taken from snapshots requested after the
    /// last local command finished. The active filter and the error message
    /// belong to local commands and are never overwritten.
    pub fn reconcile(&self, observed: ObservedStatus, requested_at: Instant) {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let stale = state.last_command_at.map_or(false, |at| requested_at <= at);
            let agent = &mut state.agent;

            agent.connected = observed.connected;
            if !observed.interfaces.is_empty() {
                agent.interfaces = observed.interfaces;
            }

            if stale {
                trace!("Ignoring stale capture state from agent {}", agent.id);
            } else {
                agent.state = CaptureState::from_reported(&observed.status);
                agent.packets_captured = observed.packets_captured;
                agent.interface = Some(observed.interface).filter(|i| !i.is_empty());

                if agent.active_filter.is_none() && agent.state == CaptureState::Capturing {
                    if let Some(reported) = observed.active_filter.filter(|f| !f.is_empty()) {
                        debug!("Adopting filter reported by agent {}: {}", agent.id, reported);
                        agent.active_filter = Some(FilterSpec::raw(reported));
                    }
                }
            }
        }
        self.notify();
    }

    /// Record that the last status poll could not reach the agent
    pub fn mark_unreachable(&self) {
        let changed = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.agent.connected, false)
        };
        if changed {
            self.notify();
        }
    }

    async fn start_locked(&self, interface: &str, filter: Option<FilterSpec>) -> AppResult<AgentSnapshot> {
        let interface = interface.trim();
        if interface.is_empty() {
            return Err(AppError::Validation("No interface selected".to_string()));
        }

        let (id, url) = self.target();
        if self.state.read().agent.state == CaptureState::Capturing {
            return Err(AppError::Validation("Capture is already running".to_string()));
        }

        let request = StartCaptureRequest {
            interface: interface.to_string(),
            filter: filter.as_ref().and_then(compiler::resolve),
        };
        info!(
            "Starting capture on agent {} interface {} with filter {:?}",
            id, interface, request.filter
        );

        let result = self.transport.start_capture(&url, &request).await;
        let snapshot = self.commit(|agent| match &result {
            Ok(()) => {
                agent.state = CaptureState::Capturing;
                agent.packets_captured = 0;
                agent.active_filter = filter;
                agent.interface = Some(interface.to_string());
                agent.error = None;
                agent.connected = true;
            }
            Err(e) => {
                agent.state = CaptureState::Error;
                agent.error = Some(e.operator_message());
            }
        });
        Self::log_outcome(&id, "start capture", &result);
        result.map(|_| snapshot)
    }

    async fn stop_locked(&self, clear_filter: bool) -> AppResult<AgentSnapshot> {
        let (id, url) = self.target();
        info!("Stopping capture on agent {}", id);

        let result = self.transport.stop_capture(&url).await;
        let snapshot = self.commit(|agent| match &result {
            Ok(()) => {
                agent.state = CaptureState::Idle;
                if clear_filter {
                    agent.active_filter = None;
                }
                agent.error = None;
                agent.connected = true;
            }
            Err(e) => agent.error = Some(e.operator_message()),
        });
        Self::log_outcome(&id, "stop capture", &result);
        result.map(|_| snapshot)
    }

    /// Poll the agent until it no longer reports capturing
    async fn await_release(&self, interface: &str) -> AppResult<()> {
        let deadline = Instant::now() + self.restart.release_timeout;
        loop {
            let requested_at = Instant::now();
            match self.transport.status(&self.url()).await {
                Ok(observed) => {
                    let released = observed.state() != CaptureState::Capturing;
                    self.reconcile(observed, requested_at);
                    if released {
                        return Ok(());
                    }
                }
                Err(e) => debug!("Status check during restart failed: {}", e),
            }

            if Instant::now() >= deadline {
                let err = AppError::Application(format!(
                    "Agent did not release interface {} within {}ms",
                    interface,
                    self.restart.release_timeout.as_millis()
                ));
                warn!("{}", err);
                self.commit(|agent| {
                    agent.state = CaptureState::Error;
                    agent.error = Some(err.operator_message());
                });
                return Err(err);
            }
            tokio::time::sleep(self.restart.poll_interval).await;
        }
    }

    fn target(&self) -> (String, String) {
        let state = self.state.read();
        (state.agent.id.clone(), state.agent.url.clone())
    }

    /// Apply a command's outcome and stamp it for reconcile precedence
    fn commit(&self, apply: impl FnOnce(&mut Agent)) -> AgentSnapshot {
        let snapshot = {
            let mut state = self.state.write();
            apply(&mut state.agent);
            state.last_command_at = Some(Instant::now());
            state.agent.snapshot()
        };
        if let Some(updates) = &self.updates {
            let _ = updates.send(snapshot.clone());
        }
        snapshot
    }

    fn notify(&self) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(self.snapshot());
        }
    }

    fn log_outcome(id: &str, action: &str, result: &AppResult<()>) {
        match result {
            Ok(()) => info!("Agent {}: {} succeeded", id, action),
            Err(AppError::Transport { detail }) | Err(AppError::MalformedReply { detail }) => {
                error!("Agent {}: {} failed: {}", id, action, detail)
            }
            Err(e) => error!("Agent {}: {} failed: {}", id, action, e),
        }
    }
}
