use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::client::AgentTransport;
use crate::agent::coordinator::CaptureSessionCoordinator;
use crate::utils::error::AppError;

/// How often an agent is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollCadence {
    /// Background refresh for the agent list
    Roster,
    /// A single agent the operator is looking at
    Focused,
}

/// Running poll loop. Dropping the handle stops it.
pub struct PollHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    cadence: PollCadence,
}

impl PollHandle {
    pub fn cadence(&self) -> PollCadence {
        self.cadence
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop polling and wait for the loop to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Periodically fetches an agent's status and feeds it to its coordinator
pub struct AgentStatusPoller {
    transport: Arc<dyn AgentTransport>,
    coordinator: Arc<CaptureSessionCoordinator>,
}

impl AgentStatusPoller {
    pub fn new(transport: Arc<dyn AgentTransport>, coordinator: Arc<CaptureSessionCoordinator>) -> Self {
        Self { transport, coordinator }
    }

    /// Start polling every `period`; the first poll happens immediately
    pub fn spawn(self, period: Duration, cadence: PollCadence) -> PollHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            info!(
                "Polling agent {} every {}ms",
                self.coordinator.id(),
                period.as_millis()
            );
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = self.poll_once(&loop_token) => {}
                }
            }
            debug!("Stopped polling agent {}", self.coordinator.id());
        });

        PollHandle {
            token,
            task: Some(task),
            cadence,
        }
    }

    /// One status fetch. The result is dropped if `token` was cancelled
    /// while the request was in flight.
    pub async fn poll_once(&self, token: &CancellationToken) {
        let url = self.coordinator.url();
        let requested_at = Instant::now();
        let result = self.transport.status(&url).await;

        if token.is_cancelled() {
            debug!("Discarding status of {} from a stopped poller", url);
            return;
        }

        match result {
            Ok(observed) => self.coordinator.reconcile(observed, requested_at),
            Err(AppError::Transport { detail }) => {
                warn!("Agent {} unreachable: {}", self.coordinator.id(), detail);
                self.coordinator.mark_unreachable();
            }
            Err(AppError::MalformedReply { detail }) => {
                warn!("Agent {} sent an unreadable status: {}", self.coordinator.id(), detail)
            }
            Err(e) => warn!("Status poll of agent {} failed: {}", self.coordinator.id(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::coordinator::tests::{Failure, FakeAgent};
    use crate::agent::coordinator::RestartPolicy;
    use crate::models::agent::{Agent, AgentStatus};

    fn setup() -> (Arc<FakeAgent>, Arc<CaptureSessionCoordinator>) {
        let fake = Arc::new(FakeAgent::default());
        let coordinator = Arc::new(CaptureSessionCoordinator::new(
            Agent::new("a1", "lab", "http://lab:8090"),
            fake.clone(),
            RestartPolicy::default(),
        ));
        (fake, coordinator)
    }

    #[tokio::test]
    async fn poll_reconciles_snapshot() {
        let (fake, coordinator) = setup();
        *fake.capturing.lock() = true;
        let poller = AgentStatusPoller::new(fake, coordinator.clone());

        poller.poll_once(&CancellationToken::new()).await;
        assert_eq!(coordinator.snapshot().status, AgentStatus::Capturing);
        assert_eq!(coordinator.snapshot().interface.as_deref(), Some("eth0"));
    }

    #[tokio::test]
    async fn transport_failure_marks_disconnected() {
        let (fake, coordinator) = setup();
        *fake.fail_status.lock() = Some(Failure::Transport);
        let poller = AgentStatusPoller::new(fake, coordinator.clone());

        poller.poll_once(&CancellationToken::new()).await;
        assert_eq!(coordinator.snapshot().status, AgentStatus::Disconnected);
    }

    #[tokio::test]
    async fn application_failure_leaves_state_alone() {
        let (fake, coordinator) = setup();
        *fake.fail_status.lock() = Some(Failure::Application("status unavailable".into()));
        let poller = AgentStatusPoller::new(fake, coordinator.clone());

        poller.poll_once(&CancellationToken::new()).await;
        assert_eq!(coordinator.snapshot().status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn malformed_status_leaves_state_alone() {
        let (fake, coordinator) = setup();
        coordinator.start_capture("eth0", None).await.unwrap();
        *fake.fail_status.lock() = Some(Failure::Malformed);
        let poller = AgentStatusPoller::new(fake, coordinator.clone());

        poller.poll_once(&CancellationToken::new()).await;
        assert_eq!(coordinator.snapshot().status, AgentStatus::Capturing);
    }

    #[tokio::test]
    async fn results_after_cancellation_are_discarded() {
        let (fake, coordinator) = setup();
        *fake.capturing.lock() = true;
        let poller = AgentStatusPoller::new(fake, coordinator.clone());

        let token = CancellationToken::new();
        token.cancel();
        poller.poll_once(&token).await;
        assert_eq!(coordinator.snapshot().status, AgentStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_dropped() {
        let (fake, coordinator) = setup();
        let handle = AgentStatusPoller::new(fake.clone(), coordinator)
            .spawn(Duration::from_secs(3), PollCadence::Focused);

        tokio::time::sleep(Duration::from_millis(6500)).await;
        let polls = fake.calls.lock().len();
        assert_eq!(polls, 3);
        assert!(handle.is_running());

        drop(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.calls.lock().len(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_loop_exit() {
        let (fake, coordinator) = setup();
        let handle = AgentStatusPoller::new(fake, coordinator).spawn(Duration::from_secs(10), PollCadence::Roster);
        assert_eq!(handle.cadence(), PollCadence::Roster);
        handle.stop().await;
    }
}
