use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::model::SessionStatus;
use crate::backend::SessionBackend;
use crate::config::PollingConfig;
use crate::error::SessionError;

/// Events delivered while watching a session
#[derive(Debug)]
pub enum PollEvent {
    /// A status fetch completed; the session is still in the consent phase
    Update(SessionStatus),
    /// Polling is over; no further events follow
    Terminal(PollOutcome),
}

/// Why polling stopped
#[derive(Debug)]
pub enum PollOutcome {
    /// The session reached a state that settles the consent phase
    /// (`BothConsented`, `Started`, `Cancelled`, `Expired`)
    Settled(SessionStatus),
    /// Too many consecutive transient failures; the network is degraded
    /// beyond the retry budget
    Exhausted { failures: u32 },
    /// A non-retryable error (credentials, protocol) ended polling early
    Failed(SessionError),
}

/// Cancels a poll loop without owning its event stream
///
/// Detached from the handle so an orchestrator can keep the means of
/// cancellation while the events are consumed elsewhere.
#[derive(Clone)]
pub struct PollCanceller {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl PollCanceller {
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Cancellable watch over one session's status
///
/// Dropping the handle or calling `cancel` stops the loop promptly, even
/// mid-sleep; the timer does not outlive the handle.
pub struct PollHandle {
    events: mpsc::Receiver<PollEvent>,
    cancel_tx: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Next event, or `None` once the loop has ended
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    /// Stop polling; wakes the loop immediately
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// A detached canceller for this watch
    pub fn canceller(&self) -> PollCanceller {
        PollCanceller {
            cancel_tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Whether the polling task has finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Repeatedly fetches session status until the consent phase settles
///
/// One request at a time per handle: each poll is awaited before the next
/// tick is taken, and missed ticks are delayed rather than burst, so a
/// slow response suppresses the following tick instead of overlapping it.
pub struct SessionPoller {
    backend: Arc<dyn SessionBackend>,
    config: PollingConfig,
}

impl SessionPoller {
    pub fn new(backend: Arc<dyn SessionBackend>, config: PollingConfig) -> Self {
        Self { backend, config }
    }

    /// Start watching a session
    pub fn watch(&self, session_id: &str) -> PollHandle {
        let (events_tx, events) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let backend = Arc::clone(&self.backend);
        let session_id = session_id.to_string();
        let interval = self.config.interval();
        let failure_budget = self.config.failure_budget;

        let task = tokio::spawn(Self::poll_loop(
            backend,
            session_id,
            interval,
            failure_budget,
            events_tx,
            cancel_rx,
        ));

        PollHandle {
            events,
            cancel_tx: Arc::new(cancel_tx),
            task,
        }
    }

    async fn poll_loop(
        backend: Arc<dyn SessionBackend>,
        session_id: String,
        interval: std::time::Duration,
        failure_budget: u32,
        events_tx: mpsc::Sender<PollEvent>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        info!("Polling session {} every {:?}", session_id, interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    debug!("Polling cancelled for session {}", session_id);
                    return;
                }
                _ = ticker.tick() => {}
            }

            // The request itself also races cancellation, so cancel() does
            // not wait out a slow in-flight poll
            let result = tokio::select! {
                _ = cancel_rx.changed() => {
                    debug!("Polling cancelled for session {}", session_id);
                    return;
                }
                result = backend.poll_status(&session_id) => result,
            };

            match result {
                Ok(status) => {
                    consecutive_failures = 0;
                    let settled = status.state.is_poll_terminal();

                    let event = if settled {
                        info!(
                            "Session {} settled at {:?} (both_consented={})",
                            session_id, status.state, status.both_consented
                        );
                        PollEvent::Terminal(PollOutcome::Settled(status))
                    } else {
                        PollEvent::Update(status)
                    };

                    // Delivery also races cancellation so a full channel
                    // with an absent receiver cannot wedge the loop
                    let delivered = tokio::select! {
                        _ = cancel_rx.changed() => return,
                        sent = events_tx.send(event) => sent.is_ok(),
                    };

                    if settled || !delivered {
                        return;
                    }
                }
                Err(e) if e.is_retryable() => {
                    consecutive_failures += 1;
                    warn!(
                        "Poll {}/{} failed for session {}: {}",
                        consecutive_failures, failure_budget, session_id, e
                    );

                    if consecutive_failures >= failure_budget {
                        let event = PollEvent::Terminal(PollOutcome::Exhausted {
                            failures: consecutive_failures,
                        });
                        tokio::select! {
                            _ = cancel_rx.changed() => {}
                            _ = events_tx.send(event) => {}
                        }
                        return;
                    }
                }
                Err(e) => {
                    warn!("Polling aborted for session {}: {}", session_id, e);
                    let event = PollEvent::Terminal(PollOutcome::Failed(e));
                    tokio::select! {
                        _ = cancel_rx.changed() => {}
                        _ = events_tx.send(event) => {}
                    }
                    return;
                }
            }
        }
    }
}
