//! Upstream event sources and the experiment selector.
//!
//! Every task here talks to the storage server and feeds the ingest queue
//! through an [`IngestHandle`]; none of them touch the consolidator
//! directly. Events are tagged with the experiment they were fetched for,
//! so anything that arrives after a switch is dropped by the ingest loop
//! instead of leaking into the new experiment's store.
//!
//! - [`run_experiment_poller`] refreshes `GET /experiments/` and selects
//!   the first experiment when none is selected yet.
//! - [`run_event_stream`] connects to `ws://…/experiments/{id}/events` and
//!   applies one message per event, in delivery order.
//! - [`run_event_poller`] is the fallback for servers without the socket
//!   endpoint: it fetches `GET /experiments/{id}/events`, which returns
//!   every event produced so far, and feeds only the unseen suffix.
//!
//! Fetch and connection failures are logged and retried on the next tick.
//! Rejected events are logged and skipped. Every task stops once the
//! ingest queue closes.

use std::time::Duration;

use ensemble_core::{ConsolidateError, IngestError, IngestHandle};
use ensemble_types::{Experiment, ExperimentId};
use futures::StreamExt as _;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::MonitorError;

/// Request timeout for every storage server call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the storage server.
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
}

impl StorageClient {
    /// Create a client for the server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Storage`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// List the experiments known to the server.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Storage`] on transport, status, or decode failure.
    pub async fn experiments(&self) -> Result<Vec<Experiment>, MonitorError> {
        let experiments = self
            .client
            .get(format!("{}/experiments/", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(experiments)
    }

    /// Fetch every event produced so far for an experiment, undecoded.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Storage`] on transport, status, or decode failure.
    pub async fn events(
        &self,
        experiment: ExperimentId,
    ) -> Result<Vec<serde_json::Value>, MonitorError> {
        let events = self
            .client
            .get(format!("{}/experiments/{experiment}/events", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(events)
    }

    /// `WebSocket` URL of an experiment's event stream.
    pub fn event_stream_url(&self, experiment: ExperimentId) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/experiments/{experiment}/events")
    }
}

/// Events taken from one poll of the event list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PolledEvents {
    /// Events not yet consumed, in order.
    pub fresh: Vec<serde_json::Value>,
    /// The server's log shrank; the store must be cleared before `fresh`
    /// is replayed.
    pub restarted: bool,
}

/// Tracks how much of an experiment's event list has been consumed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventCursor {
    experiment: Option<ExperimentId>,
    consumed: usize,
}

impl EventCursor {
    /// Take the events of `batch` not yet consumed for `experiment`.
    ///
    /// Switching experiment starts over from the first event. A batch
    /// shorter than what was already consumed means the server restarted
    /// its log; the whole batch is replayed and flagged as a restart.
    pub fn advance(&mut self, experiment: ExperimentId, batch: Vec<serde_json::Value>) -> PolledEvents {
        let mut restarted = false;
        if self.experiment != Some(experiment) {
            self.experiment = Some(experiment);
            self.consumed = 0;
        } else if batch.len() < self.consumed {
            self.consumed = 0;
            restarted = true;
        }
        let fresh: Vec<_> = batch.into_iter().skip(self.consumed).collect();
        self.consumed = self.consumed.saturating_add(fresh.len());
        PolledEvents { fresh, restarted }
    }

    /// Number of events consumed for the current experiment.
    pub const fn consumed(&self) -> usize {
        self.consumed
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// What happened to a fed event, from the source's point of view.
enum Fed {
    /// Applied, or rejected on its own merits; keep going.
    Continue,
    /// The experiment was switched away from; drop the rest.
    Stale,
    /// The ingest queue closed.
    Closed,
}

async fn feed(ingest: &IngestHandle, experiment: ExperimentId, event: serde_json::Value) -> Fed {
    match ingest.ingest_json_for(experiment, event).await {
        Ok(outcome) => {
            debug!(outcome = ?outcome, "Upstream event applied");
            Fed::Continue
        }
        Err(IngestError::Rejected(ConsolidateError::StaleExperiment { .. })) => Fed::Stale,
        Err(IngestError::Rejected(e)) => {
            warn!(experiment = %experiment, error = %e, "Upstream event rejected");
            Fed::Continue
        }
        Err(IngestError::Closed) => Fed::Closed,
    }
}

/// Select the first listed experiment whenever none is selected.
pub async fn run_experiment_poller(client: StorageClient, ingest: IngestHandle, period: Duration) {
    info!(period = ?period, "Experiment poller started");
    let mut interval = ticker(period);

    loop {
        interval.tick().await;

        let experiments = match client.experiments().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to fetch experiments");
                continue;
            }
        };
        debug!(count = experiments.len(), "Fetched experiments");

        let Some(first) = experiments.first() else {
            continue;
        };
        match ingest.experiment().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if ingest.switch_experiment(first.id).await.is_err() {
                    break;
                }
                info!(experiment = %first.id, kind = %first.kind, "Selected experiment");
            }
            Err(_) => break,
        }
    }

    info!("Experiment poller stopped");
}

/// Pull new events for the selected experiment and feed them in order.
pub async fn run_event_poller(client: StorageClient, ingest: IngestHandle, period: Duration) {
    info!(period = ?period, "Event poller started");
    let mut interval = ticker(period);
    let mut cursor = EventCursor::default();

    'poll: loop {
        interval.tick().await;

        let experiment = match ingest.experiment().await {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(_) => break,
        };

        let batch = match client.events(experiment).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(experiment = %experiment, error = %e, "Failed to fetch events");
                continue;
            }
        };

        let polled = cursor.advance(experiment, batch);
        if polled.restarted {
            info!(experiment = %experiment, "Event log restarted, replaying");
            if ingest.reset().await.is_err() {
                break;
            }
        }
        for event in polled.fresh {
            match feed(&ingest, experiment, event).await {
                Fed::Continue => {}
                Fed::Stale => {
                    debug!(experiment = %experiment, "Dropped batch for deselected experiment");
                    continue 'poll;
                }
                Fed::Closed => break 'poll,
            }
        }
    }

    info!(consumed = cursor.consumed(), "Event poller stopped");
}

/// How a connection to an experiment's event stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// The server closed the stream.
    Closed,
    /// Another experiment was selected.
    Switched,
    /// The ingest queue closed.
    Stopped,
}

/// Stream events for the selected experiment over a `WebSocket`.
///
/// One connection is made per selected experiment. When the server closes
/// it, the stream is not reopened until another experiment is selected,
/// since a new connection would replay events already applied. `period`
/// paces reconnect attempts and the check for an experiment switch.
pub async fn run_event_stream(client: StorageClient, ingest: IngestHandle, period: Duration) {
    info!(period = ?period, "Event stream started");
    let mut interval = ticker(period);
    let mut finished: Option<ExperimentId> = None;

    loop {
        interval.tick().await;

        let experiment = match ingest.experiment().await {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(_) => break,
        };
        if finished == Some(experiment) {
            continue;
        }

        let url = client.event_stream_url(experiment);
        match stream_experiment(&url, &ingest, experiment, period).await {
            Ok(StreamEnd::Closed) => {
                info!(experiment = %experiment, "Event stream closed by server");
                finished = Some(experiment);
            }
            Ok(StreamEnd::Switched) => {
                debug!(experiment = %experiment, "Event stream left deselected experiment");
            }
            Ok(StreamEnd::Stopped) => break,
            Err(e) => warn!(experiment = %experiment, url, error = %e, "Event stream failed"),
        }
    }

    info!("Event stream stopped");
}

async fn stream_experiment(
    url: &str,
    ingest: &IngestHandle,
    experiment: ExperimentId,
    period: Duration,
) -> Result<StreamEnd, MonitorError> {
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await?;
    info!(experiment = %experiment, url, "Connected to event stream");
    let mut selection = ticker(period);

    loop {
        tokio::select! {
            message = socket.next() => {
                let Some(message) = message else {
                    return Ok(StreamEnd::Closed);
                };
                let value = match message? {
                    Message::Text(text) => serde_json::from_str::<serde_json::Value>(text.as_str()),
                    Message::Binary(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes),
                    Message::Close(_) => return Ok(StreamEnd::Closed),
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };
                let value = match value {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(experiment = %experiment, error = %e, "Undecodable stream message");
                        continue;
                    }
                };
                match feed(ingest, experiment, value).await {
                    Fed::Continue => {}
                    Fed::Stale => return Ok(StreamEnd::Switched),
                    Fed::Closed => return Ok(StreamEnd::Stopped),
                }
            }
            _ = selection.tick() => {
                match ingest.experiment().await {
                    Ok(Some(id)) if id == experiment => {}
                    Ok(_) => return Ok(StreamEnd::Switched),
                    Err(_) => return Ok(StreamEnd::Stopped),
                }
            }
        }
    }
}
