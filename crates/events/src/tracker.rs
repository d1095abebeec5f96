use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use provision_core::OutputStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::types::{Event, OutputChunk, ProgressEvent, ProgressKind, Stage};

/// Output chunks beyond this are evicted oldest-first. Stage and warning
/// entries are never evicted.
const HISTORY_BYTES_LIMIT: usize = 10 * 1024 * 1024;
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Tracking stream not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid stage transition from '{from}' to '{to}'")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Tracking stream {0} already finished")]
    Finished(Uuid),
}

/// Events at or after a cursor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PollResult {
    pub events: Vec<ProgressEvent>,
    /// Pass back as `cursor` to receive only newer events.
    pub next_cursor: u64,
    pub stage: Stage,
    pub instance_id: Option<String>,
    pub finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingSnapshot {
    pub tracking_id: Uuid,
    pub stage: Stage,
    pub instance_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub event_count: u64,
}

struct StreamInner {
    stage: Stage,
    instance_id: Option<String>,
    history: VecDeque<ProgressEvent>,
    total_bytes: usize,
    next_seq: u64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl StreamInner {
    fn evict_output(&mut self, incoming: usize) {
        while self.total_bytes.saturating_add(incoming) > HISTORY_BYTES_LIMIT {
            let Some(pos) = self
                .history
                .iter()
                .position(|e| e.kind == ProgressKind::Output)
            else {
                break;
            };
            if let Some(evicted) = self.history.remove(pos) {
                self.total_bytes = self.total_bytes.saturating_sub(evicted.approx_bytes());
            }
        }
    }
}

struct TrackingStream {
    id: Uuid,
    inner: RwLock<StreamInner>,
    sender: broadcast::Sender<ProgressEvent>,
}

impl TrackingStream {
    fn new(id: Uuid) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            id,
            inner: RwLock::new(StreamInner {
                stage: Stage::Preparing,
                instance_id: None,
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                next_seq: 0,
                started_at: Utc::now(),
                finished_at: None,
            }),
            sender,
        }
    }

    /// Append under the write lock and broadcast before releasing it, so a
    /// concurrent `subscribe` sees each event exactly once.
    fn push(
        &self,
        stage: Option<Stage>,
        kind: ProgressKind,
        message: String,
        output: Option<OutputChunk>,
    ) -> Result<ProgressEvent, TrackerError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if inner.finished_at.is_some() {
            return Err(TrackerError::Finished(self.id));
        }
        if let Some(next) = stage {
            if inner.next_seq > 0 && !inner.stage.can_advance_to(next) {
                return Err(TrackerError::InvalidTransition {
                    from: inner.stage,
                    to: next,
                });
            }
            inner.stage = next;
            if next.is_terminal() {
                inner.finished_at = Some(Utc::now());
            }
        }

        let event = ProgressEvent {
            tracking_id: self.id,
            seq: inner.next_seq,
            stage: inner.stage,
            kind,
            message,
            instance_id: inner.instance_id.clone(),
            output,
            timestamp: Utc::now(),
        };
        inner.next_seq += 1;

        let bytes = event.approx_bytes();
        inner.evict_output(bytes);
        inner.history.push_back(event.clone());
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);

        let _ = self.sender.send(event.clone());
        Ok(event)
    }

    fn subscribe(&self) -> (Vec<ProgressEvent>, Option<broadcast::Receiver<ProgressEvent>>) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let history: Vec<_> = inner.history.iter().cloned().collect();
        let rx = inner.finished_at.is_none().then(|| self.sender.subscribe());
        (history, rx)
    }
}

/// Cursor over one tracking stream. Events arrive in `seq` order without
/// gaps or repeats; a lagged receiver is caught up from history.
struct Subscription {
    stream: Arc<TrackingStream>,
    pending: VecDeque<ProgressEvent>,
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    next_seq: u64,
    done: bool,
}

impl Subscription {
    async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            if self.done {
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                if event.seq < self.next_seq {
                    continue;
                }
                self.next_seq = event.seq + 1;
                self.done = event.is_terminal();
                return Some(event);
            }

            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => self.pending.push_back(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(
                        tracking_id = %self.stream.id,
                        skipped,
                        "Progress subscriber lagged, replaying from history"
                    );
                    let next_seq = self.next_seq;
                    let replay: Vec<_> = {
                        let inner = self.stream.inner.read().unwrap_or_else(PoisonError::into_inner);
                        inner.history.iter().filter(|e| e.seq >= next_seq).cloned().collect()
                    };
                    self.pending.extend(replay);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Registry of per-provisioning progress streams.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    streams: Arc<RwLock<HashMap<Uuid, Arc<TrackingStream>>>>,
    bus: Option<EventBus>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every stream entry onto `bus`.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Open a new stream at `Preparing`. The returned id is valid for
    /// `poll`/`subscribe` immediately.
    pub fn start_tracking(&self, message: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        let stream = Arc::new(TrackingStream::new(id));
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&stream));

        if let Ok(event) = stream.push(
            Some(Stage::Preparing),
            ProgressKind::Stage,
            message.into(),
            None,
        ) {
            self.mirror(event);
        }
        tracing::debug!(tracking_id = %id, "Started tracking");
        id
    }

    pub fn advance(
        &self,
        id: Uuid,
        stage: Stage,
        message: impl Into<String>,
    ) -> Result<ProgressEvent, TrackerError> {
        let message = message.into();
        let event = self
            .stream(id)?
            .push(Some(stage), ProgressKind::Stage, message, None)?;
        tracing::info!(tracking_id = %id, stage = %stage, message = %event.message, "Provisioning stage");
        Ok(self.mirror(event))
    }

    pub fn complete(&self, id: Uuid, message: impl Into<String>) -> Result<ProgressEvent, TrackerError> {
        self.advance(id, Stage::Complete, message)
    }

    pub fn fail(&self, id: Uuid, message: impl Into<String>) -> Result<ProgressEvent, TrackerError> {
        self.advance(id, Stage::Error, message)
    }

    /// Append a chunk of remote output without changing stage.
    pub fn emit_output(
        &self,
        id: Uuid,
        stream: OutputStream,
        chunk: impl Into<String>,
    ) -> Result<(), TrackerError> {
        let chunk = OutputChunk {
            stream,
            text: chunk.into(),
        };
        let event = self.stream(id)?.push(
            None,
            ProgressKind::Output,
            format!("{} output", stream.as_str()),
            Some(chunk),
        )?;
        self.mirror(event);
        Ok(())
    }

    pub fn warn(&self, id: Uuid, message: impl Into<String>) -> Result<ProgressEvent, TrackerError> {
        let event = self
            .stream(id)?
            .push(None, ProgressKind::Warning, message.into(), None)?;
        tracing::warn!(tracking_id = %id, message = %event.message, "Provisioning warning");
        Ok(self.mirror(event))
    }

    /// Attach the provider instance id to every later event of the stream.
    pub fn set_instance(&self, id: Uuid, instance_id: impl Into<String>) -> Result<(), TrackerError> {
        let stream = self.stream(id)?;
        stream
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .instance_id = Some(instance_id.into());
        Ok(())
    }

    /// Events with `seq >= cursor`, oldest first.
    pub fn poll(&self, id: Uuid, cursor: u64) -> Result<PollResult, TrackerError> {
        let stream = self.stream(id)?;
        let inner = stream.inner.read().unwrap_or_else(PoisonError::into_inner);
        let events: Vec<_> = inner
            .history
            .iter()
            .filter(|e| e.seq >= cursor)
            .cloned()
            .collect();

        Ok(PollResult {
            events,
            next_cursor: inner.next_seq.max(cursor),
            stage: inner.stage,
            instance_id: inner.instance_id.clone(),
            finished: inner.finished_at.is_some(),
        })
    }

    /// Retained history followed by live events. The stream ends after the
    /// terminal event.
    pub fn subscribe(
        &self,
        id: Uuid,
    ) -> Result<impl Stream<Item = ProgressEvent> + Send + 'static, TrackerError> {
        let stream = self.stream(id)?;
        let (history, rx) = stream.subscribe();
        let subscription = Subscription {
            stream,
            pending: history.into(),
            rx,
            next_seq: 0,
            done: false,
        };

        Ok(futures::stream::unfold(subscription, |mut sub| async move {
            let event = sub.next_event().await?;
            Some((event, sub))
        }))
    }

    pub fn snapshot(&self, id: Uuid) -> Result<TrackingSnapshot, TrackerError> {
        let stream = self.stream(id)?;
        let inner = stream.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(TrackingSnapshot {
            tracking_id: id,
            stage: inner.stage,
            instance_id: inner.instance_id.clone(),
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            event_count: inner.next_seq,
        })
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Drop streams that reached a terminal stage more than `older_than` ago.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let before = streams.len();
        streams.retain(|_, stream| {
            let inner = stream.inner.read().unwrap_or_else(PoisonError::into_inner);
            !matches!(inner.finished_at, Some(at) if at <= cutoff)
        });
        before - streams.len()
    }

    pub fn len(&self) -> usize {
        self.streams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stream(&self, id: Uuid) -> Result<Arc<TrackingStream>, TrackerError> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(TrackerError::NotFound(id))
    }

    fn mirror(&self, event: ProgressEvent) -> ProgressEvent {
        if let Some(ref bus) = self.bus {
            bus.emit(Event::Progress {
                event: event.clone(),
            });
        }
        event
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("streams", &self.len())
            .finish()
    }
}
