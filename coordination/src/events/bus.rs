//! Per-run event bus.
//!
//! Producers call [`EventBus::emit`], which enqueues onto an unbounded tokio
//! mpsc channel and returns immediately. A single consumer takes the
//! [`EventStream`] once via [`EventBus::events`]. The stream ends after the
//! first terminal event; dropping it cancels the run.

use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::types::{EventStatus, WorkflowEvent, STAGE_DONE};
use crate::error::ErrorKind;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event stream already consumed")]
    AlreadyConsumed,
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Single-run, single-consumer event channel.
pub struct EventBus {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<WorkflowEvent>>>,
    /// Set once a terminal event has been enqueued.
    terminated: AtomicBool,
    cancel: CancellationToken,
}

impl EventBus {
    /// Create a bus with its own cancellation token.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a bus whose stream cancels `cancel` when dropped.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            terminated: AtomicBool::new(false),
            cancel,
        }
    }

    /// Create a shared bus together with its only stream.
    pub fn open(cancel: CancellationToken) -> (SharedEventBus, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = EventStream {
            receiver,
            finished: false,
            _cancel_on_drop: Some(cancel.clone().drop_guard()),
        };
        let bus = Self {
            sender,
            receiver: Mutex::new(None),
            terminated: AtomicBool::new(false),
            cancel,
        };
        (Arc::new(bus), stream)
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Token cancelled when the consumer drops its stream.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether a terminal event has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Enqueue a non-terminal event. Never blocks; dropped after the
    /// terminal event or once the consumer is gone.
    ///
    /// The reserved `done` and `error` stages are rejected: terminal events
    /// only go out through [`emit_done`](Self::emit_done) and
    /// [`emit_error`](Self::emit_error).
    pub fn emit(
        &self,
        stage: impl Into<String>,
        status: EventStatus,
        payload: Value,
        latency_ms: Option<u64>,
    ) {
        let event = WorkflowEvent::new(stage, status, payload, latency_ms);
        if event.is_terminal() {
            warn!(stage = %event.stage, "Reserved terminal stage passed to emit; event dropped");
            return;
        }
        if self.is_terminated() {
            debug!(stage = %event.stage, "Event after terminal dropped");
            return;
        }
        self.send(event);
    }

    /// Emit the `done` terminal event. Returns false if a terminal event was
    /// already emitted.
    pub fn emit_done(&self, payload: Value, latency_ms: Option<u64>) -> bool {
        self.emit_terminal(WorkflowEvent::new(
            STAGE_DONE,
            EventStatus::Complete,
            payload,
            latency_ms,
        ))
    }

    /// Emit the `error` terminal event. Returns false if a terminal event
    /// was already emitted.
    pub fn emit_error(&self, kind: ErrorKind, message: impl Into<String>) -> bool {
        self.emit_terminal(WorkflowEvent::terminal_error(kind, message))
    }

    fn emit_terminal(&self, event: WorkflowEvent) -> bool {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(stage = %event.stage, "Second terminal event dropped");
            return false;
        }
        self.send(event);
        true
    }

    fn send(&self, event: WorkflowEvent) {
        debug!(stage = %event.stage, status = %event.status, "Event emitted");
        // A closed channel means the consumer went away; nothing to deliver to.
        let _ = self.sender.send(event);
    }

    /// Take the event stream. Only the first call succeeds.
    pub fn events(&self) -> EventBusResult<EventStream> {
        let mut slot = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let receiver = slot.take().ok_or(EventBusError::AlreadyConsumed)?;
        Ok(EventStream {
            receiver,
            finished: false,
            _cancel_on_drop: Some(self.cancel.clone().drop_guard()),
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of an [`EventBus`].
///
/// Yields events in emission order and ends after the first terminal event.
/// If every producer goes away without a terminal event, a synthetic
/// `error` event is yielded so the consumer never hangs.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
    finished: bool,
    _cancel_on_drop: Option<DropGuard>,
}

impl EventStream {
    /// Keep the run alive when this stream is dropped.
    pub fn detach(mut self) -> Self {
        if let Some(guard) = self._cancel_on_drop.take() {
            let _ = guard.disarm();
        }
        self
    }
}

impl Stream for EventStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(WorkflowEvent::terminal_error(
                    ErrorKind::Internal,
                    "run ended without a terminal event",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
