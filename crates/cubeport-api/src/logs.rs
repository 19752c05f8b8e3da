//! Live log fan-out.
//!
//! [`BroadcastLayer`] sits in the daemon's tracing stack and formats every
//! event as one line; [`LogBroadcaster`] hands each line to every connected
//! `/logs/stream` client. A slow client loses lines rather than stalling
//! the code that logged them.

use std::convert::Infallible;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::ApiState;

/// Buffered lines per subscriber before new lines are dropped for it.
pub const SUBSCRIBER_CAPACITY: usize = 100;

/// Fan-out of formatted log lines to live subscribers.
#[derive(Clone, Default)]
pub struct LogBroadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<String>>>>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.lock().push(tx);
        rx
    }

    /// Deliver a line to every subscriber without blocking.
    pub fn publish(&self, line: &str) {
        self.lock().retain(|tx| match tx.try_send(line.to_string()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// A tracing layer feeding this broadcaster.
    pub fn layer(&self) -> BroadcastLayer {
        BroadcastLayer {
            broadcaster: self.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<String>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Formats events as `[timestamp] LEVEL target: message key=value ...`.
pub struct BroadcastLayer {
    broadcaster: LogBroadcaster,
}

impl<S: Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
        if self.broadcaster.subscriber_count() == 0 {
            return;
        }
        let mut fields = LineVisitor::default();
        event.record(&mut fields);

        let meta = event.metadata();
        let line = format!(
            "[{}] {} {}: {}{}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            meta.level(),
            meta.target(),
            fields.message,
            fields.rest
        );
        self.broadcaster.publish(&line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    rest: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.rest, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.rest, " {}={:?}", field.name(), value);
        }
    }
}

/// GET /api/v1/logs/stream
///
/// One `log` event per line, with periodic keep-alive comments.
pub async fn stream_logs(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.logs.subscribe();
    let lines = stream::unfold(rx, |mut rx| async move {
        let line = rx.recv().await?;
        Some((Ok(Event::default().event("log").data(line)), rx))
    });
    Sse::new(lines).keep_alive(KeepAlive::default())
}
