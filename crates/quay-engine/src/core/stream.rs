//! Bounded per-request event channels.
//!
//! Each request gets one producer/consumer pair. The queue is bounded and the
//! producer awaits delivery, so a slow consumer exerts backpressure on the
//! pipeline instead of growing an unbounded buffer. The stream is transient
//! and single-consumer; durable history lives in the session's message log.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::core::events::StreamEvent;

/// Creates a bounded event channel for one request.
pub fn request_channel(capacity: usize) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            transcript: Arc::new(Mutex::new(String::new())),
        },
        EventStream { rx },
    )
}

/// Producer half of a request's event stream.
///
/// Accumulates `TextDelta` text so the orchestrator can persist partial
/// assistant content when a request ends early.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StreamEvent>,
    transcript: Arc<Mutex<String>>,
}

impl EventSender {
    /// Delivers an event, awaiting queue space.
    ///
    /// Returns `false` if the consumer disconnected; producers treat that as
    /// best-effort and keep unwinding normally.
    pub async fn send(&self, event: StreamEvent) -> bool {
        if let StreamEvent::TextDelta { text } = &event
            && let Ok(mut transcript) = self.transcript.lock()
        {
            transcript.push_str(text);
        }
        self.tx.send(event).await.is_ok()
    }

    /// Returns the assistant text accumulated from `TextDelta` events so far.
    pub fn transcript(&self) -> String {
        self.transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

/// Consumer half of a request's event stream.
///
/// Not restartable: once consumed, events are gone. Ends after the terminal
/// event's producer is dropped.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    /// Receives the next event, or `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drains the stream until (and including) the terminal event.
    ///
    /// Useful for callers that want the whole sequence at once.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
