//! Event sinks for streamed invocations.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stream_event::StreamEvent;

/// Receives live events from a running invocation.
///
/// Emission is synchronous and must not block; transports that need to await
/// should buffer (see [`ChannelSink`]).
pub trait EventSink: Send {
    fn emit(&mut self, event: StreamEvent);
}

impl EventSink for Vec<StreamEvent> {
    fn emit(&mut self, event: StreamEvent) {
        self.push(event);
    }
}

/// Forwards events into an unbounded channel.
///
/// When the receiving side is gone (the client disconnected) the sink fires
/// the invocation's cancellation token.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: StreamEvent) {
        if self.tx.send(event).is_err() && !self.cancel.is_cancelled() {
            debug!("Event receiver dropped, cancelling invocation");
            self.cancel.cancel();
        }
    }
}

/// Wraps the caller's sink so nothing is emitted after the terminal event.
pub(crate) struct Emitter<'a> {
    sink: Option<&'a mut dyn EventSink>,
    closed: bool,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(sink: Option<&'a mut dyn EventSink>) -> Self {
        Self { sink, closed: false }
    }

    pub(crate) fn emit(&mut self, event: StreamEvent) {
        if self.closed {
            return;
        }
        self.closed = event.is_terminal();
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::PromptId;

    #[test]
    fn emitter_closes_after_terminal_event() {
        let mut events: Vec<StreamEvent> = Vec::new();
        {
            let mut emitter = Emitter::new(Some(&mut events));
            emitter.emit(StreamEvent::Content { text: "a".into() });
            emitter.emit(StreamEvent::Done { prompt_id: PromptId::from("p") });
            emitter.emit(StreamEvent::Content { text: "late".into() });
            emitter.emit(StreamEvent::Error { message: "late".into() });
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type(), "done");
    }

    #[test]
    fn emitter_without_sink_is_a_no_op() {
        let mut emitter = Emitter::new(None);
        emitter.emit(StreamEvent::Content { text: "a".into() });
    }

    #[test]
    fn channel_sink_cancels_when_receiver_is_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut sink = ChannelSink::new(tx, cancel.clone());

        sink.emit(StreamEvent::Content { text: "first".into() });
        assert!(!cancel.is_cancelled());

        drop(rx);
        sink.emit(StreamEvent::Content { text: "second".into() });
        assert!(cancel.is_cancelled());
    }
}
