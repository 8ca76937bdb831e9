use helpdesk_shared::{ChatMessage, MessageRole, FALLBACK_ERROR_MESSAGE, GREETING};
use tracing::{debug, warn};

use crate::decoder::Utf8Decoder;

/// Where the current (or last) reply stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyState {
    /// Nothing requested yet.
    Idle,
    /// Request sent, no reply bytes yet.
    Waiting,
    Streaming,
    Complete,
    /// The reply ended abnormally. Any text already shown is partial.
    Failed(String),
}

type Observer = Box<dyn FnMut(&[ChatMessage]) + Send>;

/// Client-side conversation and the fold from reply chunks into it.
///
/// Completed messages are never touched again. While a reply is in flight
/// the trailing assistant placeholder is the only mutable message, and it
/// only grows by appending decoded chunk text in arrival order.
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    state: ReplyState,
    decoder: Utf8Decoder,
    observer: Option<Observer>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(GREETING)],
            state: ReplyState::Idle,
            decoder: Utf8Decoder::new(),
            observer: None,
        }
    }

    /// Called with the full conversation after every chunk and when a reply ends.
    pub fn with_observer(mut self, observer: impl FnMut(&[ChatMessage]) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn state(&self) -> &ReplyState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, ReplyState::Waiting | ReplyState::Streaming)
    }

    /// Start a new turn.
    ///
    /// Returns the history to send (everything but the new placeholder), or
    /// `None` when the text is blank or a reply is still in flight.
    pub fn submit(&mut self, text: &str) -> Option<Vec<ChatMessage>> {
        if text.trim().is_empty() || self.is_busy() {
            return None;
        }

        self.messages.push(ChatMessage::user(text));
        let history = self.messages.clone();
        self.messages.push(ChatMessage::assistant(""));
        self.decoder.reset();
        self.state = ReplyState::Waiting;
        Some(history)
    }

    /// Append one received chunk to the placeholder.
    pub fn on_chunk(&mut self, bytes: &[u8]) {
        if !self.is_busy() {
            warn!(len = bytes.len(), "Dropping chunk received outside of a reply");
            return;
        }

        let text = self.decoder.decode(bytes);
        self.append(&text);
        self.state = ReplyState::Streaming;
        self.notify();
    }

    /// The reply finished cleanly. The placeholder becomes a regular message.
    pub fn on_end(&mut self) {
        if !self.is_busy() {
            return;
        }

        let tail = self.decoder.finish();
        self.append(&tail);
        self.state = ReplyState::Complete;
        debug!(chars = self.last_content_len(), "Reply complete");
        self.notify();
    }

    /// The reply failed. An empty placeholder is replaced by the fallback
    /// message; partial text is kept as-is. Either way the failure is
    /// recorded in [`state`](Self::state).
    pub fn on_error(&mut self, reason: impl Into<String>) {
        if !self.is_busy() {
            return;
        }

        // Undecodable leftovers alone don't count as partial text.
        let has_text = self
            .placeholder_mut()
            .is_some_and(|last| !last.content.is_empty());
        if has_text {
            let tail = self.decoder.finish();
            self.append(&tail);
        } else {
            self.decoder.reset();
            if let Some(last) = self.placeholder_mut() {
                last.content = FALLBACK_ERROR_MESSAGE.to_string();
            }
        }

        let reason = reason.into();
        warn!(%reason, chars = self.last_content_len(), "Reply failed");
        self.state = ReplyState::Failed(reason);
        self.notify();
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.placeholder_mut() {
            last.content.push_str(text);
        }
    }

    fn placeholder_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|msg| msg.role == MessageRole::Assistant)
    }

    fn last_content_len(&self) -> usize {
        self.messages.last().map_or(0, |msg| msg.content.chars().count())
    }

    fn notify(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.messages);
        }
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
