use helpdesk_shared::{ChatMessage, MessageRole};
use tracing::{debug, warn};

pub const PERSONA: &str = "You are the Headstarter support assistant, a friendly and concise \
customer support agent for Headstarter, a platform where software engineers practise \
technical interviews with AI and build projects. Help users with account questions, \
interview practice sessions, technical issues and billing. If you are unsure about an \
answer, say so and point the user to support@headstarter.co instead of guessing.";

/// Assembles what gets sent to the backend: the fixed persona followed by the
/// client's turns.
pub struct ConversationBuilder {
    persona: String,
    max_history: usize,
}

impl ConversationBuilder {
    /// `max_history` bounds how many of the most recent client messages are
    /// kept; `0` keeps all of them.
    pub fn new(max_history: usize) -> Self {
        Self::with_persona(PERSONA, max_history)
    }

    pub fn with_persona(persona: impl Into<String>, max_history: usize) -> Self {
        Self {
            persona: persona.into(),
            max_history,
        }
    }

    /// Flatten persona and history into one newline-separated prompt.
    ///
    /// Roles are not encoded, so the backend cannot tell user turns from
    /// assistant turns. Use [`build_turns`](Self::build_turns) when the
    /// backend accepts role-tagged input.
    pub fn build(&self, history: &[ChatMessage]) -> String {
        self.build_turns(history)
            .iter()
            .map(|msg| msg.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Persona plus the kept history, roles intact.
    ///
    /// Client-supplied system messages are dropped: the persona is the only
    /// system message a request may carry.
    pub fn build_turns(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let turns: Vec<&ChatMessage> = history
            .iter()
            .filter(|msg| {
                let injected = msg.role == MessageRole::System;
                if injected {
                    warn!("Dropping client-supplied system message");
                }
                !injected
            })
            .collect();

        let skip = match self.max_history {
            0 => 0,
            cap => turns.len().saturating_sub(cap),
        };
        if skip > 0 {
            debug!(dropped = skip, kept = turns.len() - skip, "Trimming conversation history");
        }

        let mut messages = Vec::with_capacity(1 + turns.len() - skip);
        messages.push(ChatMessage::system(self.persona.clone()));
        messages.extend(turns.into_iter().skip(skip).cloned());
        messages
    }
}
