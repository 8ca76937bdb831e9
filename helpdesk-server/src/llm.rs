use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use futures_util::{future, stream::BoxStream, StreamExt};
use helpdesk_shared::{ChatMessage, MessageRole};
use tracing::{debug, error, info};

use crate::error::BackendError;

/// Reply text as it is produced. Ends normally or with a single error.
pub type ChunkStream = BoxStream<'static, Result<String, BackendError>>;

/// What the backend is asked to continue.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// A single flattened string.
    Text(String),
    /// Role-tagged turns, persona first.
    Turns(Vec<ChatMessage>),
}

/// A text generation capability.
///
/// Dropping the returned stream must release the upstream request.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: Prompt) -> Result<ChunkStream, BackendError>;

    fn model(&self) -> &str;
}

pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        info!("Initializing LLM service with model: {}", model);
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = base_url {
            info!("Using OpenAI-compatible endpoint: {}", base_url);
            config = config.with_api_base(base_url);
        }
        let client = Client::with_config(config);
        Self { client, model }
    }

    fn convert_prompt(prompt: Prompt) -> Result<Vec<ChatCompletionRequestMessage>, BackendError> {
        match prompt {
            Prompt::Text(text) => Ok(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()?,
            )]),
            Prompt::Turns(turns) => turns.into_iter().map(Self::convert_message).collect(),
        }
    }

    fn convert_message(msg: ChatMessage) -> Result<ChatCompletionRequestMessage, BackendError> {
        let message = match msg.role {
            MessageRole::System => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(msg.content)
                    .build()?,
            ),
            MessageRole::User => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content)
                    .build()?,
            ),
            MessageRole::Assistant => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content)
                    .build()?,
            ),
        };
        Ok(message)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: Prompt) -> Result<ChunkStream, BackendError> {
        let messages = Self::convert_prompt(prompt)?;
        debug!(messages = messages.len(), model = %self.model, "Requesting completion stream");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await.map_err(|e| {
            error!("Failed to create OpenAI stream: {:?}", e);
            BackendError::from(e)
        })?;

        // Polled directly by the relay, so dropping it aborts the upstream request.
        let chunks = stream.filter_map(|result| {
            future::ready(match result {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|delta| !delta.is_empty())
                    .map(Ok),
                Err(e) => {
                    error!("OpenAI stream error: {:?}", e);
                    Some(Err(BackendError::Stream(e.to_string())))
                }
            })
        });

        Ok(chunks.boxed())
    }

    fn model(&self) -> &str {
        &self.model
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prompt_becomes_single_user_message() {
        let messages = OpenAiGenerator::convert_prompt(Prompt::Text("P\nHi".into())).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn turns_keep_their_roles() {
        let messages = OpenAiGenerator::convert_prompt(Prompt::Turns(vec![
            ChatMessage::system("P"),
            ChatMessage::assistant("Hello"),
            ChatMessage::user("Hi"),
        ]))
        .unwrap();

        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::User(_)));
    }
}
