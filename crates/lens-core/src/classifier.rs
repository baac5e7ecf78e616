//! Optional model-assisted intent classification.
//!
//! Purely advisory: the resolver only consults a classifier when keyword matching finds
//! nothing, and treats any error or unknown answer as "no match".

use crate::config::ClassifierConfig;
use crate::error::{LensError, Result};
use crate::types::Intent;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

/// Maps a question onto one of the known intents, or `None`.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, question: &str, known_intents: &[Intent]) -> Result<Option<Intent>>;
}

/// Classifier backed by an OpenAI-compatible chat completion endpoint.
pub struct OpenAiClassifier {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(
                config
                    .resolved_api_key()
                    .unwrap_or_else(|| "not-needed".to_string()),
            );

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        }
    }

    fn build_messages(
        question: &str,
        known_intents: &[Intent],
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let catalogue = known_intents
            .iter()
            .map(|i| format!("- {}: {}", i.id(), i.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "You classify analytics questions about payment transactions. \
             Reply with exactly one intent id from the list below, or `none` \
             if the question fits none of them.\n{}",
            catalogue
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| LensError::Classifier(e.to_string()))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(question)
            .build()
            .map_err(|e| LensError::Classifier(e.to_string()))?;

        Ok(vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ])
    }
}

#[async_trait]
impl IntentClassifier for OpenAiClassifier {
    async fn classify(&self, question: &str, known_intents: &[Intent]) -> Result<Option<Intent>> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::build_messages(question, known_intents)?)
            .temperature(0.0)
            .max_completion_tokens(16u32)
            .build()
            .map_err(|e| LensError::Classifier(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LensError::Classifier(e.to_string()))?;

        let answer = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        debug!("Classifier answered {:?}", answer);

        Ok(parse_intent_reply(&answer, known_intents))
    }
}

/// Accept a reply only if it names one of the offered intents.
pub fn parse_intent_reply(reply: &str, known_intents: &[Intent]) -> Option<Intent> {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
        .to_lowercase();
    Intent::from_id(&cleaned).filter(|intent| known_intents.contains(intent))
}
