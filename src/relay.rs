use crate::config::persona::Persona;
use crate::llm::chat::{ CompletionProvider, CompletionResult, ProviderError, TextStream };
use crate::models::chat::{ ChatMessage, Conversation };

use futures::StreamExt;
use log::{ debug, info, warn, error };
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

pub const MISSING_CREDENTIAL_MESSAGE: &str = "OpenAI API key not configured";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{}", MISSING_CREDENTIAL_MESSAGE)]
    Configuration,
    #[error("Invalid conversation: {0}")]
    InvalidInput(String),
    #[error("Upstream completion failed: {0}")]
    Upstream(#[from] ProviderError),
}

/// Stateless forwarder between the chat widget and the completion provider.
///
/// Holds only read-only configuration, so one instance is shared by every
/// request handler. Each call builds its own message buffer.
pub struct Relay {
    persona: Arc<Persona>,
    provider: Arc<dyn CompletionProvider>,
}

impl Relay {
    pub fn new(persona: Arc<Persona>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { persona, provider }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn model(&self) -> String {
        self.provider.model()
    }

    pub fn has_credential(&self) -> bool {
        self.provider.has_credential()
    }

    fn prepare(&self, request_id: Uuid, conversation: &Conversation) -> Result<Vec<ChatMessage>, RelayError> {
        if conversation.is_empty() {
            return Err(RelayError::InvalidInput("conversation must contain at least one message".into()));
        }
        if !self.provider.has_credential() {
            error!("[{}] Provider credential is not configured, refusing to call upstream", request_id);
            return Err(RelayError::Configuration);
        }
        let caller_system = conversation.system_message_count();
        if caller_system > 0 {
            warn!(
                "[{}] Caller supplied {} system message(s); persona preamble stays first",
                request_id,
                caller_system
            );
        }
        Ok(conversation.with_preamble(&self.persona.preamble))
    }

    /// Forwards the conversation once and returns the provider payload unmodified.
    pub async fn relay_chat(&self, conversation: &Conversation) -> Result<CompletionResult, RelayError> {
        let request_id = Uuid::new_v4();
        let messages = self.prepare(request_id, conversation)?;
        info!("[{}] Relaying {} message(s) to model {}", request_id, messages.len(), self.provider.model());

        let started = Instant::now();
        match self.provider.complete(&messages).await {
            Ok(result) => {
                info!(
                    "[{}] Upstream responded with status {} in {:?}",
                    request_id,
                    result.status,
                    started.elapsed()
                );
                match result.text() {
                    Some(text) => debug!("[{}] Reply is {} chars", request_id, text.chars().count()),
                    None => debug!("[{}] Reply payload carries no choice text", request_id),
                }
                Ok(result)
            }
            Err(e) => {
                error!("[{}] Upstream completion failed after {:?}: {}", request_id, started.elapsed(), e);
                Err(RelayError::Upstream(e))
            }
        }
    }

    /// Like [`Relay::relay_chat`] but hands back text chunks as the provider produces them.
    pub async fn relay_chat_stream(&self, conversation: &Conversation) -> Result<TextStream, RelayError> {
        let request_id = Uuid::new_v4();
        let messages = self.prepare(request_id, conversation)?;
        info!(
            "[{}] Relaying {} message(s) to model {} (streaming)",
            request_id,
            messages.len(),
            self.provider.model()
        );

        let stream = self.provider.complete_stream(&messages).await.map_err(|e| {
            error!("[{}] Upstream stream could not start: {}", request_id, e);
            RelayError::Upstream(e)
        })?;

        let logged = stream.inspect(move |chunk| {
            if let Err(e) = chunk {
                error!("[{}] Upstream stream failed mid-response: {}", request_id, e);
            }
        });
        Ok(Box::pin(logged))
    }
}
