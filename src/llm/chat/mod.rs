pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, Future };
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::LlmConfig;
use self::openai::OpenAIChatClient;
use crate::models::chat::ChatMessage;

/// Lazy, finite sequence of assistant text chunks. Not restartable.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider credential is not configured")]
    MissingCredential,
    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Provider returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("Provider response could not be decoded: {0}")]
    Decode(String),
    #[error("Provider did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Invalid provider header: {0}")]
    InvalidHeader(String),
}

/// A decoded provider payload together with the status it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub status: u16,
    pub body: serde_json::Value,
}

impl CompletionResult {
    /// First choice's message content, when the payload has the usual shape.
    pub fn text(&self) -> Option<&str> {
        self.body
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResult, ProviderError>;

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError>;

    fn has_credential(&self) -> bool;

    fn model(&self) -> String;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> TextStream
    where
        F: FnOnce(mpsc::Sender<Result<String, ProviderError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_provider(config: &LlmConfig) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
