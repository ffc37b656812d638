#![allow(dead_code)]

use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use persona_relay::config::persona::Persona;
use persona_relay::llm::chat::{ CompletionProvider, CompletionResult, ProviderError, TextStream };
use persona_relay::models::chat::ChatMessage;
use persona_relay::relay::Relay;

pub const PREAMBLE: &str = "You are Segnify, the portfolio assistant. Be concise.";

pub enum Behavior {
    /// Returns this payload as-is.
    Reply(CompletionResult),
    /// Returns the received messages as the payload, after an optional delay.
    Echo(Duration),
    /// Fails with an error whose text must never reach the caller.
    Fail,
    /// Streams these chunks.
    Stream(Vec<&'static str>),
    /// Streams one chunk, then fails.
    BreakMidStream,
}

pub const SECRET_FAILURE: &str = "connection reset by 10.1.2.3; sk-live-secret";

/// In-memory provider that records every call it receives.
pub struct MockProvider {
    behavior: Behavior,
    credential: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            credential: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn without_credential(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            credential: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, messages: &[ChatMessage]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
    }
}

fn failure() -> ProviderError {
    ProviderError::Decode(SECRET_FAILURE.to_string())
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResult, ProviderError> {
        self.record(messages);
        match &self.behavior {
            Behavior::Reply(result) => Ok(result.clone()),
            Behavior::Echo(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(CompletionResult {
                    status: 200,
                    body: json!({ "echo": messages }),
                })
            }
            Behavior::Fail => Err(failure()),
            Behavior::Stream(_) | Behavior::BreakMidStream =>
                panic!("streaming mock called without streaming"),
        }
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError> {
        self.record(messages);
        match &self.behavior {
            Behavior::Stream(chunks) => {
                let items: Vec<Result<String, ProviderError>> = chunks
                    .iter()
                    .map(|c| Ok(c.to_string()))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Behavior::BreakMidStream => {
                let items = vec![Ok("partial ".to_string()), Err(failure())];
                Ok(Box::pin(stream::iter(items)))
            }
            Behavior::Fail => Err(failure()),
            _ => panic!("non-streaming mock called for a stream"),
        }
    }

    fn has_credential(&self) -> bool {
        self.credential
    }

    fn model(&self) -> String {
        "mock-model".to_string()
    }
}

pub fn persona() -> Arc<Persona> {
    Arc::new(Persona::new("Segnify (beta)", PREAMBLE).unwrap())
}

pub fn relay_with(provider: Arc<MockProvider>) -> Arc<Relay> {
    Arc::new(Relay::new(persona(), provider))
}

pub fn skills_reply() -> CompletionResult {
    CompletionResult {
        status: 200,
        body: json!({
            "choices": [{
                "message": { "role": "assistant", "content": "React, TypeScript, video editing." }
            }]
        }),
    }
}
