use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, Response, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::time::Duration;
use tokio::sync::mpsc;

use super::{ create_streaming_response, CompletionProvider, CompletionResult, ProviderError, TextStream };
use crate::llm::LlmConfig;
use crate::models::chat::ChatMessage;

/// Client for any service exposing the `/chat/completions` wire format.
pub struct OpenAIChatClient {
    http: HttpClient,
    has_api_key: bool,
    requires_api_key: bool,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    #[serde(rename = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// Reassembles server-sent event lines that may be split across network chunks.
#[derive(Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            parse_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }

    /// Flushes a trailing line the upstream closed without terminating.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            parse_line(&String::from_utf8_lossy(&line), &mut events);
        }
        events
    }
}

fn parse_line(raw: &str, events: &mut Vec<StreamEvent>) {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with(':') {
        return;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        events.push(StreamEvent::Done);
        return;
    }

    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(stream_resp) => {
            let mut finished = false;
            for choice in stream_resp.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        events.push(StreamEvent::Delta(content));
                    }
                }
                finished |= choice.finish_reason.is_some();
            }
            if finished {
                events.push(StreamEvent::Done);
            }
        }
        Err(e) => {
            warn!("Skipping undecodable stream event: {} for data: {}", e, data);
        }
    }
}

/// Sends decoded events downstream. Returns false once the stream should stop.
async fn forward_events(
    events: Vec<StreamEvent>,
    tx: &mpsc::Sender<Result<String, ProviderError>>
) -> bool {
    for event in events {
        match event {
            StreamEvent::Delta(text) => {
                if tx.send(Ok(text)).await.is_err() {
                    debug!("Stream receiver dropped, aborting upstream read");
                    return false;
                }
            }
            StreamEvent::Done => {
                return false;
            }
        }
    }
    true
}

impl OpenAIChatClient {
    pub fn new(
        api_key: Option<String>,
        requires_api_key: bool,
        model: String,
        base_url: String,
        timeout: Duration
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.filter(|k| !k.trim().is_empty());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e|
                ProviderError::InvalidHeader(format!("Invalid API key format: {}", e))
            )?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = HttpClient::builder().default_headers(headers).connect_timeout(timeout).build()?;

        Ok(Self {
            http,
            has_api_key: api_key.is_some(),
            requires_api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        Self::new(
            config.api_key.clone(),
            config.llm_type.requires_api_key(),
            config.model(),
            config.base_url(),
            config.timeout
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn ensure_credential(&self) -> Result<(), ProviderError> {
        if self.has_credential() { Ok(()) } else { Err(ProviderError::MissingCredential) }
    }

    async fn error_from_response(resp: Response) -> ProviderError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        ProviderError::Status { status, body }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage]
    ) -> Result<CompletionResult, ProviderError> {
        self.ensure_credential()?;

        let req = OpenAIChatRequest {
            model: &self.model,
            messages,
            stream: None,
        };

        let resp = self.http
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&req)
            .send().await
            .map_err(|e| if e.is_timeout() { ProviderError::Timeout(self.timeout) } else { e.into() })?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes().await
            .map_err(|e| if e.is_timeout() { ProviderError::Timeout(self.timeout) } else { e.into() })?;
        let body = serde_json
            ::from_slice::<serde_json::Value>(&bytes)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(CompletionResult { status, body })
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError> {
        self.ensure_credential()?;

        let req = OpenAIChatRequest {
            model: &self.model,
            messages,
            stream: Some(true),
        };

        let idle = self.timeout;
        let resp = match tokio::time::timeout(idle, self.http.post(self.endpoint()).json(&req).send()).await {
            Ok(sent) => sent?,
            Err(_) => {
                return Err(ProviderError::Timeout(idle));
            }
        };

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        Ok(
            create_streaming_response(move |tx| async move {
                let mut bytes = resp.bytes_stream();
                let mut decoder = SseDecoder::default();

                loop {
                    // A dropped receiver must not wait out the idle timeout before the upstream is released.
                    let next = tokio::select! {
                        _ = tx.closed() => {
                            debug!("Stream receiver dropped, aborting upstream read");
                            return;
                        }
                        read = tokio::time::timeout(idle, bytes.next()) => match read {
                            Ok(next) => next,
                            Err(_) => {
                                let _ = tx.send(Err(ProviderError::Timeout(idle))).await;
                                return;
                            }
                        },
                    };

                    match next {
                        Some(Ok(chunk)) => {
                            if !forward_events(decoder.feed(&chunk), &tx).await {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                        None => {
                            forward_events(decoder.finish(), &tx).await;
                            return;
                        }
                    }
                }
            })
        )
    }

    fn has_credential(&self) -> bool {
        self.has_api_key || !self.requires_api_key
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::Delta(text.to_string())
    }

    #[test]
    fn decodes_complete_event_lines() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n"
        );
        assert_eq!(events, vec![delta("Hi"), delta(" there")]);
    }

    #[test]
    fn reassembles_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let events = decoder.feed(b"tent\":\"React\"}}]}\r\n\r\ndata: [DO");
        assert_eq!(events, vec![delta("React")]);
        assert_eq!(decoder.feed(b"NE]\n"), vec![StreamEvent::Done]);
    }

    #[test]
    fn keeps_multibyte_characters_split_between_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9} :-)\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{e9}').unwrap() + 1;
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(&bytes[..split]).is_empty());
        assert_eq!(decoder.feed(&bytes[split..]), vec![delta("caf\u{e9} :-)")]);
    }

    #[test]
    fn finish_reason_ends_the_stream() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"bye\"},\"finish_reason\":\"stop\"}]}\n"
        );
        assert_eq!(events, vec![delta("bye"), StreamEvent::Done]);
    }

    #[test]
    fn skips_comments_and_garbage() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b": keep-alive\nevent: ping\ndata: not json\n");
        assert!(events.is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}").is_empty());
        assert_eq!(decoder.finish(), vec![delta("tail")]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn credential_rules_follow_provider_kind() {
        let timeout = Duration::from_secs(5);
        let hosted = OpenAIChatClient::new(
            Some("   ".into()),
            true,
            "gpt-3.5-turbo".into(),
            "https://api.openai.com/v1/".into(),
            timeout
        ).unwrap();
        assert!(!hosted.has_credential());
        assert_eq!(hosted.endpoint(), "https://api.openai.com/v1/chat/completions");

        let local = OpenAIChatClient::new(
            None,
            false,
            "llama3".into(),
            "http://localhost:11434/v1".into(),
            timeout
        ).unwrap();
        assert!(local.has_credential());
    }
}
