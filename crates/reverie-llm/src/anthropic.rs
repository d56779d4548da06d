//! Anthropic Messages API provider (SSE streaming)

use crate::provider::{ChunkStream, LlmProvider, ProviderError, ProviderResult};
use crate::types::{Chunk, Completion, TokenUsage};
use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, completion: Completion, cancel: CancellationToken) -> ProviderResult<ChunkStream> {
        let body = WireRequest::from(&completion);
        debug!("Anthropic request: model={} prompt={} chars", body.model, completion.prompt.len());

        let send = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send();

        let response = tokio::select! {
            r = send => r?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            warn!("Anthropic returned {}: {}", status, text);
            return Err(status_error(status, text, retry_after));
        }

        Ok(Box::pin(decode_stream(response.bytes_stream(), cancel)))
    }
}

fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(body),
        429 => ProviderError::RateLimited { retry_after },
        529 => ProviderError::Overloaded(body),
        code => ProviderError::Http { status: code, body },
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn decode_stream(
    bytes: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = ProviderResult<Chunk>> + Send {
    async_stream::stream! {
        let mut decoder = SseDecoder::default();
        tokio::pin!(bytes);

        loop {
            let next = tokio::select! {
                next = bytes.next() => next,
                _ = cancel.cancelled() => {
                    yield Err(ProviderError::Cancelled);
                    break;
                }
            };
            let data = match next {
                Some(Ok(data)) => data,
                Some(Err(e)) => {
                    yield Err(ProviderError::Stream(e.to_string()));
                    break;
                }
                None => break,
            };

            let mut finished = false;
            for item in decoder.push(&data) {
                finished |= matches!(item, Ok(Chunk::Finished { .. }) | Err(_));
                yield item;
            }
            if finished {
                break;
            }
        }
    }
}

/// Incremental SSE decoder. Carries partial events across network reads and
/// collects usage and stop reason until `message_stop`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    usage: TokenUsage,
    stop_reason: Option<String>,
}

impl SseDecoder {
    pub fn push(&mut self, data: &[u8]) -> Vec<ProviderResult<Chunk>> {
        self.buffer.push_str(&String::from_utf8_lossy(data));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut out = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(item) = self.event(&block) {
                out.push(item);
            }
        }
        out
    }

    fn event(&mut self, block: &str) -> Option<ProviderResult<Chunk>> {
        let mut name = "";
        let mut data = String::new();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                name = rest.trim();
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
        }
        if data.is_empty() {
            return None;
        }

        match name {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<MessageStart>(&data) {
                    self.usage.input_tokens = start.message.usage.input_tokens;
                }
                None
            }
            "content_block_delta" => match serde_json::from_str::<ContentBlockDelta>(&data) {
                Ok(ContentBlockDelta { delta: Delta::Text { text } }) => Some(Ok(Chunk::Text(text))),
                Ok(_) => None,
                Err(e) => Some(Err(ProviderError::Malformed(e.to_string()))),
            },
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                    if delta.delta.stop_reason.is_some() {
                        self.stop_reason = delta.delta.stop_reason;
                    }
                    if let Some(usage) = delta.usage {
                        self.usage.output_tokens = usage.output_tokens;
                    }
                }
                None
            }
            "message_stop" => {
                debug!(
                    "Anthropic stream done: stop_reason={:?} tokens={}",
                    self.stop_reason,
                    self.usage.total()
                );
                Some(Ok(Chunk::Finished { stop_reason: self.stop_reason.take(), usage: self.usage }))
            }
            "error" => {
                let message = serde_json::from_str::<ErrorEvent>(&data)
                    .map(|e| e.error.message)
                    .unwrap_or(data);
                Some(Err(ProviderError::Stream(message)))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: [WireMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Completion> for WireRequest<'a> {
    fn from(c: &'a Completion) -> Self {
        Self {
            model: &c.model,
            max_tokens: c.max_tokens,
            stream: true,
            messages: [WireMessage { role: "user", content: &c.prompt }],
            system: c.system.as_deref(),
            temperature: c.temperature,
        }
    }
}

#[derive(Deserialize)]
struct MessageStart {
    message: StartedMessage,
}

#[derive(Deserialize)]
struct StartedMessage {
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: Delta,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Delta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: StopInfo,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct StopInfo {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE_REPLY: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"usage\":{\"input_tokens\":42,\"output_tokens\":1}}}\n\n",
        "event: ping\ndata: {\"type\":\"ping\"}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"EMPATHY: 0.7\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":6}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    );

    #[test]
    fn full_reply_decodes_with_usage() {
        let mut decoder = SseDecoder::default();
        let items: Vec<Chunk> = decoder.push(SCORE_REPLY.as_bytes()).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(
            items,
            vec![
                Chunk::Text("EMPATHY: 0.7".into()),
                Chunk::Finished {
                    stop_reason: Some("end_turn".into()),
                    usage: TokenUsage { input_tokens: 42, output_tokens: 6 },
                },
            ]
        );
    }

    #[test]
    fn events_split_across_reads() {
        let mut decoder = SseDecoder::default();
        let (a, b) = SCORE_REPLY.split_at(SCORE_REPLY.find("EMPATHY").unwrap());
        assert!(decoder.push(a.as_bytes()).is_empty());
        let rest = decoder.push(b.as_bytes());
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn crlf_framing_accepted() {
        let mut decoder = SseDecoder::default();
        let raw = "event: content_block_delta\r\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\r\n\r\n";
        let items = decoder.push(raw.as_bytes());
        assert!(matches!(items.as_slice(), [Ok(Chunk::Text(t))] if t == "hi"));
    }

    #[test]
    fn error_event_surfaces_message() {
        let mut decoder = SseDecoder::default();
        let raw = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        match decoder.push(raw.as_bytes()).pop() {
            Some(Err(ProviderError::Stream(m))) => assert_eq!(m, "Overloaded"),
            other => panic!("expected stream error, got {:?}", other),
        }
    }

    #[test]
    fn non_text_deltas_ignored() {
        let mut decoder = SseDecoder::default();
        let raw = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"abc\"}}\n\n";
        assert!(decoder.push(raw.as_bytes()).is_empty());
    }

    #[test]
    fn status_codes_classified() {
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, "no".into(), None), ProviderError::Unauthorized(_)));
        let limited = status_error(StatusCode::TOO_MANY_REQUESTS, String::new(), Some(Duration::from_secs(2)));
        assert!(limited.is_transient());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert!(status_error(StatusCode::from_u16(529).unwrap(), "busy".into(), None).is_transient());
        assert!(!status_error(StatusCode::BAD_REQUEST, "bad".into(), None).is_transient());
    }

    #[test]
    fn wire_request_is_single_user_turn() {
        let completion = Completion::new("m", "Rate this").with_system("be terse");
        let json = serde_json::to_value(WireRequest::from(&completion)).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Rate this");
        assert_eq!(json["system"], "be terse");
        assert_eq!(json["stream"], true);
        assert!(json.get("temperature").is_none());
    }
}
