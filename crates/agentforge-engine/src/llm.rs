//! C5 — LLM client and C6 — response processor.
//!
//! The client speaks the OpenAI-compatible wire contract (§6) to the proxy at
//! `LlmConfig::proxy_url`, authenticated with `X-Internal-Auth`. It is always
//! called as circuit-breaker(retry(request)) — the breaker guards the
//! downstream dependency as a whole, the retry handler recovers individual
//! transient failures within that guard (§4.C5/§4.C14 composition order).
//!
//! Grounded in the deleted teacher `llm/openai.rs` for the reqwest shape
//! (client with timeout, bearer-style auth header, JSON body, status check)
//! with the streaming/SSE accumulation path dropped — this module only makes
//! non-streaming (`"stream": false`) calls.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::hitl::HitlPolicy;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::tool::validate_call;
use crate::types::{ChatMessage, ToolCall, ToolDefinition};

/// Wall-clock timeout for a single completion round trip (§5: default 360s). A
/// timeout maps to `TransientLlm` — it is retryable per §4.C5.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(360);

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Raw completion returned by the proxy, one choice only (§6: the core never
/// requests `n > 1`).
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
    #[serde(flatten)]
    extra: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseWire {
    #[serde(default)]
    model: String,
    choices: Vec<ChoiceWire>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    message: MessageWire,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Single-shot, non-streaming chat completion client (§4.C5), wrapping every
/// call in a circuit breaker and a retry handler.
pub struct LlmClient {
    http: reqwest::Client,
    proxy_url: String,
    internal_api_key: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: &agentforge_config::config::LlmConfig, resilience: &agentforge_config::config::ResilienceConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds"),
            proxy_url: config.proxy_url.clone(),
            internal_api_key: config.internal_api_key.clone(),
            breaker: CircuitBreaker::from_config("llm_proxy", resilience),
            retry: RetryPolicy::from_config(resilience),
        }
    }

    pub fn circuit_stats(&self) -> crate::resilience::CircuitBreakerStats {
        self.breaker.get_stats()
    }

    /// `chatCompletion` (§4.C5): a single non-streaming round trip, resilient
    /// against transient upstream failures.
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        extra_params: Option<serde_json::Value>,
    ) -> Result<LlmResponse, CoreError> {
        let extra = extra_params.unwrap_or_else(|| json!({}));
        self.breaker
            .call(|| self.retry.run(|| self.send_once(model, messages, tools, &extra)))
            .await
    }

    async fn send_once(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        extra: &serde_json::Value,
    ) -> Result<LlmResponse, CoreError> {
        let body = ChatCompletionRequest {
            model,
            messages,
            tools,
            stream: false,
            extra: extra.clone(),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.proxy_url.trim_end_matches('/')))
            .header("X-Internal-Auth", &self.internal_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &text));
        }

        let wire: ChatCompletionResponseWire = response
            .json()
            .await
            .map_err(|e| CoreError::PermanentLlm(format!("malformed response body: {e}")))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::PermanentLlm("proxy returned zero choices".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            model: if wire.model.is_empty() { model.to_string() } else { wire.model },
            usage: wire.usage,
            finish_reason: choice.finish_reason,
        })
    }
}

fn classify_transport_error(e: &reqwest::Error) -> CoreError {
    if e.is_timeout() || e.is_connect() {
        CoreError::TransientLlm(e.to_string())
    } else {
        CoreError::PermanentLlm(e.to_string())
    }
}

/// HTTP status classification (§4.C5): timeouts, 408/429/503/504 are transient
/// and eligible for retry; 400/401/403/404/5xx (other than 503/504) are permanent.
fn classify_http_status(status: StatusCode, body: &str) -> CoreError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            CoreError::TransientLlm(format!("{status}: {body}"))
        }
        _ => CoreError::PermanentLlm(format!("{status}: {body}")),
    }
}

// ─── C6 — response processor ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProcessedResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
    pub validation_warnings: Vec<String>,
}

/// Process a raw completion into the shape the dialogue engine emits (§4.C6):
/// at most one tool call is honored (extras are dropped with a warning),
/// each surviving call is shape-validated, and the HITL policy decides
/// whether it must pause for approval.
pub fn process_response(raw: LlmResponse, policy: &HitlPolicy) -> ProcessedResponse {
    let mut warnings = Vec::new();

    if raw.tool_calls.len() > 1 {
        warnings.push(format!(
            "model requested {} tool calls; only the first is honored",
            raw.tool_calls.len()
        ));
    }

    let mut tool_calls: Vec<ToolCall> = raw.tool_calls.into_iter().take(1).collect();

    tool_calls.retain(|call| {
        if call.id.is_empty() || call.function.name.is_empty() {
            warnings.push("dropped tool call missing id or name".to_string());
            return false;
        }
        if let Err(e) = validate_call(call) {
            warnings.push(format!("dropped invalid tool call: {e}"));
            return false;
        }
        true
    });

    if raw.content.as_deref().unwrap_or("").trim().is_empty() && tool_calls.is_empty() {
        warnings.push("model returned empty content and no tool call".to_string());
    }

    let (requires_approval, approval_reason) = match tool_calls.first() {
        Some(call) => {
            let (required, reason) = policy.evaluate(&call.function.name);
            (required, required.then_some(reason))
        }
        None => (false, None),
    };

    ProcessedResponse {
        content: raw.content,
        tool_calls,
        usage: raw.usage,
        model: raw.model,
        requires_approval,
        approval_reason,
        validation_warnings: warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;

    fn tool_call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall { name: name.to_string(), arguments: args.to_string() },
        }
    }

    #[test]
    fn process_response_keeps_first_tool_call_only() {
        let raw = LlmResponse {
            content: None,
            tool_calls: vec![
                tool_call("c1", "read_file", r#"{"path": "a.txt"}"#),
                tool_call("c2", "write_file", r#"{"path": "b.txt", "content": "x"}"#),
            ],
            model: "gpt-4o".to_string(),
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
        };
        let processed = process_response(raw, &HitlPolicy::default());
        assert_eq!(processed.tool_calls.len(), 1);
        assert_eq!(processed.tool_calls[0].id, "c1");
        assert!(processed.validation_warnings.iter().any(|w| w.contains("only the first")));
    }

    #[test]
    fn process_response_flags_approval_for_mutating_tool() {
        let raw = LlmResponse {
            content: None,
            tool_calls: vec![tool_call("c1", "write_file", r#"{"path": "a.txt", "content": "x"}"#)],
            model: "gpt-4o".to_string(),
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
        };
        let processed = process_response(raw, &HitlPolicy::default());
        assert!(processed.requires_approval);
        assert!(processed.approval_reason.is_some());
    }

    #[test]
    fn process_response_drops_invalid_tool_call_with_warning() {
        let raw = LlmResponse {
            content: None,
            tool_calls: vec![tool_call("c1", "write_file", r#"{"path": "a.txt"}"#)],
            model: "gpt-4o".to_string(),
            usage: None,
            finish_reason: Some("tool_calls".to_string()),
        };
        let processed = process_response(raw, &HitlPolicy::default());
        assert!(processed.tool_calls.is_empty());
        assert!(!processed.validation_warnings.is_empty());
    }

    #[test]
    fn process_response_warns_on_empty_output() {
        let raw = LlmResponse {
            content: Some("   ".to_string()),
            tool_calls: vec![],
            model: "gpt-4o".to_string(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        };
        let processed = process_response(raw, &HitlPolicy::default());
        assert!(processed.validation_warnings.iter().any(|w| w.contains("empty content")));
    }

    #[test]
    fn classify_http_status_marks_rate_limit_transient_and_auth_permanent() {
        assert!(matches!(classify_http_status(StatusCode::TOO_MANY_REQUESTS, ""), CoreError::TransientLlm(_)));
        assert!(matches!(classify_http_status(StatusCode::UNAUTHORIZED, ""), CoreError::PermanentLlm(_)));
    }
}
