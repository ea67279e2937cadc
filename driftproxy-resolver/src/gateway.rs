//! Wraps the external LLM judge behind an OpenAI-compatible chat-completions
//! call. Builds the inventory prompt, issues a single request with a hard
//! timeout, and validates the reply. Never retries: coalescing is handled
//! one layer up by `SingleflightResolver`.

use driftproxy_core::{DriftProxyError, InventorySnapshot, TargetDecision};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct ResolverGateway {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ResolverGateway {
    pub fn new(api_url: String, api_key: Option<String>, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("resolver gateway: failed to build HTTP client");
        Self {
            client,
            api_url,
            api_key,
            model,
        }
    }

    pub async fn resolve_hostname(
        &self,
        host: &str,
        user_hint: Option<&str>,
        inventory: &InventorySnapshot,
    ) -> Result<TargetDecision, DriftProxyError> {
        let prompt = build_prompt(&format!("the browser is requesting hostname {host}"), user_hint, inventory);
        self.call(prompt).await
    }

    pub async fn resolve_related(
        &self,
        origin_host: &str,
        service_name: &str,
        user_hint: Option<&str>,
        inventory: &InventorySnapshot,
    ) -> Result<TargetDecision, DriftProxyError> {
        let statement = format!(
            "the service running behind {origin_host} is requesting its sibling service \"{service_name}\""
        );
        let prompt = build_prompt(&statement, user_hint, inventory);
        self.call(prompt).await
    }

    async fn call(&self, prompt: String) -> Result<TargetDecision, DriftProxyError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| DriftProxyError::ResolverFailure("no API key configured".into()))?;

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriftProxyError::ResolverFailure(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DriftProxyError::ResolverFailure(format!("reading body failed: {e}")))?;

        if !status.is_success() {
            return Err(DriftProxyError::ResolverFailure(format!(
                "judge returned {status}: {text}"
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| DriftProxyError::ResolverFailure(format!("malformed response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DriftProxyError::ResolverFailure("empty choices".into()))?;

        let decision = parse_decision(&content)?;
        decision
            .validate()
            .map_err(DriftProxyError::ResolverFailure)?;
        Ok(decision)
    }
}

const SYSTEM_PROMPT: &str = "You are a local development routing judge. Given an \
inventory of running processes and containers, decide which one a hostname \
refers to. Reply with a single JSON object: {\"kind\":\"process\"|\"container\",\
\"target\":string,\"port\":number,\"rationale\":string,\"workdir\":string?,\
\"command_regex\":string?}.";

fn build_prompt(
    statement: &str,
    user_hint: Option<&str>,
    inventory: &InventorySnapshot,
) -> String {
    let processes = serde_json::to_string_pretty(&inventory.processes).unwrap_or_default();
    let containers = serde_json::to_string_pretty(&inventory.containers).unwrap_or_default();
    let mappings = serde_json::to_string_pretty(&inventory.mappings).unwrap_or_default();

    let mut prompt = format!(
        "Processes:\n{processes}\n\nContainers:\n{containers}\n\nCurrent mappings:\n{mappings}\n\n{statement}.",
    );
    if let Some(hint) = user_hint {
        prompt.push_str(&format!("\n\nUser hint: {hint}"));
    }
    prompt
}

/// Strip a leading ```json fence and trailing ``` if present, then parse.
fn parse_decision(content: &str) -> Result<TargetDecision, DriftProxyError> {
    let trimmed = strip_code_fence(content.trim());
    serde_json::from_str(trimmed)
        .map_err(|e| DriftProxyError::ResolverFailure(format!("unparseable judge reply: {e}")))
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"kind\":\"process\"}\n```";
        assert_eq!(strip_code_fence(raw), "{\"kind\":\"process\"}");
    }

    #[test]
    fn strips_bare_code_fence() {
        let raw = "```\n{\"kind\":\"process\"}\n```";
        assert_eq!(strip_code_fence(raw), "{\"kind\":\"process\"}");
    }

    #[test]
    fn leaves_unfenced_content_alone() {
        let raw = "{\"kind\":\"process\"}";
        assert_eq!(strip_code_fence(raw), raw);
    }

    #[test]
    fn parses_valid_decision() {
        let content = r#"{"kind":"process","target":"localhost","port":3000,"rationale":"vite"}"#;
        let decision = parse_decision(content).unwrap();
        assert_eq!(decision.target, "localhost");
        assert_eq!(decision.port, 3000);
    }

    #[test]
    fn rejects_malformed_json() {
        let content = "not json at all";
        assert!(parse_decision(content).is_err());
    }
}
