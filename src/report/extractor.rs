//! Structured report extraction over an OpenAI-compatible chat API.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::models::StructuredReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const EXTRACTION_PROMPT: &str = r#"You extract structured data from a penetration test report written in markdown.

Return a single JSON object with these keys:
executive_summary, executive_summary_teaser (two or three sentences), risk_level
(Critical|High|Medium|Low|Clean|Indeterminate), risk_rationale,
scan_stats {endpoints_discovered, endpoints_tested, subdomains_found, requests_sent, duration_minutes, technologies_identified},
categories_tested [{name, status (tested|partial|findings|skipped), findings_count, note}],
attack_surface {subdomains, key_routes, technologies, auth_mechanisms, external_services},
areas_of_interest [{title, severity (Critical|High|Medium|Low|Info), teaser, technical_detail, affected_component, recommendation}],
recommendations [{priority (0 is most urgent), title, description, effort, impact}],
constraints [{description, impact}],
deep_scan_value_prop, what_deep_scan_covers [string].

Rules:
- Keep every detail the report gives. Do not summarize findings away.
- Areas of interest are not only confirmed vulnerabilities. Include suspicious patterns,
  untested areas and architectural concerns. A clean report still has two or three.
- Teasers must describe the issue accurately without giving away the technical detail.
- If the scan was blocked or limited, say so in constraints and still extract what was found.
- Give at least three recommendations. If testing was limited, the first one is about enabling proper testing.
- The deep scan value proposition names what this scan could not cover."#;

/// Turns a markdown report into a structured one.
#[async_trait]
pub trait ReportExtractor: Send + Sync {
    async fn extract(&self, markdown: &str) -> Result<StructuredReport, ExtractionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Extractor backed by a chat completion endpoint.
pub struct LlmReportExtractor {
    config: ExtractionConfig,
    http_client: reqwest::Client,
}

impl LlmReportExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        info!("Report extraction via {} ({})", config.api_url, config.model);
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl ReportExtractor for LlmReportExtractor {
    async fn extract(&self, markdown: &str) -> Result<StructuredReport, ExtractionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractionError::NotConfigured("no API key".to_string()))?;

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: EXTRACTION_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Extract structured data from this penetration test report:\n\n{}",
                        markdown
                    ),
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!("Sending {} characters of report for extraction", markdown.len());
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api { status, body });
        }

        let chat: ChatResponse = response.json().await?;
        parse_reply(chat)
    }
}

fn parse_reply(chat: ChatResponse) -> Result<StructuredReport, ExtractionError> {
    let message = chat
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(ExtractionError::Empty)?;

    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(ExtractionError::Refused(refusal));
    }

    let content = message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(ExtractionError::Empty)?;

    Ok(serde_json::from_str(strip_code_fence(&content))?)
}

/// Some models wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
