//! Chat-completions oracle client.

use super::{Oracle, OracleError, RankedCompletion};
use crate::config::OracleConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::RequestContext;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Oracle backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpOracleClient {
    client: Client,
    config: OracleConfig,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpOracleClient {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "Oracle API key not found, oracle disabled"
            );
        }

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn chat(&self, system: &str, prompt: &str) -> std::result::Result<String, OracleError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| OracleError::NotConfigured("missing API key".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::RequestFailed(format!(
                "status {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::UnparseableReply(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| OracleError::UnparseableReply("empty choices".to_string()))
    }

    fn swallow(&self, call: &str, error: OracleError) {
        tracing::warn!(call = call, error = %error, "Oracle call treated as empty");
        metrics::ORACLE_FAILURES_TOTAL.with_label_values(&[call]).inc();
    }

    fn context_lines(context: Option<&RequestContext>) -> String {
        let mut lines = String::new();
        if let Some(context) = context {
            if let Some(domain) = &context.domain {
                lines.push_str(&format!("Domain: {}\n", domain));
            }
            if !context.user_history.is_empty() {
                let recent: Vec<&str> = context
                    .user_history
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect();
                lines.push_str(&format!("Recent queries: {}\n", recent.join(", ")));
            }
        }
        lines
    }
}

/// Parse a free-form model reply into a list of queries: one per line,
/// falling back to comma separation, with numbering, bullets, and quotes
/// stripped.
pub(crate) fn parse_reply(reply: &str) -> Vec<String> {
    let mut lines: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() == 1 {
        lines = lines[0]
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
    }

    lines
        .into_iter()
        .map(|line| {
            let mut cleaned = line;
            // "1. foo" style numbering
            if let Some((head, rest)) = cleaned.split_once('.') {
                if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) {
                    cleaned = rest.trim();
                }
            }
            cleaned = cleaned.trim_start_matches(['-', '*', '•', '·']).trim();
            cleaned.trim_matches(['"', '\'', '“', '”', '‘', '’']).trim()
        })
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

#[async_trait]
impl Oracle for HttpOracleClient {
    fn is_available(&self) -> bool {
        self.config.enabled && self.api_key.is_some()
    }

    async fn expand_query(&self, query: &str, context: Option<&RequestContext>) -> Vec<String> {
        if !self.is_available() {
            return Vec::new();
        }

        let prompt = format!(
            "Given the business intelligence query: '{}'\n\n{}\nGenerate {} semantically related queries that a user might also search for. \
             Return only the queries, one per line, without numbering or explanation.",
            query,
            Self::context_lines(context),
            self.config.max_expansions,
        );

        match self
            .chat(
                "You are a query expansion assistant for a business intelligence system. \
                 Generate semantically related queries.",
                &prompt,
            )
            .await
        {
            Ok(reply) => {
                let mut expansions = parse_reply(&reply);
                expansions.truncate(self.config.max_expansions);
                tracing::debug!(query = %query, count = expansions.len(), "Query expanded");
                expansions
            }
            Err(e) => {
                self.swallow("expand", e);
                Vec::new()
            }
        }
    }

    async fn generate_related(
        &self,
        query: &str,
        context: Option<&RequestContext>,
    ) -> Vec<String> {
        if !self.is_available() {
            return Vec::new();
        }

        let prompt = format!(
            "Given the business intelligence query: '{}'\n\n{}\nGenerate {} related follow-up queries that would naturally come after this query. \
             Focus on logical next steps in analysis or exploration. \
             Return only the queries, one per line, without numbering or explanation.",
            query,
            Self::context_lines(context),
            self.config.max_related,
        );

        match self
            .chat(
                "You are a business intelligence query assistant. Generate relevant follow-up queries.",
                &prompt,
            )
            .await
        {
            Ok(reply) => {
                let mut related = parse_reply(&reply);
                related.truncate(self.config.max_related);
                related
            }
            Err(e) => {
                self.swallow("related", e);
                Vec::new()
            }
        }
    }

    async fn rank_prefix_completions(
        &self,
        prefix: &str,
        tail: &str,
        candidates: &[String],
        context: Option<&RequestContext>,
    ) -> Vec<RankedCompletion> {
        if !self.is_available() || candidates.is_empty() {
            return Vec::new();
        }

        let prompt = format!(
            "A user is typing a business intelligence query. The stable part is '{}' and the \
             unfinished final term is '{}'.\n\n{}\nCandidate completions of the final term:\n{}\n\n\
             Return the candidates that best complete the term in this context, best first, \
             one per line, without numbering or explanation.",
            prefix,
            tail,
            Self::context_lines(context),
            candidates.join("\n"),
        );

        match self
            .chat(
                "You rank completions of an unfinished query term. Only return candidates you were given.",
                &prompt,
            )
            .await
        {
            Ok(reply) => {
                // Replies outside the candidate set are discarded
                let allowed: std::collections::HashSet<&str> =
                    candidates.iter().map(String::as_str).collect();
                parse_reply(&reply)
                    .into_iter()
                    .filter(|line| allowed.contains(line.as_str()))
                    .enumerate()
                    .map(|(i, text)| RankedCompletion {
                        text,
                        score: (0.95 - i as f64 * 0.05).max(0.05),
                    })
                    .collect()
            }
            Err(e) => {
                self.swallow("rank_completions", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_lines() {
        let reply = "1. 销售额趋势\n2. 各地区销售对比\n- 销售预测";
        let parsed = parse_reply(reply);
        assert_eq!(parsed, vec!["销售额趋势", "各地区销售对比", "销售预测"]);
    }

    #[test]
    fn test_parse_reply_comma_fallback() {
        let parsed = parse_reply("revenue by region, revenue trend, top products");
        assert_eq!(
            parsed,
            vec!["revenue by region", "revenue trend", "top products"]
        );
    }

    #[test]
    fn test_parse_reply_strips_quotes() {
        let parsed = parse_reply("\"销售额\"\n'销量'");
        assert_eq!(parsed, vec!["销售额", "销量"]);
    }

    #[test]
    fn test_unavailable_without_key() {
        let config = OracleConfig {
            enabled: true,
            api_key_env: "ORACLE_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..Default::default()
        };
        let client = HttpOracleClient::new(config).unwrap();
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_unavailable_oracle_returns_empty() {
        let config = OracleConfig {
            enabled: true,
            api_key_env: "ORACLE_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            ..Default::default()
        };
        let client = HttpOracleClient::new(config).unwrap();
        assert!(client.expand_query("销售", None).await.is_empty());
        assert!(client.generate_related("销售", None).await.is_empty());
        assert!(client
            .rank_prefix_completions("查询", "销", &["销售额".to_string()], None)
            .await
            .is_empty());
    }
}
