use std::future::Future;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AppConfig;
use crate::models::Message;

/**
 * \brief 远端补全接口的抽象，便于测试时替换为桩实现。
 * \details 单次调用，无重试、无超时；传输或接口错误直接返回给调用方。
 */
pub trait CompletionBackend: Send + Sync {
    fn complete(
        &self,
        model: &str,
        messages: &[Message],
    ) -> impl Future<Output = Result<String>> + Send;
}

/**
 * \brief OpenAI 兼容的 Chat Completions 客户端（如 OpenRouter）。
 */
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            api_key: api_key.into(),
        })
    }

    /**
     * \brief 从运行配置构建客户端；未配置 API Key 时报错。
     */
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("OPENROUTER_API_KEY is not set")?;
        Self::new(config.api_base.clone(), api_key)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

impl CompletionBackend for OpenAiClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let body = json!({
            "model": model,
            "messages": content_block_messages(messages),
        });
        debug!("POST {} model={} messages={}", url, model, messages.len());

        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("request failed: {} -> {}", status, text));
        }
        let v: Value = resp.json().await?;
        Ok(extract_openai_content(&v))
    }
}

/**
 * \brief 将消息转为带类型的内容块格式：`{"role", "content": [{"type": "text", "text"}]}`。
 */
fn content_block_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            json!({
                "role": msg.role,
                "content": [{"type": "text", "text": msg.content}]
            })
        })
        .collect()
}

fn extract_openai_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_content_block_messages_shape() {
        let payload = content_block_messages(&[Message::user("hi"), Message::assistant("yo")]);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0]["role"], "user");
        assert_eq!(payload[0]["content"][0]["type"], "text");
        assert_eq!(payload[1]["content"][0]["text"], "yo");
    }

    #[test]
    fn test_extract_content_missing_choice_is_empty() {
        assert_eq!(extract_openai_content(&json!({"choices": []})), "");
        assert_eq!(
            extract_openai_content(&json!({"choices": [{"message": {"content": "ok"}}]})),
            "ok"
        );
    }

    #[tokio::test]
    async fn test_complete_posts_model_and_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "test/model",
                "messages": [{"role": "user", "content": [{"type": "text", "text": "hello"}]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "hi there"}}]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(format!("{}/", server.url()), "sk-test").expect("client");
        let reply = client
            .complete("test/model", &[Message::user("hello")])
            .await
            .expect("complete");
        assert_eq!(reply, "hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let client = OpenAiClient::new(server.url(), "sk-wrong").expect("client");
        let err = client
            .complete("m", &[Message::user("hello")])
            .await
            .expect_err("401 must fail");
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("bad key"));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = AppConfig {
            api_key: None,
            ..AppConfig::default()
        };
        assert!(OpenAiClient::from_config(&config).is_err());

        let config = AppConfig {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: Some("sk-test".to_string()),
            ..AppConfig::default()
        };
        let client = OpenAiClient::from_config(&config).expect("client");
        assert_eq!(client.api_base(), "https://openrouter.ai/api/v1");
    }
}
