use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::characters::Persona;
use crate::config::{ModelConfig, TokenPricing};
use crate::models::{ChatTurn, Role};

/// Output of one model call, metered for the usage ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub tokens_used: i64,
    pub cost: Decimal,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        persona: &Persona,
        history: &[ChatTurn],
        question: &str,
    ) -> Result<Generation>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        num_predict: usize,
        temperature: f32,
    ) -> Result<ChatCompletion> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            num_predict: usize,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            message: ChatMessage,
            #[serde(default)]
            prompt_eval_count: i64,
            #[serde(default)]
            eval_count: i64,
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatReq {
                model,
                messages,
                stream: false,
                options: ChatOptions {
                    num_predict,
                    temperature,
                },
            })
            .send()
            .await
            .context("failed to call ollama chat endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "ollama /api/chat returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode ollama chat response")?;

        Ok(ChatCompletion {
            content: response.message.content.trim().to_string(),
            prompt_tokens: response.prompt_eval_count.max(0),
            completion_tokens: response.eval_count.max(0),
        })
    }
}

/// Answers in a persona's voice through Ollama and prices the call.
#[derive(Clone)]
pub struct PersonaGenerator {
    ollama: OllamaClient,
    models: ModelConfig,
    pricing: TokenPricing,
}

impl PersonaGenerator {
    pub fn new(ollama: OllamaClient, models: ModelConfig, pricing: TokenPricing) -> Self {
        Self {
            ollama,
            models,
            pricing,
        }
    }
}

#[async_trait]
impl TextGenerator for PersonaGenerator {
    async fn generate(
        &self,
        persona: &Persona,
        history: &[ChatTurn],
        question: &str,
    ) -> Result<Generation> {
        let messages = build_messages(persona, history, question);
        let completion = self
            .ollama
            .chat(
                &self.models.chat_model,
                &messages,
                self.models.max_output_tokens,
                self.models.temperature,
            )
            .await?;

        if completion.content.is_empty() {
            anyhow::bail!("ollama returned an empty reply for {}", persona.id);
        }

        Ok(Generation {
            tokens_used: completion.prompt_tokens + completion.completion_tokens,
            cost: self
                .pricing
                .cost_for(completion.prompt_tokens, completion.completion_tokens),
            content: completion.content,
        })
    }
}

pub fn build_messages(persona: &Persona, history: &[ChatTurn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: persona.system_prompt(),
    });
    for turn in history {
        messages.push(ChatMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage {
        role: Role::User.as_str().to_string(),
        content: question.trim().to_string(),
    });
    messages
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
