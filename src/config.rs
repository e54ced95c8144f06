use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::filter::MatchMode;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub chat_model: String,
    pub max_output_tokens: usize,
    pub temperature: f32,
    pub history_turns: i64,
    pub generation_concurrency: usize,
}

/// Prices in dollars per 1,000 tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenPricing {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

impl TokenPricing {
    pub fn cost_for(&self, prompt_tokens: i64, completion_tokens: i64) -> Decimal {
        let thousand = Decimal::from(1000);
        (Decimal::from(prompt_tokens) * self.input_per_1k
            + Decimal::from(completion_tokens) * self.output_per_1k)
            / thousand
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub ollama_base_url: String,
    pub models: ModelConfig,
    pub pricing: TokenPricing,
    pub match_mode: MatchMode,
    /// Shared secret for the admin API. Admin routes refuse every request when unset.
    pub admin_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("MOCKTRIAL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("MOCKTRIAL_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir,
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            models: ModelConfig {
                chat_model: env::var("CHAT_MODEL")
                    .unwrap_or_else(|_| "qwen2.5:14b-instruct".to_string()),
                max_output_tokens: parsed_env("MAX_OUTPUT_TOKENS").unwrap_or(400),
                temperature: parsed_env("CHAT_TEMPERATURE").unwrap_or(0.7),
                history_turns: parsed_env("HISTORY_TURNS").unwrap_or(12),
                generation_concurrency: parsed_env("GENERATION_CONCURRENCY")
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(4),
            },
            pricing: TokenPricing {
                input_per_1k: decimal_env("INPUT_COST_PER_1K").unwrap_or_else(|| Decimal::new(15, 5)),
                output_per_1k: decimal_env("OUTPUT_COST_PER_1K")
                    .unwrap_or_else(|| Decimal::new(60, 5)),
            },
            match_mode: env::var("CONTENT_FILTER_MATCH")
                .map(|v| MatchMode::from_config(&v))
                .unwrap_or_default(),
            admin_token: env::var("MOCKTRIAL_ADMIN_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("mocktrial.sqlite3").display()
        )
    }
}

fn parsed_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn decimal_env(key: &str) -> Option<Decimal> {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
        .filter(|price| !price.is_sign_negative())
}
