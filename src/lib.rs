pub mod characters;
pub mod chat;
pub mod config;
pub mod db;
pub mod filter;
pub mod models;
pub mod ollama;
pub mod server;
pub mod store;
pub mod usage;
pub mod violations;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use filter::{classify_content, evaluate_blocking_policy};
pub use server::run_server;
pub use usage::check_usage_limits;
