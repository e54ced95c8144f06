use serde::{Deserialize, Serialize};

use super::classifier::Classification;
use crate::models::ContentFilterMode;

/// Confidence at or above which a violation is blocked in normal mode.
pub const NORMAL_MODE_BLOCK_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDecision {
    pub block: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            block: false,
            reason: None,
        }
    }
}

pub fn evaluate_blocking_policy(
    classification: &Classification,
    mode: ContentFilterMode,
) -> PolicyDecision {
    if !classification.is_violation {
        return PolicyDecision::allow();
    }

    let block = match mode {
        ContentFilterMode::Strict => true,
        ContentFilterMode::Normal => classification.confidence >= NORMAL_MODE_BLOCK_THRESHOLD,
    };
    if !block {
        return PolicyDecision::allow();
    }

    let subject = classification
        .category
        .map(|category| category.label())
        .unwrap_or("an unrelated subject");

    PolicyDecision {
        block: true,
        reason: Some(format!(
            "This question looks like it is about {subject}, not the novel. \
             Try asking the character about their choices, motives, or what \
             happened in the story instead."
        )),
    }
}
