use serde::{Deserialize, Serialize};

use super::lexicon::{Category, LITERATURE};
use super::patterns::is_homework_pattern;

const MAX_LISTED_KEYWORDS: usize = 5;

/// How keywords are located in the question text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Plain substring search. "pi" matches inside "spinning".
    #[default]
    Substring,
    /// A keyword only counts when it is not glued to other letters or digits.
    WordBoundary,
}

impl MatchMode {
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "word_boundary" | "word-boundary" | "word" => MatchMode::WordBoundary,
            _ => MatchMode::Substring,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub is_violation: bool,
    pub category: Option<Category>,
    pub confidence: f32,
    pub details: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    match_mode: MatchMode,
}

#[derive(Debug)]
struct KeywordHits {
    count: usize,
    matched: Vec<&'static str>,
}

impl Classifier {
    pub fn new(match_mode: MatchMode) -> Self {
        Self { match_mode }
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn classify(&self, text: &str) -> Classification {
        let normalized = normalize(text);

        let by_category: Vec<(Category, KeywordHits)> = Category::ALL
            .iter()
            .map(|category| (*category, self.count_hits(&normalized, category.keywords())))
            .collect();
        let literature = self.count_hits(&normalized, LITERATURE);

        let off_topic: usize = by_category.iter().map(|(_, hits)| hits.count).sum();
        let lit = literature.count;
        let homework = is_homework_pattern(text);
        let top = top_category(&by_category);

        if off_topic >= 3 {
            let confidence = (off_topic as f32 / 5.0).min(0.95);
            return violation(
                "multiple off-topic keywords",
                top,
                confidence,
                off_topic,
                lit,
            );
        }

        if off_topic >= 1 && homework && lit == 0 {
            return violation(
                "homework-style question with no literature context",
                top,
                0.85,
                off_topic,
                lit,
            );
        }

        if lit >= 3 {
            return allowed("strong literature context", 0.9, off_topic, lit, top);
        }

        if lit > 0 {
            return allowed("literature context detected", 0.8, off_topic, lit, top);
        }

        if off_topic == 2 {
            return violation("two off-topic keywords", top, 0.7, off_topic, lit);
        }

        if off_topic == 1 && !homework {
            return allowed(
                "single off-topic keyword, treated as contextual",
                0.6,
                off_topic,
                lit,
                top,
            );
        }

        allowed("no off-topic keywords", 0.95, off_topic, lit, None)
    }

    fn count_hits(&self, text: &str, keywords: &[&'static str]) -> KeywordHits {
        let mut count = 0;
        let mut matched = Vec::new();
        for keyword in keywords {
            let occurrences = match self.match_mode {
                MatchMode::Substring => text.matches(keyword).count(),
                MatchMode::WordBoundary => count_bounded(text, keyword),
            };
            if occurrences > 0 {
                count += occurrences;
                matched.push(*keyword);
            }
        }
        KeywordHits { count, matched }
    }
}

/// Classifies with the default substring matching.
pub fn classify_content(text: &str) -> Classification {
    Classifier::default().classify(text)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn count_bounded(text: &str, keyword: &str) -> usize {
    text.match_indices(keyword)
        .filter(|(start, found)| {
            let before = text[..*start].chars().next_back();
            let after = text[start + found.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
        .count()
}

fn top_category(by_category: &[(Category, KeywordHits)]) -> Option<(Category, &KeywordHits)> {
    let mut best: Option<(Category, &KeywordHits)> = None;
    for (category, hits) in by_category {
        if hits.count == 0 {
            continue;
        }
        match best {
            Some((_, current)) if current.count >= hits.count => {}
            _ => best = Some((*category, hits)),
        }
    }
    best
}

fn violation(
    rule: &str,
    top: Option<(Category, &KeywordHits)>,
    confidence: f32,
    off_topic: usize,
    lit: usize,
) -> Classification {
    Classification {
        is_violation: true,
        category: top.map(|(category, _)| category),
        confidence,
        details: describe(rule, off_topic, lit, top),
    }
}

fn allowed(
    rule: &str,
    confidence: f32,
    off_topic: usize,
    lit: usize,
    top: Option<(Category, &KeywordHits)>,
) -> Classification {
    Classification {
        is_violation: false,
        category: None,
        confidence,
        details: describe(rule, off_topic, lit, top),
    }
}

fn describe(
    rule: &str,
    off_topic: usize,
    lit: usize,
    top: Option<(Category, &KeywordHits)>,
) -> String {
    let mut details =
        format!("{rule}: {off_topic} off-topic and {lit} literature keyword match(es)");
    if let Some((category, hits)) = top {
        let listed: Vec<&str> = hits
            .matched
            .iter()
            .take(MAX_LISTED_KEYWORDS)
            .copied()
            .collect();
        details.push_str(&format!(
            "; top category {} ({} match(es): {})",
            category.as_str(),
            hits.count,
            listed.join(", ")
        ));
    }
    details
}
