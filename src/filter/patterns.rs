use once_cell::sync::Lazy;
use regex::Regex;

static HOMEWORK_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(what is|explain|define|how does|calculate|solve|find the|prove|show that)")
        .expect("homework opener pattern is valid")
});

static DIRECT_ANSWER_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(what's|whats|tell me about|give me|list)")
        .expect("direct answer opener pattern is valid")
});

/// True when the question opens like a homework prompt ("explain ...",
/// "what is ...") or asks for a bare answer ("tell me about ...").
///
/// Only the opening of the trimmed text is inspected; the match is a prefix,
/// so "listen" still counts as "list".
pub fn is_homework_pattern(text: &str) -> bool {
    let trimmed = text.trim();
    HOMEWORK_OPENER.is_match(trimmed) || DIRECT_ANSWER_OPENER.is_match(trimmed)
}
