//! Content relevance filter: keyword lexicon, question-shape patterns, the
//! rule-based classifier and the blocking policy that acts on its verdict.

pub mod classifier;
pub mod lexicon;
pub mod patterns;
pub mod policy;

pub use classifier::{classify_content, Classification, Classifier, MatchMode};
pub use lexicon::Category;
pub use policy::{evaluate_blocking_policy, PolicyDecision};
