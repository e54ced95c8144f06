use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use mocktrial::filter::{evaluate_blocking_policy, Category, Classifier, MatchMode};
use mocktrial::models::ContentFilterMode;

#[derive(Parser, Debug)]
#[command(name = "classify")]
#[command(about = "Run the content filter over a prompt set or ad-hoc questions")]
struct Cli {
    /// JSONL file of prompts; ignored when --question is given.
    #[arg(long, default_value = "eval/filter_cases.jsonl")]
    file: String,
    #[arg(long = "question", short = 'q')]
    questions: Vec<String>,
    #[arg(long, value_enum, default_value_t = Mode::Normal)]
    mode: Mode,
    #[arg(long, default_value_t = false)]
    word_boundary: bool,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Normal,
    Strict,
}

impl From<Mode> for ContentFilterMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Normal => ContentFilterMode::Normal,
            Mode::Strict => ContentFilterMode::Strict,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FilterCase {
    id: String,
    question: String,
    #[serde(default)]
    expect_violation: Option<bool>,
    #[serde(default)]
    expect_block: Option<bool>,
    #[serde(default)]
    expect_category: Option<Category>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let classifier = Classifier::new(if cli.word_boundary {
        MatchMode::WordBoundary
    } else {
        MatchMode::Substring
    });
    let mode = ContentFilterMode::from(cli.mode);

    let cases = if cli.questions.is_empty() {
        load_cases(&cli.file)?
    } else {
        cli.questions
            .iter()
            .enumerate()
            .map(|(idx, question)| FilterCase {
                id: format!("q{}", idx + 1),
                question: question.clone(),
                expect_violation: None,
                expect_block: None,
                expect_category: None,
            })
            .collect()
    };
    if cases.is_empty() {
        anyhow::bail!("no prompts found in {}", cli.file);
    }

    let mut total = 0usize;
    let mut blocked = 0usize;
    let mut checked = 0usize;
    let mut passed = 0usize;

    for case in &cases {
        total += 1;
        let classification = classifier.classify(&case.question);
        let decision = evaluate_blocking_policy(&classification, mode);
        if decision.block {
            blocked += 1;
        }

        let mut expectations = Vec::new();
        if let Some(expected) = case.expect_violation {
            expectations.push(expected == classification.is_violation);
        }
        if let Some(expected) = case.expect_block {
            expectations.push(expected == decision.block);
        }
        if let Some(expected) = case.expect_category {
            expectations.push(Some(expected) == classification.category);
        }

        let verdict = if expectations.is_empty() {
            "-"
        } else {
            checked += 1;
            if expectations.iter().all(|ok| *ok) {
                passed += 1;
                "PASS"
            } else {
                "FAIL"
            }
        };

        println!(
            "{:<6} {:<12} {:<5} {:.2} {:<28} {}",
            verdict,
            case.id,
            if decision.block { "BLOCK" } else { "allow" },
            classification.confidence,
            classification
                .category
                .map(Category::as_str)
                .unwrap_or("-"),
            case.question
        );
        if cli.verbose {
            println!("       {}", classification.details);
        }
    }

    println!();
    println!("Prompts: {} (mode {}, {:?} matching)", total, mode.as_str(), classifier.match_mode());
    println!("Blocked: {} ({:.1}%)", blocked, ratio(blocked, total) * 100.0);
    if checked > 0 {
        println!(
            "Expectations met: {}/{} ({:.1}%)",
            passed,
            checked,
            ratio(passed, checked) * 100.0
        );
    }

    if passed < checked {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_cases(path: &str) -> Result<Vec<FilterCase>> {
    let file = File::open(path).with_context(|| format!("failed opening {}", path))?;
    let reader = BufReader::new(file);
    let mut cases = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed: FilterCase = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON at {} line {}", path, idx + 1))?;
        cases.push(parsed);
    }

    Ok(cases)
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}
