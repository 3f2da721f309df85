//! Text transforms served by the preprocessing service
//!
//! Each transform is pure and deterministic for a given `(text, options)`,
//! which is what lets [`crate::caching_executor::CachingExecutor`] memoize it.
//!
//! Option defaults:
//!
//! | Transform | Option | Default |
//! |---|---|---|
//! | clean | `remove_extra_whitespace` | true |
//! | clean | `remove_urls` | true |
//! | clean | `remove_emails` | true |
//! | clean | `remove_special_chars` | false |
//! | clean | `remove_numbers` | false |
//! | tokenize | `split_punctuation` | true |
//! | normalize | `lowercase` | true |
//! | normalize | `remove_punctuation` | false |

use crate::models::TextOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*\\(\\),]|(?:%[0-9a-fA-F][0-9a-fA-F]))+")
        .expect("valid regex")
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").expect("valid regex")
});

static SPECIAL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s.,!?;:]").expect("valid regex"));

static NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b|[.,!?;]").expect("valid regex"));

/// Cached result of any transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformOutput {
    Cleaned {
        text: String,
        operations: Vec<String>,
    },
    Tokens(Vec<String>),
    Normalized {
        text: String,
        operations: Vec<String>,
    },
}

/// Clean text by removing unwanted characters and formatting
///
/// # Returns
/// The trimmed result and the names of the steps applied, in order
pub fn clean(text: &str, options: &TextOptions) -> (String, Vec<String>) {
    let mut operations = Vec::new();
    let mut cleaned = text.to_string();

    if options.flag("remove_extra_whitespace", true) {
        cleaned = WHITESPACE.replace_all(&cleaned, " ").trim().to_string();
        operations.push("removed_extra_whitespace".to_string());
    }

    if options.flag("remove_urls", true) {
        cleaned = URL.replace_all(&cleaned, "").into_owned();
        operations.push("removed_urls".to_string());
    }

    if options.flag("remove_emails", true) {
        cleaned = EMAIL.replace_all(&cleaned, "").into_owned();
        operations.push("removed_emails".to_string());
    }

    if options.flag("remove_special_chars", false) {
        cleaned = SPECIAL_CHARS.replace_all(&cleaned, "").into_owned();
        operations.push("removed_special_characters".to_string());
    }

    if options.flag("remove_numbers", false) {
        cleaned = NUMBERS.replace_all(&cleaned, "").into_owned();
        operations.push("removed_numbers".to_string());
    }

    let cleaned = cleaned.trim().to_string();
    debug!(
        original_length = text.chars().count(),
        final_length = cleaned.chars().count(),
        ?operations,
        "Text cleaning completed"
    );
    (cleaned, operations)
}

/// Lowercase and split into tokens
///
/// With `split_punctuation` words and the marks `.,!?;` become separate
/// tokens; without it the text is split on whitespace only.
pub fn tokenize(text: &str, options: &TextOptions) -> Vec<String> {
    let lowered = text.to_lowercase();

    let tokens: Vec<String> = if options.flag("split_punctuation", true) {
        TOKEN
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    } else {
        lowered.split_whitespace().map(str::to_string).collect()
    };

    let tokens: Vec<String> = tokens.into_iter().filter(|t| !t.trim().is_empty()).collect();
    debug!(token_count = tokens.len(), "Tokenization completed");
    tokens
}

/// Normalize case and whitespace
pub fn normalize(text: &str, options: &TextOptions) -> (String, Vec<String>) {
    let mut operations = Vec::new();
    let mut normalized = text.to_string();

    if options.flag("lowercase", true) {
        normalized = normalized.to_lowercase();
        operations.push("converted_to_lowercase".to_string());
    }

    if options.flag("remove_punctuation", false) {
        normalized.retain(|c| !c.is_ascii_punctuation());
        operations.push("removed_punctuation".to_string());
    }

    let normalized = WHITESPACE.replace_all(&normalized, " ").trim().to_string();
    operations.push("standardized_whitespace".to_string());

    debug!(final_length = normalized.chars().count(), ?operations, "Normalization completed");
    (normalized, operations)
}

/// `clean` as a cacheable computation
pub fn clean_output(text: &str, options: &TextOptions) -> TransformOutput {
    let (text, operations) = clean(text, options);
    TransformOutput::Cleaned { text, operations }
}

/// `tokenize` as a cacheable computation
pub fn tokenize_output(text: &str, options: &TextOptions) -> TransformOutput {
    TransformOutput::Tokens(tokenize(text, options))
}

/// `normalize` as a cacheable computation
pub fn normalize_output(text: &str, options: &TextOptions) -> TransformOutput {
    let (text, operations) = normalize(text, options);
    TransformOutput::Normalized { text, operations }
}
