//! Built-in rule-based language toolkit.

use std::sync::LazyLock;

use regex::Regex;

use lexcrawl_shared::{LexCrawlError, Result};

use crate::{LanguageToolkit, Token};

/// Version string stored with documents normalized by [`RuleBasedToolkit`].
pub const RULE_BASED_VERSION: &str = "rule-based/1";

/// Regex tokenizer with suffix-stripping lemmatization for Persian and English.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedToolkit;

impl RuleBasedToolkit {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageToolkit for RuleBasedToolkit {
    fn tokenize_and_lemmatize(&self, text: &str, language: &str) -> Result<Vec<Token>> {
        let lemmatize: fn(&str) -> String = match language {
            "fa" => lemmatize_fa,
            "en" => lemmatize_en,
            other => {
                return Err(LexCrawlError::Normalization(format!(
                    "unsupported language '{other}'"
                )));
            }
        };

        Ok(tokenize(text)
            .map(|surface| Token {
                lemma: lemmatize(surface),
                surface: surface.to_string(),
            })
            .collect())
    }

    fn model_version(&self) -> &str {
        RULE_BASED_VERSION
    }
}

/// Split into word runs and punctuation runs.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    static TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\w+|[^\w\s]+").expect("valid regex"));

    TOKEN_RE.find_iter(text).map(|m| m.as_str())
}

// ---------------------------------------------------------------------------
// Lemmatizers
// ---------------------------------------------------------------------------

/// Plural, superlative and possessive suffixes, longest first.
const FA_SUFFIXES: &[&str] = &[
    "هایی", "های", "ترین", "شان", "تان", "مان", "ها", "ام", "ات", "اش",
];

fn lemmatize_fa(word: &str) -> String {
    for suffix in FA_SUFFIXES {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.chars().count() >= 2 {
                return stem.to_string();
            }
        }
    }
    word.to_string()
}

fn lemmatize_en(word: &str) -> String {
    let lower = word.to_lowercase();
    let len = lower.chars().count();

    if len > 4 {
        if let Some(stem) = lower.strip_suffix("ies") {
            return format!("{stem}y");
        }
    }
    if len > 4 {
        for plural in ["sses", "shes", "ches", "xes", "zes"] {
            if lower.ends_with(plural) {
                return lower[..lower.len() - 2].to_string();
            }
        }
    }
    if len > 3 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
        return lower[..lower.len() - 1].to_string();
    }
    lower
}
