//! Language-aware text normalization.
//!
//! The [`Normalizer`] pre-cleans extracted text (letter unification, digit
//! folding, diacritic removal), delegates tokenization and lemmatization to a
//! pluggable [`LanguageToolkit`], then drops stopwords and punctuation.

mod cleanup;
mod stopwords;
mod toolkit;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use lexcrawl_shared::Result;

pub use toolkit::{RULE_BASED_VERSION, RuleBasedToolkit};

// ---------------------------------------------------------------------------
// Toolkit capability
// ---------------------------------------------------------------------------

/// A token as produced by a [`LanguageToolkit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// The token as it appears in the cleaned text.
    pub surface: String,
    /// Dictionary form.
    pub lemma: String,
}

/// Tokenization and lemmatization capability.
///
/// Implementations must be deterministic for equal input and model version.
pub trait LanguageToolkit: Send + Sync {
    /// Tokenize `text` and attach a lemma to every token. Unsupported
    /// languages return a normalization error.
    fn tokenize_and_lemmatize(&self, text: &str, language: &str) -> Result<Vec<Token>>;

    /// Version string persisted with each normalized document.
    fn model_version(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDocument {
    /// Pre-cleaned text that was handed to the toolkit.
    pub text: String,
    /// Lemmas with stopwords and punctuation removed, in document order.
    pub tokens: Vec<String>,
    pub language: String,
    pub model_version: String,
}

/// Stateless normalizer sharing one toolkit across all workers.
#[derive(Clone)]
pub struct Normalizer {
    toolkit: Arc<dyn LanguageToolkit>,
}

impl Normalizer {
    pub fn new(toolkit: Arc<dyn LanguageToolkit>) -> Self {
        Self { toolkit }
    }

    /// A normalizer backed by [`RuleBasedToolkit`].
    pub fn rule_based() -> Self {
        Self::new(Arc::new(RuleBasedToolkit::new()))
    }

    pub fn model_version(&self) -> &str {
        self.toolkit.model_version()
    }

    /// Normalize `text` written in `language`.
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub fn normalize(&self, text: &str, language: &str) -> Result<NormalizedDocument> {
        let cleaned = cleanup::run_pipeline(text);
        let tokens = self.toolkit.tokenize_and_lemmatize(&cleaned, language)?;
        let total = tokens.len();

        let tokens: Vec<String> = tokens
            .into_iter()
            .filter(|t| !is_punctuation(&t.surface))
            .filter(|t| {
                !stopwords::is_stopword(language, &t.surface)
                    && !stopwords::is_stopword(language, &t.lemma)
            })
            .map(|t| t.lemma)
            .collect();

        debug!(total, kept = tokens.len(), "normalized text");

        Ok(NormalizedDocument {
            text: cleaned,
            tokens,
            language: language.to_string(),
            model_version: self.toolkit.model_version().to_string(),
        })
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("model_version", &self.toolkit.model_version())
            .finish()
    }
}

/// A token with no letter or digit in it.
fn is_punctuation(token: &str) -> bool {
    !token.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingToolkit {
        calls: AtomicUsize,
    }

    impl LanguageToolkit for CountingToolkit {
        fn tokenize_and_lemmatize(&self, text: &str, _language: &str) -> Result<Vec<Token>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text
                .split_whitespace()
                .map(|w| Token {
                    surface: w.into(),
                    lemma: w.to_uppercase(),
                })
                .collect())
        }

        fn model_version(&self) -> &str {
            "counting/0"
        }
    }

    #[test]
    fn persian_pipeline() {
        let normalizer = Normalizer::rule_based();
        let out = normalizer
            .normalize("ماده ۱ - این قانون از تاريخ تصویب در دادگاههای کشور لازم‌الاجرا است.", "fa")
            .expect("normalize");

        assert_eq!(out.model_version, "rule-based/1");
        assert_eq!(out.language, "fa");
        assert!(out.text.contains("ماده 1"));
        assert!(out.text.contains("تاریخ"));
        assert!(out.tokens.contains(&"دادگاه".to_string()));
        assert!(out.tokens.contains(&"قانون".to_string()));
        for stop in ["این", "از", "در", "است", "-", "."] {
            assert!(!out.tokens.contains(&stop.to_string()), "{stop} should be dropped");
        }
    }

    #[test]
    fn english_pipeline() {
        let out = Normalizer::rule_based()
            .normalize("The courts of the Republic shall hear all appeals.", "en")
            .unwrap();
        assert_eq!(out.tokens, vec!["court", "republic", "shall", "hear", "appeal"]);
    }

    #[test]
    fn deterministic() {
        let normalizer = Normalizer::rule_based();
        let text = "قانون مجازات اسلامی، کتاب پنجم";
        assert_eq!(
            normalizer.normalize(text, "fa").unwrap(),
            normalizer.normalize(text, "fa").unwrap()
        );
    }

    #[test]
    fn unsupported_language_is_an_error() {
        let err = Normalizer::rule_based().normalize("texte", "fr").unwrap_err();
        assert!(err.to_string().contains("unsupported language"));
    }

    #[test]
    fn custom_toolkit_is_used() {
        let toolkit = Arc::new(CountingToolkit {
            calls: AtomicUsize::new(0),
        });
        let normalizer = Normalizer::new(toolkit.clone());
        let out = normalizer.normalize("alpha , beta", "xx").unwrap();
        assert_eq!(out.tokens, vec!["ALPHA", "BETA"]);
        assert_eq!(out.model_version, "counting/0");
        assert_eq!(toolkit.calls.load(Ordering::SeqCst), 1);
    }
}
