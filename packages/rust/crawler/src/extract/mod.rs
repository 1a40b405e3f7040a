//! HTML → clean text plus structural metadata.
//!
//! Each source gets a [`SelectorRules`] compiled from its configured
//! [`ExtractionRules`](lexcrawl_shared::ExtractionRules); any field it
//! leaves unset falls back to [`GenericRules`]. The [`RuleRegistry`] maps
//! source ids to their compiled rules and listing strategies.
//!
//! `scraper::Html` is not `Send`: everything here is synchronous and the
//! parsed document never outlives the call that created it.

mod generic;
mod links;
mod metadata;
mod rules;
mod text;

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use lexcrawl_shared::{LexCrawlError, Result, SourceConfig};

pub use generic::GenericRules;
pub use links::{ListingLinks, ListingRules, discover_links};
pub use rules::SelectorRules;

/// Always stripped before text is collected.
pub(crate) const BOILERPLATE: &str = "nav, header, footer, aside, script, style, noscript, form";

/// Longest title derived from the body when the page has none.
const FALLBACK_TITLE_CHARS: usize = 120;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source-specific knowledge of where content and metadata live.
pub trait ContentRules: Send + Sync {
    /// Rule set name for tracing.
    fn name(&self) -> &str;

    /// Element whose visible text is the document body.
    fn content_root<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>>;

    fn title(&self, doc: &Html) -> Option<String>;

    /// Publish date exactly as found on the page.
    fn published_at(&self, doc: &Html) -> Option<String>;

    fn author(&self, doc: &Html) -> Option<String>;

    /// Headings collected as section titles.
    fn section_selector(&self) -> &Selector;

    /// Subtrees removed before the body text is collected.
    fn strip_selectors(&self) -> &[Selector];

    /// Whether links on document pages are fed back to the frontier.
    fn follow_links(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Output of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub title: String,
    /// Visible text, one line per block element.
    pub body: String,
    pub sections: Vec<String>,
    pub published_at: Option<String>,
    pub author: Option<String>,
}

/// Extract a document from raw HTML.
///
/// Fails with [`LexCrawlError::Extraction`] when no content root is found
/// or the body is empty after boilerplate removal.
pub fn extract(html: &str, url: &Url, rules: &dyn ContentRules) -> Result<ExtractedDocument> {
    let doc = Html::parse_document(html);

    let root = rules
        .content_root(&doc)
        .ok_or_else(|| LexCrawlError::extraction(url.as_str(), "body selector matched nothing"))?;
    let content = text::visible_content(root, rules.strip_selectors(), rules.section_selector());
    if content.text.is_empty() {
        return Err(LexCrawlError::extraction(url.as_str(), "empty body text"));
    }

    let title = rules
        .title(&doc)
        .or_else(|| title_from_body(&content.text))
        .unwrap_or_default();
    let published_at = rules
        .published_at(&doc)
        .or_else(|| metadata::date_in_text(&content.text));
    let author = rules
        .author(&doc)
        .or_else(|| metadata::author_in_text(&content.text));

    debug!(
        url = %url,
        rules = rules.name(),
        chars = content.text.chars().count(),
        sections = content.sections.len(),
        "extracted document"
    );

    Ok(ExtractedDocument {
        title,
        body: content.text,
        sections: content.sections,
        published_at,
        author,
    })
}

fn title_from_body(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(FALLBACK_TITLE_CHARS).collect())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct SourceRules {
    content: SelectorRules,
    listing: Option<ListingRules>,
}

/// Compiled rules for every registered source.
pub struct RuleRegistry {
    sources: HashMap<String, SourceRules>,
    generic: GenericRules,
}

impl RuleRegistry {
    /// Compile rules for all `sources`. Any invalid selector or pattern
    /// fails the whole registry so a run never starts half-configured.
    pub fn from_sources(sources: &[SourceConfig]) -> Result<Self> {
        let mut compiled = HashMap::with_capacity(sources.len());
        for source in sources {
            let rules = SourceRules {
                content: SelectorRules::compile(&source.id, &source.rules)?,
                listing: ListingRules::compile(&source.id, &source.strategy)?,
            };
            compiled.insert(source.id.clone(), rules);
        }
        Ok(Self {
            sources: compiled,
            generic: GenericRules,
        })
    }

    /// Content rules for a source; unknown sources get [`GenericRules`].
    pub fn content_rules(&self, source_id: &str) -> &dyn ContentRules {
        match self.sources.get(source_id) {
            Some(rules) => &rules.content,
            None => &self.generic,
        }
    }

    pub fn listing_rules(&self, source_id: &str) -> Option<&ListingRules> {
        self.sources.get(source_id)?.listing.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexcrawl_shared::{ExtractionRules, FetchStrategy};

    fn url() -> Url {
        Url::parse("https://laws.example.ir/law/12").unwrap()
    }

    const LAW_PAGE: &str = r#"<!DOCTYPE html>
<html lang="fa">
<head>
  <title>قانون مدنی | پایگاه ملی قوانین</title>
  <meta name="author" content="مجلس شورای اسلامی">
</head>
<body>
  <header><a href="/">خانه</a></header>
  <nav><a href="/laws">قوانین</a></nav>
  <main>
    <h1>قانون مدنی</h1>
    <h2>کتاب اول - در اموال</h2>
    <p>ماده ۱ - مصوبات مجلس شورای اسلامی پس از طی مراحل قانونی به رئیس جمهور ابلاغ می‌شود.</p>
    <h2>کتاب دوم - در اسباب تملک</h2>
    <p>ماده ۱۴۰ - تملک حاصل می‌شود.</p>
    <script>track();</script>
  </main>
  <footer>کلیه حقوق محفوظ است</footer>
</body>
</html>"#;

    #[test]
    fn generic_extraction_strips_boilerplate() {
        let doc = extract(LAW_PAGE, &url(), &GenericRules).unwrap();

        assert_eq!(doc.title, "قانون مدنی");
        assert_eq!(doc.author.as_deref(), Some("مجلس شورای اسلامی"));
        assert_eq!(
            doc.sections,
            vec!["کتاب اول - در اموال", "کتاب دوم - در اسباب تملک"]
        );
        assert!(doc.body.contains("ماده ۱۴۰ - تملک حاصل می‌شود."));
        assert!(!doc.body.contains("خانه"));
        assert!(!doc.body.contains("track"));
        assert!(!doc.body.contains("حقوق محفوظ"));
        assert!(doc.published_at.is_none());
    }

    #[test]
    fn empty_body_is_extraction_error() {
        let html = "<html><body><main><nav>only chrome</nav></main></body></html>";
        let err = extract(html, &url(), &GenericRules).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(err.to_string().contains("law/12"));
    }

    #[test]
    fn error_page_without_configured_body_fails() {
        let rules = SelectorRules::compile(
            "majlis",
            &ExtractionRules {
                body: Some("div.law-text".into()),
                ..ExtractionRules::default()
            },
        )
        .unwrap();
        let html = r#"<html><body><div class="error">Document removed. Contact support.</div></body></html>"#;

        let err = extract(html, &url(), &rules).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(err.to_string().contains("body selector matched nothing"));
    }

    #[test]
    fn fallbacks_read_the_body_text() {
        let html = r#"<html><body><article>
            <p>آیین‌نامه اجرایی</p>
            <p>تاریخ تصویب: ۱۴۰۱/۰۳/۲۵</p>
            <p>نویسنده: اداره کل تدوین</p>
        </article></body></html>"#;
        let doc = extract(html, &url(), &GenericRules).unwrap();

        assert_eq!(doc.title, "آیین‌نامه اجرایی");
        assert_eq!(doc.published_at.as_deref(), Some("۱۴۰۱/۰۳/۲۵"));
        assert_eq!(doc.author.as_deref(), Some("اداره کل تدوین"));
    }

    fn source(id: &str, rules: ExtractionRules) -> SourceConfig {
        SourceConfig {
            id: id.into(),
            name: id.into(),
            language: None,
            active: true,
            strategy: FetchStrategy::Listing {
                listing_url: "https://laws.example.ir/list".into(),
                link_selector: "a.law".into(),
                next_page_selector: None,
                document_pattern: None,
            },
            rules,
        }
    }

    #[test]
    fn registry_resolves_sources_and_falls_back() {
        let registry = RuleRegistry::from_sources(&[source(
            "majlis",
            ExtractionRules {
                body: Some("main".into()),
                strip: vec!["h2".into()],
                follow_links: true,
                ..ExtractionRules::default()
            },
        )])
        .unwrap();

        assert_eq!(registry.len(), 1);
        let rules = registry.content_rules("majlis");
        assert_eq!(rules.name(), "majlis");
        assert!(rules.follow_links());
        assert!(registry.listing_rules("majlis").is_some());

        let doc = extract(LAW_PAGE, &url(), rules).unwrap();
        assert!(!doc.body.contains("کتاب اول"));
        assert!(doc.sections.is_empty());

        assert_eq!(registry.content_rules("unknown").name(), "generic");
        assert!(registry.listing_rules("unknown").is_none());
    }

    #[test]
    fn registry_rejects_invalid_rules() {
        let bad = source(
            "broken",
            ExtractionRules {
                body: Some("main[".into()),
                ..ExtractionRules::default()
            },
        );
        assert!(RuleRegistry::from_sources(&[bad]).is_err());
    }
}
