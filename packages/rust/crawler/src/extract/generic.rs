//! Generic (fallback) extraction rules.
//!
//! Used for sources without selectors, and for every field a source's
//! selectors leave unset. Finds the content area with readability
//! heuristics and reads metadata from common markup.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::{BOILERPLATE, ContentRules, metadata};

static SECTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3").expect("valid selector"));

static STRIP_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    vec![Selector::parse(BOILERPLATE).expect("valid selector")]
});

/// Landmark containers tried in order before the class heuristics.
static LANDMARK_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", "article", r#"[role="main"]"#]
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static CONTENT_CLASS_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"div[class*="content"], div[class*="article"], div[class*="post"], div[class*="main"], div[class*="body"]"#,
    )
    .expect("valid selector")
});

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

/// Heuristic rules that work on arbitrary HTML pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericRules;

impl ContentRules for GenericRules {
    fn name(&self) -> &str {
        "generic"
    }

    fn content_root<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        for sel in LANDMARK_SELS.iter() {
            if let Some(el) = doc.select(sel).next() {
                return Some(el);
            }
        }

        // Largest content-like block by text length.
        doc.select(&CONTENT_CLASS_SEL)
            .max_by_key(|el| el.text().map(str::len).sum::<usize>())
            .or_else(|| doc.select(&BODY_SEL).next())
    }

    fn title(&self, doc: &Html) -> Option<String> {
        metadata::title(doc)
    }

    fn published_at(&self, doc: &Html) -> Option<String> {
        metadata::published_at(doc)
    }

    fn author(&self, doc: &Html) -> Option<String> {
        metadata::author(doc)
    }

    fn section_selector(&self) -> &Selector {
        &SECTION_SEL
    }

    fn strip_selectors(&self) -> &[Selector] {
        &STRIP_SELS
    }

    fn follow_links(&self) -> bool {
        false
    }
}
