//! Per-source selector rules with generic fallback.

use scraper::{ElementRef, Html, Selector};

use lexcrawl_shared::{ExtractionRules, LexCrawlError, Result};

use super::generic::GenericRules;
use super::text::collapse_whitespace;
use super::{BOILERPLATE, ContentRules};

/// Compiled [`ExtractionRules`] for one source.
#[derive(Debug)]
pub struct SelectorRules {
    source_id: String,
    title: Option<Selector>,
    body: Option<Selector>,
    date: Option<Selector>,
    author: Option<Selector>,
    sections: Option<Selector>,
    strip: Vec<Selector>,
    follow_links: bool,
    generic: GenericRules,
}

impl SelectorRules {
    /// Compile every selector; an invalid selector is a config error.
    pub fn compile(source_id: &str, rules: &ExtractionRules) -> Result<Self> {
        let parse = |field: &str, raw: &Option<String>| -> Result<Option<Selector>> {
            raw.as_deref()
                .map(|s| parse_selector(source_id, field, s))
                .transpose()
        };

        let mut strip = vec![parse_selector(source_id, "strip", BOILERPLATE)?];
        for extra in &rules.strip {
            strip.push(parse_selector(source_id, "strip", extra)?);
        }

        Ok(Self {
            source_id: source_id.to_string(),
            title: parse("title", &rules.title)?,
            body: parse("body", &rules.body)?,
            date: parse("date", &rules.date)?,
            author: parse("author", &rules.author)?,
            sections: parse("sections", &rules.sections)?,
            strip,
            follow_links: rules.follow_links,
            generic: GenericRules,
        })
    }
}

pub(crate) fn parse_selector(source_id: &str, field: &str, raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| {
        LexCrawlError::config(format!(
            "source '{source_id}': invalid {field} selector '{raw}': {e}"
        ))
    })
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

impl ContentRules for SelectorRules {
    fn name(&self) -> &str {
        &self.source_id
    }

    /// A configured body selector is authoritative: a page it does not match
    /// has no content root.
    fn content_root<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        match &self.body {
            Some(sel) => doc.select(sel).next(),
            None => self.generic.content_root(doc),
        }
    }

    fn title(&self, doc: &Html) -> Option<String> {
        self.title
            .as_ref()
            .and_then(|sel| first_text(doc, sel))
            .or_else(|| self.generic.title(doc))
    }

    fn published_at(&self, doc: &Html) -> Option<String> {
        let from_rule = self.date.as_ref().and_then(|sel| {
            doc.select(sel).find_map(|el| {
                let value = el
                    .value()
                    .attr("datetime")
                    .or_else(|| el.value().attr("content"))
                    .map(str::to_string)
                    .unwrap_or_else(|| collapse_whitespace(&el.text().collect::<String>()));
                (!value.is_empty()).then_some(value)
            })
        });
        from_rule.or_else(|| self.generic.published_at(doc))
    }

    fn author(&self, doc: &Html) -> Option<String> {
        self.author
            .as_ref()
            .and_then(|sel| first_text(doc, sel))
            .or_else(|| self.generic.author(doc))
    }

    fn section_selector(&self) -> &Selector {
        self.sections
            .as_ref()
            .unwrap_or_else(|| self.generic.section_selector())
    }

    fn strip_selectors(&self) -> &[Selector] {
        &self.strip
    }

    fn follow_links(&self) -> bool {
        self.follow_links
    }
}
