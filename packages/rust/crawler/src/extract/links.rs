//! Link discovery for listing pages and link-following document pages.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use lexcrawl_shared::{FetchStrategy, LexCrawlError, Result};

use super::rules::parse_selector;

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Resolve an `href` against `base`, ignoring in-page anchors and
/// non-navigational schemes. The fragment is dropped.
fn resolve_href(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn hrefs<'a>(els: impl Iterator<Item = ElementRef<'a>>, base: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    els.filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_href(base, href))
        .filter(|url| seen.insert(url.as_str().to_string()))
        .collect()
}

/// Every followable link on the page, in document order, without
/// duplicates. Scope filtering is left to the caller.
pub fn discover_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    hrefs(doc.select(&ANCHOR_SEL), base)
}

/// Links found on one listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingLinks {
    pub documents: Vec<Url>,
    pub next_page: Option<Url>,
}

/// Compiled `listing` fetch strategy.
#[derive(Debug)]
pub struct ListingRules {
    pub listing_url: Url,
    link_selector: Selector,
    next_page: Option<Selector>,
    document_pattern: Option<Regex>,
}

impl ListingRules {
    /// Compile a strategy; `None` for `seed_list` sources.
    pub fn compile(source_id: &str, strategy: &FetchStrategy) -> Result<Option<Self>> {
        let FetchStrategy::Listing {
            listing_url,
            link_selector,
            next_page_selector,
            document_pattern,
        } = strategy
        else {
            return Ok(None);
        };

        let listing_url = Url::parse(listing_url).map_err(|e| {
            LexCrawlError::config(format!(
                "source '{source_id}': invalid listing_url '{listing_url}': {e}"
            ))
        })?;
        let document_pattern = document_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    LexCrawlError::config(format!(
                        "source '{source_id}': invalid document_pattern '{p}': {e}"
                    ))
                })
            })
            .transpose()?;

        Ok(Some(Self {
            listing_url,
            link_selector: parse_selector(source_id, "link", link_selector)?,
            next_page: next_page_selector
                .as_deref()
                .map(|s| parse_selector(source_id, "next_page", s))
                .transpose()?,
            document_pattern,
        }))
    }

    /// Document links matched by the link selector (and the document
    /// pattern, when set), plus the pagination link.
    pub fn discover(&self, html: &str, base: &Url) -> ListingLinks {
        let doc = Html::parse_document(html);

        let documents = hrefs(doc.select(&self.link_selector), base)
            .into_iter()
            .filter(|url| {
                self.document_pattern
                    .as_ref()
                    .is_none_or(|re| re.is_match(url.as_str()))
            })
            .collect();

        let next_page = self.next_page.as_ref().and_then(|sel| {
            doc.select(sel)
                .filter_map(|el| el.value().attr("href"))
                .find_map(|href| resolve_href(base, href))
                .filter(|url| url != base)
        });

        ListingLinks {
            documents,
            next_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://laws.example.ir/list?page=1").unwrap()
    }

    #[test]
    fn discover_skips_non_navigational_links() {
        let html = r##"<html><body>
            <a href="/law/1#art-2">Law 1</a>
            <a href="/law/1">Law 1 again</a>
            <a href="#top">Top</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:info@example.ir">Mail</a>
            <a href="tel:+9821">Call</a>
            <a href="ftp://files.example.ir/x">FTP</a>
            <a href="https://other.example.com/page">External</a>
        </body></html>"##;

        let links: Vec<String> = discover_links(html, &base())
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            links,
            vec![
                "https://laws.example.ir/law/1",
                "https://other.example.com/page"
            ]
        );
    }

    fn listing(pattern: Option<&str>) -> ListingRules {
        let strategy = FetchStrategy::Listing {
            listing_url: "https://laws.example.ir/list".into(),
            link_selector: "ul.results a".into(),
            next_page_selector: Some("a.next".into()),
            document_pattern: pattern.map(String::from),
        };
        ListingRules::compile("majlis", &strategy).unwrap().unwrap()
    }

    const LISTING: &str = r#"<html><body>
        <ul class="results">
            <li><a href="/law/1">قانون ۱</a></li>
            <li><a href="/law/2">قانون ۲</a></li>
            <li><a href="/about">درباره</a></li>
        </ul>
        <a href="/law/99">not in results</a>
        <a class="next" href="/list?page=2">بعدی</a>
    </body></html>"#;

    #[test]
    fn listing_uses_selector_and_pagination() {
        let found = listing(None).discover(LISTING, &base());
        assert_eq!(found.documents.len(), 3);
        assert_eq!(
            found.next_page.map(String::from).as_deref(),
            Some("https://laws.example.ir/list?page=2")
        );
    }

    #[test]
    fn listing_filters_by_document_pattern() {
        let found = listing(Some(r"/law/\d+$")).discover(LISTING, &base());
        let docs: Vec<&str> = found.documents.iter().map(Url::path).collect();
        assert_eq!(docs, vec!["/law/1", "/law/2"]);
    }

    #[test]
    fn seed_list_has_no_listing_rules() {
        let strategy = FetchStrategy::SeedList { urls: vec![] };
        assert!(ListingRules::compile("s", &strategy).unwrap().is_none());
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let strategy = FetchStrategy::Listing {
            listing_url: "https://laws.example.ir/list".into(),
            link_selector: "a".into(),
            next_page_selector: None,
            document_pattern: Some("(".into()),
        };
        let err = ListingRules::compile("majlis", &strategy).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
