//! Title, publish-date and author heuristics.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::text::collapse_whitespace;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static TIME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time").expect("valid selector"));
static META_NAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name][content]").expect("valid selector"));
static AUTHOR_CLASS_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[class*="author"], span[class*="author"], div[class*="author"]"#)
        .expect("valid selector")
});

// ---------------------------------------------------------------------------
// Title
// ---------------------------------------------------------------------------

/// `<title>` with the site suffix removed, then the first `h1`.
pub(crate) fn title(doc: &Html) -> Option<String> {
    doc.select(&TITLE_SEL)
        .next()
        .map(|el| strip_site_suffix(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .or_else(|| first_h1(doc))
}

pub(crate) fn first_h1(doc: &Html) -> Option<String> {
    doc.select(&H1_SEL)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

/// Drop everything after the first `|`, then after the first ` - `.
fn strip_site_suffix(title: &str) -> String {
    let mut head = title;
    if let Some((before, _)) = head.split_once('|') {
        head = before;
    }
    if let Some((before, _)) = head.split_once(" - ") {
        head = before;
    }
    collapse_whitespace(head)
}

// ---------------------------------------------------------------------------
// Publish date
// ---------------------------------------------------------------------------

/// `time[datetime]`, then `time` text, then a `meta` whose name mentions
/// publish/date/time.
pub(crate) fn published_at(doc: &Html) -> Option<String> {
    if let Some(el) = doc.select(&TIME_SEL).next() {
        let value = el
            .value()
            .attr("datetime")
            .map(str::to_string)
            .unwrap_or_else(|| collapse_whitespace(&el.text().collect::<String>()));
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }

    doc.select(&META_NAME_SEL).find_map(|el| {
        let name = el.value().attr("name")?.to_lowercase();
        if name.contains("publish") || name.contains("date") || name.contains("time") {
            el.value()
                .attr("content")
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
        } else {
            None
        }
    })
}

/// Labelled Persian dates first, then bare d/m/y and y/m/d patterns.
/// `\d` also matches Persian and Arabic-Indic digits; the match is returned
/// as found.
pub(crate) fn date_in_text(text: &str) -> Option<String> {
    static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"تار[یي]خ\s*(?:انتشار|تصویب)?\s*:?\s*(\d{1,4}\s*[/\-.]\s*\d{1,2}\s*[/\-.]\s*\d{1,4})",
            r"\b(\d{1,2}\s*[/\-]\s*\d{1,2}\s*[/\-]\s*\d{2,4})\b",
            r"\b(\d{2,4}\s*[/\-]\s*\d{1,2}\s*[/\-]\s*\d{1,2})\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });

    PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Author
// ---------------------------------------------------------------------------

/// `meta[name=author]`, then the first element carrying an author class.
pub(crate) fn author(doc: &Html) -> Option<String> {
    let from_meta = doc.select(&META_NAME_SEL).find_map(|el| {
        let name = el.value().attr("name")?;
        if name.eq_ignore_ascii_case("author") {
            el.value()
                .attr("content")
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
        } else {
            None
        }
    });

    from_meta.or_else(|| {
        doc.select(&AUTHOR_CLASS_SEL)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .find(|t| !t.is_empty())
    })
}

/// Persian author labels ("نویسنده:", "نگارنده:", ...). Implausibly short
/// or long captures are ignored.
pub(crate) fn author_in_text(text: &str) -> Option<String> {
    static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:نویسنده|نگارنده|نگارش|تهیه کننده)\s*:?\s*([^\n.،]*)")
            .expect("valid regex")
    });

    AUTHOR_RE.captures_iter(text).find_map(|caps| {
        let author = caps.get(1)?.as_str().trim();
        let len = author.chars().count();
        (len > 5 && len < 50).then(|| author.to_string())
    })
}
