//! Visible-text walk over a content root.

use std::collections::HashSet;

use scraper::{ElementRef, Node, Selector};

/// Elements that start a new line in the extracted text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "ul", "ol", "br", "tr", "td", "th", "table",
    "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "dd", "dt",
];

/// Text and section headings found under a content root.
pub(crate) struct VisibleContent {
    /// One line per block, whitespace collapsed within each line.
    pub text: String,
    pub sections: Vec<String>,
}

/// Walk `root`, skipping every subtree matched by `strip`, and collect its
/// text plus the headings matched by `sections`.
pub(crate) fn visible_content(
    root: ElementRef<'_>,
    strip: &[Selector],
    sections: &Selector,
) -> VisibleContent {
    let root_id = root.id();
    let stripped: HashSet<_> = strip
        .iter()
        .flat_map(|sel| root.select(sel))
        .map(|el| el.id())
        .filter(|id| *id != root_id)
        .collect();

    let mut raw = String::new();
    for node in root.descendants() {
        if stripped.contains(&node.id())
            || node
                .ancestors()
                .take_while(|a| a.id() != root_id)
                .any(|a| stripped.contains(&a.id()))
        {
            continue;
        }
        match node.value() {
            Node::Text(text) => {
                raw.extend(text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
            }
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => raw.push('\n'),
            _ => {}
        }
    }

    let text = raw
        .lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let sections = root
        .select(sections)
        .filter(|el| {
            !stripped.contains(&el.id())
                && !el
                    .ancestors()
                    .take_while(|a| a.id() != root_id)
                    .any(|a| stripped.contains(&a.id()))
        })
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|heading| !heading.is_empty())
        .collect();

    VisibleContent { text, sections }
}

/// Collapse runs of whitespace into single spaces and trim.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
