//! Pre-cleaning passes applied before tokenization.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on extracted text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = unify_letters(text);
    result = strip_diacritics(&result);
    result = collapse_whitespace(&result);
    result
}

// ---------------------------------------------------------------------------
// Pass 1: Character unification
// ---------------------------------------------------------------------------

/// Map Arabic letter forms to their Persian equivalents, Arabic-Indic and
/// Persian digits to ASCII, and ZWNJ to a plain space.
fn unify_letters(text: &str) -> String {
    text.chars().map(unify_char).collect()
}

fn unify_char(c: char) -> char {
    match c {
        'ك' => 'ک',
        'ي' | 'ى' | 'ئ' => 'ی',
        'ة' => 'ه',
        'إ' | 'أ' | 'آ' | 'ٱ' => 'ا',
        'ؤ' => 'و',
        // Arabic-Indic digits U+0660..U+0669
        '\u{0660}'..='\u{0669}' => ascii_digit(c as u32 - 0x0660),
        // Extended (Persian) digits U+06F0..U+06F9
        '\u{06F0}'..='\u{06F9}' => ascii_digit(c as u32 - 0x06F0),
        '\u{200C}' => ' ',
        _ => c,
    }
}

fn ascii_digit(value: u32) -> char {
    char::from_digit(value, 10).unwrap_or('0')
}

// ---------------------------------------------------------------------------
// Pass 2: Diacritics
// ---------------------------------------------------------------------------

/// Remove Arabic harakat, tanwin, superscript alef and Quranic marks,
/// plus the tatweel filler.
fn strip_diacritics(text: &str) -> String {
    text.chars().filter(|c| !is_diacritic(*c)).collect()
}

fn is_diacritic(c: char) -> bool {
    matches!(
        c,
        '\u{0610}'..='\u{061A}'
            | '\u{064B}'..='\u{065F}'
            | '\u{0670}'
            | '\u{06D6}'..='\u{06ED}'
            | '\u{0640}'
    )
}

// ---------------------------------------------------------------------------
// Pass 3: Whitespace
// ---------------------------------------------------------------------------

fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}
