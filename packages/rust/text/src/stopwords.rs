//! Stopword lists, stored in cleaned form (after letter unification).

use std::collections::HashSet;
use std::sync::LazyLock;

static PERSIAN: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "از", "به", "با", "در", "بر", "را", "که", "این", "ان", "و", "یا", "اما", "ولی", "برای",
        "تا", "هر", "چه", "چرا", "اگر", "مگر", "پس", "نیز", "حتی", "همه", "هیچ", "خود", "باید",
        "شاید", "چون", "زیرا", "بنابراین", "سپس", "گرچه", "درباره", "بدون", "توسط", "علاوه",
        "بین", "همچنین", "بسیار", "برخی", "می", "های", "ها", "ی", "است", "نیست", "بود", "شد",
        "شود", "کرد", "کند", "شده", "دارد", "ندارد", "هم", "نمی",
    ]
    .into_iter()
    .collect()
});

static ENGLISH: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "if", "of", "to", "in", "on", "at", "by", "for",
        "with", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it", "its",
        "this", "that", "these", "those", "all", "any", "no", "not", "such", "which", "who",
        "whom", "than", "then", "there", "so",
    ]
    .into_iter()
    .collect()
});

/// Whether `word` is a stopword in `language`. Languages without a list
/// have no stopwords.
pub(crate) fn is_stopword(language: &str, word: &str) -> bool {
    let list = match language {
        "fa" => &*PERSIAN,
        "en" => &*ENGLISH,
        _ => return false,
    };
    list.contains(word) || list.contains(word.to_lowercase().as_str())
}
