//! FTS5 query sanitization and rank normalization.

/// Words that FTS5 treats as operators or that appear in nearly every tool's
/// metadata. A query containing any of them is searched as a single phrase.
const PROBLEMATIC_WORDS: &[&str] = &[
    "name",
    "description",
    "schema",
    "input",
    "output",
    "type",
    "properties",
    "required",
    "title",
    "id",
    "tool",
    "server",
    "meta",
    "data",
    "content",
    "text",
    "value",
    "field",
    "column",
    "table",
    "index",
    "key",
    "primary",
];

fn is_problematic(word: &str) -> bool {
    PROBLEMATIC_WORDS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(word))
}

/// Wrap a term in double quotes, doubling any embedded quote.
fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Turn a raw user query into an FTS5 MATCH expression.
///
/// The result is always bound as a single SQL parameter. Every term ends up
/// inside double quotes, so FTS5 operators, column filters and `*` in the
/// input are matched literally.
///
/// - empty or whitespace-only input gives `""`, meaning "skip the text path"
/// - a single word, or any word from the problematic set, gives one quoted
///   phrase of all words
/// - otherwise each word is quoted and the terms are joined with `OR`
pub fn sanitize_fts5_query(query: &str) -> String {
    let words: Vec<&str> = query.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }

    if words.len() == 1 || words.iter().any(|w| is_problematic(w)) {
        return quote(&words.join(" "));
    }

    words
        .iter()
        .map(|w| quote(w))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Map an FTS5 rank (never positive, more negative is a stronger match) onto
/// (0, 1] via `1 / (1 - rank)`.
///
/// A rank of 0 maps to 1.0 and stronger matches shrink towards 0, so the
/// score keeps rank's direction: lower is better. It calibrates rank onto a
/// bounded scale and is only comparable with other full-text scores.
pub fn normalize_bm25(rank: f64) -> f64 {
    1.0 / (1.0 - rank)
}
