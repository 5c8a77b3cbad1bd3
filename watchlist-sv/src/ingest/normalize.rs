use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());
static COLUMN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^is_[a-z0-9_]+$").unwrap());

const ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Lowercases, drops a leading article and punctuation, and collapses whitespace
/// so "The Matrix!" and "matrix" compare equal.
pub fn normalize_title(title: &str) -> String {
    let mut t = title.trim().to_lowercase();

    for article in ARTICLES.iter() {
        if t.starts_with(article) {
            t = t[article.len()..].trim_start().to_string();
        }
    }

    let stripped = NON_ALNUM.replace_all(&t, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Reduces a Letterboxd URL to its path so short `boxd.it` links and full
/// `letterboxd.com` links of the same export compare equal.
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.trim();
    if !uri.starts_with("http") {
        return uri.to_string();
    }

    ["boxd.it/", "letterboxd.com/"].iter()
        .find_map(|host| uri.find(host).map(|at| uri[at + host.len()..].to_string()))
        .unwrap_or_else(|| uri.to_string())
}

/// `imdb-t250` -> `is_imdb_t250`
pub fn tracked_column_name(stem: &str) -> String {
    let snake = SEPARATORS.replace_all(stem.trim(), "_").to_lowercase();
    let cleaned: String = snake.chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    format!("is_{}", cleaned)
}

pub fn is_valid_column_name(name: &str) -> bool {
    COLUMN_NAME.is_match(name)
}

/// Stand-in URI for movies added by hand without a Letterboxd link.
pub fn placeholder_uri(title: &str, year: i32) -> String {
    let slug = title.trim().to_lowercase().replace(' ', "-");
    format!("letterboxd:film/{}-{}", slug, year)
}
