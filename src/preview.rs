use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref PARAGRAPH: Regex = Regex::new(r"(?i)<p\s*/?>").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Single-line plain text of a comment body, at most `max_chars` characters.
pub fn text_preview(raw: &str, max_chars: usize) -> String {
    if raw.is_empty() || max_chars == 0 {
        return String::new();
    }

    let text = PARAGRAPH.replace_all(raw, " ");
    let text = TAG.replace_all(&text, "");
    let text = html_escape::decode_html_entities(&text);
    let text = WHITESPACE.replace_all(text.trim(), " ");

    if text.chars().count() <= max_chars {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    if let Some(last_space) = cut.rfind(' ') {
        // Prefer ending on a word boundary when one is reasonably close
        if cut[..last_space].chars().count() >= max_chars * 3 / 4 {
            cut.truncate(last_space);
        }
    }
    cut.trim_end().to_string()
}
