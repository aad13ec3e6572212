use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{DocumentExtractor, ExtractError, PageText};

/// Markdown files become one page of plain text.
pub struct MarkdownExtractor;

impl DocumentExtractor for MarkdownExtractor {
    fn extract_pages(&self, path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let source = std::str::from_utf8(bytes)
            .map_err(|error| ExtractError::Encoding(format!("{}: {error}", path.display())))?;
        Ok(vec![PageText::new(1, markdown_to_text(source))])
    }
}

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).unwrap_or_else(|error| panic!("invalid pattern {pattern}: {error}")),
        replacement,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(?m)^\s*(```|~~~).*$", ""),
        rule(r"(?m)^\s{0,3}([-*_]\s*){3,}$", ""),
        rule(r"(?m)^\s{0,3}#{1,6}\s+", ""),
        rule(r"(?m)^\s{0,3}>\s?", ""),
        rule(r"(?m)^(\s*)[-*+]\s+", "$1"),
        rule(r"!\[([^\]]*)\]\([^)]*\)", "$1"),
        rule(r"\[([^\]]*)\]\([^)]*\)", "$1"),
        rule(r"<[^>\n]+>", ""),
        rule(r"`([^`]*)`", "$1"),
        rule(r"\*\*([^*]+)\*\*", "$1"),
        rule(r"__([^_]+)__", "$1"),
        rule(r"\*([^*\n]+)\*", "$1"),
        rule(r"~~([^~]+)~~", "$1"),
        rule(r"\n{3,}", "\n\n"),
    ]
});

/// Reduce markdown source to readable plain text.
pub fn markdown_to_text(source: &str) -> String {
    let mut text = source.trim_start_matches('\u{feff}').replace('\r', "");
    for rule in RULES.iter() {
        text = rule
            .pattern
            .replace_all(&text, rule.replacement)
            .into_owned();
    }
    text.trim().to_string()
}
