//! Ordered code patterns and the left-to-right scanner.

use std::sync::LazyLock;

use regex::Regex;

use super::CodeKind;

/// Spreadsheet export artifacts removed before scanning.
const ARTIFACTS: &[&str] = &["_x000D_", "\r", "\u{feff}", "\u{200b}"];

/// Rules in declaration order; earlier rules win equal-length ties.
static RULES: LazyLock<Vec<(CodeKind, Regex)>> = LazyLock::new(|| {
    [
        (CodeKind::LeadingNumber, r"^[+-]?\d+(?:[.,]\d+)*[ \t]+"),
        (CodeKind::Brace, r"\{[^{}\n]*\}"),
        (CodeKind::Bracket, r"\[[^\[\]\n]*\]"),
        (CodeKind::Tag, r"</?[A-Za-z][A-Za-z0-9_:.-]*(?:[\s=][^<>\n]*)?/?>"),
        (
            CodeKind::Printf,
            r"%(?:\d+\$)?[-+0#]*\d*(?:\.\d+)?[sdifuxXoeEgGc]|%\d+",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid code pattern")))
    .collect()
});

/// A code found in the raw text, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawMatch {
    pub start: usize,
    pub end: usize,
    pub kind: CodeKind,
}

/// Removes non-semantic artifacts.
pub(crate) fn strip_artifacts(raw: &str) -> String {
    let mut text = raw.to_string();
    for artifact in ARTIFACTS {
        if text.contains(artifact) {
            text = text.replace(artifact, "");
        }
    }
    text
}

/// Scans `text` for codes, left to right and non-overlapping.
///
/// At each step the leftmost match across all rules is taken; among
/// matches starting at the same offset the longest wins, then the rule
/// declared first.
pub(crate) fn scan(text: &str) -> Vec<RawMatch> {
    let mut matches = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let mut best: Option<RawMatch> = None;

        for (kind, regex) in RULES.iter() {
            // find_at keeps `^` anchored to the real start of the text
            let Some(found) = regex.find_at(text, pos) else {
                continue;
            };
            if found.start() == found.end() {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    found.start() < current.start
                        || (found.start() == current.start && found.end() > current.end)
                }
            };
            if better {
                best = Some(RawMatch {
                    start: found.start(),
                    end: found.end(),
                    kind: *kind,
                });
            }
        }

        match best {
            Some(found) => {
                pos = found.end;
                matches.push(found);
            }
            None => break,
        }
    }

    matches
}

/// Opening delimiters left in literal text with no closer after them.
///
/// Returns `(char offset in the raw text, delimiter)` pairs.
pub(crate) fn unterminated_delimiters(text: &str, matches: &[RawMatch]) -> Vec<(usize, char)> {
    let mut found = Vec::new();
    let mut consumed = matches.iter().peekable();

    for (char_offset, (byte_offset, ch)) in text.char_indices().enumerate() {
        while consumed.peek().is_some_and(|m| m.end <= byte_offset) {
            consumed.next();
        }
        if consumed
            .peek()
            .is_some_and(|m| m.start <= byte_offset && byte_offset < m.end)
        {
            continue;
        }

        let closer = match ch {
            '{' => '}',
            '[' => ']',
            '<' if looks_like_tag_start(&text[byte_offset + 1..]) => '>',
            _ => continue,
        };

        let rest = &text[byte_offset + 1..];
        let line_end = rest.find('\n').unwrap_or(rest.len());
        if !rest[..line_end].contains(closer) {
            found.push((char_offset, ch));
        }
    }

    found
}

fn looks_like_tag_start(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some('/') => chars.next().is_some_and(|c| c.is_ascii_alphabetic()),
        Some(c) => c.is_ascii_alphabetic(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(CodeKind, &str)> {
        scan(text)
            .into_iter()
            .map(|m| (m.kind, &text[m.start..m.end]))
            .collect()
    }

    #[test]
    fn test_strip_artifacts() {
        assert_eq!(strip_artifacts("a_x000D_\r\nb"), "a\nb");
        assert_eq!(strip_artifacts("\u{feff}Hi\u{200b}!"), "Hi!");
    }

    #[test]
    fn test_scan_finds_each_rule() {
        assert_eq!(
            kinds("3 apples {0} [b] <color=red>x</color> %1$s %2"),
            vec![
                (CodeKind::LeadingNumber, "3 "),
                (CodeKind::Brace, "{0}"),
                (CodeKind::Bracket, "[b]"),
                (CodeKind::Tag, "<color=red>"),
                (CodeKind::Tag, "</color>"),
                (CodeKind::Printf, "%1$s"),
                (CodeKind::Printf, "%2"),
            ]
        );
    }

    #[test]
    fn test_leading_number_only_at_start() {
        assert_eq!(kinds("Buy 3 apples"), vec![]);
        assert_eq!(kinds("10 Gold"), vec![(CodeKind::LeadingNumber, "10 ")]);
        assert_eq!(kinds("10Gold"), vec![]);
    }

    #[test]
    fn test_leftmost_match_consumes_overlap() {
        // The bracket inside the tag is never scanned on its own
        assert_eq!(
            kinds("<link href=[x]>go"),
            vec![(CodeKind::Tag, "<link href=[x]>")]
        );
    }

    #[test]
    fn test_percent_sign_is_not_a_code() {
        assert_eq!(kinds("50% off"), vec![]);
    }

    #[test]
    fn test_unterminated_delimiters() {
        let text = "Hello {name";
        let matches = scan(text);
        assert_eq!(unterminated_delimiters(text, &matches), vec![(6, '{')]);

        let text = "a < b and {ok}";
        let matches = scan(text);
        assert!(unterminated_delimiters(text, &matches).is_empty());

        let text = "<b unclosed";
        assert_eq!(unterminated_delimiters(text, &scan(text)), vec![(0, '<')]);
    }
}
