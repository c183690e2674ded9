//! Line splitting that remembers each line's separator.

/// One line of a cell and the break that followed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub content: &'a str,
    /// `"\n"`, `"\r\n"`, or `""` for the last line.
    pub separator: &'a str,
}

impl Line<'_> {
    /// Whether the line has anything to translate.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Splits `text` on `\n` and `\r\n`.
///
/// Always yields one more line than there are breaks, so `"A\n"` is
/// `["A", ""]` and `""` is `[""]`. Concatenating content and separator of
/// every line gives back `text`.
#[must_use]
pub fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find('\n') {
        let (content, separator) = if rest[..pos].ends_with('\r') {
            (&rest[..pos - 1], &rest[pos - 1..=pos])
        } else {
            (&rest[..pos], &rest[pos..=pos])
        };
        lines.push(Line { content, separator });
        rest = &rest[pos + 1..];
    }
    lines.push(Line {
        content: rest,
        separator: "",
    });

    lines
}

/// Number of line breaks in `text`. `\r\n` counts once.
#[must_use]
pub fn count_line_breaks(text: &str) -> usize {
    text.matches('\n').count()
}
