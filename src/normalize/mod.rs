//! Text normalization for dictionary keys and queries.
//!
//! Raw cells carry spreadsheet export artifacts and embedded format codes
//! (`{ItemID}`, `<color=red>`, `%1$s`, a leading count) that must not take
//! part in similarity. [`normalize`] strips both and records every code in a
//! [`CodeMap`]; [`denormalize`] and [`denormalize_with_target`] put the codes
//! back into a translated string.
//!
//! Positions are counted in chars of the canonical text. Extraction never
//! fails: an opening delimiter without a closer stays literal text and is
//! reported as a [`NormalizeWarning`].

mod patterns;
mod reinsert;

pub use reinsert::{denormalize, denormalize_with_target, is_word_boundary};

use serde::{Deserialize, Serialize};

/// Which rule extracted a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeKind {
    /// A number at the very start of the text followed by whitespace.
    LeadingNumber,
    /// `{...}`
    Brace,
    /// `[...]`
    Bracket,
    /// `<name ...>` or `</name>`
    Tag,
    /// `%s`, `%1$d`, `%2`
    Printf,
}

/// A single extracted code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Char offset in the canonical text where the code was removed.
    pub position: usize,
    pub literal: String,
    pub kind: CodeKind,
}

impl Code {
    /// Whether the code stands for a number that varies between strings.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        match self.kind {
            CodeKind::LeadingNumber | CodeKind::Printf => true,
            CodeKind::Brace => {
                let inner = self.literal.trim_start_matches('{').trim_end_matches('}');
                !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit())
            }
            CodeKind::Bracket | CodeKind::Tag => false,
        }
    }
}

/// Ordered codes extracted from one raw string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMap {
    codes: Vec<Code>,
    /// Char length of the canonical text the positions refer to.
    canonical_len: usize,
}

impl CodeMap {
    #[must_use]
    pub fn new(codes: Vec<Code>, canonical_len: usize) -> Self {
        Self {
            codes,
            canonical_len,
        }
    }

    #[must_use]
    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    #[must_use]
    pub fn canonical_len(&self) -> usize {
        self.canonical_len
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Numeric placeholders in extraction order.
    pub fn numeric(&self) -> impl Iterator<Item = &Code> {
        self.codes.iter().filter(|code| code.is_numeric())
    }
}

/// An opening delimiter that was kept as literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeWarning {
    /// Char offset in the artifact-stripped input.
    pub offset: usize,
    pub delimiter: char,
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub canonical: String,
    pub codes: CodeMap,
    pub warnings: Vec<NormalizeWarning>,
}

/// Converts a raw cell or line into canonical text plus its codes.
///
/// # Examples
/// ```
/// use transmem::normalize::normalize;
///
/// let n = normalize("{ItemID}Hello");
/// assert_eq!(n.canonical, "Hello");
/// assert_eq!(n.codes.codes()[0].literal, "{ItemID}");
/// assert_eq!(n.codes.codes()[0].position, 0);
/// ```
pub fn normalize(raw: &str) -> Normalized {
    let text = patterns::strip_artifacts(raw);
    let matches = patterns::scan(&text);

    let warnings: Vec<NormalizeWarning> = patterns::unterminated_delimiters(&text, &matches)
        .into_iter()
        .map(|(offset, delimiter)| {
            tracing::warn!(
                "Unterminated '{delimiter}' at offset {offset} kept as literal text: {text:?}"
            );
            NormalizeWarning { offset, delimiter }
        })
        .collect();

    let mut canonical = String::with_capacity(text.len());
    let mut canonical_chars = 0;
    let mut codes = Vec::with_capacity(matches.len());
    let mut cursor = 0;

    for found in &matches {
        let literal_text = &text[cursor..found.start];
        canonical.push_str(literal_text);
        canonical_chars += literal_text.chars().count();

        codes.push(Code {
            position: canonical_chars,
            literal: text[found.start..found.end].to_string(),
            kind: found.kind,
        });
        cursor = found.end;
    }
    canonical.push_str(&text[cursor..]);

    let leading = canonical.chars().take_while(|c| c.is_whitespace()).count();
    let canonical = canonical.trim().to_string();
    let canonical_len = canonical.chars().count();

    for code in &mut codes {
        code.position = code.position.saturating_sub(leading).min(canonical_len);
    }

    Normalized {
        canonical,
        codes: CodeMap::new(codes, canonical_len),
        warnings,
    }
}
