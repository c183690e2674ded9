//! Code reinsertion into translated text.
//!
//! Translations rarely have the source's length, so positions are mapped
//! proportionally and snapped to the nearest word boundary. When the
//! matched translation carries its own codes, those positions are used
//! instead.

use super::{Code, CodeMap};

/// Reinserts `codes` into `translated` by proportional position.
///
/// Every code is emitted exactly once. If the translation has fewer chars
/// than there are codes, all codes are appended in order.
pub fn denormalize(translated: &str, codes: &CodeMap) -> String {
    denormalize_with_target(translated, codes, &CodeMap::default())
}

/// Reinserts the query's codes using the matched translation's own codes as anchors.
///
/// `translated` must be the canonical translation that `target_codes` was
/// extracted with. Placement, in order of preference:
/// - the i-th numeric placeholder of the query takes the position of the
///   i-th numeric placeholder of the target, keeping the query's literal
/// - any other code takes the position of an unused target code with the
///   same literal
/// - everything else is placed proportionally
///
/// The output always contains exactly the query's codes.
pub fn denormalize_with_target(
    translated: &str,
    query_codes: &CodeMap,
    target_codes: &CodeMap,
) -> String {
    if query_codes.is_empty() {
        return translated.to_string();
    }

    let chars: Vec<char> = translated.chars().collect();
    let text_len = chars.len();
    let codes = query_codes.codes();

    let mut placements: Vec<Option<usize>> = vec![None; codes.len()];
    let mut used = vec![false; target_codes.len()];

    let target_numeric: Vec<usize> = target_codes
        .codes()
        .iter()
        .enumerate()
        .filter(|(_, code)| code.is_numeric())
        .map(|(i, _)| i)
        .collect();
    let query_numeric = codes
        .iter()
        .enumerate()
        .filter(|(_, code)| code.is_numeric())
        .map(|(i, _)| i);

    for (query_index, target_index) in query_numeric.zip(target_numeric) {
        placements[query_index] = Some(target_codes.codes()[target_index].position.min(text_len));
        used[target_index] = true;
    }

    for (query_index, code) in codes.iter().enumerate() {
        if placements[query_index].is_some() {
            continue;
        }
        let anchor = target_codes
            .codes()
            .iter()
            .enumerate()
            .find(|(i, target)| !used[*i] && target.literal == code.literal);
        if let Some((target_index, target)) = anchor {
            placements[query_index] = Some(target.position.min(text_len));
            used[target_index] = true;
        }
    }

    let fits = text_len >= codes.len();
    let placed: Vec<(usize, &Code)> = codes
        .iter()
        .zip(placements)
        .map(|(code, placement)| {
            let position = placement.unwrap_or_else(|| {
                if fits {
                    proportional_position(code, query_codes.canonical_len(), &chars)
                } else {
                    text_len
                }
            });
            (position, code)
        })
        .collect();

    assemble(&chars, placed)
}

/// Whether `index` (a char offset in `0..=chars.len()`) is a word boundary.
///
/// Text start and end always are. Inside the text, a boundary sits next to
/// whitespace or next to a CJK ideograph or kana. Hangul is written with
/// spaces, so it is not a boundary on its own.
#[must_use]
pub fn is_word_boundary(chars: &[char], index: usize) -> bool {
    if index == 0 || index >= chars.len() {
        return true;
    }
    let before = chars[index - 1];
    let after = chars[index];
    before.is_whitespace() || after.is_whitespace() || is_cjk(before) || is_cjk(after)
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3000..=0x303F      // CJK punctuation
            | 0x3040..=0x30FF // hiragana, katakana
            | 0x3400..=0x4DBF // extension A
            | 0x4E00..=0x9FFF // unified ideographs
            | 0xF900..=0xFAFF // compatibility ideographs
            | 0xFF00..=0xFFEF // half/full width forms
            | 0x20000..=0x2FA1F
    )
}

fn proportional_position(code: &Code, canonical_len: usize, chars: &[char]) -> usize {
    let text_len = chars.len();
    let target = if canonical_len == 0 {
        0
    } else {
        let relative = code.position.min(canonical_len) as f64 / canonical_len as f64;
        ((relative * text_len as f64).round() as usize).min(text_len)
    };
    nearest_boundary(chars, target)
}

/// Nearest boundary to `target`; on equal distance the earlier one.
fn nearest_boundary(chars: &[char], target: usize) -> usize {
    let text_len = chars.len();
    for distance in 0..=text_len {
        if let Some(before) = target.checked_sub(distance) {
            if is_word_boundary(chars, before) {
                return before;
            }
        }
        let after = target + distance;
        if after <= text_len && is_word_boundary(chars, after) {
            return after;
        }
    }
    text_len
}

fn assemble(chars: &[char], mut placed: Vec<(usize, &Code)>) -> String {
    // Stable: codes at the same position keep their extraction order
    placed.sort_by_key(|(position, _)| *position);

    let extra: usize = placed.iter().map(|(_, code)| code.literal.len()).sum();
    let mut out = String::with_capacity(chars.len() * 4 + extra);
    let mut pending = placed.into_iter().peekable();

    for index in 0..=chars.len() {
        while let Some((_, code)) = pending.next_if(|(position, _)| *position == index) {
            out.push_str(&code.literal);
        }
        if let Some(c) = chars.get(index) {
            out.push(*c);
        }
    }

    out
}
