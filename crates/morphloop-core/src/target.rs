//! Target-format text: one sample per line, single-character tokens separated
//! by spaces, with a `!` token marking a morpheme boundary after the
//! preceding character.
//!
//! ```text
//! w a l k ! e d      spaced variant
//! walk!ed            compact variant (accepted by parsers)
//! ```
//!
//! Blank lines and lines starting with `#` are ignored by parsers. Anything
//! after a tab is a secondary column and is ignored as well.

use std::collections::BTreeSet;

use crate::error::FormatError;
use crate::model::AnnotationWord;

pub const BOUNDARY_MARKER: char = '!';

/// Strip boundary markers from every line, leaving single-space-separated
/// characters. Comment lines pass through untouched; line structure is kept.
pub fn derive_source_view(target_text: &str) -> String {
    target_text
        .split('\n')
        .map(source_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn source_line(line: &str) -> String {
    let line = line.trim_end_matches('\r');
    if line.trim_start().starts_with('#') {
        return line.to_string();
    }
    let sample = line.split('\t').next().unwrap_or_default();
    let mut out = String::with_capacity(sample.len());
    for c in sample
        .chars()
        .filter(|c| !c.is_whitespace() && *c != BOUNDARY_MARKER)
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// Encode a word and its boundary set as a spaced target line.
pub fn encode_annotation_line(word: &AnnotationWord) -> String {
    encode_segmented(&word.word, &word.boundaries)
}

/// Encode `word` with a `!` token after each boundary index that is not the
/// last character.
pub fn encode_segmented(word: &str, boundaries: &BTreeSet<usize>) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(chars.len() * 2 + boundaries.len() * 2);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(*c);
        if boundaries.contains(&i) && i + 1 < chars.len() {
            out.push(' ');
            out.push(BOUNDARY_MARKER);
        }
    }
    out
}

/// Render a word as its compact segmented form, e.g. `walk!ed`.
pub fn render_compact(word: &str, boundaries: &BTreeSet<usize>) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len() + boundaries.len());
    for (i, c) in chars.iter().enumerate() {
        out.push(*c);
        if boundaries.contains(&i) && i + 1 < chars.len() {
            out.push(BOUNDARY_MARKER);
        }
    }
    out
}

/// Decode one target line (spaced or compact) into its surface word and
/// boundary indices. Markers before the first or after the last character
/// carry no boundary.
pub fn decode_target_line(line: &str) -> (String, BTreeSet<usize>) {
    let sample = line.split('\t').next().unwrap_or_default();
    let mut word = String::with_capacity(sample.len());
    let mut boundaries = BTreeSet::new();
    let mut count = 0usize;

    for c in sample.chars().filter(|c| !c.is_whitespace()) {
        if c == BOUNDARY_MARKER {
            if count > 0 {
                boundaries.insert(count - 1);
            }
        } else {
            word.push(c);
            count += 1;
        }
    }

    let limit = count.saturating_sub(1);
    boundaries.retain(|&i| i < limit);
    (word, boundaries)
}

/// Sample lines of a target-format text, skipping blank and comment lines.
/// Secondary tab-separated columns are dropped.
pub fn sample_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(|line| line.split('\t').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Number of samples in a target-format text.
pub fn count_samples(text: &str) -> usize {
    sample_lines(text).count()
}

/// Check that `text` is well-formed spaced target format.
pub fn validate_target_format(text: &str) -> Result<(), FormatError> {
    if text.trim().is_empty() {
        return Err(FormatError::EmptyContent);
    }

    let mut saw_sample = false;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        saw_sample = true;

        let mut has_char = false;
        for token in trimmed.split_whitespace() {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(BOUNDARY_MARKER), None) => {}
                (Some(_), None) => has_char = true,
                _ => {
                    return Err(FormatError::MalformedLine {
                        line: idx + 1,
                        token: token.to_string(),
                    });
                }
            }
        }
        if !has_char {
            return Err(FormatError::MalformedLine {
                line: idx + 1,
                token: BOUNDARY_MARKER.to_string(),
            });
        }
    }

    if !saw_sample {
        return Err(FormatError::NoNonEmptyLines);
    }
    Ok(())
}

/// Append confirmed words to an annotated file's content.
///
/// Trailing whitespace of `existing` is trimmed before a newline-joined block
/// of encoded words is appended. Prior content is never rewritten.
pub fn merge_annotations<'a>(
    existing: &str,
    words: impl IntoIterator<Item = &'a AnnotationWord>,
) -> String {
    let block = words
        .into_iter()
        .map(encode_annotation_line)
        .collect::<Vec<_>>()
        .join("\n");
    let base = existing.trim_end();
    match (base.is_empty(), block.is_empty()) {
        (true, _) => block,
        (false, true) => base.to_string(),
        (false, false) => format!("{base}\n{block}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, boundaries: &[usize]) -> AnnotationWord {
        let mut w = AnnotationWord::new("w0", text, 0.5);
        w.boundaries = boundaries.iter().copied().collect();
        w
    }

    #[test]
    fn source_view_strips_markers() {
        assert_eq!(derive_source_view("w a l k ! e d"), "w a l k e d");
        assert_eq!(derive_source_view("walk!ed\nr u n"), "w a l k e d\nr u n");
    }

    #[test]
    fn source_view_is_noop_without_markers() {
        let text = "c a t\nd o g\n";
        assert_eq!(derive_source_view(text), text);
    }

    #[test]
    fn source_view_is_idempotent() {
        let inputs = [
            "u n ! h e l p ! f u l\n\nc a t",
            "walk!ed\tgloss\n# header\n",
            "  a   b ! c  \r\n",
        ];
        for input in inputs {
            let once = derive_source_view(input);
            assert_eq!(derive_source_view(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn source_view_keeps_comment_lines() {
        assert_eq!(derive_source_view("# pool\nc ! a t"), "# pool\nc a t");
    }

    #[test]
    fn encode_places_markers_after_boundary_chars() {
        assert_eq!(encode_annotation_line(&word("walked", &[3])), "w a l k ! e d");
        assert_eq!(
            encode_annotation_line(&word("unhelpful", &[1, 5])),
            "u n ! h e l p ! f u l"
        );
    }

    #[test]
    fn encode_without_boundaries_is_plain_sequence() {
        assert_eq!(encode_annotation_line(&word("run", &[])), "r u n");
    }

    #[test]
    fn encode_ignores_boundary_on_last_char() {
        assert_eq!(encode_annotation_line(&word("cat", &[2])), "c a t");
    }

    #[test]
    fn encode_decode_round_trip() {
        let cases: &[(&str, &[usize])] = &[
            ("run", &[]),
            ("walked", &[3]),
            ("unhelpful", &[1, 5]),
            ("ab", &[0]),
            ("antidisestablishment", &[3, 6, 9, 15]),
            ("ñandú", &[1]),
        ];
        for (text, boundaries) in cases {
            let original = word(text, boundaries);
            let (decoded_word, decoded) = decode_target_line(&encode_annotation_line(&original));
            assert_eq!(decoded_word, *text);
            assert_eq!(decoded, original.boundaries, "word {text}");
        }
    }

    #[test]
    fn decode_accepts_compact_variant() {
        let (w, b) = decode_target_line("un!help!ful");
        assert_eq!(w, "unhelpful");
        assert_eq!(b, BTreeSet::from([1, 5]));
    }

    #[test]
    fn decode_drops_edge_markers() {
        let (w, b) = decode_target_line("! c a t !");
        assert_eq!(w, "cat");
        assert!(b.is_empty());
    }

    #[test]
    fn render_compact_form() {
        assert_eq!(render_compact("unhelpful", &BTreeSet::from([1, 5])), "un!help!ful");
        assert_eq!(render_compact("run", &BTreeSet::new()), "run");
    }

    #[test]
    fn validate_empty_content() {
        assert_eq!(validate_target_format(""), Err(FormatError::EmptyContent));
        assert_eq!(validate_target_format("  \n\t\n"), Err(FormatError::EmptyContent));
    }

    #[test]
    fn validate_comment_only_has_no_lines() {
        assert_eq!(
            validate_target_format("# nothing here\n"),
            Err(FormatError::NoNonEmptyLines)
        );
    }

    #[test]
    fn validate_accepts_plain_and_segmented_lines() {
        assert_eq!(validate_target_format("c a t"), Ok(()));
        assert_eq!(validate_target_format("c a ! t"), Ok(()));
        assert_eq!(validate_target_format("r u n\n\nw a l k ! e d\n"), Ok(()));
    }

    #[test]
    fn validate_rejects_multichar_token() {
        assert_eq!(
            validate_target_format("ca t"),
            Err(FormatError::MalformedLine {
                line: 1,
                token: "ca".into()
            })
        );
    }

    #[test]
    fn validate_reports_line_number() {
        assert_eq!(
            validate_target_format("c a t\nd o g\nwalk ! ed"),
            Err(FormatError::MalformedLine {
                line: 3,
                token: "walk".into()
            })
        );
    }

    #[test]
    fn validate_rejects_marker_only_line() {
        assert_eq!(
            validate_target_format("c a t\n! !"),
            Err(FormatError::MalformedLine {
                line: 2,
                token: "!".into()
            })
        );
    }

    #[test]
    fn count_skips_blank_and_comment_lines() {
        assert_eq!(count_samples("# header\nc a t\n\nd o g\n"), 2);
        assert_eq!(count_samples(""), 0);
    }

    #[test]
    fn sample_lines_drop_second_column() {
        let text = "w a l k ! e d\twalked\n# note\tx\nr u n\n\tgloss";
        let lines: Vec<&str> = sample_lines(text).collect();
        assert_eq!(lines, ["w a l k ! e d", "r u n"]);
        assert_eq!(count_samples("c a t\tcat\n\tonly gloss"), 1);
    }

    #[test]
    fn merge_appends_after_trimmed_content() {
        let words = [word("walked", &[3]), word("cats", &[2])];
        let merged = merge_annotations("r u n\n\n", &words);
        assert_eq!(merged, "r u n\nw a l k ! e d\nc a t ! s");
        assert_eq!(count_samples(&merged), 3);
    }

    #[test]
    fn merge_into_empty_file() {
        let words = [word("run", &[])];
        assert_eq!(merge_annotations("", &words), "r u n");
    }

    #[test]
    fn merge_nothing_keeps_content() {
        assert_eq!(merge_annotations("r u n\n", &[]), "r u n");
    }
}
