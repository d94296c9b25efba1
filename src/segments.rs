use std::sync::LazyLock;

use regex::Regex;

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(\w+)?\n(.*?)```").expect("code block pattern is valid")
});

static OPEN_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(\w+)?\n(.*)$").expect("open fence pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Prose(String),
    Code {
        language: String,
        code: String,
        /// False while the closing fence has not arrived yet.
        closed: bool,
    },
}

/// Splits message content into prose and fenced code blocks.
///
/// With `streaming` set, a trailing fence that has not been closed yet is
/// returned as an open code segment instead of raw prose.
pub fn parse(content: &str, streaming: bool) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for captures in CODE_BLOCK.captures_iter(content) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_prose(&mut segments, &content[last..whole.start()]);
        segments.push(code_segment(&captures, true));
        last = whole.end();
    }

    let rest = &content[last..];
    if streaming {
        if let Some(captures) = OPEN_FENCE.captures(rest) {
            if let Some(fence) = captures.get(0) {
                push_prose(&mut segments, &rest[..fence.start()]);
                segments.push(code_segment(&captures, false));
                return segments;
            }
        }
    }
    push_prose(&mut segments, rest);

    segments
}

/// Closed fenced code blocks of `content`, in order of appearance.
pub fn code_blocks(content: &str) -> Vec<String> {
    parse(content, false)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Code { code, .. } => Some(code),
            Segment::Prose(_) => None,
        })
        .collect()
}

fn code_segment(captures: &regex::Captures<'_>, closed: bool) -> Segment {
    let language = captures
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or("text")
        .to_string();
    let code = captures
        .get(2)
        .map(|m| m.as_str().trim())
        .unwrap_or_default()
        .to_string();
    Segment::Code {
        language,
        code,
        closed,
    }
}

fn push_prose(segments: &mut Vec<Segment>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        segments.push(Segment::Prose(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(text: &str) -> Segment {
        Segment::Prose(text.to_string())
    }

    fn code(language: &str, code: &str, closed: bool) -> Segment {
        Segment::Code {
            language: language.to_string(),
            code: code.to_string(),
            closed,
        }
    }

    #[test]
    fn plain_text_is_a_single_prose_segment() {
        assert_eq!(parse("  Drink water.  ", false), vec![prose("Drink water.")]);
    }

    #[test]
    fn alternates_prose_and_code() {
        let content =
            "Try this:\n```python\nprint('kale')\n```\nThen this:\n```\nSELECT 1;\n```\nDone.";
        assert_eq!(
            parse(content, false),
            vec![
                prose("Try this:"),
                code("python", "print('kale')", true),
                prose("Then this:"),
                code("text", "SELECT 1;", true),
                prose("Done."),
            ]
        );
    }

    #[test]
    fn unclosed_fence_stays_prose_once_finished() {
        let content = "Here:\n```json\n{\"a\": 1}";
        assert_eq!(parse(content, false), vec![prose(content)]);
    }

    #[test]
    fn unclosed_fence_is_open_code_while_streaming() {
        let content = "Here:\n```json\n{\"a\": 1";
        assert_eq!(
            parse(content, true),
            vec![prose("Here:"), code("json", "{\"a\": 1", false)]
        );
    }

    #[test]
    fn empty_content_has_no_segments() {
        assert!(parse("", true).is_empty());
    }

    #[test]
    fn code_blocks_skips_prose_and_unclosed_fences() {
        let content = concat!(
            "Try:\n```sql\nSELECT 1;\n```\n",
            "or\n```\nplain\n```\n",
            "then\n```rust\nfn main",
        );
        assert_eq!(code_blocks(content), vec!["SELECT 1;", "plain"]);
    }
}
