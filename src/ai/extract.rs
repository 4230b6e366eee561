//! Response Extraction
//!
//! Pulls the rewritten code out of free-form model output.
//!
//! Fence markers (```) are paired left to right. The text between a pair is a
//! block; its first line is the info string when it is a bare tag (`python`,
//! `c++`), otherwise it is already code. An unpaired trailing marker produces
//! no block.
//!
//! Selection order:
//! 1. First block whose info string names the source language
//! 2. Longest block by trimmed character count (first wins ties)
//! 3. The raw response, unchanged (degraded, logged as a warning)

use tracing::{debug, warn};

use crate::analyzer::Language;

const FENCE: &str = "```";

/// How the code was located in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// Block tagged with the source language
    Tagged,
    /// Longest fenced block
    Longest,
    /// No usable block; the whole response was taken
    Raw,
}

impl std::fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tagged => write!(f, "tagged"),
            Self::Longest => write!(f, "longest"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Extracted code plus how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub code: String,
    pub kind: ExtractionKind,
}

impl Extraction {
    /// True when no fenced block was found and the raw text was returned
    pub fn is_degraded(&self) -> bool {
        self.kind == ExtractionKind::Raw
    }
}

#[derive(Debug)]
struct FencedBlock<'a> {
    info: &'a str,
    body: &'a str,
}

/// A lone word of tag characters; anything else on the fence line is code
fn is_info_string(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
}

impl<'a> FencedBlock<'a> {
    fn parse(inner: &'a str) -> Self {
        match inner.split_once('\n') {
            Some((first, body)) if is_info_string(first.trim()) => Self {
                info: first.trim(),
                body,
            },
            _ => Self {
                info: "",
                body: inner,
            },
        }
    }

    fn trimmed(&self) -> &'a str {
        self.body.trim()
    }
}

/// Split text into fenced blocks, pairing markers left to right
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let markers: Vec<usize> = text.match_indices(FENCE).map(|(i, _)| i).collect();

    markers
        .chunks_exact(2)
        .map(|pair| FencedBlock::parse(&text[pair[0] + FENCE.len()..pair[1]]))
        .collect()
}

/// Extract code assuming a Python source file
pub fn extract_code(raw: &str) -> Extraction {
    extract_code_for(raw, Language::Python)
}

/// Extract code for a file in `language`
pub fn extract_code_for(raw: &str, language: Language) -> Extraction {
    let blocks: Vec<FencedBlock<'_>> = fenced_blocks(raw)
        .into_iter()
        .filter(|b| !b.trimmed().is_empty())
        .collect();

    if let Some(block) = blocks.iter().find(|b| language.matches_fence_tag(b.info)) {
        debug!(language = %language, "Extracted {}-tagged block", language.fence_tag());
        return Extraction {
            code: block.trimmed().to_string(),
            kind: ExtractionKind::Tagged,
        };
    }

    let mut longest: Option<&FencedBlock<'_>> = None;
    for block in &blocks {
        let len = block.trimmed().chars().count();
        if longest.is_none_or(|best| len > best.trimmed().chars().count()) {
            longest = Some(block);
        }
    }

    if let Some(block) = longest {
        debug!(
            blocks = blocks.len(),
            info = block.info,
            "Extracted longest fenced block"
        );
        return Extraction {
            code: block.trimmed().to_string(),
            kind: ExtractionKind::Longest,
        };
    }

    warn!("No fenced code block in response, using raw text");
    Extraction {
        code: raw.to_string(),
        kind: ExtractionKind::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tagged_block_wins_over_longer_generic() {
        let raw = "Here:\n```\nprint('a much longer unrelated block of text')\n```\n\
                   ```python\nx = 1\n```\n";
        let out = extract_code(raw);
        assert_eq!(out.code, "x = 1");
        assert_eq!(out.kind, ExtractionKind::Tagged);
    }

    #[test]
    fn test_first_tagged_block_is_used() {
        let raw = "```python\nfirst()\n```\ntext\n```py\nsecond()\n```";
        assert_eq!(extract_code(raw).code, "first()");
    }

    #[test]
    fn test_longest_generic_block() {
        let short = "a".repeat(10);
        let long = "b".repeat(50);
        let raw = format!("```\n{}\n```\nand\n```\n{}\n```", short, long);
        let out = extract_code(&raw);
        assert_eq!(out.code, long);
        assert_eq!(out.kind, ExtractionKind::Longest);
    }

    #[test]
    fn test_longest_tie_keeps_first() {
        let raw = "```\naaaa\n```\n```\nbbbb\n```";
        assert_eq!(extract_code(raw).code, "aaaa");
    }

    #[test]
    fn test_other_language_tag_is_stripped() {
        let raw = "```rust\nfn main() {}\n```";
        let out = extract_code(raw);
        assert_eq!(out.code, "fn main() {}");
        assert_eq!(out.kind, ExtractionKind::Longest);

        let tagged = extract_code_for(raw, Language::Rust);
        assert_eq!(tagged.kind, ExtractionKind::Tagged);
    }

    #[test]
    fn test_code_on_fence_line_is_kept() {
        let raw = "```x = 1\ny = 2\n```";
        let out = extract_code(raw);
        assert_eq!(out.code, "x = 1\ny = 2");
        assert_eq!(out.kind, ExtractionKind::Longest);

        assert_eq!(extract_code("```print(1)\n```").code, "print(1)");
    }

    #[test]
    fn test_unknown_language_never_tags() {
        let raw = "```text\nRemoved two unused helpers.\n```\n```python\nx = 1\n```";
        let out = extract_code_for(raw, Language::Unknown);
        assert_eq!(out.kind, ExtractionKind::Longest);
        assert_eq!(extract_code_for(raw, Language::Python).code, "x = 1");
    }

    #[test]
    fn test_no_fence_returns_raw_unchanged() {
        let raw = "  def f():\n    return 1\n";
        let out = extract_code(raw);
        assert_eq!(out.code, raw);
        assert!(out.is_degraded());
    }

    #[test]
    fn test_unterminated_fence_does_not_panic() {
        let raw = "Sure!\n```python\nx = 1\n";
        let out = extract_code(raw);
        assert_eq!(out.code, raw);
        assert!(out.is_degraded());
    }

    #[test]
    fn test_dangling_third_marker_is_ignored() {
        let raw = "```python\nkeep()\n```\ntrailing ```python\nlost()";
        assert_eq!(extract_code(raw).code, "keep()");
    }

    #[test]
    fn test_empty_blocks_are_skipped() {
        let raw = "``````";
        assert!(extract_code(raw).is_degraded());
    }

    proptest! {
        #[test]
        fn single_block_round_trips(
            prefix in "[A-Za-z .:\n]{0,30}",
            code in "[a-z_=()0-9 \n]{0,60}[a-z]",
            suffix in "[A-Za-z .\n]{0,30}",
        ) {
            let raw = format!("{}\n```python\n{}\n```\n{}", prefix, code, suffix);
            let out = extract_code(&raw);
            prop_assert_eq!(out.code, code.trim().to_string());
            prop_assert_eq!(out.kind, ExtractionKind::Tagged);
        }

        #[test]
        fn never_panics(raw in ".{0,200}") {
            let _ = extract_code(&raw);
        }
    }
}
