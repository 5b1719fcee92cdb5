//! Markdown-aware document chunking.
//!
//! Markdown input is split into text and fenced-code blocks first. Text
//! blocks track the ATX heading stack so every chunk knows the heading path
//! in effect where it starts; paragraphs accumulate into a buffer that is
//! flushed when the next paragraph would push it past `chunk_size`. Fenced
//! code blocks are atomic: one that fits joins the current buffer, one that
//! exceeds `chunk_size` is emitted as a single oversized chunk rather than
//! split. A final pass prepends the previous chunk's tail to implement
//! character overlap.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{EngineError, Result};

/// One chunk of a source document, before identity assignment and embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Enclosing headings joined with " > "; `None` for plain text and for
    /// markdown content before the first heading.
    pub heading_path: Option<String>,
    pub text: String,
}

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkOptions {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(EngineError::configuration("chunk_size must be positive"));
        }
        if overlap >= chunk_size {
            return Err(EngineError::configuration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(
            crate::config::get_chunk_size(),
            crate::config::get_chunk_overlap(),
        )
    }
}

fn heading_regex() -> &'static Regex {
    static HEADING_REGEX: OnceLock<Regex> = OnceLock::new();
    HEADING_REGEX.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").expect("valid heading regex"))
}

fn paragraph_split_regex() -> &'static Regex {
    static PARA_REGEX: OnceLock<Regex> = OnceLock::new();
    PARA_REGEX.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Code,
}

/// Split markdown into text blocks and fenced code blocks. The closing fence
/// line belongs to its code block; an unterminated fence runs to the end.
fn split_blocks(text: &str) -> Vec<(BlockKind, String)> {
    let mut out: Vec<(BlockKind, String)> = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut in_code = false;

    fn flush(out: &mut Vec<(BlockKind, String)>, buf: &mut Vec<&str>, kind: BlockKind) {
        if buf.is_empty() {
            return;
        }
        out.push((kind, buf.join("\n").trim_matches('\n').to_string()));
        buf.clear();
    }

    for line in text.lines() {
        if line.trim().starts_with("```") {
            if in_code {
                buf.push(line);
                flush(&mut out, &mut buf, BlockKind::Code);
                in_code = false;
            } else {
                flush(&mut out, &mut buf, BlockKind::Text);
                in_code = true;
                buf.push(line);
            }
            continue;
        }
        buf.push(line);
    }

    let kind = if in_code {
        BlockKind::Code
    } else {
        BlockKind::Text
    };
    flush(&mut out, &mut buf, kind);
    out
}

/// Split a text block into paragraphs on blank-line runs.
fn paragraphs(block_text: &str) -> Vec<String> {
    paragraph_split_regex()
        .split(block_text)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let caps = heading_regex().captures(line.trim())?;
    let level = caps[1].len();
    let title = caps[2].trim().to_string();
    Some((level, title))
}

/// Sizing is in characters throughout, matching the overlap unit. Byte
/// lengths undercount multi-byte text and would shrink packed chunks.
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s` (the whole string when shorter).
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

struct Packer {
    chunks: Vec<ChunkPiece>,
    buf: String,
    section: Option<String>,
}

impl Packer {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            buf: String::new(),
            section: None,
        }
    }

    fn emit(&mut self, text: &str) {
        let t = text.trim();
        if t.is_empty() {
            return;
        }
        self.chunks.push(ChunkPiece {
            heading_path: self.section.clone(),
            text: t.to_string(),
        });
    }

    fn flush_buf(&mut self) {
        if !self.buf.trim().is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.emit(&text);
        } else {
            self.buf.clear();
        }
    }

    /// Accumulate paragraphs into the buffer, flushing whenever the next
    /// paragraph would exceed `chunk_size`. A single paragraph larger than
    /// `chunk_size` becomes its own oversized chunk on the next flush.
    fn pack_paragraphs(&mut self, text: &str, chunk_size: usize) {
        for p in paragraphs(text) {
            if self.buf.is_empty() {
                self.buf = p;
            } else if char_len(&self.buf) + 2 + char_len(&p) <= chunk_size {
                self.buf.push_str("\n\n");
                self.buf.push_str(&p);
            } else {
                self.flush_buf();
                self.buf = p;
            }
        }
    }
}

/// Chunk markdown text, preserving heading context and fence atomicity.
///
/// Returns chunks in document order. Empty or whitespace-only input yields an
/// empty vec.
pub fn chunk_markdown(text: &str, opts: &ChunkOptions) -> Vec<ChunkPiece> {
    let blocks = split_blocks(text);
    let mut heading_stack: Vec<(usize, String)> = Vec::new();
    let mut packer = Packer::new();

    for (kind, block_text) in blocks {
        match kind {
            BlockKind::Code => {
                let code = block_text.trim_matches('\n');
                if code.trim().is_empty() {
                    continue;
                }
                if char_len(code) > opts.chunk_size {
                    // Fences are atomic: emit the whole block as one
                    // oversized chunk, never split or truncate it.
                    packer.flush_buf();
                    packer.emit(code);
                } else {
                    if !packer.buf.is_empty()
                        && char_len(&packer.buf) + 2 + char_len(code) > opts.chunk_size
                    {
                        packer.flush_buf();
                    }
                    if packer.buf.is_empty() {
                        packer.buf = code.to_string();
                    } else {
                        packer.buf.push_str("\n\n");
                        packer.buf.push_str(code);
                    }
                }
            }
            BlockKind::Text => {
                let mut pending: Vec<&str> = Vec::new();
                for line in block_text.lines() {
                    if let Some((level, title)) = parse_heading(line) {
                        // Text gathered before this heading belongs to the
                        // previous section; pack and flush it first.
                        if !pending.is_empty() {
                            let gathered = pending.join("\n");
                            packer.pack_paragraphs(&gathered, opts.chunk_size);
                            pending.clear();
                        }
                        packer.flush_buf();

                        while heading_stack
                            .last()
                            .is_some_and(|(l, _)| *l >= level)
                        {
                            heading_stack.pop();
                        }
                        heading_stack.push((level, title));
                        packer.section = heading_path(&heading_stack);
                        continue;
                    }
                    pending.push(line);
                }
                if !pending.is_empty() {
                    let gathered = pending.join("\n");
                    packer.pack_paragraphs(&gathered, opts.chunk_size);
                }
            }
        }
    }
    packer.flush_buf();

    apply_overlap(packer.chunks, opts.overlap)
}

/// Fallback chunking for non-markdown text: paragraph packing plus overlap,
/// no heading metadata.
pub fn chunk_plain(text: &str, opts: &ChunkOptions) -> Vec<ChunkPiece> {
    let mut packer = Packer::new();
    packer.pack_paragraphs(text, opts.chunk_size);
    packer.flush_buf();
    apply_overlap(packer.chunks, opts.overlap)
}

fn heading_path(stack: &[(usize, String)]) -> Option<String> {
    let titles: Vec<&str> = stack
        .iter()
        .filter(|(_, t)| !t.is_empty())
        .map(|(_, t)| t.as_str())
        .collect();
    if titles.is_empty() {
        None
    } else {
        Some(titles.join(" > "))
    }
}

/// Prepend the previous chunk's last `overlap` characters to each chunk
/// after the first. The tail is taken from the pre-overlap text so overlap
/// never compounds.
fn apply_overlap(chunks: Vec<ChunkPiece>, overlap: usize) -> Vec<ChunkPiece> {
    if overlap == 0 || chunks.len() <= 1 {
        return chunks;
    }
    let mut out = Vec::with_capacity(chunks.len());
    let mut prev_tail = String::new();
    for piece in chunks {
        let original_text = piece.text.clone();
        if prev_tail.is_empty() {
            out.push(piece);
        } else {
            out.push(ChunkPiece {
                heading_path: piece.heading_path,
                text: format!("{}{}", prev_tail, piece.text),
            });
        }
        prev_tail = tail_chars(&original_text, overlap).to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(chunk_size: usize, overlap: usize) -> ChunkOptions {
        ChunkOptions::new(chunk_size, overlap).unwrap()
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        assert!(chunk_markdown("", &opts(100, 0)).is_empty());
        assert!(chunk_markdown("   \n\n  ", &opts(100, 0)).is_empty());
        assert!(chunk_plain("", &opts(100, 0)).is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        assert!(ChunkOptions::new(100, 100).is_err());
        assert!(ChunkOptions::new(100, 150).is_err());
        assert!(ChunkOptions::new(0, 0).is_err());
        assert!(ChunkOptions::new(100, 99).is_ok());
    }

    #[test]
    fn test_heading_stack_builds_nested_path() {
        let md = "# Guide\n\nintro paragraph\n\n## Setup\n\nsetup steps here\n\n### Linux\n\nlinux details\n";
        let chunks = chunk_markdown(md, &opts(500, 0));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading_path.as_deref(), Some("Guide"));
        assert_eq!(chunks[1].heading_path.as_deref(), Some("Guide > Setup"));
        assert_eq!(
            chunks[2].heading_path.as_deref(),
            Some("Guide > Setup > Linux")
        );
    }

    #[test]
    fn test_sibling_heading_replaces_same_level() {
        let md = "# Top\n\n## First\n\none\n\n## Second\n\ntwo\n";
        let chunks = chunk_markdown(md, &opts(500, 0));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_path.as_deref(), Some("Top > First"));
        assert_eq!(chunks[1].heading_path.as_deref(), Some("Top > Second"));
    }

    #[test]
    fn test_preamble_before_first_heading_has_no_path() {
        let md = "preamble text before any heading\n\n# Later\n\nbody\n";
        let chunks = chunk_markdown(md, &opts(500, 0));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_path, None);
        assert_eq!(chunks[0].text, "preamble text before any heading");
        assert_eq!(chunks[1].heading_path.as_deref(), Some("Later"));
    }

    #[test]
    fn test_paragraphs_pack_up_to_chunk_size() {
        // Two short paragraphs fit together; the third forces a flush.
        let md = "# S\n\naaaa\n\nbbbb\n\ncccccccccccccccccccc\n";
        let chunks = chunk_markdown(md, &opts(12, 0));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaa\n\nbbbb");
        assert_eq!(chunks[1].text, "cccccccccccccccccccc");
    }

    #[test]
    fn test_packing_counts_characters_not_bytes() {
        // Two 14-char Korean paragraphs are 36 bytes each but exactly 30
        // chars joined, so they must pack into one chunk of size 30.
        let text = "문서의 첫 번째 단락입니다\n\n문서의 두 번째 단락입니다";
        let chunks = chunk_plain(text, &opts(30, 0));

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("첫 번째"));
        assert!(chunks[0].text.contains("두 번째"));
    }

    #[test]
    fn test_oversized_paragraph_emitted_whole() {
        let long = "x".repeat(300);
        let md = format!("# S\n\n{}\n\nshort\n", long);
        let chunks = chunk_markdown(&md, &opts(100, 0));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, long, "oversized paragraph must not be truncated");
        assert_eq!(chunks[1].text, "short");
    }

    #[test]
    fn test_code_fence_is_atomic_even_when_oversized() {
        let body: String = (0..40).map(|i| format!("let x{} = {};\n", i, i)).collect();
        let fence = format!("```rust\n{}```", body);
        let md = format!("# Code\n\nintro\n\n{}\n\nafter\n", fence);
        let chunks = chunk_markdown(&md, &opts(80, 0));

        let fence_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| c.text.contains("```rust"))
            .collect();
        assert_eq!(fence_chunks.len(), 1, "fence should live in exactly one chunk");
        assert!(
            fence_chunks[0].text.contains("let x39"),
            "fence content must be intact: {}",
            fence_chunks[0].text
        );
        assert!(
            fence_chunks[0].text.len() > 80,
            "oversized fence is emitted whole, not split"
        );
    }

    #[test]
    fn test_small_code_fence_merges_with_buffer() {
        let md = "# S\n\nintro text\n\n```\nlet a = 1;\n```\n";
        let chunks = chunk_markdown(md, &opts(200, 0));

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("intro text"));
        assert!(chunks[0].text.contains("let a = 1;"));
    }

    #[test]
    fn test_unterminated_fence_runs_to_end() {
        let md = "# S\n\ntext\n\n```\nno closing fence\nstill code\n";
        let chunks = chunk_markdown(md, &opts(200, 0));

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("still code"), "trailing fence content kept");
    }

    #[test]
    fn test_overlap_prepends_previous_tail() {
        let md = "# S\n\nabcdefghij\n\nklmnopqrst\n";
        let chunks = chunk_markdown(md, &opts(10, 4));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "abcdefghij", "first chunk has no overlap");
        assert_eq!(
            chunks[1].text, "ghijklmnopqrst",
            "second chunk starts with the previous tail"
        );
    }

    #[test]
    fn test_overlap_tail_is_pre_overlap_text() {
        // Three chunks: the third's prefix comes from the second's original
        // text, not from the second's already-overlapped form.
        let md = "# S\n\n1234567890\n\nabcdefghij\n\nqrstuvwxyz\n";
        let chunks = chunk_markdown(md, &opts(10, 3));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text, "hijqrstuvwxyz");
    }

    #[test]
    fn test_overlap_handles_multibyte_boundaries() {
        let md = "# S\n\nαβγδεζηθικ\n\nsecond paragraph text\n";
        let chunks = chunk_markdown(md, &opts(24, 4));

        assert_eq!(chunks.len(), 2);
        assert!(
            chunks[1].text.starts_with("ηθικ"),
            "tail slicing must respect char boundaries: {}",
            chunks[1].text
        );
    }

    #[test]
    fn test_plain_fallback_has_no_heading_metadata() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let chunks = chunk_plain(text, &opts(20, 0));

        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.heading_path.is_none()));
    }

    #[test]
    fn test_heading_line_not_included_in_chunk_text() {
        let md = "# Title Line\n\nbody text\n";
        let chunks = chunk_markdown(md, &opts(100, 0));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "body text");
        assert_eq!(chunks[0].heading_path.as_deref(), Some("Title Line"));
    }

    #[test]
    fn test_coverage_all_blocks_survive_chunking() {
        // Every paragraph and fence from the source must appear in some
        // chunk; nothing is dropped regardless of sizing.
        let md = "# A\n\npara one is here\n\npara two is here\n\n```\ncode body line\n```\n\n## B\n\npara three is here\n";
        let chunks = chunk_markdown(md, &opts(24, 0));
        let joined: String = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        for needle in [
            "para one is here",
            "para two is here",
            "code body line",
            "para three is here",
        ] {
            assert!(joined.contains(needle), "lost block: {}", needle);
        }
    }

    #[test]
    fn test_chunks_returned_in_document_order() {
        let md = "# A\n\nfirst\n\n# B\n\nsecond\n\n# C\n\nthird\n";
        let chunks = chunk_markdown(md, &opts(100, 0));

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }
}
