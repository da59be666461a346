/// Markdown processing: overlap chunking, title extraction, and image
/// reference extraction.
///
/// Chunk offsets are character offsets (not bytes) into the document text,
/// so they are stable for non-ASCII content.
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use tracing::warn;

/// A contiguous slice of document text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    /// Inclusive character offset of the first character.
    pub start: usize,
    /// Exclusive character offset past the last character.
    pub end: usize,
}

/// Reference to an image found in a markdown document.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub original_path: String,
    pub absolute_path: String,
    pub alt_text: String,
}

// ── Chunking ─────────────────────────────────────────────────────────

const PARAGRAPH_SEP: [char; 2] = ['\n', '\n'];
const SENTENCE_SEPS: [[char; 2]; 4] = [['.', ' '], ['.', '\n'], ['!', ' '], ['?', ' ']];

/// Split text into overlapping chunks of at most `chunk_size` characters.
///
/// Consecutive chunks share `overlap` characters except where a boundary
/// break adjusts the window. Chunk boundaries prefer the last paragraph
/// break past the midpoint of the window, then the first sentence separator
/// past the midpoint; otherwise the window is cut at `chunk_size`. The
/// spans cover `[0, len)` with no gaps. An empty document yields no chunks;
/// a document within `chunk_size` yields exactly one.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    debug_assert!(overlap < chunk_size, "overlap must be below chunk_size");

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 {
        return Vec::new();
    }
    if len <= chunk_size {
        return vec![make_span(&chars, 0, len)];
    }

    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let mut end = (start + chunk_size).min(len);

        if end < len {
            if let Some(pos) =
                rfind(&chars, &PARAGRAPH_SEP, start, end).filter(|&p| p > start + chunk_size / 2)
            {
                end = pos + PARAGRAPH_SEP.len();
            } else {
                for sep in &SENTENCE_SEPS {
                    if let Some(pos) =
                        rfind(&chars, sep, start, end).filter(|&p| p > start + chunk_size / 2)
                    {
                        end = pos + sep.len();
                        break;
                    }
                }
            }
        }

        spans.push(make_span(&chars, start, end));
        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        if next <= start {
            // A boundary break shortened the window below the overlap;
            // continue from the cut without overlapping.
            next = end;
        }
        if len - next < overlap {
            // Fold a tiny tail into the final chunk instead of emitting it.
            let last = spans.last_mut().expect("at least one chunk");
            last.end = len;
            last.content = chars[last.start..len].iter().collect();
            break;
        }
        start = next;
    }

    spans
}

fn make_span(chars: &[char], start: usize, end: usize) -> ChunkSpan {
    ChunkSpan {
        content: chars[start..end].iter().collect(),
        start,
        end,
    }
}

/// Rightmost index `i` in `[start, end - pat.len()]` where `pat` occurs,
/// entirely within `[start, end)`.
fn rfind(chars: &[char], pat: &[char], start: usize, end: usize) -> Option<usize> {
    if end < start + pat.len() {
        return None;
    }
    (start..=end - pat.len())
        .rev()
        .find(|&i| chars[i..i + pat.len()] == *pat)
}

// ── Title extraction ─────────────────────────────────────────────────

static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

/// First ATX H1 heading, falling back to the first non-empty line
/// (truncated to 100 characters), then `"Untitled"`.
pub fn extract_title(content: &str) -> String {
    if let Some(caps) = H1_RE.captures(content) {
        return caps[1].trim().to_string();
    }
    for line in content.lines() {
        let stripped = line.trim();
        if !stripped.is_empty() {
            return stripped.chars().take(100).collect();
        }
    }
    "Untitled".to_string()
}

// ── Image extraction ─────────────────────────────────────────────────

/// Extract image references (inline and reference-style) and resolve their
/// paths relative to the document's directory.
///
/// Remote (`http`/`https`/`data:`) targets are skipped, and any path that
/// resolves outside `repo_root` is dropped to keep references sandboxed to
/// the repository.
pub fn extract_images(content: &str, file_path: &Path, repo_root: &Path) -> Vec<ImageRef> {
    let mut images = Vec::new();
    let mut pending: Option<(String, String)> = None;

    for event in Parser::new_ext(content, Options::empty()) {
        match event {
            Event::Start(Tag::Image { dest_url, .. }) => {
                pending = Some((dest_url.to_string(), String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, alt)) = pending.as_mut() {
                    alt.push_str(&text);
                }
            }
            Event::End(TagEnd::Image) => {
                if let Some((dest, alt)) = pending.take() {
                    if let Some(image) = resolve_image(&dest, &alt, file_path, repo_root) {
                        images.push(image);
                    }
                }
            }
            _ => {}
        }
    }

    images
}

fn resolve_image(dest: &str, alt: &str, file_path: &Path, repo_root: &Path) -> Option<ImageRef> {
    if dest.starts_with("http://") || dest.starts_with("https://") || dest.starts_with("data:") {
        return None;
    }

    let parent = file_path.parent().unwrap_or_else(|| Path::new(""));
    let resolved = normalize_path(&parent.join(dest));
    let root = normalize_path(repo_root);

    if !resolved.starts_with(&root) {
        warn!(
            "Skipping image outside repository root: {dest} (resolved to {})",
            resolved.display()
        );
        return None;
    }

    Some(ImageRef {
        original_path: dest.to_string(),
        absolute_path: resolved.to_string_lossy().replace('\\', "/"),
        alt_text: alt.to_string(),
    })
}

/// Lexically resolve `.` and `..` components without touching the
/// filesystem, so nonexistent targets still normalize.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────
