// # Common Types
//
// Shared types used across the pipeline: page and book identity, reading
// direction, loaded-page records, and the page ranges the preloader works
// over. These are the narrow contract the cache, scheduler, preloader, and
// upscale service exchange data through.

pub mod cancel;
pub mod handle;
pub mod hash;

pub use cancel::CancelToken;
pub use handle::{InMemoryMinter, ResourceId, ResourceMinter};
pub use hash::ContentHash;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Zero-based page position within a book.
pub type PageIndex = usize;

// ============================================================================
// Page identity
// ============================================================================

/// Everything the pipeline knows about a single page before its bytes are
/// loaded.
///
/// `archive_entry` selects the archive-entry loader strategy; when absent the
/// page is read directly from `path`. `content_hash` identifies the bytes
/// themselves and keys the upscale cache independently of page position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Position within the book.
    pub index: PageIndex,

    /// Filesystem path of the page file, or of the archive containing it.
    pub path: PathBuf,

    /// Human-readable name shown by consumers.
    pub display_name: String,

    /// Entry name inside an archive, when the page lives in one.
    pub archive_entry: Option<String>,

    /// Pixel dimensions, when already known.
    pub dimensions: Option<(u32, u32)>,

    /// Encoded byte size, when already known.
    pub byte_size: Option<u64>,

    /// Stable hash of the page bytes, when already known.
    pub content_hash: Option<ContentHash>,
}

impl PageDescriptor {
    pub fn new(index: PageIndex, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page {}", index));

        Self {
            index,
            path,
            display_name,
            archive_entry: None,
            dimensions: None,
            byte_size: None,
            content_hash: None,
        }
    }

    pub fn with_archive_entry(mut self, entry: impl Into<String>) -> Self {
        self.archive_entry = Some(entry.into());
        self
    }

    pub fn with_content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }
}

// ============================================================================
// Reading direction
// ============================================================================

/// Direction the reader is paging through the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadDirection {
    Forward,
    Backward,
}

impl ReadDirection {
    /// Signed step for index arithmetic.
    pub fn step(&self) -> i64 {
        match self {
            ReadDirection::Forward => 1,
            ReadDirection::Backward => -1,
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            ReadDirection::Forward => ReadDirection::Backward,
            ReadDirection::Backward => ReadDirection::Forward,
        }
    }

    /// Advance `index` by `steps` in this direction, staying within
    /// `0..total`. Returns `None` when the move leaves the book.
    pub fn advance(&self, index: PageIndex, steps: usize, total: usize) -> Option<PageIndex> {
        let target = index as i64 + self.step() * steps as i64;
        if target < 0 || target >= total as i64 {
            None
        } else {
            Some(target as PageIndex)
        }
    }
}

impl Default for ReadDirection {
    fn default() -> Self {
        ReadDirection::Forward
    }
}

impl fmt::Display for ReadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadDirection::Forward => write!(f, "forward"),
            ReadDirection::Backward => write!(f, "backward"),
        }
    }
}

// ============================================================================
// Book context
// ============================================================================

/// Metadata for the currently open book. One context is active at a time;
/// replacing it purges the prior book's blob and thumbnail entries, while
/// upscale entries (hash-keyed) survive the switch.
#[derive(Debug, Clone)]
pub struct BookContext {
    pub book_path: String,
    pub pages: Vec<PageDescriptor>,
    pub current_index: PageIndex,
    pub direction: ReadDirection,
}

impl BookContext {
    pub fn new(book_path: impl Into<String>, pages: Vec<PageDescriptor>) -> Self {
        Self {
            book_path: book_path.into(),
            pages,
            current_index: 0,
            direction: ReadDirection::Forward,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn descriptor(&self, index: PageIndex) -> Option<&PageDescriptor> {
        self.pages.get(index)
    }
}

// ============================================================================
// Loaded pages
// ============================================================================

/// Decoded facts about an image, sniffed from its header without running a
/// full decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: ImageFormat,
    pub color_space: Option<String>,
    pub bit_depth: Option<u8>,
}

/// Container format of an encoded page, detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Avif,
    Unknown,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Webp => write!(f, "webp"),
            ImageFormat::Gif => write!(f, "gif"),
            ImageFormat::Avif => write!(f, "avif"),
            ImageFormat::Unknown => write!(f, "unknown"),
        }
    }
}

/// A page's bytes as handed back to callers: the blob, the externally
/// visible handle referring to it, and whatever metadata the loader sniffed.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub bytes: bytes::Bytes,
    pub handle: ResourceId,
    pub byte_size: usize,
    pub metadata: Option<DecodedMetadata>,
}

// ============================================================================
// Page ranges
// ============================================================================

/// Inclusive range of page indices centered on the pages currently in view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: PageIndex,
    pub end: PageIndex,
}

impl PageRange {
    pub fn new(start: PageIndex, end: PageIndex) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn single(index: PageIndex) -> Self {
        Self { start: index, end: index }
    }

    pub fn contains(&self, index: PageIndex) -> bool {
        index >= self.start && index <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Indices in reading order: ascending for forward reading, descending
    /// for backward.
    pub fn ordered(&self, direction: ReadDirection) -> Vec<PageIndex> {
        let mut indices: Vec<PageIndex> = (self.start..=self.end).collect();
        if direction == ReadDirection::Backward {
            indices.reverse();
        }
        indices
    }

    /// First index just outside the range in the given direction, bounded by
    /// the book size.
    pub fn next_outside(&self, direction: ReadDirection, total: usize) -> Option<PageIndex> {
        match direction {
            ReadDirection::Forward => {
                let next = self.end + 1;
                (next < total).then_some(next)
            }
            ReadDirection::Backward => self.start.checked_sub(1),
        }
    }
}
