// # Page Loader Interface
//
// The pipeline never reads page bytes itself; it asks a `PageLoader`.
// Two source strategies exist, selected by the descriptor: a plain
// filesystem path, or an entry inside an archive. The crate ships the
// filesystem strategy; archive-capable hosts implement the same trait.
//
// Loaders must observe the cancellation signal: a load belonging to a
// cancelled job should stop and return `Cancelled` rather than finish
// and hand back bytes nobody will use.

use crate::common::{CancelToken, DecodedMetadata, ImageFormat, PageDescriptor};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// What a loader hands back for one page.
#[derive(Debug, Clone)]
pub struct PageData {
    pub bytes: Bytes,
    pub byte_size: usize,
    pub metadata: Option<DecodedMetadata>,
}

/// Source of page bytes.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load_page_data(
        &self,
        descriptor: &PageDescriptor,
        cancel: &CancelToken,
    ) -> Result<PageData>;
}

/// Filesystem strategy: the descriptor's path is a regular image file.
#[derive(Debug, Default)]
pub struct FsPageLoader;

impl FsPageLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PageLoader for FsPageLoader {
    async fn load_page_data(
        &self,
        descriptor: &PageDescriptor,
        cancel: &CancelToken,
    ) -> Result<PageData> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if descriptor.archive_entry.is_some() {
            return Err(PipelineError::Loader(format!(
                "page {} is an archive entry; this loader reads plain files",
                descriptor.index
            )));
        }

        let read = tokio::fs::read(&descriptor.path);
        let bytes = tokio::select! {
            result = read => Bytes::from(result.map_err(|e| {
                PipelineError::Loader(format!(
                    "read {} failed: {}",
                    descriptor.path.display(),
                    e
                ))
            })?),
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        let metadata = sniff_metadata(&bytes);
        debug!(
            index = descriptor.index,
            size = bytes.len(),
            format = ?metadata.as_ref().map(|m| m.format),
            "page loaded from filesystem"
        );

        Ok(PageData { byte_size: bytes.len(), metadata, bytes })
    }
}

/// Detect container format and basic facts from the header, without
/// running an image decode.
pub fn sniff_metadata(bytes: &[u8]) -> Option<DecodedMetadata> {
    let format = detect_format(bytes);
    let mut meta = DecodedMetadata {
        width: None,
        height: None,
        format,
        color_space: None,
        bit_depth: None,
    };

    match format {
        ImageFormat::Png => sniff_png(bytes, &mut meta),
        ImageFormat::Jpeg => sniff_jpeg(bytes, &mut meta),
        ImageFormat::Unknown => return None,
        _ => {}
    }
    Some(meta)
}

fn detect_format(bytes: &[u8]) -> ImageFormat {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        ImageFormat::Png
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        ImageFormat::Jpeg
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ImageFormat::Webp
    } else if bytes.starts_with(b"GIF8") {
        ImageFormat::Gif
    } else if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && &bytes[8..12] == b"avif" {
        ImageFormat::Avif
    } else {
        ImageFormat::Unknown
    }
}

fn sniff_png(bytes: &[u8], meta: &mut DecodedMetadata) {
    // IHDR is the first chunk: width and height as big-endian u32 at
    // offsets 16 and 20, bit depth and color type right after.
    if bytes.len() < 26 || &bytes[12..16] != b"IHDR" {
        return;
    }
    meta.width = Some(u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]));
    meta.height = Some(u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]));
    meta.bit_depth = Some(bytes[24]);
    meta.color_space = Some(
        match bytes[25] {
            0 => "grayscale",
            2 => "rgb",
            3 => "indexed",
            4 => "grayscale-alpha",
            6 => "rgba",
            _ => "unknown",
        }
        .to_string(),
    );
}

fn sniff_jpeg(bytes: &[u8], meta: &mut DecodedMetadata) {
    // Walk the segment list until a start-of-frame marker carries the
    // dimensions.
    let mut pos = 2;
    while pos + 9 < bytes.len() {
        if bytes[pos] != 0xFF {
            return;
        }
        let marker = bytes[pos + 1];
        match marker {
            0xC0..=0xCF if marker != 0xC4 && marker != 0xC8 && marker != 0xCC => {
                meta.bit_depth = Some(bytes[pos + 4]);
                meta.height =
                    Some(u16::from_be_bytes([bytes[pos + 5], bytes[pos + 6]]) as u32);
                meta.width =
                    Some(u16::from_be_bytes([bytes[pos + 7], bytes[pos + 8]]) as u32);
                return;
            }
            0xD8 | 0x01 | 0xD0..=0xD7 => {
                pos += 2;
            }
            _ => {
                let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
                pos += 2 + len;
            }
        }
    }
}
