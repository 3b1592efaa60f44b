//! Video references: a media source descriptor plus its known shape.
//!
//! A `Video` never decodes pixels; it identifies a source so that frames can
//! key off it and downstream media layers can fetch content lazily. Identity
//! is source equality, not shape equality: two videos with different path
//! strings are distinct even if they point at the same file on disk. Callers
//! that know better can unify them explicitly via
//! [`Labels::unify_videos`](crate::model::Labels::unify_videos).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The media behind a video reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSource {
    /// A single media file (video container or single image).
    MediaFile {
        /// Path to the media file.
        path: PathBuf,
    },
    /// An ordered sequence of image files, one per frame.
    ImageSequence {
        /// Frame image paths in frame order.
        paths: Vec<PathBuf>,
    },
    /// An array embedded in an annotation container, addressed by key.
    EmbeddedArray {
        /// Dataset key inside the container.
        key: String,
    },
}

impl VideoSource {
    /// A short human-readable label for error messages and reports.
    pub fn describe(&self) -> String {
        match self {
            VideoSource::MediaFile { path } => path.display().to_string(),
            VideoSource::ImageSequence { paths } => {
                format!("image sequence ({} frames)", paths.len())
            }
            VideoSource::EmbeddedArray { key } => format!("embedded:{key}"),
        }
    }
}

/// Known shape of a video: frame count, height, width, channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoShape {
    /// Number of frames.
    pub frames: u64,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Number of color channels.
    pub channels: u32,
}

impl VideoShape {
    /// Creates a new shape.
    pub fn new(frames: u64, height: u32, width: u32, channels: u32) -> Self {
        Self {
            frames,
            height,
            width,
            channels,
        }
    }
}

/// A reference to one media source and its shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// The underlying media source; defines video identity.
    pub source: VideoSource,

    /// Shape of the video, when known from the annotation file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<VideoShape>,

    /// Backend descriptor (e.g. a reader hint) carried through the native
    /// format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Format-specific auxiliary fields preserved opaquely.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Video {
    /// Creates a video backed by a single media file.
    pub fn media_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: VideoSource::MediaFile { path: path.into() },
            shape: None,
            backend: None,
            extra: BTreeMap::new(),
        }
    }

    /// Creates a video backed by an ordered image sequence.
    pub fn image_sequence(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            source: VideoSource::ImageSequence {
                paths: paths.into_iter().collect(),
            },
            shape: None,
            backend: None,
            extra: BTreeMap::new(),
        }
    }

    /// Creates a video backed by an embedded array.
    pub fn embedded(key: impl Into<String>) -> Self {
        Self {
            source: VideoSource::EmbeddedArray { key: key.into() },
            shape: None,
            backend: None,
            extra: BTreeMap::new(),
        }
    }

    /// Sets the shape.
    pub fn with_shape(mut self, shape: VideoShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Sets the backend descriptor.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Identity comparison: true when both references resolve to the same
    /// underlying source. Shape and backend do not participate.
    pub fn same_source(&self, other: &Video) -> bool {
        self.source == other.source
    }
}
