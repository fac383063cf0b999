//! OCR engine interface.
//!
//! OCR failures never propagate as errors. An engine that cannot read a
//! region returns an empty [`OcrResult`], so that one bad region (or one
//! flaky request) doesn't stop us from processing the rest of the label.

use std::fmt;

use async_trait::async_trait;

use crate::prelude::*;

pub mod umi;

/// How the engine should return recognized text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OcrMode {
    /// Return text fragments in reading order, top to bottom.
    Lines,
    /// Return all recognized text merged into a single string.
    Text,
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrMode::Lines => write!(f, "lines"),
            OcrMode::Text => write!(f, "text"),
        }
    }
}

/// Recognized text for one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OcrResult {
    /// Merged text, from [`OcrMode::Text`].
    Text(String),
    /// Fragments sorted by the top edge of their bounding box, from
    /// [`OcrMode::Lines`].
    Lines(Vec<String>),
}

impl OcrResult {
    /// The empty result for a given mode.
    pub fn empty(mode: OcrMode) -> Self {
        match mode {
            OcrMode::Lines => OcrResult::Lines(vec![]),
            OcrMode::Text => OcrResult::Text(String::new()),
        }
    }

    /// Did we recognize anything at all?
    pub fn is_empty(&self) -> bool {
        match self {
            OcrResult::Text(text) => text.trim().is_empty(),
            OcrResult::Lines(lines) => lines.is_empty(),
        }
    }

    /// Convert to a list of lines. Merged text is split on newlines.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            OcrResult::Text(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
            OcrResult::Lines(lines) => lines,
        }
    }

    /// Convert to a single string. Lines are joined with a space.
    pub fn into_text(self) -> String {
        match self {
            OcrResult::Text(text) => text,
            OcrResult::Lines(lines) => lines.join(" "),
        }
    }
}

/// A single cropped region to recognize.
#[derive(Clone)]
pub struct OcrRequest {
    /// The name of the region, for logging.
    pub region: String,

    /// PNG-encoded image data.
    pub png: Vec<u8>,

    /// What kind of output we want.
    pub mode: OcrMode,
}

impl fmt::Debug for OcrRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrRequest")
            .field("region", &self.region)
            .field("png_len", &self.png.len())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize text in a single region. Must not fail: degrade to
    /// [`OcrResult::empty`] instead.
    async fn recognize(&self, request: OcrRequest) -> OcrResult;
}
