//! Shared fixtures for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use crate::{
    config::Config,
    ocr::{OcrEngine, OcrMode, OcrRequest, OcrResult},
    pipeline::{Pipeline, PipelineContext},
    prelude::*,
};

/// Size of generated test images.
pub const IMAGE_WIDTH: u32 = 200;
pub const IMAGE_HEIGHT: u32 = 100;

/// An [`OcrEngine`] that answers from a table keyed by region name.
#[derive(Default)]
pub struct FakeOcrEngine {
    answers: HashMap<String, OcrResult>,
    requests: Mutex<Vec<OcrRequest>>,

    /// If set, every request waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,

    /// Notified whenever a request starts.
    started: Arc<Notify>,
}

impl FakeOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, region: &str, text: &str) -> Self {
        self.answers
            .insert(region.to_owned(), OcrResult::Text(text.to_owned()));
        self
    }

    pub fn with_lines(mut self, region: &str, lines: &[&str]) -> Self {
        let lines = lines.iter().map(|l| (*l).to_owned()).collect();
        self.answers
            .insert(region.to_owned(), OcrResult::Lines(lines));
        self
    }

    /// Make every request wait on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Notified each time a request starts.
    pub fn started(&self) -> Arc<Notify> {
        self.started.clone()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<OcrRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl OcrEngine for FakeOcrEngine {
    async fn recognize(&self, request: OcrRequest) -> OcrResult {
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        let mode = request.mode;
        let answer = self.answers.get(&request.region).cloned();
        self.requests.lock().expect("lock poisoned").push(request);
        match (answer, mode) {
            (Some(OcrResult::Text(text)), OcrMode::Lines) => {
                OcrResult::Lines(text.lines().map(str::to_owned).collect())
            }
            (Some(OcrResult::Lines(lines)), OcrMode::Text) => OcrResult::Text(lines.join("\n")),
            (Some(answer), _) => answer,
            (None, mode) => OcrResult::empty(mode),
        }
    }
}

/// A scratch base directory laid out like a real installation.
pub struct TestLabels {
    dir: TempDir,
}

impl TestLabels {
    /// Create a base directory with region definitions for every standard
    /// field, and an empty input directory.
    pub fn new() -> Result<Self> {
        let labels = Self {
            dir: tempfile::tempdir()?,
        };
        labels.write_regions(&[
            ("主品牌编码", (0, 0, 100, 20)),
            ("转换码", (100, 0, 200, 20)),
            ("英文名称", (0, 20, 200, 40)),
            ("品牌编码", (0, 40, 50, 100)),
            ("品牌编码及件号", (50, 40, 200, 100)),
        ])?;
        std::fs::create_dir_all(labels.input_dir())?;
        Ok(labels)
    }

    pub fn base_dir(&self) -> &Path {
        self.dir.path()
    }

    /// A default configuration rooted at our base directory.
    pub fn config(&self) -> Config {
        Config {
            base_dir: self.base_dir().to_owned(),
            ..Config::default()
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.config().input_dir()
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.config().archive_dir()
    }

    pub fn output_path(&self) -> PathBuf {
        self.config().output_path()
    }

    /// Overwrite the region definitions.
    pub fn write_regions(&self, regions: &[(&str, (u32, u32, u32, u32))]) -> Result<()> {
        let mut xml = String::from("<annotation>\n");
        for (name, (xmin, ymin, xmax, ymax)) in regions {
            xml.push_str(&format!(
                "  <object><name>{name}</name><bndbox><xmin>{xmin}</xmin><ymin>{ymin}</ymin><xmax>{xmax}</xmax><ymax>{ymax}</ymax></bndbox></object>\n"
            ));
        }
        xml.push_str("</annotation>\n");
        std::fs::write(self.config().regions_path(), xml)?;
        Ok(())
    }

    /// Write the brand mapping table.
    pub fn write_brand_map(&self, csv: &str) -> Result<()> {
        std::fs::write(self.config().brand_map_path(), csv)?;
        Ok(())
    }

    /// Write a blank PNG label into the input directory.
    pub fn add_image(&self, name: &str) -> Result<PathBuf> {
        let path = self.input_dir().join(name);
        RgbImage::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, Rgb([255, 255, 255])).save(&path)?;
        Ok(path)
    }

    /// Build a pipeline using `engine`.
    pub fn pipeline(&self, engine: Arc<dyn OcrEngine>) -> Result<Pipeline> {
        let ctx = Arc::new(PipelineContext::load(self.config())?);
        Ok(Pipeline::new(ctx, engine))
    }
}
