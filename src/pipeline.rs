//! Process one label image from crop to archive.
//!
//! Every image goes through the same stages:
//!
//! 1. **Cropping.** Decode the image and cut out every configured region.
//! 2. **Recognizing.** OCR each region. Failed regions come back empty.
//! 3. **Extracting.** Pull `(brand code, part number)` pairs out of the
//!    merged brand/part text.
//! 4. **Reconciling.** Map brand codes to universal brands, expand part number
//!    variants, and build deduplicated output records.
//! 5. **Persisting.** Append the records to the output table.
//! 6. **Archiving.** Move the image out of the input directory.
//!
//! An error at any stage leaves the image where it is, so the next batch will
//! try it again.

use std::{collections::HashMap, fmt, io::Cursor, sync::Arc};

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    brand_map::BrandMap,
    config::{Config, FieldLayout},
    extract::{ExtractedPair, extract_part_numbers},
    inbox::archive_image,
    ocr::{OcrEngine, OcrMode, OcrRequest, OcrResult},
    prelude::*,
    records::{OutputRecord, RecordBatch, RecordStore, normalize_field},
    regions::RegionConfig,
    variants::expand_variants,
};

/// Everything loaded once at startup and shared, read-only, by all
/// processing.
#[derive(Debug)]
pub struct PipelineContext {
    pub config: Config,
    pub regions: RegionConfig,
    pub brand_map: BrandMap,
}

impl PipelineContext {
    /// Load region definitions and the brand mapping.
    ///
    /// Missing region definitions are fatal. A missing brand mapping is not.
    pub fn load(config: Config) -> Result<Self> {
        let regions = RegionConfig::from_path(&config.regions_path())?;
        let brand_map = BrandMap::load(&config.brand_map_path(), &config.brand_map);
        let ctx = Self {
            config,
            regions,
            brand_map,
        };
        ctx.check_field_layout();
        Ok(ctx)
    }

    /// Warn about fields whose region is not defined. Those fields will
    /// always be empty.
    fn check_field_layout(&self) {
        for name in self.config.fields.names() {
            if self.regions.get(name).is_none() {
                warn!("No region named {:?} is defined; that field will be empty", name);
            }
        }
    }
}

/// The stage an image was in, for error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Cropping,
    Recognizing,
    Extracting,
    Reconciling,
    Persisting,
    Archiving,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Cropping => "cropping",
            Stage::Recognizing => "recognizing",
            Stage::Extracting => "extracting",
            Stage::Reconciling => "reconciling",
            Stage::Persisting => "persisting",
            Stage::Archiving => "archiving",
        };
        f.write_str(name)
    }
}

/// The result of processing one image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageOutcome {
    /// `false` only if something unexpected went wrong. The image is then
    /// still in the input directory.
    pub success: bool,

    /// A human-readable summary.
    pub message: String,

    /// How many records we appended.
    pub records_added: usize,
}

/// The per-label fields we read with OCR.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelFields {
    pub main_brand_code: String,
    pub convert_code: String,
    pub english_name: String,
    pub brand_codes: Vec<String>,
    pub brand_part_text: String,
}

impl LabelFields {
    /// Pick fields out of per-region OCR results.
    fn from_results(layout: &FieldLayout, mut results: HashMap<String, OcrResult>) -> Self {
        let mut single = |name: &str| {
            results
                .remove(name)
                .map(|r| normalize_field(&r.into_text()))
                .unwrap_or_default()
        };
        let main_brand_code = single(&layout.main_brand_code);
        let convert_code = single(&layout.convert_code);
        let english_name = single(&layout.english_name);
        let brand_codes = results
            .remove(&layout.brand_codes)
            .map(OcrResult::into_lines)
            .unwrap_or_default();
        let brand_part_text = results
            .remove(&layout.brand_part)
            .map(OcrResult::into_text)
            .unwrap_or_default();
        Self {
            main_brand_code,
            convert_code,
            english_name,
            brand_codes,
            brand_part_text,
        }
    }
}

/// A cropped region ready for OCR. `png` is `None` if the region lies
/// entirely outside the image.
struct CroppedRegion {
    name: String,
    png: Option<Vec<u8>>,
}

/// Drives images through every processing stage.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    engine: Arc<dyn OcrEngine>,
    store: RecordStore,
}

impl Pipeline {
    pub fn new(ctx: Arc<PipelineContext>, engine: Arc<dyn OcrEngine>) -> Self {
        let store = RecordStore::new(ctx.config.output_path());
        Self { ctx, engine, store }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Process one image. Never fails: errors are reported through the
    /// returned [`ImageOutcome`].
    #[instrument(level = "debug", skip_all, fields(image = %image_path.display()))]
    pub async fn process_image(&self, image_path: &Path) -> ImageOutcome {
        let mut stage = Stage::Cropping;
        match self.process_image_inner(image_path, &mut stage).await {
            Ok(outcome) => outcome,
            Err(err) => ImageOutcome {
                success: false,
                message: format!("failed while {}: {:#}", stage, err),
                records_added: 0,
            },
        }
    }

    /// Does the real work for [`Self::process_image`], keeping `stage` up
    /// to date.
    async fn process_image_inner(
        &self,
        image_path: &Path,
        stage: &mut Stage,
    ) -> Result<ImageOutcome> {
        *stage = Stage::Cropping;
        let cropped = self.crop_regions(image_path).await?;

        *stage = Stage::Recognizing;
        let fields = self.recognize(cropped).await;
        info!(
            main_brand_code = %fields.main_brand_code,
            convert_code = %fields.convert_code,
            english_name = %fields.english_name,
            brand_codes = ?fields.brand_codes,
            "Recognized label fields"
        );

        *stage = Stage::Extracting;
        let pairs = extract_part_numbers(&fields.brand_codes, &fields.brand_part_text);
        info!("Extracted {} brand/part pairs", pairs.len());
        for pair in &pairs {
            debug!(brand_code = %pair.brand_code, part_number = %pair.part_number, "Pair");
        }

        *stage = Stage::Reconciling;
        let source_file = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let batch = self.reconcile(&fields, &pairs, &source_file);

        *stage = Stage::Persisting;
        let records = batch.into_records();
        if !records.is_empty() {
            let store = self.store.clone();
            let to_write = records.clone();
            spawn_blocking_propagating_panics(move || store.append(&to_write)).await?;
        }

        *stage = Stage::Archiving;
        let dest = archive_image(image_path, &self.ctx.config.archive_dir()).await?;
        debug!("Archived to {:?}", dest);

        let message = if records.is_empty() {
            "processed, no new records".to_owned()
        } else {
            let details = records
                .iter()
                .map(|r| format!("{}:{}", r.brand_code, r.part_number))
                .collect::<Vec<_>>()
                .join(", ");
            format!("added {} records: {}", records.len(), details)
        };
        Ok(ImageOutcome {
            success: true,
            message,
            records_added: records.len(),
        })
    }

    /// Decode the image and crop every region to PNG.
    async fn crop_regions(&self, image_path: &Path) -> Result<Vec<CroppedRegion>> {
        let ctx = self.ctx.clone();
        let image_path = image_path.to_owned();
        spawn_blocking_propagating_panics(move || {
            // Trust the file's contents over its extension.
            let image = ImageReader::open(&image_path)
                .and_then(|reader| reader.with_guessed_format())
                .with_context(|| format!("cannot open image {:?}", image_path))?
                .decode()
                .with_context(|| format!("cannot decode image {:?}", image_path))?;
            ctx.regions
                .iter()
                .map(|region| -> Result<CroppedRegion> {
                    let png = match region.rect.crop(&image) {
                        Some(cropped) => Some(encode_png(&cropped).with_context(|| {
                            format!("cannot encode region {:?}", region.name)
                        })?),
                        None => None,
                    };
                    Ok(CroppedRegion {
                        name: region.name.clone(),
                        png,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    /// OCR every region, one request at a time.
    async fn recognize(&self, cropped: Vec<CroppedRegion>) -> LabelFields {
        let layout = &self.ctx.config.fields;
        let mut results = HashMap::new();
        for region in cropped {
            let mode = if region.name == layout.brand_part {
                OcrMode::Text
            } else {
                OcrMode::Lines
            };
            let result = match region.png {
                Some(png) => {
                    self.engine
                        .recognize(OcrRequest {
                            region: region.name.clone(),
                            png,
                            mode,
                        })
                        .await
                }
                None => {
                    warn!("Region {:?} lies outside the image", region.name);
                    OcrResult::empty(mode)
                }
            };
            if result.is_empty() {
                debug!("No text recognized in region {:?}", region.name);
            } else if !layout.contains(&region.name) {
                info!(region = %region.name, result = ?result, "Recognized region with no field");
            }
            results.insert(region.name, result);
        }
        LabelFields::from_results(layout, results)
    }

    /// Build the output records for one image.
    fn reconcile(
        &self,
        fields: &LabelFields,
        pairs: &[ExtractedPair],
        source_file: &str,
    ) -> RecordBatch {
        let mut batch = RecordBatch::new();
        for pair in pairs {
            let universal_brand = self.ctx.brand_map.resolve(&pair.brand_code);
            for part_number in expand_variants(&pair.part_number) {
                batch.push(OutputRecord {
                    main_brand_code: fields.main_brand_code.clone(),
                    convert_code: fields.convert_code.clone(),
                    english_name: fields.english_name.clone(),
                    universal_brand: normalize_field(&universal_brand),
                    brand_code: normalize_field(&pair.brand_code),
                    part_number: normalize_field(&part_number),
                    source_file: source_file.to_owned(),
                });
            }
        }
        batch
    }
}

/// Encode an image as PNG.
fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Cursor::new(vec![]);
    rgb.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
