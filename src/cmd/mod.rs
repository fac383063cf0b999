//! Command-line entry points.

use std::sync::Arc;

use crate::{
    batch::BatchRunner,
    config::ConfigOpts,
    ocr::umi::UmiOcrClient,
    pipeline::{Pipeline, PipelineContext},
    prelude::*,
    ui::Ui,
};

pub mod compact;
pub mod process;
pub mod status;
pub mod watch;

/// Load configuration, region definitions and the brand mapping, and build a
/// batch runner talking to the configured OCR service.
#[instrument(level = "debug", skip_all)]
pub async fn build_runner(ui: &Ui, config_opts: &ConfigOpts) -> Result<BatchRunner> {
    let config = config_opts.load().await?;
    let archive_dir = config.archive_dir();
    tokio::fs::create_dir_all(&archive_dir)
        .await
        .with_context(|| format!("cannot create archive directory {:?}", archive_dir))?;

    let engine = Arc::new(UmiOcrClient::new(&config.ocr)?);
    let ctx = Arc::new(PipelineContext::load(config)?);
    info!(
        regions = ctx.regions.len(),
        brands = ctx.brand_map.len(),
        ocr_url = %ctx.config.ocr.url,
        "Loaded configuration"
    );
    let pipeline = Arc::new(Pipeline::new(ctx, engine));
    Ok(BatchRunner::new(pipeline, ui.clone()))
}
