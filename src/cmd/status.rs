//! The `status` subcommand.

use clap::Args;

use crate::{
    async_utils::spawn_blocking_propagating_panics, config::ConfigOpts,
    inbox::pending_images, prelude::*, records::RecordStore,
};

/// Status command line arguments.
#[derive(Debug, Args)]
pub struct StatusOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Print where everything lives and how much work is waiting.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_status(opts: &StatusOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let input_dir = config.input_dir();
    let pending = pending_images(&input_dir).await?;

    let output_path = config.output_path();
    let output_rows = if output_path.exists() {
        let store = RecordStore::new(&output_path);
        Some(spawn_blocking_propagating_panics(move || store.read_rows()).await?.len())
    } else {
        None
    };

    println!("Regions:      {}", config.regions_path().display());
    println!("Brand map:    {}", config.brand_map_path().display());
    println!("Input dir:    {}", input_dir.display());
    println!("Archive dir:  {}", config.archive_dir().display());
    match output_rows {
        Some(rows) => println!("Output table: {} ({} rows)", output_path.display(), rows),
        None => println!("Output table: {} (not created yet)", output_path.display()),
    }
    println!("OCR service:  {}", config.ocr.url);
    println!("Pending:      {} images", pending.len());
    Ok(())
}
