//! The `compact` subcommand.

use clap::Args;

use crate::{cmd::build_runner, config::ConfigOpts, prelude::*, ui::Ui};

/// Compact command line arguments.
#[derive(Debug, Args)]
pub struct CompactOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Remove duplicate rows from the output table.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_compact(ui: Ui, opts: &CompactOpts) -> Result<()> {
    let runner = build_runner(&ui, &opts.config).await?;
    let report = runner.compact().await?;
    ui.display_message(
        "🧹",
        &format!(
            "Kept {} rows, removed {} duplicates and {} malformed rows",
            report.kept, report.removed, report.malformed
        ),
    );
    Ok(())
}
