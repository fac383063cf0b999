//! The `process` subcommand.

use clap::Args;

use crate::{
    batch::BatchStart,
    cmd::build_runner,
    config::ConfigOpts,
    prelude::*,
    ui::Ui,
};

/// Process command line arguments.
#[derive(Debug, Args)]
pub struct ProcessOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Process every pending image once, then exit.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts) -> Result<()> {
    let runner = build_runner(&ui, &opts.config).await?;

    let handle = match runner.start().await? {
        BatchStart::Started(handle) => handle,
        BatchStart::NothingPending => {
            ui.display_message("📭", "No pending images");
            return Ok(());
        }
        BatchStart::AlreadyRunning => {
            return Err(anyhow!("a batch is already running"));
        }
    };

    // Ctrl-C finishes the current image and then stops.
    let stopper = runner.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current image");
            stopper.request_stop();
        }
    });

    let summary = handle.join().await?;
    ctrl_c.abort();
    summary.display(&ui);
    if summary.failed > 0 {
        Err(anyhow!("{} images failed", summary.failed))
    } else {
        Ok(())
    }
}
