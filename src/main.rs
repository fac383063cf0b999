use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod batch;
mod brand_map;
mod cmd;
mod config;
mod extract;
mod inbox;
mod ocr;
mod pipeline;
mod prelude;
mod records;
mod regions;
#[cfg(test)]
mod test_support;
mod ui;
mod variants;

/// Read brand codes and part numbers off label images.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OCR_API_URL (optional): Override the Umi-OCR endpoint, normally
    http://127.0.0.1:1224/api/ocr.
  - RUST_LOG (optional): Log filter, such as "debug" or "partnum_ocr=debug".

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Process every pending image once, then exit.
    Process(cmd::process::ProcessOpts),
    /// Process pending images, then keep watching for new ones.
    Watch(cmd::watch::WatchOpts),
    /// Remove duplicate rows from the output table.
    Compact(cmd::compact::CompactOpts),
    /// Show configured paths and how many images are pending.
    Status(cmd::status::StatusOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Process(opts) => cmd::process::cmd_process(ui, opts).await?,
        Cmd::Watch(opts) => cmd::watch::cmd_watch(ui, opts).await?,
        Cmd::Compact(opts) => cmd::compact::cmd_compact(ui, opts).await?,
        Cmd::Status(opts) => cmd::status::cmd_status(opts).await?,
    }
    Ok(())
}
