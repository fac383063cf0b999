//! A single background worker that processes batches of pending images.
//!
//! At most one batch runs at a time. Asking for another batch while one is
//! running is rejected rather than queued; the directory will be rescanned
//! next time anyway. Compaction shares the same gate, so it can never rewrite
//! the output table underneath a running batch.
//!
//! Stopping is cooperative: [`BatchRunner::request_stop`] takes effect
//! between images, never in the middle of one.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    config::Config,
    inbox::pending_images,
    pipeline::Pipeline,
    prelude::*,
    records::CompactionReport,
    ui::{ProgressConfig, Ui},
};

/// Totals for one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Images found when the batch started.
    pub images_found: usize,

    /// Images we actually got to.
    pub images_processed: usize,

    /// Images that were processed successfully (and archived).
    pub succeeded: usize,

    /// Images that failed and are still pending.
    pub failed: usize,

    /// Total records appended to the output table.
    pub records_added: usize,

    /// Did a stop request cut the batch short?
    pub stopped_early: bool,
}

impl BatchSummary {
    /// Report totals to the user.
    pub fn display(&self, ui: &Ui) {
        ui.display_message(
            "📋",
            &format!(
                "Processed {}/{} images, {} records added",
                self.images_processed, self.images_found, self.records_added
            ),
        );
        if self.failed > 0 {
            ui.display_message(
                "❌",
                &format!("{} images failed and will be retried", self.failed),
            );
        }
        if self.stopped_early {
            ui.display_message("🛑", "Stopped before all images were processed");
        }
    }
}

/// Result of asking for a new batch.
pub enum BatchStart {
    /// A batch is now running.
    Started(BatchHandle),
    /// There were no pending images.
    NothingPending,
    /// Another batch (or a compaction) is still running.
    AlreadyRunning,
}

/// Handle to a running batch.
pub struct BatchHandle {
    handle: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Wait for the batch to finish.
    pub async fn join(self) -> Result<BatchSummary> {
        self.handle.await.context("could not join batch task")
    }
}

/// Owns the worker gate and stop flag.
#[derive(Clone)]
pub struct BatchRunner {
    pipeline: Arc<Pipeline>,
    ui: Ui,
    gate: Arc<Mutex<()>>,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(pipeline: Arc<Pipeline>, ui: Ui) -> Self {
        Self {
            pipeline,
            ui,
            gate: Arc::new(Mutex::new(())),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration our pipeline was built from.
    pub fn config(&self) -> &Config {
        &self.pipeline.context().config
    }

    /// Is a batch or compaction running right now?
    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Ask the running batch to stop after the current image.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Start a batch over whatever is in the input directory right now.
    #[instrument(level = "debug", skip_all)]
    pub async fn start(&self) -> Result<BatchStart> {
        let Ok(guard) = self.gate.clone().try_lock_owned() else {
            warn!("A batch is already running; ignoring request");
            return Ok(BatchStart::AlreadyRunning);
        };

        let input_dir = self.config().input_dir();
        let images = pending_images(&input_dir).await?;
        if images.is_empty() {
            info!("No pending images in {:?}", input_dir);
            return Ok(BatchStart::NothingPending);
        }

        self.stop.store(false, Ordering::SeqCst);
        info!("Starting batch of {} images", images.len());
        let pipeline = self.pipeline.clone();
        let ui = self.ui.clone();
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            // Hold the gate until the batch is done.
            let _guard = guard;
            run_batch(&pipeline, &ui, &stop, images).await
        });
        Ok(BatchStart::Started(BatchHandle { handle }))
    }

    /// Deduplicate the output table. Refused while a batch is running.
    #[instrument(level = "debug", skip_all)]
    pub async fn compact(&self) -> Result<CompactionReport> {
        let _guard = self
            .gate
            .try_lock()
            .map_err(|_| anyhow!("cannot compact while a batch is running"))?;
        let store = self.pipeline.store().clone();
        spawn_blocking_propagating_panics(move || store.compact()).await
    }
}

/// Process images one at a time, checking for a stop request between them.
async fn run_batch(
    pipeline: &Pipeline,
    ui: &Ui,
    stop: &AtomicBool,
    images: Vec<PathBuf>,
) -> BatchSummary {
    let mut summary = BatchSummary {
        images_found: images.len(),
        ..BatchSummary::default()
    };
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🏷️",
            msg: "Reading labels",
            done_msg: "Read labels",
        },
        images.len() as u64,
    );

    for image in images {
        if stop.load(Ordering::SeqCst) {
            warn!("Stop requested; leaving remaining images for later");
            summary.stopped_early = true;
            break;
        }

        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.display().to_string());
        info!("Processing {}", name);
        let outcome = pipeline.process_image(&image).await;
        summary.images_processed += 1;
        if outcome.success {
            info!("✓ {}: {}", name, outcome.message);
            summary.succeeded += 1;
            summary.records_added += outcome.records_added;
        } else {
            error!("✗ {}: {}", name, outcome.message);
            summary.failed += 1;
        }
        pb.inc(1);
    }
    pb.finish_using_style();

    info!(
        processed = summary.images_processed,
        failed = summary.failed,
        "Batch finished, {} records added",
        summary.records_added
    );
    summary
}
