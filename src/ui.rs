//! Terminal output for label batches.
//!
//! Each batch draws one progress bar counting images. Log lines and batch
//! summaries go to stderr through the same [`MultiProgress`], so they print
//! above the bar instead of tearing it.
//!
//! The progress-bar plumbing is adapted from `substudy` by Eric Kidd
//! (Apache-2.0 OR MIT).

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Handle to the terminal, cloned into the batch worker and the log writer.
#[derive(Clone)]
pub struct Ui {
    /// Batch progress bars.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Draw to stderr.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Draw nothing, so batch tests stay quiet.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// A writer for `tracing` that keeps log lines clear of the batch bar.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// The shared bar container.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Add a bar for a batch of `len` images. It shows `done_msg` once the
    /// batch finishes.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len).with_style(default_progress_style());
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Print a batch summary line, such as "📋 Processed 3/3 images".
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.multi_progress.suspend(|| eprintln!("{emoji} {msg}"));
    }
}

/// Labels for a batch progress bar.
pub struct ProgressConfig<'a> {
    /// Shown before the message.
    pub emoji: &'a str,
    /// Shown while images are being read.
    pub msg: &'a str,
    /// Shown once the batch is done.
    pub done_msg: &'a str,
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue}")
        .expect("bad progress bar template")
}

/// Stderr writer that suspends the batch bar around each write.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
