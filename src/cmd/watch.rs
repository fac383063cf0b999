//! The `watch` subcommand.
//!
//! We process whatever is already waiting, then start a new batch whenever
//! images show up in the input directory. File events arrive in bursts while
//! a file is being written, so we wait for things to settle before starting.

use clap::Args;
use notify::{
    Event, EventKind, RecursiveMode, Watcher as _,
    event::{ModifyKind, RenameMode},
};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};

use crate::{
    batch::{BatchStart, BatchSummary},
    cmd::build_runner,
    config::ConfigOpts,
    inbox::is_supported_image,
    prelude::*,
    ui::Ui,
};

/// Watch command line arguments.
#[derive(Debug, Args)]
pub struct WatchOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Keep processing new images until interrupted.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_watch(ui: Ui, opts: &WatchOpts) -> Result<()> {
    let runner = build_runner(&ui, &opts.config).await?;
    let input_dir = runner.config().input_dir();
    let debounce = runner.config().watch.debounce();
    tokio::fs::create_dir_all(&input_dir)
        .await
        .with_context(|| format!("cannot create input directory {:?}", input_dir))?;

    let (tx, mut events) = mpsc::channel(100);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Err(err) = tx.blocking_send(res) {
            debug!("Dropping file event: {}", err);
        }
    })
    .context("cannot create file watcher")?;
    watcher
        .watch(&input_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("cannot watch {:?}", input_dir))?;
    ui.display_message(
        "👀",
        &format!("Watching {} (Ctrl-C to stop)", input_dir.display()),
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<BatchSummary>>();
    // Start with whatever is already there.
    let mut deadline = Some(Instant::now());
    // Set when a trigger arrived while a batch was running.
    let mut missed = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let settled = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("cannot listen for Ctrl-C")?;
                warn!("Interrupted; stopping after the current image");
                break;
            }
            Some(res) = events.recv() => match res {
                Ok(event) if is_new_image_event(&event) => {
                    debug!("File event: {:?}", event);
                    deadline = Some(Instant::now() + debounce);
                }
                Ok(_) => {}
                Err(err) => warn!("Watch error: {}", err),
            },
            _ = settled => {
                deadline = None;
                match runner.start().await {
                    Ok(BatchStart::Started(handle)) => {
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            // The receiver only goes away once we're exiting.
                            let _ = done_tx.send(handle.join().await);
                        });
                    }
                    Ok(BatchStart::NothingPending) => {}
                    Ok(BatchStart::AlreadyRunning) => missed = true,
                    Err(err) => error!("Cannot start batch: {:#}", err),
                }
            }
            Some(result) = done_rx.recv() => {
                result?.display(&ui);
                if missed {
                    missed = false;
                    deadline = Some(Instant::now());
                }
            }
        }
    }

    // Stop watching, and let any running batch finish its current image.
    drop(watcher);
    runner.request_stop();
    drop(done_tx);
    while let Some(result) = done_rx.recv().await {
        result?.display(&ui);
    }
    Ok(())
}

/// Could this event mean a new image is ready?
fn is_new_image_event(event: &Event) -> bool {
    let arrived = match event.kind {
        // Moving an image out (archiving) is not an arrival.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Create(_) | EventKind::Modify(_) => true,
        _ => false,
    };
    arrived
        && event.paths.iter().any(|path| is_supported_image(path))
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, RemoveKind};

    use super::*;

    #[test]
    fn only_image_arrivals_trigger_batches() {
        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("in/label.png"));
        assert!(is_new_image_event(&created));

        let renamed = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("in/label.JPG"));
        assert!(is_new_image_event(&renamed));

        let text = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("in/notes.txt"));
        assert!(!is_new_image_event(&text));

        // Archiving moves images away; that must not start another batch.
        let moved_away = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("in/label.png"));
        assert!(!is_new_image_event(&moved_away));

        let removed = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("in/label.png"));
        assert!(!is_new_image_event(&removed));
    }
}
