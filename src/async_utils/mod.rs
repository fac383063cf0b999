//! Asynchronous utilities for use with Tokio.
//!
//! Image decoding and CSV rewriting are CPU- or disk-bound, so we push them
//! onto Tokio's blocking pool and keep the async executor free for the OCR
//! network calls.

use std::panic;

pub mod io;

/// Run a blocking closure on Tokio's blocking pool and wait for it.
///
/// If the closure panics, the panic is resumed on the calling task, exactly as
/// if we had called `f` directly.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => match err.try_into_panic() {
            Ok(payload) => panic::resume_unwind(payload),
            // Blocking tasks are only cancelled when the runtime shuts down.
            Err(err) => panic!("blocking task was cancelled: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_closure_value() {
        let value = spawn_blocking_propagating_panics(|| 2 + 2).await;
        assert_eq!(value, 4);
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn propagates_panics() {
        spawn_blocking_propagating_panics(|| panic!("boom")).await
    }
}
