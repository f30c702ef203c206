//! Worker pool
//!
//! Every worker loops on the dispatch queue, resolving one job at a time.
//! A job already taken is always driven to completion, so shutdown never
//! abandons a send halfway.

pub(crate) mod process;

use std::sync::Arc;

use herald_common::{Signal, internal, tracing};

use crate::engine::EngineState;

/// Run one worker until shutdown
pub(crate) async fn serve_worker(
    worker: usize,
    state: Arc<EngineState>,
    mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
) {
    internal!("Worker {worker} starting");

    loop {
        tokio::select! {
            biased;

            sig = shutdown.recv() => {
                match sig {
                    Ok(Signal::Shutdown | Signal::Finalised) => {
                        internal!("Worker {worker} received shutdown signal");
                    }
                    Err(e) => {
                        tracing::error!(worker, "Worker shutdown channel error: {e}");
                    }
                }
                break;
            }
            job = state.queue.next() => {
                process::process_job(&state, job).await;
            }
        }
    }

    internal!("Worker {worker} stopped");
}
