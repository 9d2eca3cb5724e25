//! Periodic commit of the long write transaction on single-writer stores.
//!
//! Embedded backends are much faster when many appends share one write
//! transaction. The batcher opens that transaction, commits and reopens it on
//! a fixed interval, and forces a final commit on shutdown. Commit failures
//! are logged and retried on the next tick; they never stop the task.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};
use tracing::{debug, error, info, warn};

use crate::ADMIN_TARGET;
use crate::store::{Backend, ChangeLogStore};

/// Handle to the running batcher thread.
pub struct TransactionBatcher {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TransactionBatcher {
    /// Start the batcher, or return `None` for multi-writer stores.
    pub fn spawn(store: Arc<dyn ChangeLogStore>, interval: Duration) -> io::Result<Option<Self>> {
        if store.backend() == Backend::MultiWriter {
            debug!("Multi-writer store, transaction batcher disabled");
            return Ok(None);
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let handle = thread::Builder::new()
            .name("worldlog-batcher".to_string())
            .spawn(move || run(&*store, interval, &shutdown_rx))?;

        info!("Transaction batcher started ({}ms interval)", interval.as_millis());
        Ok(Some(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }))
    }

    /// Force the final commit and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Disconnecting the channel wakes the select.
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(target: ADMIN_TARGET, "Transaction batcher thread panicked");
            }
        }
    }
}

impl Drop for TransactionBatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(store: &dyn ChangeLogStore, interval: Duration, shutdown: &Receiver<()>) {
    let mut open = begin(store);
    let ticker = crossbeam_channel::tick(interval);

    loop {
        select! {
            recv(ticker) -> _ => {
                open = if open {
                    match store.commit_and_reopen() {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(target: ADMIN_TARGET, "Batched commit failed, reopening next tick: {err}");
                            false
                        }
                    }
                } else {
                    begin(store)
                };
            }
            recv(shutdown) -> _ => break,
        }
    }

    if let Err(err) = store.end_long_transaction() {
        error!(target: ADMIN_TARGET, "Final batched commit failed: {err}");
    }
    debug!("Transaction batcher stopped");
}

fn begin(store: &dyn ChangeLogStore) -> bool {
    match store.begin_long_transaction() {
        Ok(()) => true,
        Err(err) => {
            warn!(target: ADMIN_TARGET, "Could not open batched transaction: {err}");
            false
        }
    }
}
