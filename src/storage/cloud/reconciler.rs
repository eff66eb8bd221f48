//! Background reconciliation of rows whose vector write failed at `store`
//! time (spec §4.F), grounded on the teacher's `sync::worker::SyncWorker`
//! tick-loop shape, generalized from "debounced whole-file push" to
//! "periodic per-row re-embed-and-upsert sweep".

use std::sync::Arc;
use std::time::Duration;

use super::store::CloudStore;

pub struct Reconciler {
    store: Arc<CloudStore>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<CloudStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Spawn the sweep loop. Each tick re-embeds and re-upserts every row
    /// still marked `vector_missing`; a row that fails again stays marked
    /// and is retried on the next sweep.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                match self.store.reconcile_missing_vectors().await {
                    Ok(reconciled) if reconciled > 0 => {
                        tracing::info!(reconciled, "reconciler: re-indexed previously missing vectors");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "reconciler: sweep failed"),
                }
            }
        })
    }
}
