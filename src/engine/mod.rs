mod conflict;
mod error;
mod mutations;
mod queries;
mod report;
mod store;
pub mod validate;

pub use conflict::{check_conflicts, scan_conflicts, INVALID_RANGE_MESSAGE};
pub use error::{EngineError, EntityKind};
pub use report::{round_hours, utilisation_report};
pub use store::Store;

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, RwLock, RwLockWriteGuard};
use tracing::info;

use crate::model::Txn;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        txn: Txn,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        txns: Vec<Txn>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
///
/// Every [`Engine`] mutation awaits its append while holding the store write
/// lock, so at most one append is ever queued and each flush carries a single
/// transaction.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { txn, response } => {
                let mut batch = vec![(txn, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { txn, response }) => batch.push((txn, response)),
                        Ok(other) => {
                            // Flush what we have before handling anything else
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Txn, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (txn, _) in batch {
        if let Err(e) = wal.append_buffered(txn) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Txn, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { txns, response } => {
            let result = Wal::write_compact_file(wal.path(), &txns)
                .and_then(|()| wal.swap_compact_file());
            if result.is_ok() {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Owns the booking state. Queries share the read lock; every mutation
/// holds the write lock from validation through commit, so a conflict
/// check can never be invalidated before its transaction lands.
pub struct Engine {
    pub(super) store: RwLock<Store>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let txns = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Store::new();
        for txn in &txns {
            store.apply_txn(txn);
        }
        info!(
            "replayed {} transactions: {} events, {} resources",
            txns.len(),
            store.event_count(),
            store.resource_count()
        );

        Ok(Self {
            store: RwLock::new(store),
            wal_tx,
        })
    }

    /// Write a transaction to the WAL via the background group-commit writer.
    async fn wal_append(&self, txn: &Txn) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                txn: txn.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log `txn`, then apply it. Memory is untouched if the append fails.
    pub(super) async fn commit(
        &self,
        store: &mut RwLockWriteGuard<'_, Store>,
        txn: Txn,
    ) -> Result<(), EngineError> {
        self.wal_append(&txn).await?;
        store.apply_txn(&txn);
        Ok(())
    }
}
