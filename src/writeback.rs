use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::article::Article;
use crate::codec;
use crate::error::{StoreError, StoreResult};

/// Data directory of a source, shared between its store and its writer.
///
/// The writer holds a read guard for the duration of each write; a directory
/// rename holds the write guard, so a write never lands in a moved directory.
pub type SharedDir = Arc<RwLock<PathBuf>>;

#[derive(Debug)]
enum WriteMessage {
    Write(Article),
    Flush(oneshot::Sender<()>),
}

/// Counters reported by a worker when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub written: usize,
    pub failed: usize,
}

/// Per-source write-back channel with its single dedicated writer task.
pub struct WriteBackQueue {
    tx: mpsc::UnboundedSender<WriteMessage>,
    worker: JoinHandle<WriteStats>,
}

impl WriteBackQueue {
    /// Spawn the writer task for `dir`. Must be called inside a tokio runtime.
    pub fn spawn(dir: SharedDir) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_writer(dir, rx));
        Self { tx, worker }
    }

    /// Queue an article for persistence. Returns false if the writer is gone.
    pub fn enqueue(&self, article: Article) -> bool {
        self.tx.send(WriteMessage::Write(article)).is_ok()
    }

    /// Wait until everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Close the channel and wait for the writer to drain it.
    pub async fn close(self) -> WriteStats {
        drop(self.tx);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Write-back worker terminated abnormally: {}", e);
                WriteStats::default()
            }
        }
    }
}

async fn run_writer(dir: SharedDir, mut rx: mpsc::UnboundedReceiver<WriteMessage>) -> WriteStats {
    let mut stats = WriteStats::default();

    while let Some(message) = rx.recv().await {
        match message {
            WriteMessage::Write(article) => {
                let dir = dir.read().await;
                match write_article(&dir, &article).await {
                    Ok(()) => {
                        debug!("Wrote article {} to {}", article.url, dir.display());
                        stats.written += 1;
                    }
                    Err(e) => {
                        error!("Failed to write article '{}': {}", article.url, e);
                        stats.failed += 1;
                    }
                }
            }
            WriteMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    info!(
        "Write-back queue for {} drained ({} written, {} failed)",
        dir.read().await.display(),
        stats.written,
        stats.failed
    );
    stats
}

/// Write one article file, replacing any previous content for the same URL.
pub async fn write_article(dir: &Path, article: &Article) -> StoreResult<()> {
    let bytes = codec::encode(article)?;
    let path = dir.join(codec::filename_for(&article.url));
    let temp_path = path.with_extension("tmp");

    tokio::fs::write(&temp_path, &bytes)
        .await
        .map_err(|e| StoreError::io(&temp_path, e))?;

    if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StoreError::io(&path, e));
    }

    Ok(())
}
