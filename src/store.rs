//! Per-source article store: the in-memory article list, its unread counter
//! and the write-back queue that mirrors every change to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::article::{Article, FetchedItem};
use crate::codec;
use crate::config::SourceConfig;
use crate::error::{StoreError, StoreResult};
use crate::writeback::{SharedDir, WriteBackQueue, WriteStats};

/// Serializable summary of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub title: String,
    pub slug: String,
    pub url: String,
    pub refresh_interval: Option<u64>,
    pub unread: usize,
    pub articles: usize,
}

/// Outcome of [`ArticleStore::load`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

struct SourceState {
    title: String,
    slug: String,
    url: String,
    refresh_interval: Option<u64>,
    unread: usize,
    articles: Vec<Article>,
    last_refreshed: Option<DateTime<Utc>>,
    queue: Option<WriteBackQueue>,
}

impl SourceState {
    fn position(&self, url: &str) -> Option<usize> {
        self.articles.iter().position(|a| a.url == url)
    }

    fn filter_new(&self, candidates: Vec<FetchedItem>) -> Vec<FetchedItem> {
        candidates
            .into_iter()
            .filter(|item| self.position(&item.url).is_none())
            .collect()
    }

    fn queue(&self) -> StoreResult<&WriteBackQueue> {
        self.queue
            .as_ref()
            .ok_or_else(|| StoreError::QueueClosed(self.title.clone()))
    }

    fn append(&mut self, article: Article) -> StoreResult<()> {
        if self.position(&article.url).is_some() {
            return Err(StoreError::DuplicateArticle(article.url));
        }
        let queue = self.queue()?;
        if !queue.enqueue(article.clone()) {
            warn!(
                "Writer for source '{}' is gone, {} will not be persisted",
                self.title, article.url
            );
        }
        if !article.read {
            self.unread += 1;
        }
        self.articles.push(article);
        Ok(())
    }

    fn info(&self) -> SourceInfo {
        SourceInfo {
            title: self.title.clone(),
            slug: self.slug.clone(),
            url: self.url.clone(),
            refresh_interval: self.refresh_interval,
            unread: self.unread,
            articles: self.articles.len(),
        }
    }
}

/// Articles of one source.
///
/// All mutations go through a single mutex. Disk writes are handed to the
/// source's [`WriteBackQueue`] while that mutex is held, so the order of
/// writes matches the order of in-memory changes.
pub struct ArticleStore {
    state: Mutex<SourceState>,
    dir: SharedDir,
}

impl ArticleStore {
    /// Create the source directory if needed and start its writer.
    ///
    /// No article is read; call [`ArticleStore::load`] afterwards.
    pub async fn open(data_dir: &Path, source: &SourceConfig) -> StoreResult<Self> {
        let slug = codec::slugify(&source.title);
        let path = data_dir.join(&slug);

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        let dir: SharedDir = Arc::new(RwLock::new(path));
        let queue = WriteBackQueue::spawn(dir.clone());

        Ok(Self {
            state: Mutex::new(SourceState {
                title: source.title.clone(),
                slug,
                url: source.url.clone(),
                refresh_interval: source.refresh_interval,
                unread: 0,
                articles: Vec::new(),
                last_refreshed: None,
                queue: Some(queue),
            }),
            dir,
        })
    }

    /// Read every article file of the source directory.
    ///
    /// Unreadable, malformed and duplicate files are skipped and logged. The
    /// resulting order is whatever the directory listing yields.
    pub async fn load(&self) -> StoreResult<LoadReport> {
        let mut state = self.state.lock().await;
        let dir = self.dir.read().await;
        let mut report = LoadReport::default();

        let mut entries = tokio::fs::read_dir(&*dir)
            .await
            .map_err(|e| StoreError::io(&*dir, e))?;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Cannot list articles of '{}': {}", state.title, e);
                    report.skipped += 1;
                    break;
                }
            };
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Cannot read article file {}: {}", path.display(), e);
                    report.skipped += 1;
                    continue;
                }
            };

            let article = match codec::decode(&bytes) {
                Ok(article) => article,
                Err(e) => {
                    warn!("Cannot decode article file {}: {}", path.display(), e);
                    report.skipped += 1;
                    continue;
                }
            };

            if state.position(&article.url).is_some() {
                warn!(
                    "Skipping {}: article {} is already loaded",
                    path.display(),
                    article.url
                );
                report.skipped += 1;
                continue;
            }

            if !article.read {
                state.unread += 1;
            }
            state.articles.push(article);
            report.loaded += 1;
        }

        info!(
            "Loaded {} articles for source '{}' ({} skipped)",
            report.loaded, state.title, report.skipped
        );
        Ok(report)
    }

    pub async fn info(&self) -> SourceInfo {
        self.state.lock().await.info()
    }

    pub async fn title(&self) -> String {
        self.state.lock().await.title.clone()
    }

    pub async fn slug(&self) -> String {
        self.state.lock().await.slug.clone()
    }

    pub async fn url(&self) -> String {
        self.state.lock().await.url.clone()
    }

    pub async fn unread_count(&self) -> usize {
        self.state.lock().await.unread
    }

    pub async fn dir(&self) -> PathBuf {
        self.dir.read().await.clone()
    }

    /// Snapshot of all articles in store order.
    pub async fn articles(&self) -> Vec<Article> {
        self.state.lock().await.articles.clone()
    }

    pub async fn lookup(&self, url: &str) -> Option<Article> {
        let state = self.state.lock().await;
        state.position(url).map(|i| state.articles[i].clone())
    }

    /// Keep only the candidates whose URL is not stored yet, in their order.
    pub async fn filter_new(&self, candidates: Vec<FetchedItem>) -> Vec<FetchedItem> {
        self.state.lock().await.filter_new(candidates)
    }

    /// Add an article and queue it for persistence.
    pub async fn append(&self, article: Article) -> StoreResult<()> {
        self.state.lock().await.append(article)
    }

    /// Store every candidate not already known. Returns how many were added.
    ///
    /// Dedup and append happen under one lock, so concurrent refreshes of the
    /// same source cannot add a URL twice.
    pub async fn ingest(
        &self,
        candidates: Vec<FetchedItem>,
        fetched_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let fresh = state.filter_new(candidates);
        let mut added = 0;

        for item in fresh {
            match state.append(item.into_article(fetched_at)) {
                Ok(()) => added += 1,
                // The feed itself listed the URL twice
                Err(StoreError::DuplicateArticle(url)) => {
                    warn!("Feed of '{}' repeats {}", state.title, url);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(added)
    }

    /// Flag an article as read. Returns false when it already was.
    pub async fn mark_read(&self, url: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let index = state
            .position(url)
            .ok_or_else(|| StoreError::ArticleNotFound(url.to_string()))?;

        if state.articles[index].read {
            return Ok(false);
        }

        let mut updated = state.articles[index].clone();
        updated.read = true;
        state.queue()?.enqueue(updated.clone());
        state.articles[index] = updated;
        state.unread -= 1;
        Ok(true)
    }

    /// Rename the source and move its directory along.
    ///
    /// Title and slug only change once the directory rename succeeded.
    pub async fn rename(&self, new_title: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.title == new_title {
            return Ok(());
        }

        let new_slug = codec::slugify(new_title);
        let mut dir = self.dir.write().await;
        let new_path = match dir.parent() {
            Some(parent) => parent.join(&new_slug),
            None => PathBuf::from(&new_slug),
        };

        if tokio::fs::try_exists(&new_path).await.unwrap_or(true) {
            return Err(StoreError::DirectoryExists(new_path));
        }

        tokio::fs::rename(&*dir, &new_path)
            .await
            .map_err(|e| StoreError::io(&*dir, e))?;

        info!(
            "Renamed source '{}' to '{}' ({})",
            state.title,
            new_title,
            new_path.display()
        );
        *dir = new_path;
        state.title = new_title.to_string();
        state.slug = new_slug;
        Ok(())
    }

    pub async fn set_url(&self, url: &str) {
        self.state.lock().await.url = url.to_string();
    }

    pub async fn set_refresh_interval(&self, minutes: Option<u64>) {
        self.state.lock().await.refresh_interval = minutes;
    }

    /// Whether the source should be refreshed at `now`.
    ///
    /// An interval too large to represent is never due.
    pub async fn is_due(&self, now: DateTime<Utc>, default_minutes: u64) -> bool {
        let state = self.state.lock().await;
        let minutes = state.refresh_interval.unwrap_or(default_minutes);
        let Some(last) = state.last_refreshed else {
            return true;
        };
        match i64::try_from(minutes).ok().and_then(Duration::try_minutes) {
            Some(interval) => now - last >= interval,
            None => false,
        }
    }

    pub async fn mark_refreshed(&self, now: DateTime<Utc>) {
        self.state.lock().await.last_refreshed = Some(now);
    }

    pub async fn to_config(&self) -> SourceConfig {
        let state = self.state.lock().await;
        SourceConfig {
            title: state.title.clone(),
            url: state.url.clone(),
            refresh_interval: state.refresh_interval,
        }
    }

    /// Wait until every write queued so far reached the disk (or failed).
    pub async fn flush(&self) -> StoreResult<()> {
        let state = self.state.lock().await;
        state.queue()?.flush().await;
        Ok(())
    }

    /// Stop accepting mutations and drain the write-back queue.
    ///
    /// Closing twice is harmless; the second call reports nothing written.
    pub async fn close(&self) -> WriteStats {
        let queue = self.state.lock().await.queue.take();
        match queue {
            Some(queue) => queue.close().await,
            None => WriteStats::default(),
        }
    }
}
