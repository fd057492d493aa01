use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::codec;
use crate::config::{is_valid_refresh_interval, Config, SourceConfig};
use crate::error::{StoreError, StoreResult};
use crate::store::{ArticleStore, SourceInfo};
use crate::writeback::WriteStats;

/// Changes requested by an edit; unset fields are left alone.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SourceEdit {
    pub title: Option<String>,
    pub url: Option<String>,
    pub refresh_interval: Option<u64>,
}

/// Settings shared by every source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Default refresh interval in minutes
    pub refresh_interval: u64,
}

/// Every configured source, each with its own store and writer.
pub struct SourceDirectory {
    data_dir: PathBuf,
    settings: RwLock<Config>,
    config_path: Option<PathBuf>,
    sources: RwLock<Vec<Arc<ArticleStore>>>,
}

impl SourceDirectory {
    /// Open and load a store for each configured source.
    ///
    /// A source whose directory cannot be created or listed is logged; the
    /// others are still served.
    pub async fn open(config: Config, config_path: Option<PathBuf>) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| StoreError::io(&config.data_dir, e))?;

        let mut stores: Vec<Arc<ArticleStore>> = Vec::new();
        for source in &config.sources {
            let slug = codec::slugify(&source.title);
            if Self::find(&stores, &slug).await.is_some() {
                warn!("Ignoring duplicate source '{}'", source.title);
                continue;
            }

            let store = match ArticleStore::open(&config.data_dir, source).await {
                Ok(store) => store,
                Err(e) => {
                    error!("Could not open source '{}': {}", source.title, e);
                    continue;
                }
            };
            if let Err(e) = store.load().await {
                error!("Could not load articles for source '{}': {}", source.title, e);
            }
            stores.push(Arc::new(store));
        }

        info!("Opened {} sources in {}", stores.len(), config.data_dir.display());

        Ok(Self {
            data_dir: config.data_dir.clone(),
            settings: RwLock::new(config),
            config_path,
            sources: RwLock::new(stores),
        })
    }

    async fn find(stores: &[Arc<ArticleStore>], slug: &str) -> Option<Arc<ArticleStore>> {
        for store in stores {
            if store.slug().await == slug {
                return Some(store.clone());
            }
        }
        None
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Default refresh interval in minutes.
    pub async fn refresh_interval(&self) -> u64 {
        self.settings.read().await.refresh_interval
    }

    pub async fn options(&self) -> Options {
        Options {
            refresh_interval: self.refresh_interval().await,
        }
    }

    /// Replace the shared settings and save the configuration.
    pub async fn set_options(&self, options: Options) -> StoreResult<Options> {
        if !is_valid_refresh_interval(options.refresh_interval) {
            return Err(StoreError::InvalidRefreshInterval(options.refresh_interval));
        }
        self.settings.write().await.refresh_interval = options.refresh_interval;
        info!("Default refresh interval set to {} minutes", options.refresh_interval);

        self.persist().await;
        Ok(self.options().await)
    }

    pub async fn list(&self) -> Vec<Arc<ArticleStore>> {
        self.sources.read().await.clone()
    }

    pub async fn infos(&self) -> Vec<SourceInfo> {
        let stores = self.list().await;
        let mut infos = Vec::with_capacity(stores.len());
        for store in stores {
            infos.push(store.info().await);
        }
        infos
    }

    pub async fn get(&self, slug: &str) -> StoreResult<Arc<ArticleStore>> {
        let stores = self.sources.read().await;
        Self::find(&stores, slug)
            .await
            .ok_or_else(|| StoreError::SourceNotFound(slug.to_string()))
    }

    /// Add a source. Without a title the URL doubles as one.
    pub async fn add(&self, url: &str, title: Option<&str>) -> StoreResult<Arc<ArticleStore>> {
        let title = title.filter(|t| !t.trim().is_empty()).unwrap_or(url);
        let source = SourceConfig::new(title, url);

        let store = {
            let mut stores = self.sources.write().await;
            if Self::find(&stores, &codec::slugify(title)).await.is_some() {
                return Err(StoreError::DuplicateSource(title.to_string()));
            }

            let store = ArticleStore::open(&self.data_dir, &source).await?;
            if let Err(e) = store.load().await {
                error!("Could not load articles for source '{}': {}", title, e);
            }
            let store = Arc::new(store);
            stores.push(store.clone());
            store
        };

        info!("Added source '{}' ({})", title, url);
        self.persist().await;
        Ok(store)
    }

    /// Drop a source and drain its writer. Its files stay on disk.
    pub async fn remove(&self, slug: &str) -> StoreResult<WriteStats> {
        let (title, stats) = {
            // Held until the writer has drained, so a source re-added under
            // the same title loads only complete files
            let mut stores = self.sources.write().await;
            let mut index = None;
            for (i, store) in stores.iter().enumerate() {
                if store.slug().await == slug {
                    index = Some(i);
                    break;
                }
            }
            let index = index.ok_or_else(|| StoreError::SourceNotFound(slug.to_string()))?;
            let store = stores.remove(index);
            let stats = store.close().await;
            (store.title().await, stats)
        };

        info!("Removed source '{}'", title);
        self.persist().await;
        Ok(stats)
    }

    pub async fn edit(&self, slug: &str, edit: SourceEdit) -> StoreResult<SourceInfo> {
        if let Some(minutes) = edit.refresh_interval {
            if !is_valid_refresh_interval(minutes) {
                return Err(StoreError::InvalidRefreshInterval(minutes));
            }
        }

        let store = {
            // Held across the rename so two edits cannot claim the same title
            let stores = self.sources.write().await;
            let store = Self::find(&stores, slug)
                .await
                .ok_or_else(|| StoreError::SourceNotFound(slug.to_string()))?;

            if let Some(title) = edit.title.as_deref().filter(|t| !t.trim().is_empty()) {
                let new_slug = codec::slugify(title);
                if new_slug != slug && Self::find(&stores, &new_slug).await.is_some() {
                    return Err(StoreError::DuplicateSource(title.to_string()));
                }
                store.rename(title).await?;
            }
            store
        };

        if let Some(url) = edit.url.as_deref().filter(|u| !u.trim().is_empty()) {
            store.set_url(url).await;
        }
        if edit.refresh_interval.is_some() {
            store.set_refresh_interval(edit.refresh_interval).await;
        }

        self.persist().await;
        Ok(store.info().await)
    }

    /// Current configuration, with the source list taken from the live stores.
    pub async fn config_snapshot(&self) -> Config {
        let mut config = self.settings.read().await.clone();
        config.sources.clear();
        for store in self.list().await {
            config.sources.push(store.to_config().await);
        }
        config
    }

    async fn persist(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        let config = self.config_snapshot().await;
        if let Err(e) = config.save(path) {
            error!("Failed to save configuration to {}: {}", path.display(), e);
        }
    }

    /// Close every source, waiting for each writer to drain.
    pub async fn shutdown(&self) {
        let stores = std::mem::take(&mut *self.sources.write().await);
        for store in stores {
            let stats = store.close().await;
            if stats.failed > 0 {
                warn!(
                    "Source '{}' closed with {} failed writes",
                    store.title().await,
                    stats.failed
                );
            }
        }
        info!("All write-back queues drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;
    use tempfile::TempDir;

    fn create_config(data_dir: &Path, titles: &[&str]) -> Config {
        Config {
            data_dir: data_dir.join("data"),
            sources: titles
                .iter()
                .map(|t| SourceConfig::new(*t, format!("https://{}.example.com/rss", t.to_lowercase())))
                .collect(),
            ..Config::default()
        }
    }

    mod open_tests {
        use super::*;

        #[tokio::test]
        async fn test_open_creates_one_store_per_source() {
            let temp_dir = TempDir::new().unwrap();
            let config = create_config(temp_dir.path(), &["Alpha", "Beta"]);

            let directory = SourceDirectory::open(config, None).await.unwrap();

            let infos = directory.infos().await;
            assert_eq!(infos.len(), 2);
            assert_eq!(infos[0].title, "Alpha");
            assert_eq!(infos[1].title, "Beta");
            assert!(directory.data_dir().join(&infos[0].slug).is_dir());
        }

        #[tokio::test]
        async fn test_open_skips_duplicate_titles() {
            let temp_dir = TempDir::new().unwrap();
            let config = create_config(temp_dir.path(), &["Alpha", "Alpha"]);

            let directory = SourceDirectory::open(config, None).await.unwrap();
            assert_eq!(directory.list().await.len(), 1);
        }

        #[tokio::test]
        async fn test_open_loads_existing_articles() {
            let temp_dir = TempDir::new().unwrap();
            let config = create_config(temp_dir.path(), &["Alpha"]);
            {
                let directory = SourceDirectory::open(config.clone(), None).await.unwrap();
                let store = directory.get(&codec::slugify("Alpha")).await.unwrap();
                store
                    .append(Article::new("http://x/1", "One", ""))
                    .await
                    .unwrap();
                directory.shutdown().await;
            }

            let directory = SourceDirectory::open(config, None).await.unwrap();
            let store = directory.get(&codec::slugify("Alpha")).await.unwrap();
            assert_eq!(store.unread_count().await, 1);
            assert!(store.lookup("http://x/1").await.is_some());
        }
    }

    mod management_tests {
        use super::*;

        #[tokio::test]
        async fn test_get_unknown_slug() {
            let temp_dir = TempDir::new().unwrap();
            let directory = SourceDirectory::open(create_config(temp_dir.path(), &[]), None)
                .await
                .unwrap();

            let result = directory.get("missing").await;
            assert!(matches!(result, Err(StoreError::SourceNotFound(_))));
        }

        #[tokio::test]
        async fn test_add_uses_url_as_title() {
            let temp_dir = TempDir::new().unwrap();
            let directory = SourceDirectory::open(create_config(temp_dir.path(), &[]), None)
                .await
                .unwrap();

            let store = directory
                .add("https://new.example.com/feed", None)
                .await
                .unwrap();

            assert_eq!(store.title().await, "https://new.example.com/feed");
            assert_eq!(directory.list().await.len(), 1);
        }

        #[tokio::test]
        async fn test_add_duplicate_title() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();

            let result = directory.add("https://other.example.com", Some("Alpha")).await;
            assert!(matches!(result, Err(StoreError::DuplicateSource(_))));
        }

        #[tokio::test]
        async fn test_remove_drains_and_keeps_files() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();
            let slug = codec::slugify("Alpha");
            let store = directory.get(&slug).await.unwrap();
            store
                .append(Article::new("http://x/1", "One", ""))
                .await
                .unwrap();

            let stats = directory.remove(&slug).await.unwrap();

            assert_eq!(stats, WriteStats { written: 1, failed: 0 });
            assert!(directory.list().await.is_empty());
            assert!(store
                .dir()
                .await
                .join(codec::filename_for("http://x/1"))
                .exists());
            assert!(matches!(
                directory.remove(&slug).await,
                Err(StoreError::SourceNotFound(_))
            ));
        }

        #[tokio::test]
        async fn test_edit_renames_and_updates() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();

            let info = directory
                .edit(
                    &codec::slugify("Alpha"),
                    SourceEdit {
                        title: Some("Gamma".to_string()),
                        url: Some("https://gamma.example.com/rss".to_string()),
                        refresh_interval: Some(7),
                    },
                )
                .await
                .unwrap();

            assert_eq!(info.title, "Gamma");
            assert_eq!(info.slug, codec::slugify("Gamma"));
            assert_eq!(info.url, "https://gamma.example.com/rss");
            assert_eq!(info.refresh_interval, Some(7));
            assert!(directory.get(&codec::slugify("Alpha")).await.is_err());
            assert!(directory.get(&codec::slugify("Gamma")).await.is_ok());
        }

        #[tokio::test]
        async fn test_edit_to_taken_title() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha", "Beta"]), None)
                    .await
                    .unwrap();

            let result = directory
                .edit(
                    &codec::slugify("Alpha"),
                    SourceEdit {
                        title: Some("Beta".to_string()),
                        ..SourceEdit::default()
                    },
                )
                .await;

            assert!(matches!(result, Err(StoreError::DuplicateSource(_))));
            let alpha = directory.get(&codec::slugify("Alpha")).await.unwrap();
            assert_eq!(alpha.title().await, "Alpha");
        }

        #[tokio::test]
        async fn test_edit_rejects_out_of_range_interval() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();

            for minutes in [0, 1_000_000_000_000_000_000, u64::MAX] {
                let result = directory
                    .edit(
                        &codec::slugify("Alpha"),
                        SourceEdit {
                            title: Some("Renamed".to_string()),
                            refresh_interval: Some(minutes),
                            ..SourceEdit::default()
                        },
                    )
                    .await;
                assert!(matches!(
                    result,
                    Err(StoreError::InvalidRefreshInterval(m)) if m == minutes
                ));
            }

            // Nothing was applied
            let alpha = directory.get(&codec::slugify("Alpha")).await.unwrap();
            assert_eq!(alpha.title().await, "Alpha");
            assert_eq!(alpha.info().await.refresh_interval, None);
        }

        #[tokio::test]
        async fn test_re_add_during_remove_sees_every_article() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();
            let slug = codec::slugify("Alpha");
            let store = directory.get(&slug).await.unwrap();
            for i in 0..50 {
                store
                    .append(Article::new(format!("http://x/{}", i), "t", "body ".repeat(200)))
                    .await
                    .unwrap();
            }
            drop(store);

            let (removed, added) = tokio::join!(directory.remove(&slug), async {
                tokio::task::yield_now().await;
                directory
                    .add("https://alpha.example.com/rss", Some("Alpha"))
                    .await
            });

            assert_eq!(removed.unwrap().written, 50);
            let readded = added.unwrap();
            assert_eq!(readded.articles().await.len(), 50);
            assert_eq!(readded.unread_count().await, 50);
        }
    }

    mod persistence_tests {
        use super::*;

        #[tokio::test]
        async fn test_changes_are_written_to_config_file() {
            let temp_dir = TempDir::new().unwrap();
            let config_path = temp_dir.path().join("sources.toml");
            let config = create_config(temp_dir.path(), &["Alpha"]);
            config.save(&config_path).unwrap();

            let directory = SourceDirectory::open(config, Some(config_path.clone()))
                .await
                .unwrap();
            directory
                .add("https://beta.example.com/rss", Some("Beta"))
                .await
                .unwrap();
            directory.remove(&codec::slugify("Alpha")).await.unwrap();

            let saved = Config::load(&config_path).unwrap();
            assert_eq!(saved.sources.len(), 1);
            assert_eq!(saved.sources[0].title, "Beta");
            assert_eq!(saved.sources[0].url, "https://beta.example.com/rss");
        }

        #[tokio::test]
        async fn test_config_snapshot_reflects_edits() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha"]), None)
                    .await
                    .unwrap();
            directory
                .edit(
                    &codec::slugify("Alpha"),
                    SourceEdit {
                        refresh_interval: Some(3),
                        ..SourceEdit::default()
                    },
                )
                .await
                .unwrap();

            let snapshot = directory.config_snapshot().await;
            assert_eq!(snapshot.sources[0].refresh_interval, Some(3));
            assert_eq!(snapshot.refresh_interval, 15);
        }
    }

    mod options_tests {
        use super::*;

        #[tokio::test]
        async fn test_options_default_from_config() {
            let temp_dir = TempDir::new().unwrap();
            let directory = SourceDirectory::open(create_config(temp_dir.path(), &[]), None)
                .await
                .unwrap();

            assert_eq!(directory.options().await, Options { refresh_interval: 15 });
        }

        #[tokio::test]
        async fn test_set_options_saves_config() {
            let temp_dir = TempDir::new().unwrap();
            let config_path = temp_dir.path().join("sources.toml");
            let config = create_config(temp_dir.path(), &["Alpha"]);
            config.save(&config_path).unwrap();

            let directory = SourceDirectory::open(config, Some(config_path.clone()))
                .await
                .unwrap();
            let options = directory
                .set_options(Options { refresh_interval: 45 })
                .await
                .unwrap();

            assert_eq!(options.refresh_interval, 45);
            assert_eq!(directory.refresh_interval().await, 45);
            let saved = Config::load(&config_path).unwrap();
            assert_eq!(saved.refresh_interval, 45);
            assert_eq!(saved.sources.len(), 1);
        }

        #[tokio::test]
        async fn test_set_options_rejects_out_of_range_interval() {
            let temp_dir = TempDir::new().unwrap();
            let directory = SourceDirectory::open(create_config(temp_dir.path(), &[]), None)
                .await
                .unwrap();

            let result = directory
                .set_options(Options { refresh_interval: 0 })
                .await;

            assert!(matches!(result, Err(StoreError::InvalidRefreshInterval(0))));
            assert_eq!(directory.refresh_interval().await, 15);
        }
    }

    mod shutdown_tests {
        use super::*;

        #[tokio::test]
        async fn test_shutdown_drains_every_source() {
            let temp_dir = TempDir::new().unwrap();
            let directory =
                SourceDirectory::open(create_config(temp_dir.path(), &["Alpha", "Beta"]), None)
                    .await
                    .unwrap();
            let stores = directory.list().await;
            for (i, store) in stores.iter().enumerate() {
                for j in 0..10 {
                    store
                        .append(Article::new(format!("http://x/{}/{}", i, j), "t", ""))
                        .await
                        .unwrap();
                }
            }

            directory.shutdown().await;

            assert!(directory.list().await.is_empty());
            for store in stores {
                assert_eq!(std::fs::read_dir(store.dir().await).unwrap().count(), 10);
            }
        }
    }
}
