use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::article::FetchedItem;
use crate::directory::SourceDirectory;
use crate::store::ArticleStore;

/// How often the background loop checks which sources are due.
const SCHEDULER_TICK: Duration = Duration::from_secs(60);

pub struct Fetcher {
    client: Client,
    directory: Arc<SourceDirectory>,
    refreshing: Arc<RwLock<bool>>,
}

impl Fetcher {
    pub fn new(directory: Arc<SourceDirectory>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("MoarReader/1.0 (Feed Reader)")
            .build()?;

        Ok(Self {
            client,
            directory,
            refreshing: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Refresh every source regardless of its schedule.
    pub async fn refresh_all(&self) -> anyhow::Result<()> {
        self.refresh_matching(|_| true).await
    }

    /// Refresh the sources whose interval has elapsed.
    pub async fn refresh_due(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let default_interval = self.directory.refresh_interval().await;
        let mut due = Vec::new();
        for store in self.directory.list().await {
            if store.is_due(now, default_interval).await {
                due.push(store.slug().await);
            }
        }
        if due.is_empty() {
            return Ok(());
        }
        self.refresh_matching(|slug| due.iter().any(|d| d == slug))
            .await
    }

    async fn refresh_matching<F>(&self, selected: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> bool,
    {
        // Check if already refreshing
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return Ok(());
            }
            *refreshing = true;
        }

        let mut count = 0;
        for store in self.directory.list().await {
            if !selected(&store.slug().await) {
                continue;
            }
            if let Err(e) = self.refresh_source(&store).await {
                error!("Failed to refresh source '{}': {}", store.title().await, e);
            }
            count += 1;
        }
        info!("Refreshed {} sources", count);

        // Clear refreshing flag
        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        Ok(())
    }

    /// Fetch one source and store the items it does not know yet.
    ///
    /// The source counts as refreshed even when fetching fails, so a broken
    /// feed is retried on its next interval rather than every tick.
    pub async fn refresh_source(&self, store: &ArticleStore) -> anyhow::Result<usize> {
        let url = store.url().await;
        info!("Fetching source: {} ({})", store.title().await, url);
        store.mark_refreshed(Utc::now()).await;

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let items = Self::parse_items(&bytes)?;

        let added = store.ingest(items, Utc::now()).await?;
        info!("Added {} articles for source '{}'", added, store.title().await);
        Ok(added)
    }

    /// Turn an RSS/Atom document into candidate items.
    pub fn parse_items(bytes: &[u8]) -> anyhow::Result<Vec<FetchedItem>> {
        let parsed = parser::parse(bytes)?;

        let mut items = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            if url.is_empty() {
                warn!("Skipping entry with no link: {}", title);
                continue;
            }

            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();

            items.push(FetchedItem { url, title, content });
        }

        Ok(items)
    }
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>) {
    // Do initial fetch
    info!("Starting initial source fetch");
    if let Err(e) = fetcher.refresh_all().await {
        error!("Initial source fetch failed: {}", e);
    }

    // Then pick up whatever falls due
    loop {
        tokio::time::sleep(SCHEDULER_TICK).await;
        if let Err(e) = fetcher.refresh_due().await {
            error!("Scheduled source refresh failed: {}", e);
        }
    }
}
