use std::future::Future;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::article::Article;
use crate::directory::{Options, SourceDirectory, SourceEdit};
use crate::error::StoreError;
use crate::fetcher::Fetcher;
use crate::store::SourceInfo;

pub struct AppState {
    pub directory: Arc<SourceDirectory>,
    pub fetcher: Arc<Fetcher>,
    background: Mutex<JoinSet<()>>,
}

impl AppState {
    pub fn new(directory: Arc<SourceDirectory>, fetcher: Arc<Fetcher>) -> Self {
        Self {
            directory,
            fetcher,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Run a task spawned by a request; it is awaited by [`AppState::wait_background`].
    pub async fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.background.lock().await;
        // Reap finished tasks
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait until every task started through [`AppState::spawn_background`] has finished.
    pub async fn wait_background(&self) {
        let mut tasks = std::mem::take(&mut *self.background.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Background task failed: {}", e);
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/list", get(list))
        .route("/view/:slug", get(view))
        .route("/edit/:slug", get(edit_page).post(edit_submit))
        .route("/options", get(options_page).post(options_submit))
        .route("/health", get(health))
        .route("/api/options", get(api_get_options).post(api_set_options))
        .route("/api/refresh", post(api_refresh_all))
        .route("/api/refresh/status", get(api_refresh_status))
        .route("/api/source/list", get(api_list_sources))
        .route("/api/source/add", post(api_add_source))
        .route("/api/source/remove/:slug", post(api_remove_source))
        .route("/api/source/edit/:slug", post(api_edit_source))
        .route("/api/source/refresh/:slug", post(api_refresh_source))
        .route("/api/article/list/:slug", get(api_list_articles))
        .route("/api/article/get/:slug", get(api_get_article))
        .route("/api/article/read/:slug", post(api_read_article))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "list.html")]
pub struct ListTemplate {
    pub sources: Vec<SourceInfo>,
}

#[derive(Template)]
#[template(path = "view.html")]
pub struct ViewTemplate {
    pub source: SourceInfo,
    pub articles: Vec<ArticleRow>,
}

#[derive(Template)]
#[template(path = "edit.html")]
pub struct EditTemplate {
    pub source: SourceInfo,
    /// Source interval, empty when the default applies
    pub interval: String,
}

#[derive(Template)]
#[template(path = "options.html")]
pub struct OptionsTemplate {
    pub refresh_interval: u64,
}

pub struct ArticleRow {
    pub url: String,
    pub title: String,
    pub fetched: String,
    pub read: bool,
}

impl From<Article> for ArticleRow {
    fn from(article: Article) -> Self {
        Self {
            fetched: article.fetched_at.format("%Y-%m-%d %H:%M").to_string(),
            url: article.url,
            title: article.title,
            read: article.read,
        }
    }
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<StoreError>() {
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(StoreError::DuplicateArticle(_))
            | Some(StoreError::DuplicateSource(_))
            | Some(StoreError::DirectoryExists(_)) => StatusCode::CONFLICT,
            Some(StoreError::InvalidRefreshInterval(_)) => StatusCode::BAD_REQUEST,
            Some(StoreError::QueueClosed(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, format!("Error: {}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

// Page handlers
pub async fn root() -> Redirect {
    Redirect::temporary("/list")
}

pub async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    HtmlTemplate(ListTemplate {
        sources: state.directory.infos().await,
    })
}

pub async fn view(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.directory.get(&slug).await?;
    let mut articles = store.articles().await;
    // Load order follows the directory listing, so sort for display
    articles.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));

    Ok(HtmlTemplate(ViewTemplate {
        source: store.info().await,
        articles: articles.into_iter().map(ArticleRow::from).collect(),
    }))
}

pub async fn edit_page(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let source = state.directory.get(&slug).await?.info().await;
    let interval = source
        .refresh_interval
        .map(|m| m.to_string())
        .unwrap_or_default();
    Ok(HtmlTemplate(EditTemplate { source, interval }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EditForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Minutes; left empty to keep the current interval
    #[serde(default)]
    pub refresh_interval: String,
}

impl EditForm {
    fn into_edit(self) -> Option<SourceEdit> {
        let interval = self.refresh_interval.trim();
        let refresh_interval = if interval.is_empty() {
            None
        } else {
            Some(interval.parse().ok()?)
        };
        Some(SourceEdit {
            title: Some(self.title),
            url: Some(self.url),
            refresh_interval,
        })
    }
}

pub async fn edit_submit(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Form(form): Form<EditForm>,
) -> Result<Response, AppError> {
    let Some(edit) = form.into_edit() else {
        return Ok((StatusCode::BAD_REQUEST, "Invalid refresh interval").into_response());
    };
    let info = state.directory.edit(&slug, edit).await?;
    Ok(Redirect::to(&format!("/view/{}", info.slug)).into_response())
}

pub async fn options_page(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    HtmlTemplate(OptionsTemplate {
        refresh_interval: state.directory.refresh_interval().await,
    })
}

pub async fn options_submit(
    State(state): State<Arc<AppState>>,
    Form(options): Form<Options>,
) -> Result<Redirect, AppError> {
    state.directory.set_options(options).await?;
    Ok(Redirect::to("/options"))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

// API handlers
pub async fn api_list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceInfo>> {
    Json(state.directory.infos().await)
}

#[derive(Debug, Deserialize)]
pub struct AddSource {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn api_add_source(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddSource>,
) -> Result<impl IntoResponse, AppError> {
    let url = body.url.trim();
    if url.is_empty() {
        return Ok((StatusCode::BAD_REQUEST, "Missing source URL").into_response());
    }

    let store = state.directory.add(url, body.title.as_deref()).await?;

    // Populate the new source right away
    let fetcher = state.fetcher.clone();
    let new_store = store.clone();
    state
        .spawn_background(async move {
            if let Err(e) = fetcher.refresh_source(&new_store).await {
                error!("Initial fetch of new source failed: {}", e);
            }
        })
        .await;

    Ok((StatusCode::CREATED, Json(store.info().await)).into_response())
}

pub async fn api_remove_source(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    state.directory.remove(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_edit_source(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(edit): Json<SourceEdit>,
) -> Result<Json<SourceInfo>, AppError> {
    Ok(Json(state.directory.edit(&slug, edit).await?))
}

pub async fn api_refresh_source(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    let store = state.directory.get(&slug).await?;

    let fetcher = state.fetcher.clone();
    state
        .spawn_background(async move {
            if let Err(e) = fetcher.refresh_source(&store).await {
                error!("Manual refresh of '{}' failed: {}", store.title().await, e);
            }
        })
        .await;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub refreshing: bool,
}

pub async fn api_refresh_all(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RefreshStatus>) {
    let fetcher = state.fetcher.clone();
    state
        .spawn_background(async move {
            if let Err(e) = fetcher.refresh_all().await {
                error!("Manual refresh of all sources failed: {}", e);
            }
        })
        .await;

    // Report refreshing state immediately
    (StatusCode::ACCEPTED, Json(RefreshStatus { refreshing: true }))
}

pub async fn api_refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(RefreshStatus {
        refreshing: state.fetcher.is_refreshing().await,
    })
}

pub async fn api_get_options(State(state): State<Arc<AppState>>) -> Json<Options> {
    Json(state.directory.options().await)
}

pub async fn api_set_options(
    State(state): State<Arc<AppState>>,
    Json(options): Json<Options>,
) -> Result<Json<Options>, AppError> {
    Ok(Json(state.directory.set_options(options).await?))
}

pub async fn api_list_articles(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Article>>, AppError> {
    let store = state.directory.get(&slug).await?;
    Ok(Json(store.articles().await))
}

#[derive(Debug, Deserialize)]
pub struct ArticleQuery {
    pub url: String,
}

pub async fn api_get_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<ArticleQuery>,
) -> Result<Json<Article>, AppError> {
    let store = state.directory.get(&slug).await?;
    let article = store
        .lookup(&query.url)
        .await
        .ok_or(StoreError::ArticleNotFound(query.url))?;
    Ok(Json(article))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResult {
    pub changed: bool,
    pub unread: usize,
}

pub async fn api_read_article(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<ArticleQuery>,
) -> Result<Json<ReadResult>, AppError> {
    let store = state.directory.get(&slug).await?;
    let changed = store.mark_read(&query.url).await?;
    Ok(Json(ReadResult {
        changed,
        unread: store.unread_count().await,
    }))
}
