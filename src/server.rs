//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET` / `POST` | `/sessions` | List / create learning sessions |
//! | `GET`  | `/sessions/{id}` | One session |
//! | `POST` | `/sessions/sort` | Schedule a sort, `202 {success, requestId}` |
//! | `GET`  | `/sessions/sort?sessionId=` | Poll: `200` ranking, `202` in progress, `502` failed |
//! | `GET` / `POST` | `/articles` | List (`?sessionId=`) / create articles |
//! | `POST` | `/articles/summary` | Summarize one article |
//! | `GET` / `POST` | `/articles/notes` | List / generate notes for an article |
//! | `GET` / `POST` / `DELETE` | `/goals` | Learning goals |
//! | `GET`  | `/stats/articles/sorted?date=` | Articles sorted on a day |
//!
//! Every endpoint except `/health` requires a caller identity (see
//! [`crate::auth`]). Errors use the body described in [`crate::error`].
//!
//! # Poll contract
//!
//! The poll endpoint never returns a ranking with `202` and never returns
//! "in progress" with `200`; clients discriminate on the status code alone.
//! A session with no record (never submitted, or not yet written) is `202`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRef, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use learnflow_core::llm::LlmClient;
use learnflow_core::models::{
    Article, ArticleContent, Goal, LearningSession, NewArticle, NewSession, Note, RankedArticle,
    SortStatus,
};
use learnflow_core::store::{ArticleStore, GoalStore, ResultStore};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{AuthUser, Authenticator};
use crate::config::Config;
use crate::content::{content_hash, ContentResolver};
use crate::dispatch::{create_sort_queue, spawn_sort_worker, ArticleRef, SortDispatcher, SortWorker};
use crate::error::{ApiError, ApiResult};
use crate::notes::NoteTaker;
use crate::rank::RelevanceRanker;
use crate::sqlite_store::SqliteStore;
use crate::summarize::Summarizer;
use crate::{db, llm, stats};

/// External dependencies the server is assembled from.
///
/// Credentials are already resolved inside `llm` and `auth`.
pub struct Services {
    pub articles: Arc<dyn ArticleStore>,
    pub goals: Arc<dyn GoalStore>,
    pub results: Arc<dyn ResultStore>,
    pub llm: Arc<dyn LlmClient>,
    pub auth: Authenticator,
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    auth: Arc<Authenticator>,
    articles: Arc<dyn ArticleStore>,
    goals: Arc<dyn GoalStore>,
    results: Arc<dyn ResultStore>,
    summarizer: Arc<Summarizer>,
    notes: Arc<NoteTaker>,
    dispatcher: Arc<SortDispatcher>,
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl AppState {
    /// Wire the pipeline components and start the sort worker.
    ///
    /// Must be called inside a Tokio runtime. The worker stops once the
    /// returned state (and every clone of it) is dropped.
    pub fn assemble(config: &Config, services: Services) -> Result<(Self, JoinHandle<()>)> {
        let Services {
            articles,
            goals,
            results,
            llm,
            auth,
        } = services;

        let content = Arc::new(ContentResolver::new(articles.clone(), &config.content)?);
        let summarizer = Arc::new(Summarizer::new(
            articles.clone(),
            llm.clone(),
            content.clone(),
            config.llm.summary_model,
        ));
        let notes = Arc::new(NoteTaker::new(
            articles.clone(),
            llm.clone(),
            content,
            config.llm.notes_model,
        ));
        let ranker = Arc::new(RelevanceRanker::new(
            goals.clone(),
            llm,
            config.llm.ranking_model,
            config.sorting.max_rank_attempts,
        ));

        let (sender, receiver) = create_sort_queue(config.sorting.queue_capacity);
        let dispatcher = Arc::new(SortDispatcher::new(
            articles.clone(),
            results.clone(),
            sender,
        ));
        let worker = Arc::new(SortWorker::new(
            summarizer.clone(),
            ranker,
            results.clone(),
            config.sorting.workers,
            config.sorting.summary_concurrency,
        ));
        let handle = spawn_sort_worker(worker, receiver);

        Ok((
            Self {
                auth: Arc::new(auth),
                articles,
                goals,
                results,
                summarizer,
                notes,
                dispatcher,
            },
            handle,
        ))
    }
}

/// Build the router with every route, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", get(handle_list_sessions).post(handle_create_session))
        .route("/sessions/sort", post(handle_submit_sort).get(handle_sort_status))
        .route("/sessions/{id}", get(handle_get_session))
        .route("/articles", get(handle_list_articles).post(handle_create_article))
        .route("/articles/summary", post(handle_summarize))
        .route("/articles/notes", get(handle_list_notes).post(handle_generate_notes))
        .route(
            "/goals",
            get(handle_list_goals)
                .post(handle_create_goal)
                .delete(handle_delete_goal),
        )
        .route("/stats/articles/sorted", get(handle_sorted_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` backed by the SQLite store.
///
/// Runs until the process is terminated. The database must have been
/// initialized with `learnflow init`.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let services = Services {
        articles: store.clone(),
        goals: store.clone(),
        results: store,
        llm: llm::create_client(&config.llm)?,
        auth: Authenticator::from_config(&config.auth)?,
    };
    let (state, _worker) = AppState::assemble(config, services)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        provider = config.llm.provider.as_str(),
        "LearnFlow server listening"
    );
    println!("LearnFlow server listening on http://{}", config.server.bind);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn require_id(value: Option<i64>, what: &str) -> ApiResult<i64> {
    value
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} id.", what)))
}

async fn owned_article(state: &AppState, user: &str, article_id: i64) -> ApiResult<Article> {
    state
        .articles
        .get_article(user, article_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("article {} not found", article_id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ /sessions ============

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    title: Option<String>,
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
}

/// `"Session for Mar 9th, 2024"`.
fn default_session_title(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!(
        "Session for {} {}{}, {}",
        date.format("%b"),
        day,
        suffix,
        date.year()
    )
}

async fn handle_create_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<Json<LearningSession>> {
    let Json(req) = payload?;
    let today = Utc::now().date_naive();
    let date = NaiveDate::from_ymd_opt(
        req.year.unwrap_or(today.year()),
        req.month.unwrap_or(today.month()),
        req.day.unwrap_or(today.day()),
    )
    .ok_or_else(|| ApiError::BadRequest("Invalid session date.".to_string()))?;

    let title = req
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_session_title(date));

    let session = state
        .articles
        .create_session(NewSession {
            user_id: user,
            year: date.year(),
            month: date.month(),
            day: date.day(),
            title,
        })
        .await?;
    Ok(Json(session))
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<LearningSession>>> {
    Ok(Json(state.articles.list_sessions(&user).await?))
}

async fn handle_get_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<LearningSession>> {
    let Path(id) = id?;
    state
        .articles
        .get_session(&user, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))
}

// ============ /sessions/sort ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitSortRequest {
    session_id: Option<i64>,
    #[serde(default)]
    articles: Option<Vec<ArticleRef>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitSortResponse {
    success: bool,
    request_id: Uuid,
}

async fn handle_submit_sort(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SubmitSortRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitSortResponse>)> {
    let Json(req) = payload?;
    let session_id = require_id(req.session_id, "session")?;

    let request_id = state
        .dispatcher
        .submit(&user, session_id, req.articles)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitSortResponse {
            success: true,
            request_id,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SortStatusQuery {
    session_id: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InProgressResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SortedResponse {
    sorted_articles: Vec<RankedArticle>,
    request_id: Uuid,
}

fn in_progress(request_id: Option<Uuid>) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(InProgressResponse {
            status: "in_progress",
            request_id,
        }),
    )
        .into_response()
}

async fn handle_sort_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<SortStatusQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let session_id = require_id(query.session_id, "session")?;

    // The result store is read first: a missing record (or a store that is
    // not provisioned yet) is "in progress" without touching anything else.
    let Some(record) = state.results.get(session_id).await? else {
        return Ok(in_progress(None));
    };

    if state.articles.get_session(&user, session_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("session {} not found", session_id)));
    }

    match record.status {
        SortStatus::Pending => Ok(in_progress(Some(record.request_id))),
        SortStatus::Completed => {
            let result = record.result.ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "completed sort record for session {} has no result",
                    session_id
                ))
            })?;
            Ok(Json(SortedResponse {
                sorted_articles: result.sorted_articles,
                request_id: record.request_id,
            })
            .into_response())
        }
        SortStatus::Failed => Err(ApiError::SortFailed(
            record
                .error
                .unwrap_or_else(|| "sort failed".to_string()),
        )),
    }
}

// ============ /articles ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArticlesQuery {
    session_id: Option<i64>,
}

async fn handle_list_articles(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ListArticlesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Article>>> {
    let Query(query) = query?;
    let articles = match query.session_id {
        Some(session_id) => {
            state
                .articles
                .list_articles_for_session(&user, session_id)
                .await?
        }
        None => state.articles.list_articles_for_user(&user).await?,
    };
    Ok(Json(articles))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArticleRequest {
    session_id: Option<i64>,
    url: Option<String>,
    title: Option<String>,
    authors: Option<String>,
    /// Readable text supplied by the client; seeds the content cache.
    content: Option<String>,
}

async fn handle_create_article(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateArticleRequest>, JsonRejection>,
) -> ApiResult<Json<Article>> {
    let Json(req) = payload?;
    let session_id = require_id(req.session_id, "session")?;
    let url = req
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("url is required".to_string()))?;

    if state.articles.get_session(&user, session_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("session {} not found", session_id)));
    }

    let title = req
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.clone());

    let article = state
        .articles
        .create_article(NewArticle {
            user_id: user,
            session_id,
            title,
            url,
            authors: req.authors.filter(|a| !a.trim().is_empty()),
        })
        .await?;

    if let Some(markdown) = req.content.filter(|c| !c.trim().is_empty()) {
        state
            .articles
            .put_article_content(&ArticleContent {
                article_id: article.id,
                content_hash: content_hash(&markdown),
                markdown,
                fetched_at: Utc::now(),
            })
            .await?;
    }

    Ok(Json(article))
}

// ============ POST /articles/summary ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest {
    article_id: Option<i64>,
    use_cache: Option<bool>,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

async fn handle_summarize(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> ApiResult<Json<SummaryResponse>> {
    let Json(req) = payload?;
    let article_id = require_id(req.article_id, "article")?;
    let article = owned_article(&state, &user, article_id).await?;

    let summary = state
        .summarizer
        .summarize(&article, req.use_cache.unwrap_or(true))
        .await?;
    Ok(Json(SummaryResponse { summary }))
}

// ============ /articles/notes ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotesRequest {
    article_id: Option<i64>,
}

#[derive(Serialize)]
struct NotesResponse {
    notes: String,
}

async fn handle_generate_notes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<NotesRequest>, JsonRejection>,
) -> ApiResult<Json<NotesResponse>> {
    let Json(req) = payload?;
    let article_id = require_id(req.article_id, "article")?;
    let article = owned_article(&state, &user, article_id).await?;

    let note = state.notes.take_notes(&article).await?;
    Ok(Json(NotesResponse { notes: note.note }))
}

async fn handle_list_notes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<NotesRequest>, QueryRejection>,
) -> ApiResult<Json<Vec<Note>>> {
    let Query(query) = query?;
    let article_id = require_id(query.article_id, "article")?;
    owned_article(&state, &user, article_id).await?;
    Ok(Json(state.articles.list_notes(article_id).await?))
}

// ============ /goals ============

#[derive(Deserialize)]
struct CreateGoalRequest {
    goal: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteGoalQuery {
    goal_id: Option<i64>,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

async fn handle_list_goals(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<Goal>>> {
    Ok(Json(state.goals.goals_for_user(&user).await?))
}

async fn handle_create_goal(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<CreateGoalRequest>, JsonRejection>,
) -> ApiResult<Json<Goal>> {
    let Json(req) = payload?;
    let goal = req
        .goal
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .ok_or_else(|| ApiError::BadRequest("goal must not be empty".to_string()))?;
    Ok(Json(state.goals.create_goal(&user, &goal).await?))
}

async fn handle_delete_goal(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<DeleteGoalQuery>, QueryRejection>,
) -> ApiResult<Json<DeletedResponse>> {
    let Query(query) = query?;
    let goal_id = require_id(query.goal_id, "goal")?;
    if !state.goals.delete_goal(&user, goal_id).await? {
        return Err(ApiError::NotFound(format!("goal {} not found", goal_id)));
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

// ============ GET /stats/articles/sorted ============

#[derive(Deserialize)]
struct StatsQuery {
    date: Option<String>,
}

async fn handle_sorted_stats(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult<Json<stats::SortedArticleStats>> {
    let Query(query) = query?;
    let date = stats::parse_date(query.date.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(
        stats::sorted_articles_on(state.results.as_ref(), date).await?,
    ))
}
