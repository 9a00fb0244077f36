//! Asynchronous sort orchestration.
//!
//! A sort is split across two execution contexts that only meet in the
//! result store:
//!
//! ```text
//!  POST /sessions/sort                        background worker
//!  ───────────────────                        ─────────────────
//!  SortDispatcher::submit                     SortWorker::process
//!    resolve + validate articles                summarize missing (fan-out)
//!    ResultStore::begin(session, rid) ──┐       RelevanceRanker::rank
//!    queue.try_send(SortJob) ───────────┼──►    ResultStore::put(session, rid, outcome)
//!    return rid (202)                   │
//!                                       └──►  GET /sessions/sort reads the record
//! ```
//!
//! `begin` runs before the job is queued, so once a caller holds the
//! acknowledgement no poll can see an older request's result as current.
//! The worker writes exactly one terminal record per request, fenced by
//! request id: a job superseded by a newer submission cannot overwrite it.

use std::sync::Arc;

use anyhow::Result;
use learnflow_core::models::{Article, SortOutcome, WriteOutcome};
use learnflow_core::store::{ArticleStore, ResultStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::rank::RelevanceRanker;
use crate::summarize::Summarizer;

/// One queued sort: everything the worker needs, resolved at submit time.
#[derive(Debug, Clone)]
pub struct SortJob {
    pub session_id: i64,
    pub request_id: Uuid,
    pub user_id: String,
    pub articles: Vec<Article>,
}

/// An article selected by the client, optionally with a summary it
/// already holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRef {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("article {article_id} is not part of session {session_id}")]
    UnknownArticle { session_id: i64, article_id: i64 },

    #[error("session {0} has no articles to sort")]
    NoArticles(i64),

    #[error("sort queue is full")]
    QueueFull,

    #[error("sort worker is not running")]
    WorkerStopped,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type SortSender = mpsc::Sender<SortJob>;
pub type SortReceiver = mpsc::Receiver<SortJob>;

/// Bounded queue between the dispatcher and the worker.
pub fn create_sort_queue(capacity: usize) -> (SortSender, SortReceiver) {
    mpsc::channel(capacity)
}

/// Accepts sort submissions and hands them to the worker.
pub struct SortDispatcher {
    articles: Arc<dyn ArticleStore>,
    results: Arc<dyn ResultStore>,
    queue: SortSender,
}

impl SortDispatcher {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        results: Arc<dyn ResultStore>,
        queue: SortSender,
    ) -> Self {
        Self {
            articles,
            results,
            queue,
        }
    }

    /// Schedule a sort of `session_id` and return its request id.
    ///
    /// With `selection` absent or empty, every article of the session is
    /// ranked. Returns without waiting for any summarization or ranking.
    pub async fn submit(
        &self,
        user_id: &str,
        session_id: i64,
        selection: Option<Vec<ArticleRef>>,
    ) -> Result<Uuid, SubmitError> {
        if self.articles.get_session(user_id, session_id).await?.is_none() {
            return Err(SubmitError::SessionNotFound(session_id));
        }

        let session_articles = self
            .articles
            .list_articles_for_session(user_id, session_id)
            .await?;
        let articles = select_articles(session_id, session_articles, selection)?;
        if articles.is_empty() {
            return Err(SubmitError::NoArticles(session_id));
        }

        let request_id = Uuid::new_v4();
        self.results.begin(session_id, request_id).await?;

        let job = SortJob {
            session_id,
            request_id,
            user_id: user_id.to_string(),
            articles,
        };
        let article_count = job.articles.len();

        if let Err(e) = self.queue.try_send(job) {
            let err = match e {
                TrySendError::Full(_) => SubmitError::QueueFull,
                TrySendError::Closed(_) => SubmitError::WorkerStopped,
            };
            tracing::warn!(
                session_id,
                request_id = %request_id,
                error = %err,
                "sort not scheduled"
            );
            let outcome = SortOutcome::Failed(format!("sort could not be scheduled: {}", err));
            if let Err(e) = self.results.put(session_id, request_id, &outcome).await {
                tracing::error!(session_id, error = %e, "failed to record unscheduled sort");
            }
            return Err(err);
        }

        tracing::info!(
            session_id,
            request_id = %request_id,
            articles = article_count,
            "sort scheduled"
        );
        Ok(request_id)
    }
}

/// Pick the articles to rank and overlay client-held summaries.
fn select_articles(
    session_id: i64,
    session_articles: Vec<Article>,
    selection: Option<Vec<ArticleRef>>,
) -> Result<Vec<Article>, SubmitError> {
    let selection = match selection {
        Some(refs) if !refs.is_empty() => refs,
        _ => return Ok(session_articles),
    };

    let mut selected: Vec<Article> = Vec::with_capacity(selection.len());
    for r in selection {
        if selected.iter().any(|a| a.id == r.id) {
            continue;
        }
        let mut article = session_articles
            .iter()
            .find(|a| a.id == r.id)
            .cloned()
            .ok_or(SubmitError::UnknownArticle {
                session_id,
                article_id: r.id,
            })?;
        if let Some(summary) = r.summary.filter(|s| !s.trim().is_empty()) {
            article.summary = Some(summary);
        }
        selected.push(article);
    }
    Ok(selected)
}

/// Consumes [`SortJob`]s and writes one terminal record per job.
pub struct SortWorker {
    summarizer: Arc<Summarizer>,
    ranker: Arc<RelevanceRanker>,
    results: Arc<dyn ResultStore>,
    workers: usize,
    summary_concurrency: usize,
}

impl SortWorker {
    pub fn new(
        summarizer: Arc<Summarizer>,
        ranker: Arc<RelevanceRanker>,
        results: Arc<dyn ResultStore>,
        workers: usize,
        summary_concurrency: usize,
    ) -> Self {
        Self {
            summarizer,
            ranker,
            results,
            workers: workers.max(1),
            summary_concurrency: summary_concurrency.max(1),
        }
    }

    /// Run one job to its terminal record.
    pub async fn process(&self, job: SortJob) -> Result<WriteOutcome> {
        let SortJob {
            session_id,
            request_id,
            user_id,
            articles,
        } = job;

        let articles = self.summarize_missing(session_id, articles).await;

        let outcome = match self.ranker.rank(&user_id, session_id, &articles).await {
            Ok(result) => SortOutcome::Completed(result),
            Err(e) => {
                tracing::warn!(
                    session_id,
                    request_id = %request_id,
                    error = %format!("{:#}", e),
                    "sort failed"
                );
                SortOutcome::Failed(format!("{:#}", e))
            }
        };

        let written = self.results.put(session_id, request_id, &outcome).await?;
        match written {
            WriteOutcome::Written => tracing::info!(
                session_id,
                request_id = %request_id,
                status = outcome.status().as_str(),
                "sort result written"
            ),
            WriteOutcome::Superseded => tracing::info!(
                session_id,
                request_id = %request_id,
                "sort superseded by a newer request; result discarded"
            ),
        }
        Ok(written)
    }

    /// Generate summaries for articles that lack one, concurrently.
    ///
    /// Every task is awaited; a failure leaves that article without a
    /// summary and does not affect the others.
    async fn summarize_missing(
        &self,
        session_id: i64,
        mut articles: Vec<Article>,
    ) -> Vec<Article> {
        let limit = Arc::new(Semaphore::new(self.summary_concurrency));
        let mut tasks = JoinSet::new();

        for (idx, article) in articles.iter().enumerate() {
            if article.cached_summary().is_some() {
                continue;
            }
            let summarizer = self.summarizer.clone();
            let limit = limit.clone();
            let article = article.clone();
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await;
                (idx, summarizer.summarize(&article, true).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(summary))) => articles[idx].summary = Some(summary),
                Ok((idx, Err(e))) => tracing::warn!(
                    session_id,
                    article_id = articles[idx].id,
                    error = %e,
                    "summary failed; ranking without it"
                ),
                Err(e) => tracing::error!(session_id, error = %e, "summary task aborted"),
            }
        }

        articles
    }
}

/// Spawn the background worker loop.
///
/// Up to `[sorting].workers` jobs run at once. The task ends once every
/// sender is dropped and in-flight jobs have finished.
pub fn spawn_sort_worker(worker: Arc<SortWorker>, mut receiver: SortReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(workers = worker.workers, "sort worker started");
        let slots = Arc::new(Semaphore::new(worker.workers));

        while let Some(job) = receiver.recv().await {
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            tokio::spawn(async move {
                let session_id = job.session_id;
                let request_id = job.request_id;
                if let Err(e) = worker.process(job).await {
                    tracing::error!(
                        session_id,
                        request_id = %request_id,
                        error = %format!("{:#}", e),
                        "failed to write sort result"
                    );
                }
                drop(permit);
            });
        }

        // Drain in-flight jobs.
        let _ = slots.acquire_many(worker.workers as u32).await;
        tracing::info!("sort worker stopped (queue closed)");
    })
}
