//! The relevance-ranking contract.
//!
//! Builds the single prompt that asks a model to order a session's articles
//! against the user's goals, and turns the model's reply back into a
//! validated ranking.
//!
//! # Output contract
//!
//! ```json
//! { "sortedArticles": [
//!     { "id": 12, "title": "…", "sort": 1, "reason": "…", "informationFlow": "…" }
//! ] }
//! ```
//!
//! A reply is accepted only when it is a permutation of the input: one
//! entry per article (matched by `id`, never by title) and ranks covering
//! `1..=N` exactly once. Anything else is a [`RankingError`]; nothing is
//! repaired or partially accepted.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use thiserror::Error;

use crate::llm::Prompt;
use crate::models::{Article, Goal, RankedArticle};

/// Placeholder used when an article reaches the ranker without a summary.
pub const SUMMARY_UNAVAILABLE: &str = "(summary unavailable)";

const SYSTEM_PROMPT: &str = "You are a learning coach who orders reading lists. \
Given a learner's goals and a set of articles, you decide the order in which the \
learner should read them so that each article is as useful as possible. \
You reply with a single JSON object and nothing else.";

/// Ways a model reply can violate the ranking contract.
#[derive(Debug, Error, PartialEq)]
pub enum RankingError {
    #[error("ranking response is not valid JSON: {0}")]
    Malformed(String),

    #[error("ranking has {actual} entries for {expected} articles")]
    CountMismatch { expected: usize, actual: usize },

    #[error("ranking entry {position} has no article id")]
    MissingId { position: usize },

    #[error("ranking references unknown article {0}")]
    UnknownArticle(i64),

    #[error("article {0} is ranked more than once")]
    DuplicateArticle(i64),

    #[error("article {0} has no rank")]
    MissingRank(i64),

    #[error("article {id} has rank {rank}, expected 1..={max}")]
    RankOutOfRange { id: i64, rank: u32, max: usize },

    #[error("rank {0} is assigned to more than one article")]
    DuplicateRank(u32),
}

/// Build the ranking prompt for `articles` against `goals`.
///
/// Articles without a summary are still listed, with
/// [`SUMMARY_UNAVAILABLE`] in place of the summary.
pub fn build_prompt(goals: &[Goal], articles: &[Article]) -> Prompt {
    let mut user = String::new();

    if goals.is_empty() {
        user.push_str(
            "The learner has not stated any goals. Order the articles from \
             foundational to advanced.\n",
        );
    } else {
        user.push_str("The learner's goals:\n");
        for goal in goals {
            user.push_str("- ");
            user.push_str(goal.goal.trim());
            user.push('\n');
        }
    }

    user.push_str("\nArticles:\n");
    for article in articles {
        user.push_str(&format!("\n[id={}] {}\n", article.id, article.title.trim()));
        user.push_str("Summary: ");
        user.push_str(article.cached_summary().unwrap_or(SUMMARY_UNAVAILABLE));
        user.push('\n');
    }

    let n = articles.len();
    user.push_str(&format!(
        "\nRank all {n} articles by how relevant they are to the goals, most relevant first. \
         For each article give a short reason for its position and an information flow \
         note explaining how it builds on the articles ranked before it.\n\
         Use every id exactly once and every rank from 1 to {n} exactly once.\n\
         Reply with JSON of exactly this shape:\n\
         {{\"sortedArticles\":[{{\"id\":<article id>,\"title\":\"<title>\",\"sort\":<rank>,\
         \"reason\":\"<reason>\",\"informationFlow\":\"<information flow>\"}}]}}\n"
    ));

    Prompt::new(SYSTEM_PROMPT, user)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReply {
    Wrapped {
        #[serde(rename = "sortedArticles", alias = "articles")]
        sorted_articles: Vec<RawEntry>,
    },
    Bare(Vec<RawEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    id: Option<i64>,
    sort: Option<u32>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reasons: Option<Vec<String>>,
    #[serde(default)]
    information_flow: Option<String>,
}

/// Strip markdown code fences and any prose around the JSON payload.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// Parse a model reply and validate it against the ranked `articles`.
///
/// Returns entries ordered by rank. Titles come from the input articles.
pub fn parse_ranking(text: &str, articles: &[Article]) -> Result<Vec<RankedArticle>, RankingError> {
    let reply: RawReply = serde_json::from_str(extract_json(text))
        .map_err(|e| RankingError::Malformed(e.to_string()))?;
    let entries = match reply {
        RawReply::Wrapped { sorted_articles } => sorted_articles,
        RawReply::Bare(entries) => entries,
    };
    validate(entries, articles)
}

fn validate(
    entries: Vec<RawEntry>,
    articles: &[Article],
) -> Result<Vec<RankedArticle>, RankingError> {
    let n = articles.len();
    if entries.len() != n {
        return Err(RankingError::CountMismatch {
            expected: n,
            actual: entries.len(),
        });
    }

    let by_id: HashMap<i64, &Article> = articles.iter().map(|a| (a.id, a)).collect();
    let mut seen_ids = HashSet::with_capacity(n);
    let mut seen_ranks = HashSet::with_capacity(n);
    let mut ranked = Vec::with_capacity(n);

    for (position, entry) in entries.into_iter().enumerate() {
        let id = entry.id.ok_or(RankingError::MissingId { position })?;
        let article = by_id.get(&id).ok_or(RankingError::UnknownArticle(id))?;
        if !seen_ids.insert(id) {
            return Err(RankingError::DuplicateArticle(id));
        }

        let rank = entry.sort.ok_or(RankingError::MissingRank(id))?;
        if rank == 0 || rank as usize > n {
            return Err(RankingError::RankOutOfRange { id, rank, max: n });
        }
        if !seen_ranks.insert(rank) {
            return Err(RankingError::DuplicateRank(rank));
        }

        let reason = match (entry.reason, entry.reasons) {
            (Some(r), _) => r,
            (None, Some(rs)) => rs.join(" "),
            (None, None) => String::new(),
        };

        ranked.push(RankedArticle {
            id,
            title: article.title.clone(),
            sort: rank,
            reason: reason.trim().to_string(),
            information_flow: entry.information_flow.unwrap_or_default().trim().to_string(),
        });
    }

    ranked.sort_by_key(|r| r.sort);
    Ok(ranked)
}
