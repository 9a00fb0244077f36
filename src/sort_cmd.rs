//! CLI commands that talk to a running server.
//!
//! `learnflow sort` is the terminal rendition of the client poller: it
//! submits, reports "processing", polls on `[client].poll_interval_secs`
//! and prints exactly one terminal notification (sorted, failed or timed
//! out).

use anyhow::{bail, Result};
use learnflow_core::models::RankedArticle;

use crate::config::Config;
use crate::dispatch::ArticleRef;
use crate::poller::{
    poll_until_sorted, HttpSortClient, PollOutcome, PollPolicy, SortStatusReply, SortStatusSource,
};

fn policy(config: &Config) -> PollPolicy {
    PollPolicy {
        interval: config.client.poll_interval(),
        timeout: config.client.poll_timeout(),
    }
}

fn print_ranking(articles: &[RankedArticle]) {
    for a in articles {
        println!("{:>3}. {} (id {})", a.sort, a.title, a.id);
        if !a.reason.is_empty() {
            println!("     why:  {}", a.reason);
        }
        if !a.information_flow.is_empty() {
            println!("     flow: {}", a.information_flow);
        }
    }
}

/// Submit a sort for `session_id` and wait for the result.
pub async fn run_sort(config: &Config, session_id: i64, article_ids: Vec<i64>) -> Result<()> {
    let client = HttpSortClient::from_config(config)?;
    let selection = if article_ids.is_empty() {
        None
    } else {
        Some(
            article_ids
                .into_iter()
                .map(|id| ArticleRef { id, summary: None })
                .collect(),
        )
    };

    let request_id = client.submit(session_id, selection).await?;
    println!(
        "Sorting session {} (request {}). Processing...",
        session_id, request_id
    );

    match poll_until_sorted(&client, session_id, policy(config)).await {
        PollOutcome::Sorted(articles) => {
            println!("Session {} sorted:", session_id);
            print_ranking(&articles);
            Ok(())
        }
        PollOutcome::Failed(message) => bail!("Sorting failed: {}", message),
        PollOutcome::TimedOut { attempts } => bail!(
            "Sorting did not finish within {}s ({} polls). Run `learnflow status {}` later.",
            config.client.poll_timeout_secs,
            attempts,
            session_id
        ),
    }
}

/// Poll once and print the current state.
pub async fn run_status(config: &Config, session_id: i64) -> Result<()> {
    let client = HttpSortClient::from_config(config)?;
    match client.poll(session_id).await? {
        SortStatusReply::InProgress => println!("Session {}: in progress", session_id),
        SortStatusReply::Sorted(articles) => {
            println!("Session {}: sorted", session_id);
            print_ranking(&articles);
        }
        SortStatusReply::Failed(message) => bail!("Session {}: failed: {}", session_id, message),
    }
    Ok(())
}

pub async fn run_summarize(config: &Config, article_id: i64, use_cache: bool) -> Result<()> {
    let client = HttpSortClient::from_config(config)?;
    let summary = client.summarize(article_id, use_cache).await?;
    println!("{}", summary);
    Ok(())
}

pub async fn run_notes(config: &Config, article_id: i64) -> Result<()> {
    let client = HttpSortClient::from_config(config)?;
    let notes = client.notes(article_id).await?;
    println!("{}", notes);
    Ok(())
}
