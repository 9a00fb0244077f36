//! Sorting statistics.
//!
//! Two views of the same data: the `GET /stats/articles/sorted` endpoint
//! reports how many articles were sorted on one day, and `learnflow stats`
//! prints a short overview of the local database.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use learnflow_core::store::ResultStore;
use serde::Serialize;

use crate::config::Config;
use crate::db;

/// Articles covered by rankings completed on `date` (UTC).
#[derive(Debug, Serialize, PartialEq)]
pub struct SortedArticleStats {
    pub date: NaiveDate,
    pub count: i64,
}

/// Parse a `YYYY-MM-DD` date; absent means today (UTC).
pub fn parse_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s)),
        None => Ok(Utc::now().date_naive()),
    }
}

pub async fn sorted_articles_on(
    results: &dyn ResultStore,
    date: NaiveDate,
) -> Result<SortedArticleStats> {
    let count = results.count_sorted_articles_on(date).await?;
    Ok(SortedArticleStats { date, count })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, date: Option<&str>) -> Result<()> {
    let date = parse_date(date)?;
    let pool = db::connect(config).await?;

    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM learning_sessions")
        .fetch_one(&pool)
        .await?;
    let articles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
        .fetch_one(&pool)
        .await?;
    let summarized: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM articles WHERE summary IS NOT NULL AND TRIM(summary) != ''",
    )
    .fetch_one(&pool)
    .await?;
    let goals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM goals")
        .fetch_one(&pool)
        .await?;

    let status_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM sort_results GROUP BY status ORDER BY status")
            .fetch_all(&pool)
            .await?;

    let store = crate::sqlite_store::SqliteStore::new(pool);
    let sorted = sorted_articles_on(&store, date).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("LearnFlow — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Sessions:    {}", sessions);
    println!(
        "  Articles:    {} ({} summarized, {}%)",
        articles,
        summarized,
        if articles > 0 {
            (summarized * 100) / articles
        } else {
            0
        }
    );
    println!("  Goals:       {}", goals);
    println!();

    if status_rows.is_empty() {
        println!("  No sort results yet.");
    } else {
        println!("  Sort results:");
        for (status, count) in &status_rows {
            println!("    {:<10} {}", status, count);
        }
    }
    println!();
    println!("  Articles sorted on {}: {}", sorted.date, sorted.count);

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
