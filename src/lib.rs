//! # LearnFlow
//!
//! Session-based reading lists, ranked against a learner's goals by an LLM.
//!
//! Users collect articles into dated learning sessions. A sort request
//! summarizes every article that lacks a summary, asks a model for a strict
//! ranking of the whole session against the user's goals, and stores the
//! result for the client to poll.
//!
//! ## Architecture
//!
//! ```text
//!  client ──POST /sessions/sort──▶ SortDispatcher ──SortJob──▶ SortWorker
//!    ▲                               │ begin(pending)            │ Summarizer (fan-out)
//!    │                               ▼                           │ RelevanceRanker
//!    └──GET /sessions/sort──── ResultStore ◀──put(terminal)──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! learnflow init                # create database
//! learnflow serve               # start HTTP server
//! learnflow sort 7              # submit a sort and poll until done
//! learnflow status 7            # one poll
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Table bootstrapping |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`llm`] | OpenAI and disabled LLM clients |
//! | [`content`] | Readable-content resolution |
//! | [`summarize`] | Cached article summaries |
//! | [`notes`] | Study notes |
//! | [`rank`] | Relevance ranking |
//! | [`dispatch`] | Sort job queue and worker |
//! | [`auth`] | Caller identity |
//! | [`error`] | HTTP error type |
//! | [`server`] | HTTP server |
//! | [`poller`] | Client poller and HTTP client |
//! | [`sort_cmd`] | CLI commands against a running server |
//! | [`stats`] | Sorting statistics |
//!
//! Data models, the LLM trait, ranking validation and the store traits
//! live in the `learnflow-core` crate.

pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod notes;
pub mod poller;
pub mod rank;
pub mod server;
pub mod sort_cmd;
pub mod sqlite_store;
pub mod stats;
pub mod summarize;
