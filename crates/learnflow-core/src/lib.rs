//! # LearnFlow Core
//!
//! Shared, runtime-agnostic logic for LearnFlow: data models, the LLM
//! capability trait, the ranking contract (prompt, parsing, validation),
//! and the storage traits with in-memory implementations.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. The
//! `learnflow` application crate supplies the SQLite store, the OpenAI
//! client, and the HTTP surface.

pub mod llm;
pub mod models;
pub mod ranking;
pub mod store;
