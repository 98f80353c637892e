//! transcriptq - caption transcript acquisition pipeline.
//!
//! Jobs for (video, language) pairs are deduplicated, queued, fetched through
//! an ordered set of caption providers, optionally normalized into sentences
//! and persisted on the video row. Transient failures are retried with a
//! bounded backoff through a delayed set.

#![allow(clippy::should_implement_trait)]

pub mod config;
pub mod http_client;
pub mod models;
pub mod normalize;
pub mod queue;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod transcript;
pub mod utils;
pub mod worker;
