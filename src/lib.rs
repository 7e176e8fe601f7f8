//! # Commit Tracker
//!
//! Periodically pulls recent commits from a remote repository, assigns each a
//! stable identity, annotates it with heuristic analysis, and stores it
//! exactly once per `(repository, revision_id)`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────┐
//! │ CommitSource │──▶│    Pipeline     │──▶│  SQLite  │
//! │ (GitHub API) │   │ assign/analyze  │   │  store   │
//! └──────────────┘   └─────────────────┘   └────┬─────┘
//!                        ▲                      │
//!                 timer / trigger     ┌─────────┤
//!                                     ▼         ▼
//!                                ┌────────┐ ┌────────┐
//!                                │  CLI   │ │  HTTP  │
//!                                └────────┘ └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctrack init                   # create database
//! ctrack ingest                 # run one cycle
//! ctrack commits --limit 10
//! ctrack serve                  # HTTP API + scheduler
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Component error types |
//! | [`identity`] | Identity token assignment |
//! | [`analyzer`] | Heuristic commit-message analysis |
//! | [`source`] | Remote commit sources |
//! | [`store`] | Commit store and upsert |
//! | [`pipeline`] | Ingestion cycle orchestration |
//! | [`service`] | Trigger, health probe and scheduler |
//! | [`query`] | Read-only query surface |
//! | [`server`] | HTTP server |
//! | [`stats`] | `ctrack stats` output |
//! | [`export`] | JSON snapshot export |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod identity;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod service;
pub mod source;
pub mod stats;
pub mod store;
