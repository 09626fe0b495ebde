//! # Grant Discovery
//!
//! Finds housing assistance grants published by outside sources, scores how
//! complete each listing is, checks it against the existing program catalog
//! for duplicates, and queues it for admin review.
//!
//! Discovery never publishes anything on its own. Every new listing lands as
//! `pending`; only an admin approval creates a catalog program.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────┐   ┌───────────┐
//! │   Sources    │──▶│        Pipeline        │──▶│  SQLite   │
//! │ RSS/API/File │   │ Extract+Score+Match    │   │ grants,   │
//! └──────────────┘   └───────────┬────────────┘   │ runs      │
//!                                │ notify         └─────┬─────┘
//!                                ▼                      │
//!                          ┌──────────┐          ┌──────┴─────┐
//!                          │ Webhook  │          │ Review API │
//!                          └──────────┘          │ CLI / HTTP │
//!                                                └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grants init                          # create database
//! grants catalog import programs.json  # seed the catalog
//! grants discover rss                  # run RSS sources
//! grants grants --status pending       # inspect the review queue
//! grants approve <id>                  # promote to a catalog program
//! grants serve                         # admin HTTP API (+ scheduler)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | `GrantSource` trait and source registry |
//! | [`source_rss`] | RSS/Atom feeds |
//! | [`source_api`] | JSON grants APIs |
//! | [`source_fs`] | Local feed and JSON files |
//! | [`extract`] | Field extraction from listings |
//! | [`confidence`] | Completeness-based confidence scores |
//! | [`matcher`] | Fuzzy duplicate matching against the catalog |
//! | [`discovery`] | Run orchestration |
//! | [`review`] | Approve, reject, mark duplicate |
//! | [`query`] | Review queue and run history reads |
//! | [`catalog`] | Program catalog access |
//! | [`server`] | Admin HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod catalog;
pub mod confidence;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod query;
pub mod review;
pub mod scheduler;
pub mod server;
pub mod source_api;
pub mod source_fs;
pub mod source_rss;
pub mod sources;
pub mod stats;
pub mod traits;
