//! # ArchLens
//!
//! An asynchronous orchestration core for AI-powered repository analysis.
//!
//! ArchLens ingests repository snapshots, runs analysis jobs through a fixed
//! four-stage pipeline (fetch source, compute embeddings, compute insights,
//! persist results), and exposes the results — job status, health scores,
//! and semantic search — via a CLI and a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Ingest  │──▶│ Orchestrator │──▶│ Stage Pipeline │
//! │ (globs)  │   │ dedup+queue  │   │ 4 stages+retry │
//! └──────────┘   └──────┬───────┘   └──────┬────────┘
//!                       │                  │
//!                       ▼                  ▼
//!                 ┌──────────┐   ┌──────────┐  ┌──────────┐
//!                 │  SQLite  │   │ Inference │  │  Search  │
//!                 │  store   │   │ (Gemini)  │  │  index   │
//!                 └──────────┘   └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! archlens init                          # create database
//! archlens ingest my-repo ./checkout    # store a source snapshot
//! archlens analyze my-repo               # run an analysis job
//! archlens search my-repo "auth flow"   # semantic search
//! archlens serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`fingerprint`] | Canonical request fingerprinting |
//! | [`dedup`] | Live-job dedup index |
//! | [`store`] | Job state and source snapshot storage |
//! | [`search_index`] | Embedding index and similarity search |
//! | [`inference`] | AI inference adapter (Gemini / static) |
//! | [`pipeline`] | Stage pipeline executor |
//! | [`orchestrator`] | Job orchestration facade |
//! | [`ingest`] | Filesystem ingest |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection and schema |

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod search_index;
pub mod server;
pub mod store;
