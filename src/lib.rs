//! # Examgen
//!
//! An adaptive assessment-generation engine for exam-practice platforms.
//!
//! Examgen turns a learner's attempt history and a question pool into a
//! personalized practice assessment. A five-stage pipeline resolves the
//! scope of the request, gathers candidate questions, compiles an
//! instruction document, sends it through a reasoning boundary for
//! selection, and materializes the result into a persisted assessment.
//! Alongside the pipeline, an analytics engine maintains rolling
//! performance summaries and serves competency snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              GenerationPipeline                  │
//! │  scope → candidates → payload → reasoning → mat. │
//! └──────┬──────────────┬──────────────┬─────────────┘
//!        ▼              ▼              ▼
//!   ┌─────────┐   ┌───────────┐   ┌──────────┐
//!   │ SQLite  │   │ Reasoning │   │ Analytics│
//!   │ stores  │   │ boundary  │   │  engine  │
//!   └─────────┘   └───────────┘   └────┬─────┘
//!                                      ▼
//!                              CompetencySnapshot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Store and reasoning-client seams |
//! | [`scope`] | Scope resolution (explicit + auto-detected) |
//! | [`candidates`] | Two-attempt candidate selection |
//! | [`payload`] | Instruction-document compilation |
//! | [`reasoning`] | Reasoning clients and response parsing |
//! | [`materialize`] | Validation, assembly, persistence |
//! | [`analytics`] | Rolling performance summaries |
//! | [`pipeline`] | Stage orchestration |
//! | [`store`] | sqlx-backed store implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analytics;
pub mod candidates;
pub mod config;
pub mod db;
pub mod error;
pub mod materialize;
pub mod migrate;
pub mod models;
pub mod payload;
pub mod pipeline;
pub mod reasoning;
pub mod scope;
pub mod store;
pub mod traits;

pub use analytics::AnalyticsEngine;
pub use config::Config;
pub use error::GenerateError;
pub use pipeline::GenerationPipeline;
