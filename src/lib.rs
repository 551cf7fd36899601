//! # SQL Advisor
//!
//! Background analysis of slow SQL statements by a reasoning model that may
//! inspect the customer's database with read-only diagnostic queries before
//! recommending a fix.
//!
//! This library provides:
//! - A bounded pool of background analyses with pollable per-task progress
//! - A multi-turn tool-calling loop against an OpenAI-compatible service
//! - A read-only query runner for Postgres/YugabyteDB
//! - A durable cache of previous suggestions
//! - An HTTP API over all of the above
//!
//! ## Task Flow
//! 1. Client submits a batch of statements
//! 2. Cached statements complete immediately, the rest queue for a worker
//! 3. Each worker converses with the model, running the diagnostic queries it asks for
//! 4. Client polls progress, then reaps the session once every task is done
//!
//! ## Modules
//! - `analysis`: session store, state machine, turn driver, workers, dispatcher, reaper
//! - `llm`: reasoning-service client
//! - `tools`: tools the model can call
//! - `customer_db`: read-only access to the customer database
//! - `suggestions`: suggestion cache
//! - `optimizer`: single-shot rewrites

pub mod analysis;
pub mod api;
pub mod config;
pub mod customer_db;
pub mod llm;
pub mod optimizer;
pub mod suggestions;
pub mod tools;

pub use analysis::{AnalysisRequest, AnalysisStatus, AnalysisTask, Analyzer};
pub use config::Config;
