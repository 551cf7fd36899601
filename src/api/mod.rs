//! HTTP API for the SQL advisor.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/analyses` - Start a batch of analyses
//! - `GET /api/analyses/{session_id}` - Poll a batch
//! - `DELETE /api/analyses/{session_id}` - Reap a finished batch
//! - `POST /api/optimize` - Single-shot rewrite of one statement

mod routes;
pub mod types;

pub use routes::{build_state, router, serve, AppState};
pub use types::*;
