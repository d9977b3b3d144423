//! HTTP surface for the stream delivery engine.
//!
//! Three concerns, all read-only from the engine's perspective:
//!
//! - **Playback resolution**: `GET /streams/{id}` activates the source if
//!   needed and returns the manifest URL, or a distinguishable failure
//!   (`404` unknown, `503` unavailable, `504` timeout). Clients retry on
//!   `503`/`504` with growing per-attempt timeouts.
//! - **Health feed**: `GET /health[/{id}]`, per-source state for
//!   dashboards; never triggers activation.
//! - **Media serving**: manifest and segment files streamed straight off
//!   the segment store.
//!
//! # Usage
//!
//! ```rust,ignore
//! use playback_api::stream_router;
//! use std::sync::Arc;
//!
//! let app = stream_router(engine.clone());
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod routes;

pub use routes::stream_router;
