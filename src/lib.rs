//! # Render Session Core Library
//!
//! This crate implements the connection lifecycle for a remote-rendering
//! session: creating or reopening a cloud session, polling its properties,
//! bringing up the data-plane connection, keeping the lease alive, and
//! loading models once frames are streaming. It is the headless core shared
//! by whatever frontend drives it; the frontend binds to snapshots and change
//! notifications instead of talking to the rendering service directly.
//!
//! ## Crate Structure
//!
//! - **`service`**: The [`service::SessionService`] trait abstracting the
//!   vendor rendering SDK, plus the value types crossing that boundary and a
//!   scriptable mock implementation for tests.
//! - **`session`**: The lifecycle itself: the [`session::ConnectionState`]
//!   machine, lease auto-extension policy, model-load bookkeeping, and the
//!   [`session::SessionController`] actor that owns all of it on one task.
//! - **`config`**: TOML + environment configuration via figment. See
//!   [`config::Settings`].
//! - **`ui_state`**: Small persisted key/value store for the settings that
//!   survive restarts (auto-extension policy, last running session id).
//! - **`error`**: The [`error::SessionError`] enum used across the crate.
//! - **`logging`**: `tracing` subscriber setup for embedding applications.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use render_session::config::Settings;
//! use render_session::service::{mock::MockSessionService, SessionOptions};
//! use render_session::session::SessionController;
//!
//! # async fn run() -> render_session::error::SessionResult<()> {
//! let settings = Settings::default();
//! let service = Arc::new(MockSessionService::new());
//! let controller = SessionController::spawn(service, settings);
//!
//! controller.create_session(SessionOptions::default()).await?;
//! let snapshot = controller.snapshot().await?;
//! println!("state: {:?}", snapshot.state);
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod session;
pub mod ui_state;

pub use error::{SessionError, SessionResult};
pub use session::{ConnectionState, SessionController, SessionEvent, SessionSnapshot};
