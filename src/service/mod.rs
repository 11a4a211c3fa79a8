//! Asynchronous Rendering Service Facade
//!
//! This module defines the boundary between the session controller and the
//! remote-rendering SDK. The SDK is modelled as a small async trait,
//! `SessionService`, so the controller depends only on an interface:
//!
//! - Production code wraps the vendor SDK behind this trait.
//! - Tests use [`mock::MockSessionService`] for deterministic, network-free
//!   runs of the full lifecycle.
//!
//! # Design Philosophy
//!
//! Each facade method:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Maps to exactly one SDK operation
//!
//! Connection-status changes are push-delivered through a broadcast channel
//! rather than a callback registration, so subscribers can be dropped and
//! re-created without unsubscribe bookkeeping.

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Requested VM size for a new rendering session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmSize {
    #[default]
    None,
    Standard,
    Premium,
}

/// Remote status of a session, as reported by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Unknown,
    Starting,
    Ready,
    Stopped,
    Expired,
    Error,
}

impl SessionStatus {
    /// True while the remote side holds an allocation that accrues lease time.
    pub fn is_running(self) -> bool {
        matches!(self, SessionStatus::Ready)
    }
}

/// Status of the data-plane (video/streaming) link to a Ready session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Options for creating a new session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub vm_size: VmSize,
    pub max_lease_minutes: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            vm_size: VmSize::Standard,
            max_lease_minutes: 60,
        }
    }
}

/// Rendering mode requested when connecting the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    #[default]
    Standard,
    DepthComposited,
}

/// One property-poll result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProperties {
    pub status: SessionStatus,
    pub elapsed_minutes: u32,
    pub max_lease_minutes: u32,
    pub hostname: String,
    pub message: String,
}

/// Outcome carried by a connection-status event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionResult {
    /// Status changed as part of normal operation.
    Ok,
    /// The data-plane link was lost mid-session.
    ConnectionLost,
    /// The connection attempt failed outright.
    Failed,
}

/// Pushed whenever the transport status of the active session changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub session_id: String,
    pub status: TransportStatus,
    pub result: ConnectionResult,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionEvent {
    pub fn new(session_id: impl Into<String>, status: TransportStatus, result: ConnectionResult) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            result,
            timestamp: Utc::now(),
        }
    }
}

/// Opaque handle to a remote entity created by a model load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

/// Abstract asynchronous RPC facade over the remote-rendering SDK.
///
/// # Contract
/// - Methods never panic across the boundary; every failure is an `Err`.
/// - Completion of a call may race with pushed [`ConnectionEvent`]s; callers
///   are expected to serialize both onto one owning task.
/// - `stop_session` is best-effort: stopping an already stopped or expired
///   session is an accepted no-op outcome.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Allocate a new session. Returns the opaque session id.
    async fn create_session(&self, options: SessionOptions) -> Result<String>;

    /// Attach to an existing session by id.
    async fn open_session(&self, session_id: &str) -> Result<()>;

    /// Request the remote session be stopped (best-effort).
    async fn stop_session(&self, session_id: &str) -> Result<()>;

    /// Poll current session properties.
    async fn get_session_properties(&self, session_id: &str) -> Result<SessionProperties>;

    /// Establish the data-plane connection to a Ready session.
    ///
    /// Returns the transport status reached by the call itself; later changes
    /// arrive via [`SessionService::subscribe_connection_events`].
    async fn connect_to_runtime(&self, session_id: &str, mode: RenderMode) -> Result<TransportStatus>;

    /// Tear down the data-plane connection (fire-and-forget semantics).
    async fn disconnect_from_runtime(&self, session_id: &str) -> Result<()>;

    /// Renew the session lease to `total_minutes` total.
    async fn renew_lease(&self, session_id: &str, total_minutes: u32) -> Result<()>;

    /// Load a model from a SAS URL into the connected session.
    ///
    /// Progress in `[0.0, 1.0]` is streamed through `progress`; values may be
    /// delivered out of order and the receiver must treat them monotonically.
    async fn load_model(
        &self,
        session_id: &str,
        sas_url: &str,
        progress: mpsc::Sender<f32>,
    ) -> Result<EntityHandle>;

    /// Subscribe to pushed connection-status events.
    fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Let the SDK drain its internal event queue / video stream.
    ///
    /// Called on a fixed short cadence while any session exists. The default
    /// implementation is a no-op for services without an internal pump.
    async fn pump(&self) {}
}
