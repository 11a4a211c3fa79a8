//! Mock Rendering Service
//!
//! In-process [`SessionService`] implementation for testing the controller
//! without a network or vendor SDK. Behavior is deterministic apart from a
//! small jitter on model-load progress values.
//!
//! # Knobs
//!
//! - `set_op_delay` - latency applied to create/open/properties/connect/renew
//!   calls
//! - `set_polls_until_ready` - property polls a new session reports `Starting`
//!   before flipping to `Ready`
//! - `set_hold_connecting` - connect attempts park at `Connecting` forever
//! - per-operation failure injection (`set_fail_create`, ...)
//! - `emit_connection_lost` - simulates a dropped data-plane link

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::service::{
    ConnectionEvent, ConnectionResult, EntityHandle, RenderMode, SessionOptions,
    SessionProperties, SessionService, SessionStatus, TransportStatus,
};

#[derive(Clone, Debug)]
struct MockSession {
    status: SessionStatus,
    transport: TransportStatus,
    elapsed_minutes: u32,
    max_lease_minutes: u32,
    polls_until_ready: u32,
}

/// Mock rendering service with scripted session behavior.
pub struct MockSessionService {
    sessions: Arc<RwLock<HashMap<String, MockSession>>>,
    events_tx: broadcast::Sender<ConnectionEvent>,

    // Behavior knobs
    op_delay_ms: AtomicU64,
    polls_until_ready: AtomicU32,
    hold_connecting: AtomicBool,
    fail_create: AtomicBool,
    fail_open: AtomicBool,
    fail_properties: AtomicBool,
    fail_connect: AtomicBool,
    fail_renew: AtomicBool,
    fail_load: AtomicBool,
    load_steps: AtomicU32,

    // Call accounting for single-flight assertions
    create_calls: AtomicUsize,
    open_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    property_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    load_calls: AtomicUsize,
    pump_calls: AtomicUsize,

    last_renew_target: AtomicU32,
    next_entity: AtomicU64,
}

impl MockSessionService {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            op_delay_ms: AtomicU64::new(0),
            polls_until_ready: AtomicU32::new(1),
            hold_connecting: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_properties: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_renew: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
            load_steps: AtomicU32::new(4),
            create_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            property_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            pump_calls: AtomicUsize::new(0),
            last_renew_target: AtomicU32::new(0),
            next_entity: AtomicU64::new(1),
        }
    }

    /// Latency applied to create/open/properties/connect/renew calls.
    pub fn set_op_delay(&self, delay: Duration) {
        self.op_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of property polls a new session spends in `Starting`.
    pub fn set_polls_until_ready(&self, polls: u32) {
        self.polls_until_ready.store(polls, Ordering::SeqCst);
    }

    /// Park connect attempts at `Connecting` without ever completing.
    pub fn set_hold_connecting(&self, hold: bool) {
        self.hold_connecting.store(hold, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_properties(&self, fail: bool) {
        self.fail_properties.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_renew(&self, fail: bool) {
        self.fail_renew.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Number of intermediate progress values emitted per model load.
    pub fn set_load_steps(&self, steps: u32) {
        self.load_steps.store(steps.max(1), Ordering::SeqCst);
    }

    /// Overwrite the elapsed lease minutes reported for `session_id`.
    pub async fn set_elapsed_minutes(&self, session_id: &str, minutes: u32) {
        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.elapsed_minutes = minutes;
        }
    }

    /// Simulate a dropped data-plane link for `session_id`.
    pub async fn emit_connection_lost(&self, session_id: &str) {
        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.transport = TransportStatus::Disconnected;
        }
        let _ = self.events_tx.send(ConnectionEvent::new(
            session_id,
            TransportStatus::Disconnected,
            ConnectionResult::ConnectionLost,
        ));
    }

    /// Force the remote status of `session_id` (e.g. simulate expiry).
    pub async fn set_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.status = status;
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn property_calls(&self) -> usize {
        self.property_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn pump_calls(&self) -> usize {
        self.pump_calls.load(Ordering::SeqCst)
    }

    /// Total minutes requested by the most recent lease renewal, if any.
    pub fn last_renew_target(&self) -> Option<u32> {
        match self.last_renew_target.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    async fn apply_delay(&self) {
        let ms = self.op_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    fn emit(&self, session_id: &str, status: TransportStatus, result: ConnectionResult) {
        let _ = self
            .events_tx
            .send(ConnectionEvent::new(session_id, status, result));
    }
}

impl Default for MockSessionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn create_session(&self, options: SessionOptions) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("create failed (injected)");
        }
        let id = format!("mock-{}", Uuid::new_v4());
        self.sessions.write().await.insert(
            id.clone(),
            MockSession {
                status: SessionStatus::Starting,
                transport: TransportStatus::Disconnected,
                elapsed_minutes: 0,
                max_lease_minutes: options.max_lease_minutes,
                polls_until_ready: self.polls_until_ready.load(Ordering::SeqCst),
            },
        );
        Ok(id)
    }

    async fn open_session(&self, session_id: &str) -> Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        if self.fail_open.load(Ordering::SeqCst) {
            bail!("open failed (injected)");
        }
        let mut sessions = self.sessions.write().await;
        // Unknown ids stand in for a session still running from a previous run.
        sessions.entry(session_id.to_string()).or_insert(MockSession {
            status: SessionStatus::Ready,
            transport: TransportStatus::Disconnected,
            elapsed_minutes: 0,
            max_lease_minutes: 60,
            polls_until_ready: 0,
        });
        Ok(())
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.status = SessionStatus::Stopped;
            sess.transport = TransportStatus::Disconnected;
        }
        // Stopping an unknown/stopped session is an accepted no-op.
        Ok(())
    }

    async fn get_session_properties(&self, session_id: &str) -> Result<SessionProperties> {
        self.property_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        if self.fail_properties.load(Ordering::SeqCst) {
            bail!("property poll failed (injected)");
        }
        let mut sessions = self.sessions.write().await;
        let sess = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session '{session_id}'"))?;
        if sess.status == SessionStatus::Starting {
            if sess.polls_until_ready == 0 {
                sess.status = SessionStatus::Ready;
            } else {
                sess.polls_until_ready -= 1;
                if sess.polls_until_ready == 0 {
                    sess.status = SessionStatus::Ready;
                }
            }
        }
        Ok(SessionProperties {
            status: sess.status,
            elapsed_minutes: sess.elapsed_minutes,
            max_lease_minutes: sess.max_lease_minutes,
            hostname: format!("{session_id}.mock.example"),
            message: String::new(),
        })
    }

    async fn connect_to_runtime(
        &self,
        session_id: &str,
        _mode: RenderMode,
    ) -> Result<TransportStatus> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        // Knobs are sampled at entry; changing them mid-delay only affects
        // later calls.
        let delay_ms = self.op_delay_ms.load(Ordering::SeqCst);
        let fail = self.fail_connect.load(Ordering::SeqCst);
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        if fail {
            bail!("connect failed (injected)");
        }
        {
            let mut sessions = self.sessions.write().await;
            let sess = sessions
                .get_mut(session_id)
                .ok_or_else(|| anyhow::anyhow!("unknown session '{session_id}'"))?;
            sess.transport = TransportStatus::Connecting;
        }
        self.emit(session_id, TransportStatus::Connecting, ConnectionResult::Ok);

        if self.hold_connecting.load(Ordering::SeqCst) {
            return Ok(TransportStatus::Connecting);
        }

        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.transport = TransportStatus::Connected;
        }
        self.emit(session_id, TransportStatus::Connected, ConnectionResult::Ok);
        Ok(TransportStatus::Connected)
    }

    async fn disconnect_from_runtime(&self, session_id: &str) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sess) = self.sessions.write().await.get_mut(session_id) {
            sess.transport = TransportStatus::Disconnected;
        }
        self.emit(
            session_id,
            TransportStatus::Disconnected,
            ConnectionResult::Ok,
        );
        Ok(())
    }

    async fn renew_lease(&self, session_id: &str, total_minutes: u32) -> Result<()> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_delay().await;
        if self.fail_renew.load(Ordering::SeqCst) {
            bail!("renew failed (injected)");
        }
        self.last_renew_target.store(total_minutes, Ordering::SeqCst);
        let mut sessions = self.sessions.write().await;
        let sess = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session '{session_id}'"))?;
        sess.max_lease_minutes = total_minutes;
        Ok(())
    }

    async fn load_model(
        &self,
        session_id: &str,
        _sas_url: &str,
        progress: mpsc::Sender<f32>,
    ) -> Result<EntityHandle> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        {
            let sessions = self.sessions.read().await;
            let sess = sessions
                .get(session_id)
                .ok_or_else(|| anyhow::anyhow!("unknown session '{session_id}'"))?;
            if sess.transport != TransportStatus::Connected {
                bail!("runtime not connected");
            }
        }
        if self.fail_load.load(Ordering::SeqCst) {
            bail!("model load failed (injected)");
        }
        let steps = self.load_steps.load(Ordering::SeqCst).max(1);
        for step in 1..steps {
            // Small downward jitter keeps intermediate values realistic while
            // staying strictly below the final 1.0.
            let jitter: f32 = rand::thread_rng().gen_range(0.0..0.04);
            let value = (step as f32 / steps as f32 - jitter).clamp(0.0, 0.99);
            let _ = progress.send(value).await;
            sleep(Duration::from_millis(5)).await;
        }
        let _ = progress.send(1.0).await;
        Ok(EntityHandle(self.next_entity.fetch_add(1, Ordering::SeqCst)))
    }

    fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    async fn pump(&self) {
        self.pump_calls.fetch_add(1, Ordering::SeqCst);
    }
}
