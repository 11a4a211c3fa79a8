//! Session Lifecycle Manager
//!
//! [`SessionController`] owns the single active rendering session and drives
//! its whole lifecycle: create/open, property polling, runtime connection,
//! lease renewal, model loading and teardown. All mutable state lives inside
//! one tokio task; public methods post commands over a mailbox and SDK
//! completions arrive as internal messages on a second one, so every state
//! mutation is serialized onto the owning task. Callbacks raced against a
//! closed or replaced session are dropped by a generation counter.
//!
//! Two tickers drive the periodic work: a property-poll ticker that runs fast
//! until the runtime is connected and slow afterwards, and a ~100 ms pump
//! ticker that lets the SDK drain its internal event queue while any session
//! exists. Both are idle when no session is active.
//!
//! Failure policy: recoverable failures (a poll, a renewal, a single connect
//! attempt) are logged as warnings and retried on the next natural tick;
//! create/open failures are logged as errors and surface as the `Error`
//! state; a lost connection triggers exactly one automatic close-and-reopen
//! of the same session id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{SessionError, SessionResult};
use crate::service::{
    ConnectionEvent, ConnectionResult, EntityHandle, SessionOptions, SessionProperties,
    SessionService, SessionStatus, TransportStatus,
};
use crate::session::lease::LeaseExtensionPolicy;
use crate::session::models::{LoadedModel, ModelLoader, SlotId};
use crate::session::state::{ConnectionState, ConnectionStateTracker};
use crate::ui_state::{self, UiStateStore};

const COMMAND_BUFFER: usize = 32;
const COMPLETION_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of the controller, for UI binding.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub elapsed_minutes: u32,
    pub max_lease_minutes: u32,
    pub hostname: Option<String>,
    pub message: Option<String>,
    pub model_progress: f32,
    pub loaded_models: Vec<LoadedModel>,
    /// Index into `loaded_models` of the model the frontend is focused on.
    pub selected_model: Option<usize>,
}

/// Change notifications emitted by the controller.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Connection state or session properties changed.
    StatusChanged {
        snapshot: SessionSnapshot,
        timestamp: DateTime<Utc>,
    },
    /// The loaded-model set changed (including being cleared on disconnect).
    ModelsChanged {
        loaded: Vec<LoadedModel>,
        timestamp: DateTime<Utc>,
    },
    /// Aggregate model-load progress changed.
    ModelProgress {
        progress: f32,
        timestamp: DateTime<Utc>,
    },
}

enum Command {
    Create {
        options: SessionOptions,
        reply: oneshot::Sender<bool>,
    },
    Open {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    Close {
        keep_running: bool,
        reply: oneshot::Sender<bool>,
    },
    Poll {
        reply: oneshot::Sender<bool>,
    },
    Connect {
        reply: oneshot::Sender<bool>,
    },
    ExtendLease {
        total_minutes: u32,
        reply: oneshot::Sender<bool>,
    },
    LoadModel {
        name: String,
        sas_url: String,
        reply: oneshot::Sender<bool>,
    },
    RemoveModel {
        index: usize,
        reply: oneshot::Sender<bool>,
    },
    SelectModel {
        index: Option<usize>,
        reply: oneshot::Sender<bool>,
    },
    SetAutoExtension {
        policy: LeaseExtensionPolicy,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// SDK completions and pushed events, marshalled onto the owning task.
enum Completion {
    Created {
        generation: u64,
        result: anyhow::Result<String>,
    },
    Opened {
        generation: u64,
        session_id: String,
        via_reconnect: bool,
        result: anyhow::Result<()>,
    },
    Properties {
        generation: u64,
        result: anyhow::Result<SessionProperties>,
    },
    Connected {
        generation: u64,
        /// Which connect attempt produced this result; see `Actor::connect_epoch`.
        attempt: u64,
        result: anyhow::Result<TransportStatus>,
    },
    Renewed {
        generation: u64,
        result: anyhow::Result<()>,
    },
    ModelProgress {
        generation: u64,
        slot: SlotId,
        value: f32,
    },
    ModelLoaded {
        generation: u64,
        slot: SlotId,
        result: anyhow::Result<EntityHandle>,
    },
    Connection {
        generation: u64,
        event: ConnectionEvent,
    },
}

impl Completion {
    fn generation(&self) -> u64 {
        match self {
            Completion::Created { generation, .. }
            | Completion::Opened { generation, .. }
            | Completion::Properties { generation, .. }
            | Completion::Connected { generation, .. }
            | Completion::Renewed { generation, .. }
            | Completion::ModelProgress { generation, .. }
            | Completion::ModelLoaded { generation, .. }
            | Completion::Connection { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct PendingOps {
    /// Covers both create and open; they share the single-flight lane.
    create: bool,
    poll: bool,
    connect: bool,
    renew: bool,
}

#[derive(Debug)]
struct ActiveSession {
    id: String,
    remote_status: SessionStatus,
    transport: TransportStatus,
    elapsed_minutes: u32,
    max_lease_minutes: u32,
    hostname: String,
    message: String,
}

impl ActiveSession {
    fn new(id: String) -> Self {
        Self {
            id,
            remote_status: SessionStatus::Unknown,
            transport: TransportStatus::Disconnected,
            elapsed_minutes: 0,
            max_lease_minutes: 0,
            hostname: String::new(),
            message: String::new(),
        }
    }
}

/// Handle to the lifecycle actor.
///
/// All methods returning `SessionResult<bool>` follow the misuse-guard
/// convention: `Ok(false)` means the operation was rejected (already in
/// flight, or the session is in the wrong state) without side effects.
pub struct SessionController {
    command_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionController {
    /// Spawn the controller task.
    pub fn spawn(service: Arc<dyn SessionService>, settings: Settings) -> Self {
        Self::spawn_inner(service, settings, None)
    }

    /// Spawn the controller task with a persistent UI-state store. Persisted
    /// auto-extension settings override the configured defaults, and the
    /// running session id is written through for reattach-at-startup.
    pub fn spawn_with_store(
        service: Arc<dyn SessionService>,
        settings: Settings,
        store: Arc<UiStateStore>,
    ) -> Self {
        Self::spawn_inner(service, settings, Some(store))
    }

    fn spawn_inner(
        service: Arc<dyn SessionService>,
        settings: Settings,
        store: Option<Arc<UiStateStore>>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(COMPLETION_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let lease_policy = match &store {
            Some(store) => LeaseExtensionPolicy {
                enabled: store.get_or(ui_state::KEY_AUTO_EXTEND, settings.auto_extension.enabled),
                extension_minutes: store.get_or(
                    ui_state::KEY_EXTENSION_MINUTES,
                    settings.auto_extension.extension_minutes,
                ),
            },
            None => settings.auto_extension,
        };

        let actor = Actor {
            service,
            settings,
            store,
            tracker: ConnectionStateTracker::new(),
            session: None,
            pending: PendingOps::default(),
            connect_started: None,
            connect_epoch: 0,
            reconnect_attempted: false,
            models: ModelLoader::new(),
            lease_policy,
            generation: 0,
            last_error: None,
            event_listener: None,
            event_tx: event_tx.clone(),
            internal_tx,
        };
        let task = tokio::spawn(actor.run(command_rx, internal_rx));

        Self {
            command_tx,
            event_tx,
            task,
        }
    }

    /// Subscribe to controller change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub async fn create_session(&self, options: SessionOptions) -> SessionResult<bool> {
        self.request(|reply| Command::Create { options, reply }).await
    }

    pub async fn open_session(&self, session_id: impl Into<String>) -> SessionResult<bool> {
        let session_id = session_id.into();
        self.request(|reply| Command::Open { session_id, reply }).await
    }

    pub async fn close_session(&self, keep_running: bool) -> SessionResult<bool> {
        self.request(|reply| Command::Close { keep_running, reply }).await
    }

    /// Issue a property poll now. No-op (`Ok(false)`) while one is in flight.
    pub async fn update_session_properties(&self) -> SessionResult<bool> {
        self.request(|reply| Command::Poll { reply }).await
    }

    pub async fn connect_to_runtime(&self) -> SessionResult<bool> {
        self.request(|reply| Command::Connect { reply }).await
    }

    pub async fn extend_lease(&self, total_minutes: u32) -> SessionResult<bool> {
        self.request(|reply| Command::ExtendLease { total_minutes, reply }).await
    }

    pub async fn load_model(
        &self,
        name: impl Into<String>,
        sas_url: impl Into<String>,
    ) -> SessionResult<bool> {
        let name = name.into();
        let sas_url = sas_url.into();
        self.request(|reply| Command::LoadModel { name, sas_url, reply }).await
    }

    pub async fn remove_model(&self, index: usize) -> SessionResult<bool> {
        self.request(|reply| Command::RemoveModel { index, reply }).await
    }

    /// Select a loaded model by index, or `None` to clear the selection.
    /// Returns false when the index does not refer to a loaded model.
    pub async fn select_model(&self, index: Option<usize>) -> SessionResult<bool> {
        self.request(|reply| Command::SelectModel { index, reply }).await
    }

    /// Update (and persist, when a store is attached) the auto-extension policy.
    pub async fn set_auto_extension(&self, policy: LeaseExtensionPolicy) -> SessionResult<()> {
        self.request(|reply| Command::SetAutoExtension { policy, reply }).await
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the controller task. Does not stop the remote session; call
    /// [`SessionController::close_session`] first for that.
    pub async fn shutdown(self) -> SessionResult<()> {
        let _ = self.command_tx.send(Command::Shutdown).await;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SessionError::Service(anyhow::anyhow!(
                "controller task failed: {err}"
            ))),
            Err(_) => {
                warn!("controller shutdown timed out");
                Ok(())
            }
        }
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> SessionResult<R> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(build(tx))
            .await
            .map_err(|_| SessionError::ControllerClosed)?;
        rx.await.map_err(|_| SessionError::ControllerClosed)
    }
}

struct Actor {
    service: Arc<dyn SessionService>,
    settings: Settings,
    store: Option<Arc<UiStateStore>>,
    tracker: ConnectionStateTracker,
    session: Option<ActiveSession>,
    pending: PendingOps,
    connect_started: Option<Instant>,
    /// Bumped on every connect attempt and on timeout abandonment. There is
    /// no SDK cancellation call, so an abandoned attempt stays outstanding
    /// within the same session epoch; its completion must not be mistaken
    /// for the follow-up attempt's.
    connect_epoch: u64,
    reconnect_attempted: bool,
    models: ModelLoader,
    lease_policy: LeaseExtensionPolicy,
    /// Bumped whenever the session epoch ends; completions from an older
    /// epoch are dropped on arrival.
    generation: u64,
    last_error: Option<String>,
    event_listener: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<SessionEvent>,
    internal_tx: mpsc::Sender<Completion>,
}

fn interval_after(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

impl Actor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::Receiver<Completion>,
    ) {
        let mut poll_fast = true;
        let mut poll_timer = interval_after(self.settings.poll_interval_fast);
        let mut pump_timer = interval_after(self.settings.pump_interval);

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                msg = internal_rx.recv() => match msg {
                    Some(msg) => self.handle_completion(msg),
                    None => break,
                },
                _ = poll_timer.tick(), if self.session.is_some() => {
                    self.start_poll();
                }
                _ = pump_timer.tick(), if self.session.is_some() => {
                    self.service.pump().await;
                }
            }

            // Poll cadence: fast until streaming, slow on a stable connection.
            let want_fast = !self.tracker.state().is_connected();
            if want_fast != poll_fast {
                poll_fast = want_fast;
                let period = if poll_fast {
                    self.settings.poll_interval_fast
                } else {
                    self.settings.poll_interval_slow
                };
                poll_timer = interval_after(period);
            }
        }

        if let Some(listener) = self.event_listener.take() {
            listener.abort();
        }
        debug!("session controller stopped");
    }

    /// Returns true when the actor should shut down.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Create { options, reply } => {
                let _ = reply.send(self.start_create(options));
            }
            Command::Open { session_id, reply } => {
                let _ = reply.send(self.start_open(session_id));
            }
            Command::Close { keep_running, reply } => {
                let _ = reply.send(self.close_session(keep_running));
            }
            Command::Poll { reply } => {
                let _ = reply.send(self.start_poll());
            }
            Command::Connect { reply } => {
                let _ = reply.send(self.start_connect());
            }
            Command::ExtendLease { total_minutes, reply } => {
                let _ = reply.send(self.start_renew(total_minutes));
            }
            Command::LoadModel { name, sas_url, reply } => {
                let _ = reply.send(self.start_load_model(name, sas_url));
            }
            Command::RemoveModel { index, reply } => {
                let removed = self.models.remove(index).is_some();
                if removed {
                    self.emit_models_changed();
                }
                let _ = reply.send(removed);
            }
            Command::SelectModel { index, reply } => {
                let applied = self.models.select(index);
                if applied {
                    self.emit_status();
                }
                let _ = reply.send(applied);
            }
            Command::SetAutoExtension { policy, reply } => {
                self.set_auto_extension(policy);
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => return true,
        }
        false
    }

    fn handle_completion(&mut self, msg: Completion) {
        if msg.generation() != self.generation {
            debug!("dropping completion from a previous session epoch");
            return;
        }
        match msg {
            Completion::Created { result, .. } => self.on_created(result),
            Completion::Opened {
                session_id,
                via_reconnect,
                result,
                ..
            } => self.on_opened(session_id, via_reconnect, result),
            Completion::Properties { result, .. } => self.on_properties(result),
            Completion::Connected { attempt, result, .. } => self.on_connected(attempt, result),
            Completion::Renewed { result, .. } => self.on_renewed(result),
            Completion::ModelProgress { slot, value, .. } => {
                self.models.record_progress(slot, value);
                self.emit_model_progress();
            }
            Completion::ModelLoaded { slot, result, .. } => self.on_model_loaded(slot, result),
            Completion::Connection { event, .. } => self.on_connection_event(event),
        }
    }

    // ---- session creation / opening -------------------------------------

    fn start_create(&mut self, options: SessionOptions) -> bool {
        if self.pending.create || self.tracker.state().is_active() {
            return false;
        }
        self.pending.create = true;
        self.last_error = None;
        self.tracker.force(ConnectionState::OpeningSession);
        self.emit_status();

        info!(vm_size = ?options.vm_size, lease_minutes = options.max_lease_minutes, "creating session");
        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = service.create_session(options).await;
            let _ = tx.send(Completion::Created { generation, result }).await;
        });
        true
    }

    fn start_open(&mut self, session_id: String) -> bool {
        if self.pending.create || self.tracker.state().is_active() {
            return false;
        }
        self.last_error = None;
        self.tracker.force(ConnectionState::OpeningSession);
        self.emit_status();
        self.spawn_open(session_id, false);
        true
    }

    fn spawn_open(&mut self, session_id: String, via_reconnect: bool) {
        self.pending.create = true;
        info!(session_id = %session_id, via_reconnect, "opening session");
        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = service.open_session(&session_id).await;
            let _ = tx
                .send(Completion::Opened {
                    generation,
                    session_id,
                    via_reconnect,
                    result,
                })
                .await;
        });
    }

    fn on_created(&mut self, result: anyhow::Result<String>) {
        self.pending.create = false;
        match result {
            Ok(id) => {
                info!(session_id = %id, "session created");
                self.install_session(id, true);
                self.start_poll();
            }
            Err(err) => {
                error!(error = %err, "session creation failed");
                self.last_error = Some(err.to_string());
                self.tracker.force(ConnectionState::Error);
            }
        }
        self.emit_status();
    }

    fn on_opened(&mut self, session_id: String, via_reconnect: bool, result: anyhow::Result<()>) {
        self.pending.create = false;
        match result {
            Ok(()) => {
                info!(session_id = %session_id, "session opened");
                self.install_session(session_id, !via_reconnect);
                self.start_poll();
            }
            Err(err) => {
                if via_reconnect {
                    error!(session_id = %session_id, error = %err, "failed to reopen session after connection loss");
                } else {
                    error!(session_id = %session_id, error = %err, "failed to open session");
                }
                self.last_error = Some(err.to_string());
                self.tracker.force(ConnectionState::Error);
            }
        }
        self.emit_status();
    }

    /// Bind a freshly created/opened session: new record, pushed-event
    /// subscription for the new epoch, persisted running id.
    fn install_session(&mut self, id: String, reset_retry: bool) {
        self.generation += 1;
        if reset_retry {
            self.reconnect_attempted = false;
        }
        self.session = Some(ActiveSession::new(id.clone()));

        if let Some(old) = self.event_listener.take() {
            old.abort();
        }
        let mut events = self.service.subscribe_connection_events();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let session_id = id.clone();
        self.event_listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.session_id == session_id => {
                        if tx
                            .send(Completion::Connection { generation, event })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "connection event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        if let Some(store) = &self.store {
            if let Err(err) = store.set(ui_state::KEY_RUNNING_SESSION_ID, &id) {
                warn!(error = %err, "failed to persist running session id");
            }
        }
    }

    // ---- teardown --------------------------------------------------------

    fn close_session(&mut self, keep_running: bool) -> bool {
        if !self.tracker.state().is_stoppable() {
            return false;
        }
        match self.session.take() {
            Some(sess) => {
                self.tracker.force(ConnectionState::Disconnecting);
                self.emit_status();

                info!(session_id = %sess.id, keep_running, "closing session");
                let service = self.service.clone();
                let id = sess.id;
                tokio::spawn(async move {
                    if let Err(err) = service.disconnect_from_runtime(&id).await {
                        warn!(error = %err, "runtime disconnect failed");
                    }
                    if !keep_running {
                        // Stopping an already stopped/expired session is an
                        // accepted no-op outcome.
                        if let Err(err) = service.stop_session(&id).await {
                            warn!(error = %err, "session stop request failed");
                        }
                    }
                });
            }
            None => {
                // Create/open still in flight; abandon it.
                debug!("closing session before create/open completed");
            }
        }
        self.end_epoch();
        if self.models.clear() {
            self.emit_models_changed();
        }
        self.forget_running_session_id();
        self.tracker.force(ConnectionState::Stopped);
        self.emit_status();
        true
    }

    /// Invalidate outstanding completions and reset per-session flags.
    fn end_epoch(&mut self) {
        self.generation += 1;
        self.pending = PendingOps::default();
        self.connect_started = None;
        if let Some(listener) = self.event_listener.take() {
            listener.abort();
        }
    }

    /// Drop the local session record once a terminal state is reached.
    fn sync_terminal_state(&mut self) {
        let state = self.tracker.state();
        if !matches!(
            state,
            ConnectionState::Stopped | ConnectionState::Expired | ConnectionState::Error
        ) {
            return;
        }
        if let Some(sess) = self.session.take() {
            warn!(session_id = %sess.id, state = ?state, "session ended");
            if !sess.message.is_empty() {
                self.last_error = Some(sess.message);
            }
            self.end_epoch();
            if self.models.clear() {
                self.emit_models_changed();
            }
            self.forget_running_session_id();
        }
    }

    fn forget_running_session_id(&mut self) {
        if let Some(store) = &self.store {
            if let Err(err) = store.remove(ui_state::KEY_RUNNING_SESSION_ID) {
                warn!(error = %err, "failed to clear running session id");
            }
        }
    }

    // ---- property polling ------------------------------------------------

    fn start_poll(&mut self) -> bool {
        if self.pending.poll {
            return false;
        }
        let Some(sess) = &self.session else {
            return false;
        };
        self.pending.poll = true;
        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let id = sess.id.clone();
        tokio::spawn(async move {
            let result = service.get_session_properties(&id).await;
            let _ = tx.send(Completion::Properties { generation, result }).await;
        });
        true
    }

    fn on_properties(&mut self, result: anyhow::Result<SessionProperties>) {
        self.pending.poll = false;
        match result {
            Ok(props) => {
                let mut transport = TransportStatus::Disconnected;
                if let Some(sess) = self.session.as_mut() {
                    sess.remote_status = props.status;
                    sess.elapsed_minutes = props.elapsed_minutes;
                    sess.max_lease_minutes = props.max_lease_minutes;
                    sess.hostname = props.hostname;
                    sess.message = props.message;
                    transport = sess.transport;
                }
                self.tracker.update(props.status, transport);
                // The observation table keeps OpeningSession until the
                // manager performs the ready handover explicitly.
                if self.tracker.state() == ConnectionState::OpeningSession
                    && props.status == SessionStatus::Ready
                {
                    self.tracker.force(ConnectionState::SessionOpen);
                }
            }
            Err(err) => {
                warn!(error = %err, "session property poll failed");
            }
        }
        self.run_post_update_policy();
        self.sync_terminal_state();
        self.emit_status();
    }

    /// Post-update policy, run after every successful or attempted poll.
    fn run_post_update_policy(&mut self) {
        // (a) Abandon a connect attempt stuck past the timeout and fall back
        // to SessionOpen so a fresh attempt can be made on the next cycle.
        let mut timed_out = false;
        if self.tracker.state() == ConnectionState::RuntimeConnecting {
            if let Some(started) = self.connect_started {
                if started.elapsed() >= self.settings.connect_timeout {
                    warn!(
                        timeout = ?self.settings.connect_timeout,
                        "runtime connect timed out; falling back to session-open"
                    );
                    timed_out = true;
                    self.pending.connect = false;
                    self.connect_started = None;
                    // The stuck attempt cannot be cancelled; invalidate its
                    // eventual completion instead.
                    self.connect_epoch += 1;
                    if let Some(sess) = self.session.as_mut() {
                        sess.transport = TransportStatus::Disconnected;
                    }
                    self.spawn_disconnect();
                    self.tracker.force(ConnectionState::SessionOpen);
                }
            }
        }

        // (b) Auto-connect a ready session.
        if !timed_out
            && self.tracker.state() == ConnectionState::SessionOpen
            && !self.pending.connect
        {
            self.start_connect();
        }

        // (c) Auto lease-extension.
        if !self.pending.renew {
            if let Some(sess) = &self.session {
                if let Some(target) = self.lease_policy.renewal_target(
                    sess.elapsed_minutes,
                    sess.max_lease_minutes,
                    sess.remote_status.is_running(),
                ) {
                    info!(
                        elapsed = sess.elapsed_minutes,
                        lease = sess.max_lease_minutes,
                        target_minutes = target,
                        "auto-extending session lease"
                    );
                    self.start_renew(target);
                }
            }
        }

        // (d) The remote side unloads models on disconnect; mirror that.
        if !self.tracker.state().is_connected() && self.models.clear() {
            self.emit_models_changed();
        }
    }

    // ---- runtime connection ----------------------------------------------

    fn start_connect(&mut self) -> bool {
        if self.pending.connect {
            return false;
        }
        let Some(sess) = self.session.as_mut() else {
            return false;
        };
        self.pending.connect = true;
        self.connect_started = Some(Instant::now());
        self.connect_epoch += 1;
        sess.transport = TransportStatus::Connecting;
        let remote = sess.remote_status;
        let id = sess.id.clone();
        self.tracker.update(remote, TransportStatus::Connecting);

        info!(session_id = %id, mode = ?self.settings.render_mode, "connecting to runtime");
        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let attempt = self.connect_epoch;
        let mode = self.settings.render_mode;
        tokio::spawn(async move {
            let result = service.connect_to_runtime(&id, mode).await;
            let _ = tx
                .send(Completion::Connected { generation, attempt, result })
                .await;
        });
        self.emit_status();
        true
    }

    fn on_connected(&mut self, attempt: u64, result: anyhow::Result<TransportStatus>) {
        if attempt != self.connect_epoch {
            debug!("dropping completion from an abandoned connect attempt");
            return;
        }
        self.pending.connect = false;
        match result {
            Ok(status) => {
                if let Some(sess) = self.session.as_mut() {
                    sess.transport = status;
                }
                self.tracker.update(self.remote_status(), status);
                if self.tracker.state().is_connected() {
                    info!("runtime connected");
                    self.connect_started = None;
                    self.reconnect_attempted = false;
                }
            }
            Err(err) => {
                warn!(error = %err, "runtime connect attempt failed");
                if let Some(sess) = self.session.as_mut() {
                    sess.transport = TransportStatus::Disconnected;
                }
                self.connect_started = None;
                self.tracker.update(self.remote_status(), TransportStatus::Disconnected);
            }
        }
        self.sync_terminal_state();
        self.emit_status();
    }

    fn spawn_disconnect(&mut self) {
        let Some(sess) = &self.session else { return };
        let service = self.service.clone();
        let id = sess.id.clone();
        tokio::spawn(async move {
            if let Err(err) = service.disconnect_from_runtime(&id).await {
                warn!(error = %err, "runtime disconnect failed");
            }
        });
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        if event.session_id != sess.id {
            return;
        }
        sess.transport = event.status;
        let session_id = sess.id.clone();

        if event.result == ConnectionResult::ConnectionLost {
            warn!(session_id = %session_id, "runtime connection lost");
            if self.reconnect_attempted {
                error!(session_id = %session_id, "reconnect already attempted; giving up");
                self.last_error = Some("connection lost".to_string());
                self.tracker.force(ConnectionState::Error);
                self.sync_terminal_state();
                self.emit_status();
            } else {
                self.reconnect_attempted = true;
                self.reopen_after_connection_loss(session_id);
            }
            return;
        }

        self.tracker.update(self.remote_status(), event.status);
        if self.tracker.state().is_connected() {
            self.connect_started = None;
            self.reconnect_attempted = false;
        }
        self.run_post_update_policy();
        self.sync_terminal_state();
        self.emit_status();
    }

    /// Bounded single-retry reconnect: tear down local state while leaving
    /// the remote session running, then reopen the same session id.
    fn reopen_after_connection_loss(&mut self, session_id: String) {
        info!(session_id = %session_id, "attempting automatic reconnect");
        self.end_epoch();
        self.session = None;
        if self.models.clear() {
            self.emit_models_changed();
        }
        self.tracker.force(ConnectionState::OpeningSession);
        self.emit_status();
        self.spawn_open(session_id, true);
    }

    // ---- lease renewal ---------------------------------------------------

    fn start_renew(&mut self, total_minutes: u32) -> bool {
        if self.pending.renew {
            return false;
        }
        let Some(sess) = &self.session else {
            return false;
        };
        self.pending.renew = true;
        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let id = sess.id.clone();
        tokio::spawn(async move {
            let result = service.renew_lease(&id, total_minutes).await;
            let _ = tx.send(Completion::Renewed { generation, result }).await;
        });
        true
    }

    fn on_renewed(&mut self, result: anyhow::Result<()>) {
        self.pending.renew = false;
        match result {
            Ok(()) => info!("session lease renewed"),
            Err(err) => warn!(error = %err, "lease renewal failed"),
        }
        // Refresh properties regardless of outcome so lease counters catch up.
        self.start_poll();
    }

    // ---- model loading ---------------------------------------------------

    fn start_load_model(&mut self, name: String, sas_url: String) -> bool {
        if !self.tracker.state().is_connected() {
            return false;
        }
        let Some(sess) = &self.session else {
            return false;
        };
        let id = sess.id.clone();
        let slot = self.models.begin_load(name.clone());
        info!(model = %name, "model load started");

        let service = self.service.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel::<f32>(32);
            let forward_tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(value) = progress_rx.recv().await {
                    if forward_tx
                        .send(Completion::ModelProgress { generation, slot, value })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
            let result = service.load_model(&id, &sas_url, progress_tx).await;
            // Drain remaining progress before reporting completion.
            let _ = forwarder.await;
            let _ = tx.send(Completion::ModelLoaded { generation, slot, result }).await;
        });
        true
    }

    fn on_model_loaded(&mut self, slot: SlotId, result: anyhow::Result<EntityHandle>) {
        match result {
            Ok(entity) => {
                self.models.finish_load(slot, Some(entity), self.settings.model_scale);
                info!("model load finished");
                self.emit_models_changed();
            }
            Err(err) => {
                warn!(error = %err, "model load failed");
                self.models.finish_load(slot, None, self.settings.model_scale);
            }
        }
        self.emit_model_progress();
    }

    // ---- settings / observation -----------------------------------------

    fn set_auto_extension(&mut self, policy: LeaseExtensionPolicy) {
        self.lease_policy = policy;
        if let Some(store) = &self.store {
            if let Err(err) = store.set(ui_state::KEY_AUTO_EXTEND, &policy.enabled) {
                warn!(error = %err, "failed to persist auto-extend flag");
            }
            if let Err(err) = store.set(ui_state::KEY_EXTENSION_MINUTES, &policy.extension_minutes)
            {
                warn!(error = %err, "failed to persist extension minutes");
            }
        }
    }

    fn remote_status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.remote_status)
            .unwrap_or(SessionStatus::Unknown)
    }

    fn snapshot(&self) -> SessionSnapshot {
        let sess = self.session.as_ref();
        SessionSnapshot {
            state: self.tracker.state(),
            session_id: sess.map(|s| s.id.clone()),
            elapsed_minutes: sess.map(|s| s.elapsed_minutes).unwrap_or(0),
            max_lease_minutes: sess.map(|s| s.max_lease_minutes).unwrap_or(0),
            hostname: sess
                .map(|s| s.hostname.clone())
                .filter(|h| !h.is_empty()),
            message: sess
                .map(|s| s.message.clone())
                .filter(|m| !m.is_empty())
                .or_else(|| self.last_error.clone()),
            model_progress: self.models.aggregate_progress(),
            loaded_models: self.models.loaded().to_vec(),
            selected_model: self.models.selected_index(),
        }
    }

    fn emit_status(&self) {
        let _ = self.event_tx.send(SessionEvent::StatusChanged {
            snapshot: self.snapshot(),
            timestamp: Utc::now(),
        });
    }

    fn emit_models_changed(&self) {
        let _ = self.event_tx.send(SessionEvent::ModelsChanged {
            loaded: self.models.loaded().to_vec(),
            timestamp: Utc::now(),
        });
    }

    fn emit_model_progress(&self) {
        let _ = self.event_tx.send(SessionEvent::ModelProgress {
            progress: self.models.aggregate_progress(),
            timestamp: Utc::now(),
        });
    }
}
