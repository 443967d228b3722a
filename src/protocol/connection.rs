//! The per-connection actor.
//!
//! A [`ConnectionActor`] owns everything one transport needs: the outbound
//! queue, the handshake phase, the one-way lifecycle flags, the optional
//! world and, once the secret is known, the [`SharedConnectionState`].
//!
//! ## Lifecycle
//! ```text
//! build ─► Connecting ─► ... ─► Playing
//!   │                              │
//!   └──────── teardown ◄───────────┘   (dispose, fatal error, peer disconnect)
//! ```
//!
//! Teardown runs at most once and always in the same order: cancel the
//! heartbeat, send a best-effort `DISCONNECT`, then drop the outbound queue
//! and cancel the reader.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use prost::Message;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::SessionConfig;
use crate::core::packet::{Direction, Packet, PacketType, Payload};
use crate::error::{constants, Result, SessionError};
use crate::events::types::{Disconnected, LoginProgress};
use crate::events::{self, EventBus};
use crate::protocol::dispatcher::{self, Handled, Route, Verdict};
use crate::protocol::phase::{HandshakePhase, OneWayFlag, PhaseCell};
use crate::protocol::server::SessionRegistry;
use crate::protocol::state::SharedConnectionState;
use crate::protocol::{builders, client, server};
use crate::runtime::affinity::Actor;
use crate::runtime::executor::Executor;
use crate::utils::metrics::global_metrics;
use crate::utils::ttl_cache::TtlCache;
use crate::world::{BlockLoc, Screen, ScreenSlot, WorldFactory, WorldStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }

    /// Direction stamped on packets this role receives.
    pub fn inbound(self) -> Direction {
        match self {
            Role::Client => Direction::Client,
            Role::Server => Direction::Server,
        }
    }

    /// Direction stamped on packets this role sends.
    pub fn outbound(self) -> Direction {
        match self {
            Role::Client => Direction::Server,
            Role::Server => Direction::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct ConnectionActor {
    pub(super) role: Role,
    pub(super) display_name: String,
    pub(super) config: Arc<SessionConfig>,
    pub(super) phase: PhaseCell,
    /// Client: world instantiated. Server: player loaded and LOGIN_SUCCESS sent.
    pub(super) started: OneWayFlag,
    /// Client: initial chunks applied. Server: initial chunks streamed.
    pub(super) chunks_loaded: OneWayFlag,
    pub(super) closed: OneWayFlag,
    pub(super) shared: OnceLock<Arc<SharedConnectionState>>,
    pub(super) username: OnceLock<String>,
    pub(super) world: RwLock<Option<Arc<dyn WorldStore>>>,
    pub(super) breaking: Mutex<TtlCache<BlockLoc, f32>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    shutdown: CancellationToken,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) bus: EventBus,
    pub(super) screen: Option<Arc<dyn ScreenSlot>>,
    pub(super) world_factory: Option<WorldFactory>,
    pub(super) registry: Option<Arc<SessionRegistry>>,
    io: Option<Handle>,
}

impl fmt::Debug for ConnectionActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionActor")
            .field("role", &self.role)
            .field("peer", &self.display_name)
            .field("phase", &self.phase.get())
            .field("closed", &self.closed.is_set())
            .finish()
    }
}

/// Assembles a [`ConnectionActor`] and its outbound packet queue.
pub struct ConnectionBuilder {
    role: Role,
    display_name: String,
    config: Arc<SessionConfig>,
    executor: Option<Arc<dyn Executor>>,
    bus: Option<EventBus>,
    world: Option<Arc<dyn WorldStore>>,
    world_factory: Option<WorldFactory>,
    screen: Option<Arc<dyn ScreenSlot>>,
    registry: Option<Arc<SessionRegistry>>,
    io: Option<Handle>,
}

impl ConnectionBuilder {
    fn new(role: Role, config: Arc<SessionConfig>) -> Self {
        Self {
            role,
            display_name: role.name().to_string(),
            config,
            executor: None,
            bus: None,
            world: None,
            world_factory: None,
            screen: None,
            registry: None,
            io: None,
        }
    }

    pub fn client(config: Arc<SessionConfig>) -> Self {
        Self::new(Role::Client, config)
    }

    pub fn server(config: Arc<SessionConfig>) -> Self {
        Self::new(Role::Server, config)
    }

    /// Name used in logs, usually the peer address.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Defaults to the process-wide bus.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Authoritative world. Required for servers.
    pub fn world(mut self, world: Arc<dyn WorldStore>) -> Self {
        self.world = Some(world);
        self
    }

    /// Builds the replica on `START_GAME`. Required for clients.
    pub fn world_factory(mut self, factory: WorldFactory) -> Self {
        self.world_factory = Some(factory);
        self
    }

    pub fn screen(mut self, screen: Arc<dyn ScreenSlot>) -> Self {
        self.screen = Some(screen);
        self
    }

    /// Sessions sharing one server. A private registry is created if unset.
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Runtime the heartbeat task runs on. Defaults to the runtime `build`
    /// is called from.
    pub fn io_handle(mut self, handle: Handle) -> Self {
        self.io = Some(handle);
        self
    }

    pub fn build(self) -> Result<(Arc<ConnectionActor>, mpsc::UnboundedReceiver<Packet>)> {
        let executor = self
            .executor
            .ok_or_else(|| SessionError::ConfigError("Connection has no executor".into()))?;

        let registry = match self.role {
            Role::Server => {
                if self.world.is_none() {
                    return Err(SessionError::ConfigError(constants::ERR_NO_WORLD.into()));
                }
                Some(self.registry.unwrap_or_else(|| {
                    Arc::new(SessionRegistry::new(self.config.server.max_players))
                }))
            }
            Role::Client => {
                if self.world_factory.is_none() {
                    return Err(SessionError::ConfigError(
                        constants::ERR_NO_WORLD_FACTORY.into(),
                    ));
                }
                None
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let breaking = TtlCache::with_settings(
            self.config.sync.breaking_progress_ttl,
            self.config.sync.max_tracked_requests,
        );

        let connection = Arc::new(ConnectionActor {
            role: self.role,
            display_name: self.display_name,
            phase: PhaseCell::new(),
            started: OneWayFlag::new(),
            chunks_loaded: OneWayFlag::new(),
            closed: OneWayFlag::new(),
            shared: OnceLock::new(),
            username: OnceLock::new(),
            world: RwLock::new(self.world),
            breaking: Mutex::new(breaking),
            outbound: Mutex::new(Some(tx)),
            shutdown: CancellationToken::new(),
            executor,
            bus: self.bus.unwrap_or_else(|| events::global().clone()),
            screen: self.screen,
            world_factory: self.world_factory,
            registry,
            io: self.io.or_else(|| Handle::try_current().ok()),
            config: self.config,
        });

        global_metrics().connection_established();
        debug!(peer = %connection.display_name, role = %connection.role, "Connection created");
        Ok((connection, rx))
    }
}

impl ConnectionActor {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase.get()
    }

    pub fn is_started(&self) -> bool {
        self.started.is_set()
    }

    pub fn is_chunks_loaded(&self) -> bool {
        self.chunks_loaded.is_set()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    pub fn shared(&self) -> Option<Arc<SharedConnectionState>> {
        self.shared.get().cloned()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    pub fn world(&self) -> Option<Arc<dyn WorldStore>> {
        self.world.read().ok().and_then(|w| w.clone())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Cancelled when the connection tears down. Transports select on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Live breaking progress for a block, if any was reported recently.
    pub fn breaking_progress(&self, loc: BlockLoc) -> Option<f32> {
        self.breaking.lock().ok()?.get(&loc).copied()
    }

    pub(super) fn io_handle(&self) -> Option<Handle> {
        self.io.clone().or_else(|| Handle::try_current().ok())
    }

    pub(super) fn attach_shared(
        &self,
        state: SharedConnectionState,
    ) -> Result<Arc<SharedConnectionState>> {
        let state = Arc::new(state);
        self.shared.set(state.clone()).map_err(|_| {
            SessionError::HandshakeError(constants::ERR_SESSION_ALREADY_ATTACHED.into())
        })?;
        Ok(state)
    }

    pub(super) fn require_shared(&self) -> Result<Arc<SharedConnectionState>> {
        self.shared()
            .ok_or_else(|| SessionError::HandshakeError(constants::ERR_NO_SESSION.into()))
    }

    pub(super) fn require_world(&self) -> Result<Arc<dyn WorldStore>> {
        self.world()
            .ok_or_else(|| SessionError::WorldError(constants::ERR_NO_WORLD.into()))
    }

    pub(super) fn set_world(&self, world: Arc<dyn WorldStore>) -> Result<()> {
        let mut slot = self
            .world
            .write()
            .map_err(|_| SessionError::WorldError(constants::ERR_WORLD_LOCK.into()))?;
        *slot = Some(world);
        Ok(())
    }

    /// Advance the handshake phase and publish the change.
    pub(super) fn advance(&self, next: HandshakePhase) {
        if let Some(previous) = self.phase.advance(next) {
            debug!(peer = %self.display_name, from = %previous, to = %next, "Phase advanced");
            self.bus.dispatch(LoginProgress {
                peer: self.display_name.clone(),
                phase: next,
            });
        }
    }

    /// Queue a packet for the transport.
    pub fn send(&self, payload: Payload) -> Result<()> {
        if self.closed.is_set() {
            return Err(SessionError::ConnectionClosed);
        }
        self.send_unchecked(payload)
    }

    fn send_unchecked(&self, payload: Payload) -> Result<()> {
        let mut packet = Packet::new(self.role.outbound(), payload);
        if self.role == Role::Client {
            if let Some(shared) = self.shared.get() {
                packet.secret = shared.secret().to_string();
            }
        }

        let length = packet.encoded_len();
        if length > self.config.transport.max_packet_size {
            return Err(SessionError::OversizedPacket(length));
        }

        let outbound = self
            .outbound
            .lock()
            .map_err(|_| SessionError::ConnectionClosed)?;
        let tx = outbound.as_ref().ok_or(SessionError::ConnectionClosed)?;

        trace!(peer = %self.display_name, packet = packet.name(), "Sending");
        tx.send(packet).map_err(|_| SessionError::ConnectionClosed)?;
        global_metrics().packet_sent(length as u64);
        Ok(())
    }

    /// Client entry point: send the login request.
    #[instrument(skip(self), fields(peer = %self.display_name))]
    pub fn begin_login(&self, username: &str) -> Result<()> {
        if self.role != Role::Client {
            return Err(SessionError::Custom("Only clients log in".into()));
        }
        if username.trim().is_empty() {
            return Err(SessionError::HandshakeError(
                constants::ERR_EMPTY_USERNAME.into(),
            ));
        }
        let _ = self.username.set(username.to_string());

        global_metrics().handshake_attempt();
        self.show_screen(Screen::LoggingIn);
        self.send(builders::login_request(
            username,
            self.config.transport.protocol_version,
        ))
    }

    /// Handle one inbound packet.
    ///
    /// Returns `Err` only when the packet caused the connection to close.
    pub fn receive(self: &Arc<Self>, packet: Packet) -> Result<Handled> {
        if self.closed.is_set() {
            return Ok(Handled::Dropped);
        }
        global_metrics().packet_received(packet.encoded_len() as u64);

        let kind = match self.check_envelope(&packet) {
            Ok(kind) => kind,
            Err(e) => return Err(self.fail(e)),
        };
        let phase = self.phase.get();
        trace!(peer = %self.display_name, packet = kind.name(), phase = %phase, "Received");

        let route = match dispatcher::route(self.role, phase, kind) {
            Verdict::Accept(route) => route,
            Verdict::Drop(reason) => {
                global_metrics().packet_dropped();
                debug!(peer = %self.display_name, packet = kind.name(), phase = %phase, reason, "Dropped packet");
                return Ok(Handled::Dropped);
            }
            Verdict::Reject(e) => return Err(self.fail(e)),
        };

        let Some(payload) = packet.payload else {
            return Err(self.fail(SessionError::InvalidFrame(constants::ERR_MISSING_PAYLOAD)));
        };

        match route {
            Route::Inline => match self.handle_payload(payload) {
                Ok(()) => Ok(Handled::Inline),
                Err(e) if e.is_fatal() => Err(self.fail(e)),
                Err(e) if self.closed.is_set() => Err(e),
                Err(e) => {
                    warn!(peer = %self.display_name, packet = kind.name(), error = %e, "Handler failed");
                    Ok(Handled::Inline)
                }
            },
            Route::Defer(actor) => {
                let me = Arc::clone(self);
                self.executor
                    .post(
                        actor,
                        Box::new(move || {
                            if let Err(e) = me.handle_payload(payload) {
                                me.handle_failure(e);
                            }
                        }),
                    )
                    .map_err(|e| self.fail(e))?;
                Ok(Handled::Deferred(actor))
            }
        }
    }

    fn check_envelope(&self, packet: &Packet) -> Result<PacketType> {
        let kind = packet.validate(self.role.inbound())?;

        // Once the secret is confirmed every server-bound packet must carry it
        if self.role == Role::Server && self.phase.get() >= HandshakePhase::AwaitingLoginStatus {
            self.require_shared()?.verify_secret(&packet.secret)?;
        }
        Ok(kind)
    }

    fn handle_payload(self: &Arc<Self>, payload: Payload) -> Result<()> {
        if self.closed.is_set() {
            return Ok(());
        }
        match self.role {
            Role::Client => client::handle(self, payload),
            Role::Server => server::handle(self, payload),
        }
    }

    /// Run `job` on `actor` with this connection, routing its error.
    /// Closes the connection if `actor` cannot take work.
    pub(super) fn defer<F>(self: &Arc<Self>, actor: Actor, job: F) -> Result<()>
    where
        F: FnOnce(&Arc<Self>) -> Result<()> + Send + 'static,
    {
        let me = Arc::clone(self);
        self.executor
            .post(
                actor,
                Box::new(move || {
                    if me.closed.is_set() {
                        return;
                    }
                    if let Err(e) = job(&me) {
                        me.handle_failure(e);
                    }
                }),
            )
            .map_err(|e| self.fail(e))
    }

    pub(super) fn handle_failure(&self, error: SessionError) {
        if error.is_fatal() {
            self.fatal(&error);
        } else {
            warn!(peer = %self.display_name, error = %error, "Recoverable session error");
        }
    }

    fn fail(&self, error: SessionError) -> SessionError {
        self.fatal(&error);
        error
    }

    /// Tear down because of `error`. Returns false if already closed.
    pub fn fatal(&self, error: &SessionError) -> bool {
        if self.closed.is_set() {
            return false;
        }
        error!(peer = %self.display_name, phase = %self.phase.get(), error = %error, "Fatal session error");
        self.teardown(&error.user_reason(), true, true)
    }

    /// Close the connection locally. Safe to call more than once.
    pub fn dispose(&self) -> bool {
        self.teardown(constants::REASON_DISCONNECTED, true, false)
    }

    /// The transport reached end of stream.
    pub fn connection_lost(&self) -> bool {
        self.teardown(constants::REASON_CONNECTION_LOST, false, false)
    }

    /// Close with a caller-chosen reason, notifying the peer.
    pub fn close(&self, reason: &str) -> bool {
        self.teardown(reason, true, false)
    }

    /// The single teardown path. Returns true only for the call that closed
    /// the connection.
    pub(super) fn teardown(&self, reason: &str, notify: bool, fatal: bool) -> bool {
        if !self.closed.set() {
            return false;
        }
        let reached_playing = self.phase.get() == HandshakePhase::Playing;
        self.phase.advance(HandshakePhase::Closed);

        if let Some(shared) = self.shared.get() {
            shared.cancel_heartbeat();
        }

        if notify {
            if let Err(e) = self.send_unchecked(builders::disconnect(reason)) {
                debug!(peer = %self.display_name, error = %e, "Disconnect notice not sent");
            }
        }

        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        self.shutdown.cancel();

        let metrics = global_metrics();
        metrics.connection_closed();
        if fatal {
            metrics.fatal_teardown();
            if !reached_playing {
                metrics.handshake_failed();
            }
        }

        if self.role == Role::Server {
            server::on_session_end(self);
        }
        self.show_screen(Screen::Disconnected {
            reason: reason.to_string(),
        });

        info!(peer = %self.display_name, reason, fatal, "Connection closed");
        self.bus.dispatch(Disconnected {
            peer: self.display_name.clone(),
            reason: reason.to_string(),
            fatal,
        });
        true
    }

    /// Flip the client's screen on the Main actor.
    pub(super) fn show_screen(&self, screen: Screen) {
        let Some(slot) = self.screen.clone() else {
            return;
        };
        let posted = self.executor.post(
            Actor::Main,
            Box::new(move || {
                if let Err(e) = slot.show(screen) {
                    warn!(error = %e, "Screen change rejected");
                }
            }),
        );
        if let Err(e) = posted {
            warn!(peer = %self.display_name, error = %e, "Screen change not posted");
        }
    }
}
