//! Minimap Session
//!
//! The session sits between the intercepted primary channel, the
//! [`SessionState`] core and the optional relay. It owns:
//! - Primary lifecycle: reset on every (re)connect, decode and apply inbound
//!   frames, mirror the outbound name-set frame
//! - The 1 Hz eviction sweep
//! - Relay lifecycle and encoding (best effort, never affects primary state)
//! - The player roster and party registry fed by the relay
//! - Optional session capture
//!
//! # Event Model
//!
//! The host delivers transport events and timer ticks one at a time, each
//! with the current [`Millis`]. Nothing here blocks, spawns or locks.
//!
//! | host event                 | session call                     |
//! |----------------------------|----------------------------------|
//! | primary open / close       | `on_primary_open` / `on_primary_closed` |
//! | primary inbound frame      | `on_inbound`                     |
//! | primary outbound frame     | `on_outbound`                    |
//! | timer                      | `tick`                           |
//! | relay open / message / close | `on_relay_open` / `on_relay_message` / `on_relay_closed` |
//!
//! [`transport::InterceptingTransport`] wires the primary calls up
//! automatically through [`transport::PrimaryObserver`].

#![deny(unsafe_code)]

pub mod config;
pub mod relay;
pub mod transport;

pub use config::{ConfigError, DEFAULT_RELAY_ADDRESS, SWEEP_INTERVAL_MS, SessionConfig};
pub use relay::RelayEncoder;
pub use transport::{
    Channel, ChannelEvent, InterceptedChannel, InterceptingTransport, PrimaryObserver, Transport,
    TransportError,
};

use minimap_capture::{CaptureConfig, CaptureRecorder};
use minimap_state::{
    AppliedFrame, Color, Delta, EntityId, Millis, PartyRegistry, PlayerRoster, SessionState,
};
use minimap_wire::{CaptureArtifact, Incoming, OutboundEvent, ServerInfo};

// ============================================================================
// Host Context and Notices
// ============================================================================

/// Details only the host page knows, reported to the relay with the server
/// URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostContext {
    pub region: String,
    pub gamemode: String,
    /// Party token from the page location hash.
    pub party: String,
}

/// Something the host should surface to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The relay's party is on a different game server.
    ServerMismatch { local: String, remote: ServerInfo },
    ServerMatched,
}

#[derive(Debug)]
enum Capture {
    /// Waiting for the next primary open so the recording starts clean.
    Armed(CaptureRecorder),
    Recording(CaptureRecorder),
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    roster: PlayerRoster,
    party: PartyRegistry,
    relay: RelayEncoder,
    /// UTF-16 name from the last name-set frame.
    local_name: Vec<u16>,
    server_url: Option<String>,
    host: HostContext,
    last_sweep: Option<Millis>,
    /// Latest time seen on any event; stamps outbound captures.
    clock: Millis,
    capture: Option<Capture>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::new(config.default_world_size),
            roster: PlayerRoster::new(),
            party: PartyRegistry::new(),
            relay: RelayEncoder::new(),
            local_name: Vec::new(),
            server_url: None,
            host: HostContext::default(),
            last_sweep: None,
            clock: 0,
            capture: None,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn roster(&self) -> &PlayerRoster {
        &self.roster
    }

    pub fn party(&self) -> &PartyRegistry {
        &self.party
    }

    pub fn local_name(&self) -> &[u16] {
        &self.local_name
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    pub fn host_context(&self) -> &HostContext {
        &self.host
    }

    pub fn relay_open(&self) -> bool {
        self.relay.is_open()
    }

    /// New position of the largest owned entity.
    pub fn own_position(&self) -> Option<[f64; 2]> {
        self.state.store().largest_owned().map(|e| e.position.new)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            url: self.server_url.clone().unwrap_or_default(),
            region: self.host.region.clone(),
            gamemode: self.host.gamemode.clone(),
            party: self.host.party.clone(),
        }
    }

    fn observe_time(&mut self, now: Millis) {
        self.clock = self.clock.max(now);
    }

    fn recorder(&mut self) -> Option<&mut CaptureRecorder> {
        match &mut self.capture {
            Some(Capture::Recording(recorder)) => Some(recorder),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Primary channel
    // ------------------------------------------------------------------------

    /// Primary channel opened on `url`: start a fresh session.
    ///
    /// Secure (`wss://`) addresses hide the real game server, so a URL
    /// already known from an earlier connection is kept.
    pub fn on_primary_open(&mut self, url: &str, now: Millis) {
        self.observe_time(now);

        let resolved = match &self.server_url {
            Some(known) if url.starts_with("wss://") => known.clone(),
            _ => url.to_string(),
        };
        self.server_url = Some(resolved);

        self.state.reset();
        self.party.clear();

        self.capture = self.capture.take().map(|capture| match capture {
            Capture::Armed(recorder) | Capture::Recording(recorder) => {
                Capture::Recording(recorder)
            }
        });
        if let Some(recorder) = self.recorder() {
            recorder.record_reset(now, url);
        }

        tracing::info!(url, server = ?self.server_url, "primary session started");
        let info = self.server_info();
        self.relay.server_info(&info);
    }

    pub fn on_primary_closed(&mut self, now: Millis) {
        self.observe_time(now);
        tracing::info!(server = ?self.server_url, "primary channel closed");
    }

    /// Decode and apply one inbound frame.
    ///
    /// Undecodable frames are logged and dropped; `None` is returned for
    /// them and for frames carrying no events.
    pub fn on_inbound(&mut self, frame: &[u8], now: Millis) -> Option<AppliedFrame> {
        self.observe_time(now);
        if let Some(recorder) = self.recorder() {
            recorder.record_inbound(now, frame);
        }

        let events = match minimap_wire::decode(frame) {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(%err, len = frame.len(), "dropping undecodable frame");
                return None;
            }
        };
        if events.is_empty() {
            return None;
        }

        let applied = self.state.apply(&events, now);
        tracing::debug!(
            generation = applied.generation,
            events = events.len(),
            deltas = applied.deltas.len(),
            "applied frame"
        );

        if self.relay.is_open() {
            self.relay.entity_sync(&applied.deltas);
            for &id in &applied.owned_added {
                self.relay.own_announce(id);
            }
        } else {
            self.mirror_party(&applied.deltas);
        }

        Some(applied)
    }

    /// Inspect one outbound frame. Only the name-set frame is acted on.
    pub fn on_outbound(&mut self, frame: &[u8]) {
        let now = self.clock;
        if let Some(recorder) = self.recorder() {
            recorder.record_outbound(now, frame);
        }

        match minimap_wire::decode_outbound(frame) {
            Ok(Some(OutboundEvent::SetNick { name })) => {
                tracing::info!(name = %String::from_utf16_lossy(&name), "local name set");
                self.relay.hello(&name);
                self.local_name = name;
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, "ignoring outbound frame"),
        }
    }

    /// Timer tick. Runs the eviction sweep once per sweep interval and
    /// returns its deltas (empty when no sweep was due).
    pub fn tick(&mut self, now: Millis) -> Vec<Delta> {
        self.observe_time(now);
        let due = self
            .last_sweep
            .is_none_or(|last| now.saturating_sub(last) >= self.config.sweep_interval_ms);
        if !due {
            return Vec::new();
        }
        self.last_sweep = Some(now);

        if let Some(recorder) = self.recorder() {
            recorder.record_sweep(now);
        }
        let deltas = self.state.sweep(now, self.config.entity_ttl_ms);
        if self.relay.is_open() {
            self.relay.entity_sync(&deltas);
        } else {
            self.mirror_party(&deltas);
        }
        deltas
    }

    /// While the relay is down the party view shows local cells instead.
    fn mirror_party(&mut self, deltas: &[Delta]) {
        for delta in deltas {
            match delta {
                Delta::Created(entity) | Delta::Updated(entity) => {
                    if self.config.relay_local_cells || self.state.store().is_owned(entity.id) {
                        self.party.upsert(
                            entity.id,
                            entity.color,
                            entity.position.new,
                            entity.size.new,
                        );
                    }
                }
                removal => {
                    self.party.remove(removal.id());
                }
            }
        }
    }

    /// Host page details changed. The relay hears about it only when
    /// something actually differs.
    pub fn set_host_context(&mut self, host: HostContext) {
        if host == self.host {
            return;
        }
        self.host = host;
        let info = self.server_info();
        self.relay.server_info(&info);
    }

    // ------------------------------------------------------------------------
    // Relay channel
    // ------------------------------------------------------------------------

    /// Use `channel` for the relay. Any previous relay channel is closed.
    pub fn attach_relay(&mut self, channel: Box<dyn Channel>) {
        self.relay.attach(channel);
    }

    /// Connect the relay through `transport`, to `address` or the configured
    /// default.
    pub fn connect_relay<T>(
        &mut self,
        transport: &mut T,
        address: Option<&str>,
    ) -> Result<(), TransportError>
    where
        T: Transport,
        T::Channel: 'static,
    {
        let address = address.unwrap_or(&self.config.relay_address).to_string();
        match transport.connect(&address) {
            Ok(channel) => {
                tracing::info!(%address, "relay connecting");
                self.attach_relay(Box::new(channel));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%address, %err, "relay connect failed");
                self.on_relay_closed();
                Err(err)
            }
        }
    }

    /// Relay handshake: name, every owned id, then the server details.
    pub fn on_relay_open(&mut self, now: Millis) {
        self.observe_time(now);
        tracing::info!("relay connected");

        let name = self.local_name.clone();
        self.relay.hello(&name);
        let owned: Vec<EntityId> = self.state.store().owned_ids().collect();
        for id in owned {
            self.relay.own_announce(id);
        }
        let info = self.server_info();
        self.relay.server_info(&info);
    }

    pub fn on_relay_message(&mut self, bytes: &[u8]) -> Option<Notice> {
        let message = match Incoming::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, len = bytes.len(), "dropping relay message");
                return None;
            }
        };

        match message {
            Incoming::PartySync(sync) => {
                for cell in sync.additions {
                    let color = cell.color.parse::<Color>().unwrap_or_else(|err| {
                        tracing::debug!(id = cell.id, %err, "party cell without usable colour");
                        Color::default()
                    });
                    self.party.upsert(cell.id, color, [cell.x, cell.y], cell.size);
                }
                for id in sync.deletions {
                    self.party.remove(id);
                }
                None
            }
            Incoming::Roster(entries) => {
                self.roster
                    .replace(entries.into_iter().map(Into::into).collect());
                tracing::debug!(members = self.roster.members().len(), "roster replaced");
                None
            }
            Incoming::ServerCheck(remote) => {
                let local = self.server_url.clone().unwrap_or_default();
                if local == remote.url {
                    Some(Notice::ServerMatched)
                } else {
                    tracing::warn!(%local, remote = %remote.url, "party is on another server");
                    Some(Notice::ServerMismatch { local, remote })
                }
            }
        }
    }

    /// Relay gone, by error or close. Primary state is untouched.
    pub fn on_relay_closed(&mut self) {
        if self.relay.is_attached() {
            tracing::info!("relay disconnected");
        }
        self.relay.close();
        self.roster.clear();
        self.party.clear();
    }

    // ------------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------------

    /// Record from the next primary open on.
    pub fn start_capture(&mut self) {
        self.capture = Some(Capture::Armed(CaptureRecorder::new(CaptureConfig {
            default_world_size: self.config.default_world_size,
            entity_ttl_ms: self.config.entity_ttl_ms,
        })));
    }

    /// Stop recording. `None` if nothing was recorded yet.
    pub fn finish_capture(&mut self) -> Option<CaptureArtifact> {
        match self.capture.take()? {
            Capture::Recording(recorder) => Some(recorder.finalize(&self.state)),
            Capture::Armed(_) => None,
        }
    }
}

impl PrimaryObserver for Session {
    fn primary_opened(&mut self, url: &str, now: Millis) {
        self.on_primary_open(url, now);
    }

    fn primary_inbound(&mut self, frame: &[u8], now: Millis) {
        self.on_inbound(frame, now);
    }

    fn primary_outbound(&mut self, frame: &[u8]) {
        self.on_outbound(frame);
    }

    fn primary_closed(&mut self, now: Millis) {
        self.on_primary_closed(now);
    }
}

// ============================================================================
// Tests
// ============================================================================
