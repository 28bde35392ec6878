//! The fallback session: one ephemeral limbo dialogue per suspect
//! connection.
//!
//! The session owns the socket from the first handshake byte to the
//! terminal disconnect. It drives the phase/state machine of the
//! verification (login, optional configuration, platform spawn, gravity
//! fall, collision) and consults the admission pipeline at the two
//! decision points: after the handshake and after `LoginStart`.

use crate::{
    admission::{Admission, AdmissionControl, Begin, SessionPermit},
    assets::{self, Assets},
    config::{Config, Validators},
    error::{DisconnectReason, VerifyError},
    event::EventSink,
    protocol::{
        codec::{CompressionThreshold, Frame, FrameCodec},
        decoder::DecodeError,
        packet::{client, client::ClientPacket, server},
        registry::{Inbound, Outbound, Phase, Registry},
        version::ProtocolVersion,
        BUFFER_LIMIT,
    },
    queue::QueueResult,
};
use std::{net::IpAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{timeout_at, Instant},
};
use uuid::Uuid;

/// Absolute tolerance for the per-tick gravity comparison.
const GRAVITY_TOLERANCE: f64 = 1e-3;
/// Y of the platform's top surface.
const PLATFORM_TOP: f64 = (assets::PLATFORM_Y + 1) as f64;

/// Where a session ends up when it does not fail.
#[derive(Debug)]
pub enum SessionOutcome<S> {
    /// The client passed verification and was told to reconnect.
    Verified { username: String, uuid: Uuid },
    /// The (IP, UUID) pair was already verified. The caller splices the
    /// socket to the backend, replaying the bytes consumed so far.
    PassThrough {
        stream: S,
        replay: Vec<u8>,
        username: String,
    },
    /// Turned away by the admission pipeline (throttled, queued out,
    /// blacklisted, lockdown, bad protocol). Not a verification failure.
    Rejected(DisconnectReason),
    /// A server-list ping; ignored and closed.
    Status,
}

/// Explicit state tag; transitions are monotone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    AwaitLoginStart,
    AwaitLoginAck,
    AwaitConfigAck,
    AwaitKeepAlive,
    Falling,
}

pub struct Session<S> {
    stream: S,
    ip: IpAddr,
    config: Arc<Config>,
    validators: Arc<Validators>,
    assets: Arc<Assets>,
    control: Arc<AdmissionControl>,
    sink: Arc<dyn EventSink>,

    codec: FrameCodec,
    /// Raw bytes consumed before the pass-through decision, for replay.
    replay: Option<Vec<u8>>,
    deadline: Instant,

    version: ProtocolVersion,
    registry: Registry,
    phase: Phase,
    state: State,

    username: String,
    uuid: Uuid,
    _permit: Option<SessionPermit>,

    packets_seen: u32,
    keep_alive_id: i64,
    keep_alive_sent: Instant,
    /// Index into the motion table of the last accepted movement tick.
    tick: u32,
    ignored_ticks: u32,
    position_seen: bool,
    settings_checked: bool,
    brand_checked: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        ip: IpAddr,
        config: Arc<Config>,
        validators: Arc<Validators>,
        assets: Arc<Assets>,
        control: Arc<AdmissionControl>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let deadline = Instant::now() + config.read_timeout();
        Self {
            stream,
            ip,
            config,
            validators,
            assets,
            control,
            sink,
            codec: FrameCodec::new(BUFFER_LIMIT),
            replay: Some(Vec::new()),
            deadline,
            version: ProtocolVersion::V1_7_2,
            registry: Registry::bind(ProtocolVersion::V1_7_2),
            phase: Phase::Handshake,
            state: State::AwaitLoginStart,
            username: String::new(),
            uuid: Uuid::nil(),
            _permit: None,
            packets_seen: 0,
            keep_alive_id: 0,
            keep_alive_sent: deadline,
            tick: 0,
            ignored_ticks: 0,
            position_seen: false,
            settings_checked: false,
            brand_checked: false,
        }
    }

    /// Drives the session to a terminal transition. On error the peer has
    /// already been sent the matching disconnect screen (best effort).
    pub async fn run(mut self) -> Result<SessionOutcome<S>, VerifyError> {
        match self.run_inner().await {
            Ok(Step::Verified { username, uuid }) => {
                Ok(SessionOutcome::Verified { username, uuid })
            }
            Ok(Step::PassThrough { replay, username }) => Ok(SessionOutcome::PassThrough {
                stream: self.stream,
                replay,
                username,
            }),
            Ok(Step::Rejected(reason)) => Ok(SessionOutcome::Rejected(reason)),
            Ok(Step::Status) => Ok(SessionOutcome::Status),
            Err(error) => {
                self.sink.on_fail(self.ip, &error);
                if error.counts_as_failure() {
                    self.control.record_failure(self.ip);
                }
                self.disconnect(error.disconnect_reason()).await.ok();
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<Step, VerifyError> {
        let handshake = self.read_handshake().await?;

        // Status pings are not the verifier's business; close quietly.
        if handshake.next_state == 1 {
            self.phase = Phase::Status;
            return Ok(Step::Status);
        }

        match self.control.check_handshake(self.ip, handshake.protocol_number) {
            Ok(version) => {
                self.version = version;
                self.registry = Registry::bind(version);
                self.phase = Phase::Login;
            }
            Err(reason) => {
                // The login disconnect works before the version is known.
                self.phase = Phase::Login;
                return self.reject(reason).await;
            }
        }

        let login = self.read_login_start().await?;
        if !self.validators.name.is_match(&login.username) {
            return Err(VerifyError::InvalidUsername);
        }
        self.username = login.username;
        self.uuid = offline_uuid(&self.username);

        match self.control.admit_login(self.ip, self.uuid) {
            Admission::PassThrough => {
                let replay = self.replay.take().unwrap_or_default();
                return Ok(Step::PassThrough {
                    replay,
                    username: std::mem::take(&mut self.username),
                });
            }
            Admission::Verify(permit) => self._permit = Some(permit),
            Admission::Queued(waiter) => {
                let result = timeout_at(self.deadline, waiter)
                    .await
                    .map_err(|_| VerifyError::Timeout)?;
                match result {
                    Ok(QueueResult::Admitted) => match self.control.try_begin(self.ip) {
                        Begin::Begun(permit) => self._permit = Some(permit),
                        Begin::AlreadyVerifying => {
                            return self.reject(DisconnectReason::AlreadyVerifying).await
                        }
                        Begin::Full => {
                            return self.reject(DisconnectReason::TooManyPlayers).await
                        }
                    },
                    Ok(QueueResult::Rejected) => {
                        return self.reject(DisconnectReason::TooManyPlayers).await
                    }
                    // Replaced by a newer connection from the same IP.
                    Err(_) => return self.reject(DisconnectReason::AlreadyQueued).await,
                }
            }
            Admission::Reject(reason) => return self.reject(reason).await,
        }

        // Admitted into verification; the replay buffer is no longer
        // needed.
        self.replay = None;
        self.sink.on_admit(self.ip, &self.username);

        self.finish_login().await?;
        if self.version.has_configuration_phase() {
            self.run_configuration().await?;
        }
        self.enter_limbo().await?;
        self.run_play().await?;

        self.control.record_success(self.ip);
        self.control
            .verified()
            .insert(self.ip, self.uuid);
        self.sink.on_success(self.ip, &self.username);
        self.disconnect(DisconnectReason::VerificationSuccess).await.ok();

        Ok(Step::Verified {
            username: std::mem::take(&mut self.username),
            uuid: self.uuid,
        })
    }

    /// Sends the rejection screen and finishes the session without
    /// counting a verification failure.
    async fn reject(&mut self, reason: DisconnectReason) -> Result<Step, VerifyError> {
        self.disconnect(reason).await.ok();
        Ok(Step::Rejected(reason))
    }

    /// Sets up compression and acknowledges the login.
    async fn finish_login(&mut self) -> Result<(), VerifyError> {
        if self.config.enable_compression && self.version >= ProtocolVersion::V1_8 {
            let threshold = self.config.compression_threshold;
            let packet = server::SetCompression { threshold };
            self.send(Phase::Login, Outbound::SetCompression, &packet.encode())
                .await?;
            self.codec
                .enable_compression(CompressionThreshold(threshold.max(0) as usize));
        }

        let packet = server::LoginSuccess {
            uuid: self.uuid,
            username: &self.username,
        };
        let payload = packet.encode(self.version);
        self.send(Phase::Login, Outbound::LoginSuccess, &payload).await
    }

    /// 1.20.2+: wait for the login acknowledgement, then run the
    /// Configuration phase (registry sync) until the client confirms.
    async fn run_configuration(&mut self) -> Result<(), VerifyError> {
        self.state = State::AwaitLoginAck;
        loop {
            let frame = self.read_frame().await?;
            match self.classify(&frame)? {
                Some(ClientPacket::LoginAcknowledged) => break,
                Some(other) => {
                    return Err(VerifyError::OutOfOrder {
                        packet: packet_name(&other),
                        phase: self.phase,
                    })
                }
                None => unreachable!("login unknowns are fatal in classify"),
            }
        }

        self.phase = Phase::Configuration;
        self.state = State::AwaitConfigAck;
        let registry_payload = self.assets.registry_payload();
        self.send(Phase::Configuration, Outbound::RegistryData, &registry_payload)
            .await?;
        self.send(Phase::Configuration, Outbound::FinishConfiguration, &[])
            .await?;

        loop {
            let frame = self.read_frame().await?;
            match self.classify(&frame)? {
                Some(ClientPacket::FinishConfiguration) => return Ok(()),
                Some(ClientPacket::ClientSettings(settings)) => {
                    self.check_client_settings(&settings)?
                }
                Some(ClientPacket::PluginMessage(message)) => self.check_plugin_message(&message)?,
                Some(ClientPacket::KeepAlive(_)) => {}
                Some(other) => {
                    return Err(VerifyError::OutOfOrder {
                        packet: packet_name(&other),
                        phase: self.phase,
                    })
                }
                None => unreachable!("configuration unknowns are fatal in classify"),
            }
        }
    }

    /// Spawns the player onto the platform column: world state, teleport,
    /// then the keep-alive probe.
    async fn enter_limbo(&mut self) -> Result<(), VerifyError> {
        self.phase = Phase::Play;

        let join_game = self.assets.join_game(self.version);
        self.send(Phase::Play, Outbound::JoinGame, &join_game).await?;

        let abilities = server::Abilities {
            flags: 0,
            flying_speed: 0.0,
            fov_modifier: 0.0,
        };
        self.send(Phase::Play, Outbound::Abilities, &abilities.encode())
            .await?;

        let teleport = server::PlayerPositionLook {
            x: assets::SPAWN_X,
            y: self.assets.spawn_y,
            z: assets::SPAWN_Z,
            yaw: 0.0,
            pitch: 90.0,
            teleport_id: 1,
        };
        self.send(
            Phase::Play,
            Outbound::PlayerPositionLook,
            &teleport.encode(self.version),
        )
        .await?;

        let chunk = self.assets.empty_chunk(self.version);
        self.send(Phase::Play, Outbound::ChunkData, &chunk).await?;

        let platform = self.assets.platform_update(self.version);
        self.send(Phase::Play, Outbound::UpdateSectionBlocks, &platform)
            .await?;

        self.keep_alive_id = i64::from(rand::random::<i32>());
        let keep_alive = server::KeepAlive {
            id: self.keep_alive_id,
        };
        self.send(Phase::Play, Outbound::KeepAlive, &keep_alive.encode(self.version))
            .await?;
        self.keep_alive_sent = Instant::now();

        self.state = State::AwaitKeepAlive;
        Ok(())
    }

    /// The Play-phase loop: keep-alive answer, then the gravity fall down
    /// to the collision.
    async fn run_play(&mut self) -> Result<(), VerifyError> {
        loop {
            let frame = self.read_frame().await?;
            let Some(packet) = self.classify(&frame)? else {
                // Unknown Play ids are dropped without decoding.
                continue;
            };

            match packet {
                ClientPacket::KeepAlive(keep_alive) => {
                    if self.state != State::AwaitKeepAlive {
                        continue;
                    }
                    if keep_alive.id != self.keep_alive_id {
                        return Err(VerifyError::KeepAliveMismatch {
                            expected: self.keep_alive_id,
                            actual: keep_alive.id,
                        });
                    }
                    // The echo doubles as the ping probe.
                    if self.keep_alive_sent.elapsed() > self.config.max_ping() {
                        return Err(VerifyError::Timeout);
                    }
                    self.state = State::Falling;
                }
                ClientPacket::PlayerPosition(position)
                | ClientPacket::PlayerPositionLook(position) => {
                    if self.state != State::Falling {
                        // Position chatter before the keep-alive answer is
                        // client lag, not an attack signal.
                        continue;
                    }
                    if self.check_motion(&position)? {
                        return Ok(());
                    }
                }
                ClientPacket::PlayerLook(_) | ClientPacket::PlayerOnGround(_) => {}
                ClientPacket::TeleportConfirm(_) => {}
                ClientPacket::ClientSettings(settings) => self.check_client_settings(&settings)?,
                ClientPacket::PluginMessage(message) => self.check_plugin_message(&message)?,
                other => {
                    return Err(VerifyError::OutOfOrder {
                        packet: packet_name(&other),
                        phase: self.phase,
                    })
                }
            }
        }
    }

    /// Validates one reported position against the motion table. Returns
    /// true when the player has come to rest on the platform.
    fn check_motion(&mut self, position: &client::PlayerPosition) -> Result<bool, VerifyError> {
        let assets = Arc::clone(&self.assets);
        let spawn_y = assets.spawn_y;
        let motion = &assets.motion;

        // Clients echo the teleport before physics kicks in.
        if !self.position_seen && (position.y - spawn_y).abs() <= GRAVITY_TOLERANCE {
            self.position_seen = true;
            return Ok(false);
        }
        self.position_seen = true;

        // Touching down: the player's feet clamp to the platform top.
        if position.y <= PLATFORM_TOP + GRAVITY_TOLERANCE {
            return self.check_collision(position).map(|_| true);
        }

        if !self.config.check_gravity {
            self.tick = (self.tick + 1).min(motion.max_prediction_tick());
            return Ok(false);
        }

        // The client may have skipped ticks (lag) or repeated one; search
        // the nearby expectations, charging the deviation to the ignored
        // budget. A candidate whose deviation no longer fits the budget is
        // not an option.
        let remaining = self
            .config
            .max_ignored_ticks
            .saturating_sub(self.ignored_ticks);
        let expected_tick = self.tick + 1;
        let last_candidate = (expected_tick + remaining).min(motion.max_prediction_tick());

        for candidate in self.tick..=last_candidate {
            if candidate.abs_diff(expected_tick) > remaining {
                continue;
            }
            let expected_y = spawn_y - motion.cumulative(candidate);
            if (position.y - expected_y).abs() <= GRAVITY_TOLERANCE {
                self.ignored_ticks += candidate.abs_diff(expected_tick);
                self.tick = candidate.max(self.tick);
                return Ok(false);
            }
        }

        if expected_tick > motion.max_prediction_tick() {
            // Ran out of table without ever landing.
            return Err(VerifyError::CollisionMissed {
                x: position.x,
                y: position.y,
                z: position.z,
            });
        }

        Err(VerifyError::GravityViolation {
            tick: expected_tick,
            expected: spawn_y - motion.cumulative(expected_tick),
            actual: position.y,
        })
    }

    /// The landing: the feet must sit exactly on the platform top, inside
    /// the platform's footprint.
    fn check_collision(&self, position: &client::PlayerPosition) -> Result<(), VerifyError> {
        if !self.config.check_collisions {
            return Ok(());
        }
        let on_top = (position.y - PLATFORM_TOP).abs() <= GRAVITY_TOLERANCE;
        if on_top && assets::on_platform(position.x, position.z) {
            Ok(())
        } else {
            Err(VerifyError::CollisionMissed {
                x: position.x,
                y: position.y,
                z: position.z,
            })
        }
    }

    fn check_client_settings(&mut self, settings: &client::ClientSettings) -> Result<(), VerifyError> {
        if self.settings_checked {
            return Ok(());
        }
        self.settings_checked = true;
        if self.validators.locale.is_match(&settings.locale) {
            Ok(())
        } else {
            Err(VerifyError::InvalidLocale)
        }
    }

    fn check_plugin_message(&mut self, message: &client::PluginMessage) -> Result<(), VerifyError> {
        if !message.is_brand(self.version) || self.brand_checked {
            return Ok(());
        }
        self.brand_checked = true;
        let brand = message
            .brand(self.version, self.config.max_brand_length)
            .map_err(|_| VerifyError::InvalidBrand)?;
        if self.validators.brand.is_match(&brand) {
            Ok(())
        } else {
            Err(VerifyError::InvalidBrand)
        }
    }

    async fn read_handshake(&mut self) -> Result<client::Handshake, VerifyError> {
        let frame = self.read_frame().await?;
        if self.registry.inbound(Phase::Handshake, frame.packet_id) != Some(Inbound::Handshake) {
            return Err(VerifyError::UnknownPacketId {
                id: frame.packet_id,
                phase: Phase::Handshake,
            });
        }
        let mut decoder = crate::protocol::Decoder::new(&frame.payload);
        client::Handshake::decode(&mut decoder).map_err(VerifyError::Decode)
    }

    async fn read_login_start(&mut self) -> Result<client::LoginStart, VerifyError> {
        let frame = self.read_frame().await?;
        match self.classify(&frame)? {
            Some(ClientPacket::LoginStart(login)) => Ok(login),
            Some(other) => Err(VerifyError::OutOfOrder {
                packet: packet_name(&other),
                phase: self.phase,
            }),
            None => unreachable!("login unknowns are fatal in classify"),
        }
    }

    /// Maps a frame to a decoded packet via the bound registry slice.
    /// `Ok(None)` is a dropped unknown (Play only).
    fn classify(&mut self, frame: &Frame) -> Result<Option<ClientPacket>, VerifyError> {
        let Some(kind) = self.registry.inbound(self.phase, frame.packet_id) else {
            return if self.phase == Phase::Play {
                Ok(None)
            } else {
                Err(VerifyError::UnknownPacketId {
                    id: frame.packet_id,
                    phase: self.phase,
                })
            };
        };

        let packet = client::decode(kind, &frame.payload, self.version).map_err(|error| {
            if kind == Inbound::LoginStart
                && matches!(error, DecodeError::StringTooLong { .. })
            {
                VerifyError::InvalidUsername
            } else {
                VerifyError::Decode(error)
            }
        })?;
        Ok(Some(packet))
    }

    async fn read_frame(&mut self) -> Result<Frame, VerifyError> {
        let mut buffer = [0u8; 1024];
        loop {
            if let Some(frame) = self.codec.next_frame()? {
                self.packets_seen += 1;
                if self.packets_seen > self.config.max_login_packets {
                    return Err(VerifyError::TooManyPackets);
                }
                return Ok(frame);
            }

            let read = timeout_at(self.deadline, self.stream.read(&mut buffer))
                .await
                .map_err(|_| VerifyError::Timeout)??;
            if read == 0 {
                return Err(VerifyError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            if let Some(replay) = &mut self.replay {
                replay.extend_from_slice(&buffer[..read]);
            }
            self.codec.give_data(&buffer[..read]);
        }
    }

    async fn send(
        &mut self,
        phase: Phase,
        kind: Outbound,
        payload: &[u8],
    ) -> Result<(), VerifyError> {
        let id = self
            .registry
            .outbound_id(phase, kind)
            .ok_or(VerifyError::UnknownPacketId { id: -1, phase })?;
        let frame = self.codec.encode_frame(id, payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends the pre-authored disconnect screen for the current phase.
    async fn disconnect(&mut self, reason: DisconnectReason) -> Result<(), VerifyError> {
        let packet = server::Disconnect {
            component: reason.component(),
        };
        let payload = packet.encode(self.version);
        let kind = match self.phase {
            Phase::Configuration => Outbound::ConfigDisconnect,
            Phase::Play => Outbound::Disconnect,
            _ => Outbound::LoginDisconnect,
        };
        let phase = if self.phase == Phase::Handshake {
            Phase::Login
        } else {
            self.phase
        };
        self.send(phase, kind, &payload).await
    }
}

/// Offline-mode UUID derivation: deterministic per username, so the
/// verified pair matches when the client reconnects.
pub fn offline_uuid(username: &str) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("OfflinePlayer:{username}").as_bytes(),
    )
}

fn packet_name(packet: &ClientPacket) -> &'static str {
    // strum's AsRefStr returns the variant name with a non-static borrow;
    // match instead so the error type stays 'static.
    match packet {
        ClientPacket::Handshake(_) => "Handshake",
        ClientPacket::LoginStart(_) => "LoginStart",
        ClientPacket::LoginAcknowledged => "LoginAcknowledged",
        ClientPacket::ClientSettings(_) => "ClientSettings",
        ClientPacket::PluginMessage(_) => "PluginMessage",
        ClientPacket::FinishConfiguration => "FinishConfiguration",
        ClientPacket::KeepAlive(_) => "KeepAlive",
        ClientPacket::TeleportConfirm(_) => "TeleportConfirm",
        ClientPacket::PlayerPosition(_) => "PlayerPosition",
        ClientPacket::PlayerPositionLook(_) => "PlayerPositionLook",
        ClientPacket::PlayerLook(_) => "PlayerLook",
        ClientPacket::PlayerOnGround(_) => "PlayerOnGround",
    }
}

/// Result of the inner state machine, before the stream is moved out.
enum Step {
    Verified { username: String, uuid: Uuid },
    PassThrough { replay: Vec<u8>, username: String },
    Rejected(DisconnectReason),
    Status,
}
