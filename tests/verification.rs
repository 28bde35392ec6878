//! End-to-end verification scenarios, driven over in-memory duplex
//! sockets with a minimal scripted client.

use limbo_gate::{
    admission::AdmissionControl,
    assets::{Assets, MotionTable},
    blacklist::Blacklist,
    config::{Config, Validators},
    error::{DisconnectReason, VerifyError},
    event::NullSink,
    protocol::{
        codec::{CompressionThreshold, Frame, FrameCodec},
        Decoder, Encoder,
    },
    session::{offline_uuid, Session, SessionOutcome},
    verified::{NoPersistence, VerifiedStore},
};
use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    task::JoinHandle,
    time::timeout,
};

const PLATFORM_TOP: f64 = 256.0;

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

struct Harness {
    config: Arc<Config>,
    validators: Arc<Validators>,
    assets: Arc<Assets>,
    control: Arc<AdmissionControl>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let verified = Arc::new(VerifiedStore::new(
            1024,
            Duration::from_secs(3600),
            Arc::new(NoPersistence),
        ));
        let blacklist = Arc::new(Blacklist::new(Duration::from_secs(600)));
        let control = Arc::new(AdmissionControl::new(
            config.clone(),
            verified,
            blacklist,
            Arc::new(NullSink),
            Arc::new(AtomicBool::new(false)),
        ));
        Self {
            validators: Arc::new(config.validators().unwrap()),
            assets: Arc::new(Assets::prepare(&config).unwrap()),
            config: Arc::new(config),
            control,
        }
    }

    fn connect(
        &self,
        peer: IpAddr,
    ) -> (
        TestClient,
        JoinHandle<Result<SessionOutcome<DuplexStream>, VerifyError>>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let session = Session::new(
            server_io,
            peer,
            Arc::clone(&self.config),
            Arc::clone(&self.validators),
            Arc::clone(&self.assets),
            Arc::clone(&self.control),
            Arc::new(NullSink),
        );
        let handle = tokio::spawn(session.run());
        (TestClient::new(client_io), handle)
    }
}

/// The scripted client half.
struct TestClient {
    io: DuplexStream,
    codec: FrameCodec,
}

impl TestClient {
    fn new(io: DuplexStream) -> Self {
        Self {
            io,
            codec: FrameCodec::new(1024 * 1024),
        }
    }

    async fn send(&mut self, packet_id: i32, payload: &[u8]) {
        let frame = self.codec.encode_frame(packet_id, payload).unwrap();
        // The server may have torn the session down mid-script; scripted
        // sends past that point are intentionally lost.
        self.io.write_all(&frame).await.ok();
    }

    async fn recv(&mut self) -> Frame {
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(frame) = self.codec.next_frame().unwrap() {
                return frame;
            }
            let read = timeout(Duration::from_secs(5), self.io.read(&mut buffer))
                .await
                .expect("timed out waiting for server")
                .unwrap();
            assert_ne!(read, 0, "server closed unexpectedly");
            self.codec.give_data(&buffer[..read]);
        }
    }

    async fn handshake(&mut self, protocol: i32, next_state: i32) {
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_var_int(protocol);
        encoder.write_string("localhost");
        encoder.write_u16(25565);
        encoder.write_var_int(next_state);
        self.send(0x00, &payload).await;
    }

    async fn login_start_legacy(&mut self, username: &str) {
        let mut payload = Vec::new();
        Encoder::new(&mut payload).write_string(username);
        self.send(0x00, &payload).await;
    }

    async fn login_start_modern(&mut self, username: &str) {
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_string(username);
        encoder.write_u128(offline_uuid(username).as_u128());
        self.send(0x00, &payload).await;
    }

    /// Reads login clientbound packets until `LoginSuccess`, switching on
    /// compression when told to.
    async fn expect_login_success(&mut self) {
        loop {
            let frame = self.recv().await;
            match frame.packet_id {
                0x03 => {
                    let threshold = Decoder::new(&frame.payload).read_var_int().unwrap();
                    self.codec
                        .enable_compression(CompressionThreshold(threshold as usize));
                }
                0x02 => return,
                0x00 => panic!("unexpected login disconnect"),
                other => panic!("unexpected login packet {other:#x}"),
            }
        }
    }

    async fn expect_disconnect_in_play(&mut self, play_disconnect_id: i32) -> String {
        loop {
            let frame = self.recv().await;
            if frame.packet_id == play_disconnect_id {
                return String::from_utf8_lossy(&frame.payload).into_owned();
            }
        }
    }
}

/// The positions a well-behaved client reports while falling.
fn fall_positions(spawn_y: f64, max_movement_ticks: u32) -> Vec<(f64, bool)> {
    let motion = MotionTable::new(max_movement_ticks);
    let mut positions = Vec::new();
    for tick in 1..=motion.max_prediction_tick() {
        let y = spawn_y - motion.cumulative(tick);
        if y <= PLATFORM_TOP {
            positions.push((PLATFORM_TOP, true));
            return positions;
        }
        positions.push((y, false));
    }
    panic!("player never reached the platform; spawn {spawn_y} too high");
}

fn quiet_config() -> Config {
    Config {
        enable_compression: false,
        reconnect_delay_ms: 0,
        ..Config::default()
    }
}

#[tokio::test]
async fn happy_path_1_20_2() {
    let harness = Harness::new(quiet_config());
    let (mut client, session) = harness.connect(ip(1));

    client.handshake(764, 2).await;
    client.login_start_modern("Alice").await;
    client.expect_login_success().await;

    // Configuration phase.
    client.send(0x03, &[]).await; // login acknowledged
    let registry = client.recv().await;
    assert_eq!(registry.packet_id, 0x05);
    assert!(!registry.payload.is_empty());
    let finish = client.recv().await;
    assert_eq!(finish.packet_id, 0x02);
    client.send(0x02, &[]).await; // acknowledge finish configuration

    // The limbo world: join game, abilities, teleport, chunk, platform,
    // keep-alive.
    let join_game = client.recv().await;
    assert_eq!(join_game.packet_id, 0x29);
    let abilities = client.recv().await;
    assert_eq!(abilities.packet_id, 0x36);

    let teleport = client.recv().await;
    assert_eq!(teleport.packet_id, 0x3E);
    let mut decoder = Decoder::new(&teleport.payload);
    let spawn_x = decoder.read_f64().unwrap();
    let spawn_y = decoder.read_f64().unwrap();
    let spawn_z = decoder.read_f64().unwrap();
    assert_eq!((spawn_x, spawn_z), (8.0, 8.0));

    let chunk = client.recv().await;
    assert_eq!(chunk.packet_id, 0x25);
    let platform = client.recv().await;
    assert_eq!(platform.packet_id, 0x45);

    let keep_alive = client.recv().await;
    assert_eq!(keep_alive.packet_id, 0x24);
    let token = Decoder::new(&keep_alive.payload).read_i64().unwrap();

    // Echo the keep-alive, confirm the teleport position, then fall.
    let mut reply = Vec::new();
    Encoder::new(&mut reply).write_i64(token);
    client.send(0x14, &reply).await;

    let send_position = |y: f64, on_ground: bool| {
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_f64(8.0);
        encoder.write_f64(y);
        encoder.write_f64(8.0);
        encoder.write_bool(on_ground);
        payload
    };

    client.send(0x16, &send_position(spawn_y, false)).await;
    for (y, on_ground) in fall_positions(spawn_y, harness.config.max_movement_ticks) {
        client.send(0x16, &send_position(y, on_ground)).await;
    }

    let screen = client.expect_disconnect_in_play(0x1B).await;
    assert!(screen.contains("Verified"), "unexpected screen: {screen}");

    let outcome = session.await.unwrap().unwrap();
    match outcome {
        SessionOutcome::Verified { username, uuid } => {
            assert_eq!(username, "Alice");
            assert_eq!(uuid, offline_uuid("Alice"));
        }
        _ => panic!("expected Verified"),
    }
    assert!(harness
        .control
        .verified()
        .contains(ip(1), offline_uuid("Alice")));
}

#[tokio::test]
async fn happy_path_1_8_with_compression() {
    let config = Config {
        reconnect_delay_ms: 0,
        ..Config::default()
    };
    let harness = Harness::new(config);
    let (mut client, session) = harness.connect(ip(2));

    client.handshake(47, 2).await;
    client.login_start_legacy("Bob").await;
    client.expect_login_success().await;

    let join_game = client.recv().await;
    assert_eq!(join_game.packet_id, 0x01);
    let abilities = client.recv().await;
    assert_eq!(abilities.packet_id, 0x39);

    let teleport = client.recv().await;
    assert_eq!(teleport.packet_id, 0x08);
    let mut decoder = Decoder::new(&teleport.payload);
    decoder.read_f64().unwrap();
    let spawn_y = decoder.read_f64().unwrap();

    assert_eq!(client.recv().await.packet_id, 0x21); // chunk
    assert_eq!(client.recv().await.packet_id, 0x22); // platform

    let keep_alive = client.recv().await;
    assert_eq!(keep_alive.packet_id, 0x00);
    let token = Decoder::new(&keep_alive.payload).read_var_int().unwrap();

    let mut reply = Vec::new();
    Encoder::new(&mut reply).write_var_int(token);
    client.send(0x00, &reply).await;

    let send_position = |y: f64, on_ground: bool| {
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_f64(8.0);
        encoder.write_f64(y);
        encoder.write_f64(8.0);
        encoder.write_bool(on_ground);
        payload
    };

    client.send(0x04, &send_position(spawn_y, false)).await;
    for (y, on_ground) in fall_positions(spawn_y, harness.config.max_movement_ticks) {
        client.send(0x04, &send_position(y, on_ground)).await;
    }

    let screen = client.expect_disconnect_in_play(0x40).await;
    assert!(screen.contains("Verified"), "unexpected screen: {screen}");

    assert!(matches!(
        session.await.unwrap().unwrap(),
        SessionOutcome::Verified { .. }
    ));
    assert!(harness
        .control
        .verified()
        .contains(ip(2), offline_uuid("Bob")));
}

#[tokio::test]
async fn gravity_stall_fails_verification() {
    let harness = Harness::new(quiet_config());
    let (mut client, session) = harness.connect(ip(3));

    client.handshake(764, 2).await;
    client.login_start_modern("Mallory").await;
    client.expect_login_success().await;

    client.send(0x03, &[]).await;
    client.recv().await; // registry
    client.recv().await; // finish configuration
    client.send(0x02, &[]).await;

    let mut spawn_y = 0.0;
    let mut token = 0;
    for _ in 0..6 {
        let frame = client.recv().await;
        if frame.packet_id == 0x3E {
            let mut decoder = Decoder::new(&frame.payload);
            decoder.read_f64().unwrap();
            spawn_y = decoder.read_f64().unwrap();
        } else if frame.packet_id == 0x24 {
            token = Decoder::new(&frame.payload).read_i64().unwrap();
        }
    }

    let mut reply = Vec::new();
    Encoder::new(&mut reply).write_i64(token);
    client.send(0x14, &reply).await;

    // Report the spawn height over and over: no gravity.
    for _ in 0..(harness.config.max_ignored_ticks + 3) {
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_f64(8.0);
        encoder.write_f64(spawn_y);
        encoder.write_f64(8.0);
        encoder.write_bool(false);
        client.send(0x16, &payload).await;
    }

    let error = session.await.unwrap().unwrap_err();
    assert!(
        matches!(error, VerifyError::GravityViolation { .. }),
        "expected gravity violation, got {error}"
    );
}

#[tokio::test]
async fn version_gate_rejects_out_of_range() {
    for protocol in [3, 9999] {
        let harness = Harness::new(quiet_config());
        let (mut client, session) = harness.connect(ip(4));

        client.handshake(protocol, 2).await;
        let disconnect = client.recv().await;
        assert_eq!(disconnect.packet_id, 0x00);

        match session.await.unwrap().unwrap() {
            SessionOutcome::Rejected(reason) => {
                assert_eq!(reason, DisconnectReason::InvalidProtocol)
            }
            _ => panic!("expected rejection for protocol {protocol}"),
        }
    }
}

#[tokio::test]
async fn fast_reconnect_rejected() {
    let config = Config {
        enable_compression: false,
        reconnect_delay_ms: 8000,
        ..Config::default()
    };
    let harness = Harness::new(config);

    let (mut client, session) = harness.connect(ip(5));
    client.handshake(764, 2).await;
    client.login_start_modern("Eve").await;
    client.expect_login_success().await;
    drop(client);
    session.await.unwrap().unwrap_err();

    // The same IP reconnects well inside the 8 s window.
    let (mut client, session) = harness.connect(ip(5));
    client.handshake(764, 2).await;
    client.login_start_modern("Eve").await;
    let disconnect = client.recv().await;
    assert_eq!(disconnect.packet_id, 0x00);

    match session.await.unwrap().unwrap() {
        SessionOutcome::Rejected(reason) => {
            assert_eq!(reason, DisconnectReason::TooFastReconnect)
        }
        _ => panic!("expected fast-reconnect rejection"),
    }
}

#[tokio::test]
async fn blacklist_promotion_after_repeated_failures() {
    let harness = Harness::new(quiet_config());
    let threshold = harness.config.blacklist_threshold;

    for _ in 0..threshold {
        let (mut client, session) = harness.connect(ip(6));
        client.handshake(764, 2).await;
        // An invalid username is an immediate verification failure.
        let mut payload = Vec::new();
        let mut encoder = Encoder::new(&mut payload);
        encoder.write_string("bad name");
        encoder.write_u128(0);
        client.send(0x00, &payload).await;
        let error = session.await.unwrap().unwrap_err();
        assert!(matches!(error, VerifyError::InvalidUsername));
    }

    assert!(harness.control.blacklist().contains(ip(6)));

    // The next connection is cut at the handshake.
    let (mut client, session) = harness.connect(ip(6));
    client.handshake(764, 2).await;
    let disconnect = client.recv().await;
    assert_eq!(disconnect.packet_id, 0x00);
    match session.await.unwrap().unwrap() {
        SessionOutcome::Rejected(reason) => assert_eq!(reason, DisconnectReason::Blacklisted),
        _ => panic!("expected blacklist rejection"),
    }
}

#[tokio::test]
async fn queue_saturation_and_promotion() {
    let config = Config {
        max_verifying_players: 1,
        ..quiet_config()
    };
    let harness = Harness::new(config);

    // First session occupies the only verification slot and stalls in the
    // keep-alive stage.
    let (mut first, first_session) = harness.connect(ip(7));
    first.handshake(764, 2).await;
    first.login_start_modern("Alpha").await;
    first.expect_login_success().await;

    // Second session from another IP lands in the queue.
    let (mut second, second_session) = harness.connect(ip(8));
    second.handshake(764, 2).await;
    second.login_start_modern("Beta").await;

    // While the slot is held, ticks promote nobody.
    harness.control.tick();
    assert_eq!(harness.control.queue_len(), 1);

    // A duplicate submission from the same IP replaces the queued entry.
    let (mut replacement, replacement_session) = harness.connect(ip(8));
    replacement.handshake(764, 2).await;
    replacement.login_start_modern("Beta").await;
    let disconnect = second.recv().await;
    assert_eq!(disconnect.packet_id, 0x00);
    match second_session.await.unwrap().unwrap() {
        SessionOutcome::Rejected(reason) => assert_eq!(reason, DisconnectReason::AlreadyQueued),
        _ => panic!("expected replaced entry to be told AlreadyQueued"),
    }

    // The first session ends; its permit frees the slot and the next tick
    // promotes the queued connection.
    drop(first);
    first_session.await.unwrap().unwrap_err();
    harness.control.tick();

    replacement.expect_login_success().await;
    drop(replacement);
    replacement_session.await.unwrap().unwrap_err();
}

#[tokio::test]
async fn verified_pair_passes_straight_through() {
    let harness = Harness::new(quiet_config());
    harness
        .control
        .verified()
        .insert(ip(9), offline_uuid("Alice"));

    let (mut client, session) = harness.connect(ip(9));
    client.handshake(764, 2).await;
    client.login_start_modern("Alice").await;

    match session.await.unwrap().unwrap() {
        SessionOutcome::PassThrough {
            replay, username, ..
        } => {
            assert_eq!(username, "Alice");
            // The replay buffer carries everything the gateway consumed:
            // both inbound frames, byte for byte.
            assert!(!replay.is_empty());
            let mut codec = FrameCodec::new(1024 * 1024);
            codec.give_data(&replay);
            let handshake = codec.next_frame().unwrap().unwrap();
            assert_eq!(handshake.packet_id, 0x00);
            let login = codec.next_frame().unwrap().unwrap();
            let mut decoder = Decoder::new(&login.payload);
            assert_eq!(decoder.read_string().unwrap(), "Alice");
            assert!(codec.next_frame().unwrap().is_none());
        }
        _ => panic!("expected pass-through"),
    }
}

#[tokio::test]
async fn packet_ceiling_is_fatal() {
    let config = Config {
        max_login_packets: 3,
        ..quiet_config()
    };
    let harness = Harness::new(config);
    let (mut client, session) = harness.connect(ip(10));

    client.handshake(47, 2).await; // packet 1
    client.login_start_legacy("Carol").await; // packet 2
    client.expect_login_success().await;

    // Two junk Play packets blow the ceiling of 3.
    client.send(0x7F, &[]).await;
    client.send(0x7F, &[]).await;

    let error = session.await.unwrap().unwrap_err();
    assert!(
        matches!(error, VerifyError::TooManyPackets),
        "expected packet ceiling, got {error}"
    );
}

#[tokio::test]
async fn slow_keep_alive_echo_fails_the_session() {
    let config = Config {
        max_ping_ms: 1,
        ..quiet_config()
    };
    let harness = Harness::new(config);
    let (mut client, session) = harness.connect(ip(14));

    client.handshake(47, 2).await;
    client.login_start_legacy("Dave").await;
    client.expect_login_success().await;

    // Skip to the keep-alive probe.
    let mut token = 0;
    for _ in 0..6 {
        let frame = client.recv().await;
        if frame.packet_id == 0x00 {
            token = Decoder::new(&frame.payload).read_var_int().unwrap();
        }
    }

    // Echo well past the 1 ms ceiling.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let mut reply = Vec::new();
    Encoder::new(&mut reply).write_var_int(token);
    client.send(0x00, &reply).await;

    let error = session.await.unwrap().unwrap_err();
    assert!(matches!(error, VerifyError::Timeout), "got {error}");
}

#[tokio::test]
async fn read_timeout_fails_the_session() {
    let config = Config {
        read_timeout_ms: 200,
        ..quiet_config()
    };
    let harness = Harness::new(config);
    let (mut client, session) = harness.connect(ip(11));

    client.handshake(764, 2).await;
    // Never send the login start.
    let error = session.await.unwrap().unwrap_err();
    assert!(matches!(error, VerifyError::Timeout));
    drop(client);
}

#[tokio::test]
async fn status_handshake_is_closed_without_verification() {
    let harness = Harness::new(quiet_config());
    let (mut client, session) = harness.connect(ip(12));

    client.handshake(764, 1).await;
    assert!(matches!(
        session.await.unwrap().unwrap(),
        SessionOutcome::Status
    ));

    // The socket is closed with nothing written.
    let mut buffer = [0u8; 64];
    assert_eq!(client.io.read(&mut buffer).await.unwrap(), 0);
}
