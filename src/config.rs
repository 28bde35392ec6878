//! The immutable configuration snapshot.
//!
//! How the snapshot is produced (file format, reload strategy) is the
//! embedder's business; the gateway only ever sees a finished `Config`.

use regex::Regex;
use serde::Deserialize;
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Address the gateway listens on.
    pub listen_address: SocketAddr,
    /// Backend server verified connections are spliced through to.
    pub backend_address: SocketAddr,

    /// Length of the gravity-check window, in ticks.
    pub max_movement_ticks: u32,
    /// How many missing or duplicated position updates are absorbed before
    /// the gravity check fails.
    pub max_ignored_ticks: u32,
    /// Cap on concurrently verifying sessions.
    pub max_verifying_players: usize,
    /// Queue admissions promoted per 500 ms tick.
    pub max_queue_polls: usize,
    /// Cap on queued admissions.
    pub max_queue_size: usize,
    /// Ceiling on inbound packets for one verification.
    pub max_login_packets: u32,
    /// Per-read deadline in milliseconds.
    pub read_timeout_ms: u64,
    /// Reconnects from the same IP within this window are rejected.
    pub reconnect_delay_ms: u64,
    /// Ceiling on the keep-alive round trip in milliseconds.
    pub max_ping_ms: u64,
    /// Byte cap on the client brand string.
    pub max_brand_length: usize,

    pub valid_name_regex: String,
    pub valid_brand_regex: String,
    pub valid_locale_regex: String,

    /// Emit `SetCompression` during login (1.8+ clients only).
    pub enable_compression: bool,
    /// Threshold handed to `SetCompression`.
    pub compression_threshold: i32,
    /// Gamemode placed into `JoinGame`.
    pub gamemode_id: u8,
    /// Run the gravity check.
    pub check_gravity: bool,
    /// Require the landing position to be on the platform.
    pub check_collisions: bool,

    /// New admissions per second above which attack mode engages.
    pub min_players_for_attack: usize,
    /// Concurrent connections allowed per IP.
    pub max_online_per_ip: usize,
    /// Log each connection attempt.
    pub log_connections: bool,
    /// Keep per-connection logging on during an attack.
    pub log_during_attack: bool,

    /// Consecutive failures before an IP is blacklisted.
    pub blacklist_threshold: u32,
    /// Same, while attack mode is active.
    pub blacklist_threshold_during_attack: u32,
    /// Blacklist entry lifetime in seconds.
    pub blacklist_ttl_secs: u64,
    /// Verified entry lifetime in seconds.
    pub verified_ttl_secs: u64,
    /// Cap on verified-store entries (LRU beyond this).
    pub max_verified_entries: u64,

    pub lockdown: Lockdown,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Lockdown {
    pub enabled: bool,
    /// Permission node that bypasses the lockdown. Only evaluable by the
    /// host platform after authentication; during lockdown the gateway
    /// itself rejects everyone.
    pub bypass_permission: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:25565".parse().unwrap(),
            backend_address: "127.0.0.1:25566".parse().unwrap(),
            max_movement_ticks: 8,
            max_ignored_ticks: 5,
            max_verifying_players: 256,
            max_queue_polls: 10,
            max_queue_size: 8192,
            max_login_packets: 256,
            read_timeout_ms: 8000,
            reconnect_delay_ms: 5000,
            max_ping_ms: 10000,
            max_brand_length: 64,
            valid_name_regex: "^[a-zA-Z0-9_]+$".into(),
            valid_brand_regex: "^[!-~ ]+$".into(),
            valid_locale_regex: "^[a-zA-Z_]+$".into(),
            enable_compression: true,
            compression_threshold: 256,
            gamemode_id: 3,
            check_gravity: true,
            check_collisions: true,
            min_players_for_attack: 20,
            max_online_per_ip: 3,
            log_connections: true,
            log_during_attack: false,
            blacklist_threshold: 3,
            blacklist_threshold_during_attack: 1,
            blacklist_ttl_secs: 600,
            verified_ttl_secs: 86400 * 7,
            max_verified_entries: 100_000,
            lockdown: Lockdown::default(),
        }
    }
}

impl Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_ping(&self) -> Duration {
        Duration::from_millis(self.max_ping_ms)
    }

    pub fn blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.blacklist_ttl_secs)
    }

    pub fn verified_ttl(&self) -> Duration {
        Duration::from_secs(self.verified_ttl_secs)
    }

    /// Compiles the input validators once, at startup.
    pub fn validators(&self) -> anyhow::Result<Validators> {
        Ok(Validators {
            name: Regex::new(&self.valid_name_regex)?,
            brand: Regex::new(&self.valid_brand_regex)?,
            locale: Regex::new(&self.valid_locale_regex)?,
        })
    }
}

/// Compiled forms of the configured input validators.
#[derive(Debug, Clone)]
pub struct Validators {
    pub name: Regex,
    pub brand: Regex,
    pub locale: Regex,
}
