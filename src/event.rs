//! Observability hooks.
//!
//! The gateway reports lifecycle events through an [`EventSink`]; embedders
//! plug in their own (metrics, action bars, webhooks). The shipped
//! [`LogSink`] writes structured logs and honors attack-mode suppression.

use crate::error::VerifyError;
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Callbacks for verification lifecycle events. All methods default to
/// no-ops so sinks only implement what they care about.
pub trait EventSink: Send + Sync {
    fn on_admit(&self, _ip: IpAddr, _username: &str) {}
    fn on_success(&self, _ip: IpAddr, _username: &str) {}
    fn on_fail(&self, _ip: IpAddr, _reason: &VerifyError) {}
    fn on_blacklist(&self, _ip: IpAddr) {}
    fn on_attack_start(&self) {}
    fn on_attack_end(&self) {}
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {}

/// Logs events through `tracing`. Per-connection events are suppressed
/// while attack mode is active unless configured otherwise.
pub struct LogSink {
    attack_mode: Arc<AtomicBool>,
    log_connections: bool,
    log_during_attack: bool,
}

impl LogSink {
    pub fn new(attack_mode: Arc<AtomicBool>, log_connections: bool, log_during_attack: bool) -> Self {
        Self {
            attack_mode,
            log_connections,
            log_during_attack,
        }
    }

    fn per_connection_logging(&self) -> bool {
        if !self.log_connections {
            return false;
        }
        self.log_during_attack || !self.attack_mode.load(Ordering::Relaxed)
    }
}

impl EventSink for LogSink {
    fn on_admit(&self, ip: IpAddr, username: &str) {
        if self.per_connection_logging() {
            tracing::info!(%ip, username, "verification started");
        }
    }

    fn on_success(&self, ip: IpAddr, username: &str) {
        if self.per_connection_logging() {
            tracing::info!(%ip, username, "verification passed");
        }
    }

    fn on_fail(&self, ip: IpAddr, reason: &VerifyError) {
        if self.per_connection_logging() {
            tracing::info!(%ip, %reason, "verification failed");
        }
    }

    fn on_blacklist(&self, ip: IpAddr) {
        // Blacklisting is rare enough to log even under attack.
        tracing::warn!(%ip, "address blacklisted");
    }

    fn on_attack_start(&self) {
        tracing::warn!("attack detected, entering attack mode");
    }

    fn on_attack_end(&self) {
        tracing::info!("attack subsided, leaving attack mode");
    }
}
