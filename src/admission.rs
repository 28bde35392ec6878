//! The admission pipeline: per-IP gates in front of the verifier, plus
//! attack detection.
//!
//! Handshake-time checks use only the peer address and the handshake
//! fields; identity-dependent checks run when `LoginStart` arrives. The
//! verifying-set insert is the linearization point for the one-session-
//! per-IP invariant, so every path into a session goes through
//! [`AdmissionControl::try_begin`].

use crate::{
    blacklist::Blacklist,
    config::Config,
    error::DisconnectReason,
    event::EventSink,
    queue::{AdmitQueue, QueueResult, Submission},
    verified::VerifiedStore,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use uuid::Uuid;

/// How long the admission rate must stay below the threshold before attack
/// mode disengages.
const ATTACK_COOLDOWN: Duration = Duration::from_secs(30);
/// Per-IP records older than this are pruned on the tick.
const RECORD_RETENTION: Duration = Duration::from_secs(120);

/// Decision for a `LoginStart`.
pub enum Admission {
    /// The (IP, UUID) pair is already verified; splice to the backend.
    PassThrough,
    /// Run the verification session. Dropping the permit releases the slot.
    Verify(SessionPermit),
    /// Parked in the queue; await the receiver, then retry [`AdmissionControl::try_begin`].
    Queued(oneshot::Receiver<QueueResult>),
    Reject(DisconnectReason),
}

/// Outcome of claiming a verification slot.
pub enum Begin {
    Begun(SessionPermit),
    AlreadyVerifying,
    Full,
}

struct IpRecord {
    last_attempt: Instant,
    consecutive_failures: u32,
}

struct AttackWindow {
    second_start: Instant,
    attempts: usize,
    calm_since: Option<Instant>,
}

struct Shared {
    verifying: Mutex<HashSet<IpAddr>>,
    online: Mutex<HashMap<IpAddr, usize>>,
}

/// Holds an IP's verification slot; dropping it releases the slot and the
/// per-IP verifying marker synchronously.
pub struct SessionPermit {
    shared: Arc<Shared>,
    ip: IpAddr,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.shared.verifying.lock().remove(&self.ip);
    }
}

/// Tracks one open socket for the per-IP connection cap.
pub struct ConnectionGuard {
    shared: Arc<Shared>,
    ip: IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut online = self.shared.online.lock();
        if let Some(count) = online.get_mut(&self.ip) {
            *count -= 1;
            if *count == 0 {
                online.remove(&self.ip);
            }
        }
    }
}

pub struct AdmissionControl {
    config: Config,
    verified: Arc<VerifiedStore>,
    blacklist: Arc<Blacklist>,
    queue: AdmitQueue,
    sink: Arc<dyn EventSink>,
    attack_mode: Arc<AtomicBool>,
    shared: Arc<Shared>,
    records: Mutex<HashMap<IpAddr, IpRecord>>,
    attack: Mutex<AttackWindow>,
}

impl AdmissionControl {
    pub fn new(
        config: Config,
        verified: Arc<VerifiedStore>,
        blacklist: Arc<Blacklist>,
        sink: Arc<dyn EventSink>,
        attack_mode: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue: AdmitQueue::new(config.max_queue_size),
            config,
            verified,
            blacklist,
            sink,
            attack_mode,
            shared: Arc::new(Shared {
                verifying: Mutex::new(HashSet::new()),
                online: Mutex::new(HashMap::new()),
            }),
            records: Mutex::new(HashMap::new()),
            attack: Mutex::new(AttackWindow {
                second_start: Instant::now(),
                attempts: 0,
                calm_since: None,
            }),
        }
    }

    pub fn verified(&self) -> &VerifiedStore {
        &self.verified
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn attack_mode(&self) -> bool {
        self.attack_mode.load(Ordering::Relaxed)
    }

    /// Registers an accepted socket for the per-IP cap.
    pub fn track_connection(&self, ip: IpAddr) -> ConnectionGuard {
        *self.shared.online.lock().entry(ip).or_insert(0) += 1;
        ConnectionGuard {
            shared: Arc::clone(&self.shared),
            ip,
        }
    }

    /// Handshake-time gates; these never decode anything past the
    /// handshake.
    pub fn check_handshake(
        &self,
        ip: IpAddr,
        protocol_number: i32,
    ) -> Result<crate::protocol::version::ProtocolVersion, DisconnectReason> {
        if self.config.lockdown.enabled {
            return Err(DisconnectReason::Lockdown);
        }
        let version = crate::protocol::version::ProtocolVersion::from_number(protocol_number)
            .ok_or(DisconnectReason::InvalidProtocol)?;
        let online = self.shared.online.lock().get(&ip).copied().unwrap_or(0);
        if online > self.config.max_online_per_ip {
            return Err(DisconnectReason::AlreadyConnected);
        }
        if self.blacklist.contains(ip) {
            return Err(DisconnectReason::Blacklisted);
        }
        Ok(version)
    }

    /// Identity-dependent gates, run once `LoginStart` names the client.
    pub fn admit_login(&self, ip: IpAddr, uuid: Uuid) -> Admission {
        self.note_attempt();

        if self.verified.contains(ip, uuid) {
            return Admission::PassThrough;
        }

        {
            let mut records = self.records.lock();
            let now = Instant::now();
            if let Some(record) = records.get_mut(&ip) {
                let elapsed = now.duration_since(record.last_attempt);
                record.last_attempt = now;
                if elapsed < self.config.reconnect_delay() {
                    return Admission::Reject(DisconnectReason::TooFastReconnect);
                }
            } else {
                records.insert(
                    ip,
                    IpRecord {
                        last_attempt: now,
                        consecutive_failures: 0,
                    },
                );
            }
        }

        match self.try_begin(ip) {
            Begin::Begun(permit) => Admission::Verify(permit),
            Begin::AlreadyVerifying => Admission::Reject(DisconnectReason::AlreadyVerifying),
            Begin::Full => match self.queue.submit(ip) {
                Submission::Queued(waiter) => Admission::Queued(waiter),
                Submission::Full => Admission::Reject(DisconnectReason::TooManyPlayers),
            },
        }
    }

    /// Claims a verification slot for `ip`. Linearizable with every other
    /// claim and release.
    pub fn try_begin(&self, ip: IpAddr) -> Begin {
        let mut verifying = self.shared.verifying.lock();
        if verifying.contains(&ip) {
            return Begin::AlreadyVerifying;
        }
        if verifying.len() >= self.config.max_verifying_players {
            return Begin::Full;
        }
        verifying.insert(ip);
        Begin::Begun(SessionPermit {
            shared: Arc::clone(&self.shared),
            ip,
        })
    }

    /// Records a failed verification. Returns true when the failure
    /// promoted the IP to the blacklist.
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        let threshold = if self.attack_mode() {
            self.config.blacklist_threshold_during_attack
        } else {
            self.config.blacklist_threshold
        };

        let mut records = self.records.lock();
        let record = records.entry(ip).or_insert(IpRecord {
            last_attempt: Instant::now(),
            consecutive_failures: 0,
        });
        record.consecutive_failures += 1;
        if record.consecutive_failures >= threshold {
            record.consecutive_failures = 0;
            drop(records);
            self.blacklist.insert(ip);
            self.sink.on_blacklist(ip);
            return true;
        }
        false
    }

    /// Resets the failure streak after a pass.
    pub fn record_success(&self, ip: IpAddr) {
        if let Some(record) = self.records.lock().get_mut(&ip) {
            record.consecutive_failures = 0;
        }
    }

    /// The 500 ms maintenance tick: promote queued admissions up to the
    /// configured budget (and never past free capacity), roll the attack
    /// window, prune stale records.
    pub fn tick(&self) {
        let free = {
            let verifying = self.shared.verifying.lock();
            self.config.max_verifying_players.saturating_sub(verifying.len())
        };
        let budget = self.config.max_queue_polls.min(free);
        if budget > 0 {
            self.queue.poll(budget);
        }

        self.roll_attack_window();

        let mut records = self.records.lock();
        records.retain(|_, record| record.last_attempt.elapsed() < RECORD_RETENTION);
    }

    /// Drains the queue with rejections; called on shutdown.
    pub fn shutdown(&self) {
        self.queue.drain();
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn note_attempt(&self) {
        self.attack.lock().attempts += 1;
    }

    fn roll_attack_window(&self) {
        let mut attack = self.attack.lock();
        if attack.second_start.elapsed() < Duration::from_secs(1) {
            return;
        }

        let over = attack.attempts > self.config.min_players_for_attack;
        attack.attempts = 0;
        attack.second_start = Instant::now();

        if over {
            attack.calm_since = None;
            if !self.attack_mode.swap(true, Ordering::Relaxed) {
                self.sink.on_attack_start();
            }
        } else if self.attack_mode.load(Ordering::Relaxed) {
            let calm_since = *attack.calm_since.get_or_insert_with(Instant::now);
            if calm_since.elapsed() >= ATTACK_COOLDOWN {
                attack.calm_since = None;
                self.attack_mode.store(false, Ordering::Relaxed);
                self.sink.on_attack_end();
            }
        }
    }
}
