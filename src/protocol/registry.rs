//! Maps (connection phase, direction, protocol version) to packet-id
//! tables.
//!
//! Ids are declared as "since" tables: each entry gives the id a packet
//! took from that version onward. A session resolves its slice once, at
//! construction, into hash maps for both directions.

use crate::protocol::version::ProtocolVersion;
use std::collections::HashMap;
use ProtocolVersion::*;

/// A connection phase. Selects the packet-id tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum Phase {
    Handshake,
    Status,
    Login,
    Configuration,
    Play,
}

/// Direction of travel for a packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    Serverbound,
    Clientbound,
}

/// Serverbound packet kinds the verifier decodes. Anything else in Play is
/// dropped without decoding; anything else in Handshake/Login is fatal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum Inbound {
    Handshake,
    LoginStart,
    LoginAcknowledged,
    ClientSettings,
    PluginMessage,
    FinishConfiguration,
    KeepAlive,
    TeleportConfirm,
    PlayerPosition,
    PlayerPositionLook,
    PlayerLook,
    PlayerOnGround,
}

/// Clientbound packet kinds the verifier emits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum Outbound {
    LoginDisconnect,
    LoginSuccess,
    SetCompression,
    RegistryData,
    FinishConfiguration,
    ConfigDisconnect,
    JoinGame,
    Abilities,
    PlayerPositionLook,
    ChunkData,
    UpdateSectionBlocks,
    KeepAlive,
    Disconnect,
}

/// Id history of one packet: (first version the id applies to, id).
/// Entries are ascending by version; a version older than the first entry
/// does not carry the packet at all.
type IdTable = &'static [(ProtocolVersion, i32)];

struct InboundEntry {
    phase: Phase,
    kind: Inbound,
    since: IdTable,
}

struct OutboundEntry {
    phase: Phase,
    kind: Outbound,
    since: IdTable,
}

const INBOUND: &[InboundEntry] = &[
    InboundEntry {
        phase: Phase::Handshake,
        kind: Inbound::Handshake,
        since: &[(V1_7_2, 0x00)],
    },
    InboundEntry {
        phase: Phase::Login,
        kind: Inbound::LoginStart,
        since: &[(V1_7_2, 0x00)],
    },
    InboundEntry {
        phase: Phase::Login,
        kind: Inbound::LoginAcknowledged,
        since: &[(V1_20_2, 0x03)],
    },
    InboundEntry {
        phase: Phase::Configuration,
        kind: Inbound::ClientSettings,
        since: &[(V1_20_2, 0x00)],
    },
    InboundEntry {
        phase: Phase::Configuration,
        kind: Inbound::PluginMessage,
        since: &[(V1_20_2, 0x01)],
    },
    InboundEntry {
        phase: Phase::Configuration,
        kind: Inbound::FinishConfiguration,
        since: &[(V1_20_2, 0x02)],
    },
    InboundEntry {
        phase: Phase::Configuration,
        kind: Inbound::KeepAlive,
        since: &[(V1_20_2, 0x03)],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::KeepAlive,
        since: &[
            (V1_7_2, 0x00),
            (V1_9, 0x0B),
            (V1_12, 0x0C),
            (V1_12_1, 0x0B),
            (V1_13, 0x0E),
            (V1_14, 0x0F),
            (V1_16, 0x10),
            (V1_17, 0x0F),
            (V1_19, 0x11),
            (V1_19_1, 0x12),
            (V1_19_3, 0x11),
            (V1_19_4, 0x12),
            (V1_20_2, 0x14),
            (V1_20_3, 0x15),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::TeleportConfirm,
        since: &[(V1_9, 0x00)],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::PlayerPosition,
        since: &[
            (V1_7_2, 0x04),
            (V1_9, 0x0C),
            (V1_12, 0x0E),
            (V1_12_1, 0x0D),
            (V1_13, 0x10),
            (V1_14, 0x11),
            (V1_16, 0x12),
            (V1_17, 0x11),
            (V1_19, 0x13),
            (V1_19_1, 0x14),
            (V1_19_3, 0x13),
            (V1_19_4, 0x14),
            (V1_20_2, 0x16),
            (V1_20_3, 0x17),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::PlayerPositionLook,
        since: &[
            (V1_7_2, 0x06),
            (V1_9, 0x0D),
            (V1_12, 0x0F),
            (V1_12_1, 0x0E),
            (V1_13, 0x11),
            (V1_14, 0x12),
            (V1_16, 0x13),
            (V1_17, 0x12),
            (V1_19, 0x14),
            (V1_19_1, 0x15),
            (V1_19_3, 0x14),
            (V1_19_4, 0x15),
            (V1_20_2, 0x17),
            (V1_20_3, 0x18),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::PlayerLook,
        since: &[
            (V1_7_2, 0x05),
            (V1_9, 0x0E),
            (V1_12, 0x10),
            (V1_12_1, 0x0F),
            (V1_13, 0x12),
            (V1_14, 0x13),
            (V1_16, 0x14),
            (V1_17, 0x13),
            (V1_19, 0x15),
            (V1_19_1, 0x16),
            (V1_19_3, 0x15),
            (V1_19_4, 0x16),
            (V1_20_2, 0x18),
            (V1_20_3, 0x19),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::PlayerOnGround,
        since: &[
            (V1_7_2, 0x03),
            (V1_9, 0x0F),
            (V1_12, 0x0D),
            (V1_12_1, 0x0C),
            (V1_13, 0x0F),
            (V1_14, 0x14),
            (V1_16, 0x15),
            (V1_17, 0x14),
            (V1_19, 0x16),
            (V1_19_1, 0x17),
            (V1_19_3, 0x16),
            (V1_19_4, 0x17),
            (V1_20_2, 0x19),
            (V1_20_3, 0x1A),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::ClientSettings,
        since: &[
            (V1_7_2, 0x15),
            (V1_9, 0x04),
            (V1_12, 0x05),
            (V1_12_1, 0x04),
            (V1_14, 0x05),
            (V1_19, 0x07),
            (V1_19_1, 0x08),
            (V1_19_3, 0x07),
            (V1_19_4, 0x08),
            (V1_20_2, 0x09),
        ],
    },
    InboundEntry {
        phase: Phase::Play,
        kind: Inbound::PluginMessage,
        since: &[
            (V1_7_2, 0x17),
            (V1_9, 0x09),
            (V1_12, 0x0A),
            (V1_12_1, 0x09),
            (V1_13, 0x0A),
            (V1_14, 0x0B),
            (V1_17, 0x0A),
            (V1_19, 0x0C),
            (V1_19_1, 0x0D),
            (V1_19_3, 0x0C),
            (V1_19_4, 0x0D),
            (V1_20_2, 0x0F),
            (V1_20_3, 0x10),
        ],
    },
];

const OUTBOUND: &[OutboundEntry] = &[
    OutboundEntry {
        phase: Phase::Login,
        kind: Outbound::LoginDisconnect,
        since: &[(V1_7_2, 0x00)],
    },
    OutboundEntry {
        phase: Phase::Login,
        kind: Outbound::LoginSuccess,
        since: &[(V1_7_2, 0x02)],
    },
    OutboundEntry {
        phase: Phase::Login,
        kind: Outbound::SetCompression,
        since: &[(V1_8, 0x03)],
    },
    OutboundEntry {
        phase: Phase::Configuration,
        kind: Outbound::ConfigDisconnect,
        since: &[(V1_20_2, 0x01)],
    },
    OutboundEntry {
        phase: Phase::Configuration,
        kind: Outbound::FinishConfiguration,
        since: &[(V1_20_2, 0x02)],
    },
    OutboundEntry {
        phase: Phase::Configuration,
        kind: Outbound::RegistryData,
        since: &[(V1_20_2, 0x05)],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::JoinGame,
        since: &[
            (V1_7_2, 0x01),
            (V1_9, 0x23),
            (V1_13, 0x25),
            (V1_15, 0x26),
            (V1_16, 0x25),
            (V1_16_2, 0x24),
            (V1_17, 0x26),
            (V1_19, 0x23),
            (V1_19_1, 0x25),
            (V1_19_3, 0x24),
            (V1_19_4, 0x28),
            (V1_20_2, 0x29),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::Abilities,
        since: &[
            (V1_7_2, 0x39),
            (V1_9, 0x2B),
            (V1_12_1, 0x2C),
            (V1_13, 0x2E),
            (V1_14, 0x31),
            (V1_15, 0x32),
            (V1_16, 0x31),
            (V1_16_2, 0x30),
            (V1_17, 0x32),
            (V1_19, 0x2F),
            (V1_19_1, 0x31),
            (V1_19_3, 0x30),
            (V1_19_4, 0x34),
            (V1_20_2, 0x36),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::PlayerPositionLook,
        since: &[
            (V1_7_2, 0x08),
            (V1_9, 0x2E),
            (V1_12_1, 0x2F),
            (V1_13, 0x32),
            (V1_14, 0x35),
            (V1_15, 0x36),
            (V1_16, 0x35),
            (V1_16_2, 0x34),
            (V1_17, 0x38),
            (V1_19, 0x36),
            (V1_19_1, 0x39),
            (V1_19_3, 0x38),
            (V1_19_4, 0x3C),
            (V1_20_2, 0x3E),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::ChunkData,
        since: &[
            (V1_7_2, 0x21),
            (V1_9, 0x20),
            (V1_13, 0x22),
            (V1_14, 0x21),
            (V1_15, 0x22),
            (V1_16, 0x21),
            (V1_16_2, 0x20),
            (V1_17, 0x22),
            (V1_19, 0x1F),
            (V1_19_1, 0x21),
            (V1_19_3, 0x20),
            (V1_19_4, 0x24),
            (V1_20_2, 0x25),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::UpdateSectionBlocks,
        since: &[
            (V1_7_2, 0x22),
            (V1_9, 0x10),
            (V1_13, 0x0F),
            (V1_14, 0x10),
            (V1_16, 0x0F),
            (V1_16_2, 0x3B),
            (V1_17, 0x3F),
            (V1_19, 0x3D),
            (V1_19_1, 0x40),
            (V1_19_3, 0x3F),
            (V1_19_4, 0x43),
            (V1_20_2, 0x45),
            (V1_20_3, 0x47),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::KeepAlive,
        since: &[
            (V1_7_2, 0x00),
            (V1_9, 0x1F),
            (V1_13, 0x21),
            (V1_14, 0x20),
            (V1_15, 0x21),
            (V1_16, 0x20),
            (V1_16_2, 0x1F),
            (V1_17, 0x21),
            (V1_19, 0x1E),
            (V1_19_1, 0x20),
            (V1_19_3, 0x1F),
            (V1_19_4, 0x23),
            (V1_20_2, 0x24),
        ],
    },
    OutboundEntry {
        phase: Phase::Play,
        kind: Outbound::Disconnect,
        since: &[
            (V1_7_2, 0x40),
            (V1_9, 0x1A),
            (V1_13, 0x1B),
            (V1_14, 0x1A),
            (V1_15, 0x1B),
            (V1_16, 0x1A),
            (V1_16_2, 0x19),
            (V1_17, 0x1A),
            (V1_19, 0x17),
            (V1_19_1, 0x19),
            (V1_19_3, 0x17),
            (V1_19_4, 0x1A),
            (V1_20_2, 0x1B),
        ],
    },
];

fn id_for(table: IdTable, version: ProtocolVersion) -> Option<i32> {
    table
        .iter()
        .take_while(|(since, _)| *since <= version)
        .last()
        .map(|(_, id)| *id)
}

/// The id tables of one protocol version, resolved once per session.
pub struct Registry {
    version: ProtocolVersion,
    inbound: HashMap<(Phase, i32), Inbound>,
    outbound: HashMap<(Phase, Outbound), i32>,
}

impl Registry {
    /// Resolves the table slice for one version.
    pub fn bind(version: ProtocolVersion) -> Self {
        let mut inbound = HashMap::new();
        for entry in INBOUND {
            if let Some(id) = id_for(entry.since, version) {
                inbound.insert((entry.phase, id), entry.kind);
            }
        }
        let mut outbound = HashMap::new();
        for entry in OUTBOUND {
            if let Some(id) = id_for(entry.since, version) {
                outbound.insert((entry.phase, entry.kind), id);
            }
        }
        Self {
            version,
            inbound,
            outbound,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Looks up a serverbound packet id. `None` means the id is unknown in
    /// this phase; the caller decides whether that is fatal (Handshake,
    /// Login) or a silent drop (Play).
    pub fn inbound(&self, phase: Phase, id: i32) -> Option<Inbound> {
        self.inbound.get(&(phase, id)).copied()
    }

    /// Looks up the wire id for a clientbound packet. `None` means the
    /// packet does not exist in this phase for this version.
    pub fn outbound_id(&self, phase: Phase, kind: Outbound) -> Option<i32> {
        self.outbound.get(&(phase, kind)).copied()
    }
}
