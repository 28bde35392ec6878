//! Clientbound packets with dynamic contents.
//!
//! Packets whose bytes never change per connection (`JoinGame`, the empty
//! chunk, the platform block update, the registry payload) are prepared
//! once in [`crate::assets`] and sent as raw payloads; only the per-session
//! packets are encoded here.

use crate::protocol::{encoder::Encoder, version::ProtocolVersion};
use uuid::Uuid;

/// `Disconnect` in any phase: a single JSON chat component.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub component: String,
}

impl Disconnect {
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        if version >= ProtocolVersion::V1_20_3 {
            // 1.20.3 moved chat components to NBT on the wire.
            let mut compound = crate::protocol::nbt::CompoundTag::new();
            compound.put_string("text", json_text(&self.component));
            crate::protocol::nbt::write_nameless(&compound, &mut buf);
        } else {
            Encoder::new(&mut buf).write_string(&self.component);
        }
        buf
    }
}

/// Pulls the `text` field back out of a component produced by
/// [`crate::error::DisconnectReason::component`].
fn json_text(component: &str) -> String {
    component
        .trim_start_matches("{\"text\":\"")
        .trim_end_matches("\"}")
        .to_owned()
}

#[derive(Debug, Clone)]
pub struct LoginSuccess<'a> {
    pub uuid: Uuid,
    pub username: &'a str,
}

impl LoginSuccess<'_> {
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        if version >= ProtocolVersion::V1_16 {
            encoder.write_u128(self.uuid.as_u128());
        } else if version >= ProtocolVersion::V1_7_6 {
            encoder.write_string(&self.uuid.hyphenated().to_string());
        } else {
            encoder.write_string(&self.uuid.simple().to_string());
        }
        encoder.write_string(self.username);
        if version >= ProtocolVersion::V1_19 {
            encoder.write_var_int(0); // no profile properties
        }
        buf
    }
}

#[derive(Debug, Clone)]
pub struct SetCompression {
    pub threshold: i32,
}

impl SetCompression {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_var_int(self.threshold);
        buf
    }
}

/// Keep-alive; the id width changed twice.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub id: i64,
}

impl KeepAlive {
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        if version >= ProtocolVersion::V1_12_2 {
            encoder.write_i64(self.id);
        } else if version >= ProtocolVersion::V1_8 {
            encoder.write_var_int(self.id as i32);
        } else {
            encoder.write_i32(self.id as i32);
        }
        buf
    }
}

/// Player abilities; the verifier always sends no-fly, no-build defaults.
#[derive(Debug, Clone)]
pub struct Abilities {
    pub flags: u8,
    pub flying_speed: f32,
    pub fov_modifier: f32,
}

impl Abilities {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_u8(self.flags);
        encoder.write_f32(self.flying_speed);
        encoder.write_f32(self.fov_modifier);
        buf
    }
}

/// Clientbound position sync that teleports the player to the spawn.
#[derive(Debug, Clone)]
pub struct PlayerPositionLook {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub teleport_id: i32,
}

impl PlayerPositionLook {
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.write_f64(self.x);
        if version < ProtocolVersion::V1_8 {
            // 1.7 sends eye height, not feet height.
            encoder.write_f64(self.y + 1.62);
        } else {
            encoder.write_f64(self.y);
        }
        encoder.write_f64(self.z);
        encoder.write_f32(self.yaw);
        encoder.write_f32(self.pitch);
        if version < ProtocolVersion::V1_9 {
            encoder.write_bool(false); // on ground
        } else {
            encoder.write_u8(0x00); // no relative flags
            encoder.write_var_int(self.teleport_id);
            if (ProtocolVersion::V1_17..ProtocolVersion::V1_19_4).contains(&version) {
                encoder.write_bool(false); // dismount vehicle
            }
        }
        buf
    }
}
