//! Serverbound packets.

use crate::protocol::{
    decoder::{DecodeError, Decoder, Result},
    registry::Inbound,
    version::ProtocolVersion,
};
use uuid::Uuid;

/// Longest server address a handshake may carry.
const MAX_ADDRESS_LENGTH: usize = 255;
/// Usernames are at most 16 bytes.
pub const MAX_USERNAME_LENGTH: usize = 16;
/// Plugin channel identifiers.
const MAX_CHANNEL_LENGTH: usize = 128;
/// Locale tags like `en_US`.
const MAX_LOCALE_LENGTH: usize = 24;

/// A decoded serverbound packet.
#[derive(Debug, Clone, strum::AsRefStr)]
pub enum ClientPacket {
    Handshake(Handshake),
    LoginStart(LoginStart),
    LoginAcknowledged,
    ClientSettings(ClientSettings),
    PluginMessage(PluginMessage),
    FinishConfiguration,
    KeepAlive(KeepAlive),
    TeleportConfirm(TeleportConfirm),
    PlayerPosition(PlayerPosition),
    PlayerPositionLook(PlayerPosition),
    PlayerLook(PlayerLook),
    PlayerOnGround(PlayerOnGround),
}

#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_number: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    /// Decodes the handshake before any version is known, which is why it
    /// does not take a [`ProtocolVersion`].
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        Ok(Self {
            protocol_number: decoder.read_var_int()?,
            server_address: decoder.read_string_capped(MAX_ADDRESS_LENGTH)?.to_owned(),
            server_port: decoder.read_u16()?,
            next_state: decoder.read_var_int()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoginStart {
    pub username: String,
    /// Client-declared UUID, sent since 1.19.1 (optionally) and 1.20.2
    /// (always). Not trusted; the session derives its own.
    pub uuid: Option<Uuid>,
}

impl LoginStart {
    pub fn decode(decoder: &mut Decoder, version: ProtocolVersion) -> Result<Self> {
        let username = decoder.read_string_capped(MAX_USERNAME_LENGTH)?.to_owned();

        // 1.19 and 1.19.1 carry an optional signature blob before the
        // optional UUID; skip it.
        if (ProtocolVersion::V1_19..ProtocolVersion::V1_19_3).contains(&version)
            && decoder.read_bool()?
        {
            decoder.read_i64()?; // expiry timestamp
            let key_length = usize::try_from(decoder.read_var_int()?)?;
            decoder.consume_slice(key_length)?;
            let sig_length = usize::try_from(decoder.read_var_int()?)?;
            decoder.consume_slice(sig_length)?;
        }

        let uuid = if version >= ProtocolVersion::V1_20_2 {
            Some(Uuid::from_u128(decoder.read_u128()?))
        } else if version >= ProtocolVersion::V1_19_1 && decoder.read_bool()? {
            Some(Uuid::from_u128(decoder.read_u128()?))
        } else {
            None
        };

        Ok(Self { username, uuid })
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub locale: String,
    pub view_distance: i8,
}

impl ClientSettings {
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        // Only locale and view distance matter; chat flags, skin parts and
        // the newer fields after them are ignored as trailing data.
        Ok(Self {
            locale: decoder.read_string_capped(MAX_LOCALE_LENGTH)?.to_owned(),
            view_distance: decoder.read_i8()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PluginMessage {
    pub channel: String,
    pub data: Vec<u8>,
}

impl PluginMessage {
    pub fn decode(decoder: &mut Decoder, version: ProtocolVersion) -> Result<Self> {
        let channel = decoder.read_string_capped(MAX_CHANNEL_LENGTH)?.to_owned();
        // 1.7 prefixes the payload with a short length; later versions use
        // the remainder of the frame.
        let data = if version < ProtocolVersion::V1_8 {
            let length = usize::try_from(decoder.read_i16()?.max(0)).unwrap_or(0);
            decoder.consume_slice(length)?.to_vec()
        } else {
            decoder.buffer().to_vec()
        };
        Ok(Self { channel, data })
    }

    /// Whether this message is the client brand announcement.
    pub fn is_brand(&self, version: ProtocolVersion) -> bool {
        if version >= ProtocolVersion::V1_13 {
            self.channel == "minecraft:brand"
        } else {
            self.channel == "MC|Brand"
        }
    }

    /// Extracts the brand string; 1.8+ wraps it in a varint-prefixed
    /// string, 1.7 sends it raw.
    pub fn brand(&self, version: ProtocolVersion, cap: usize) -> Result<String> {
        if version >= ProtocolVersion::V1_8 {
            let mut decoder = Decoder::new(&self.data);
            Ok(decoder.read_string_capped(cap)?.to_owned())
        } else {
            if self.data.len() > cap {
                return Err(DecodeError::StringTooLong {
                    length: self.data.len(),
                    cap,
                });
            }
            std::str::from_utf8(&self.data)
                .map(str::to_owned)
                .map_err(DecodeError::from)
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub id: i64,
}

impl KeepAlive {
    pub fn decode(decoder: &mut Decoder, version: ProtocolVersion) -> Result<Self> {
        let id = if version >= ProtocolVersion::V1_12_2 {
            decoder.read_i64()?
        } else if version >= ProtocolVersion::V1_8 {
            i64::from(decoder.read_var_int()?)
        } else {
            i64::from(decoder.read_i32()?)
        };
        Ok(Self { id })
    }
}

#[derive(Debug, Clone)]
pub struct TeleportConfirm {
    pub teleport_id: i32,
}

#[derive(Debug, Clone)]
pub struct PlayerPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub on_ground: bool,
}

impl PlayerPosition {
    fn decode(decoder: &mut Decoder, version: ProtocolVersion, rotation: bool) -> Result<Self> {
        let x = decoder.read_f64()?;
        let y = decoder.read_f64()?;
        if version < ProtocolVersion::V1_8 {
            decoder.read_f64()?; // head y ("stance")
        }
        let z = decoder.read_f64()?;
        if rotation {
            decoder.read_f32()?; // yaw
            decoder.read_f32()?; // pitch
        }
        let on_ground = decoder.read_bool()?;
        Ok(Self { x, y, z, on_ground })
    }
}

#[derive(Debug, Clone)]
pub struct PlayerLook {
    pub on_ground: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerOnGround {
    pub on_ground: bool,
}

/// Decodes a serverbound packet already classified by the registry.
pub fn decode(kind: Inbound, payload: &[u8], version: ProtocolVersion) -> Result<ClientPacket> {
    let mut decoder = Decoder::new(payload);
    Ok(match kind {
        Inbound::Handshake => ClientPacket::Handshake(Handshake::decode(&mut decoder)?),
        Inbound::LoginStart => {
            ClientPacket::LoginStart(LoginStart::decode(&mut decoder, version)?)
        }
        Inbound::LoginAcknowledged => ClientPacket::LoginAcknowledged,
        Inbound::ClientSettings => {
            ClientPacket::ClientSettings(ClientSettings::decode(&mut decoder)?)
        }
        Inbound::PluginMessage => {
            ClientPacket::PluginMessage(PluginMessage::decode(&mut decoder, version)?)
        }
        Inbound::FinishConfiguration => ClientPacket::FinishConfiguration,
        Inbound::KeepAlive => ClientPacket::KeepAlive(KeepAlive::decode(&mut decoder, version)?),
        Inbound::TeleportConfirm => ClientPacket::TeleportConfirm(TeleportConfirm {
            teleport_id: decoder.read_var_int()?,
        }),
        Inbound::PlayerPosition => {
            ClientPacket::PlayerPosition(PlayerPosition::decode(&mut decoder, version, false)?)
        }
        Inbound::PlayerPositionLook => {
            ClientPacket::PlayerPositionLook(PlayerPosition::decode(&mut decoder, version, true)?)
        }
        Inbound::PlayerLook => {
            decoder.read_f32()?; // yaw
            decoder.read_f32()?; // pitch
            ClientPacket::PlayerLook(PlayerLook {
                on_ground: decoder.read_bool()?,
            })
        }
        Inbound::PlayerOnGround => ClientPacket::PlayerOnGround(PlayerOnGround {
            on_ground: decoder.read_bool()?,
        }),
    })
}
