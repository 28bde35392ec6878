//! The `JoinGame` packet, whose field layout changed in almost every
//! release.
//!
//! Instead of one packet type per version, every field that has ever
//! appeared is an entry of [`JoinGameField`], and [`layout`] returns the
//! field sequence for a version. A single encoder walks that sequence and
//! pulls values from [`JoinGameData`]. Supporting a new protocol version is
//! a table edit.

use crate::protocol::{
    encoder::Encoder,
    nbt::{self, CompoundTag},
    version::ProtocolVersion,
};

/// Every field that has ever appeared in `JoinGame`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinGameField {
    /// Entity id as a plain int.
    EntityId,
    /// Hardcore flag as its own boolean (1.16.2+).
    Hardcore,
    /// Legacy gamemode byte with the hardcore flag folded into bit 3.
    GamemodeWithHardcoreFlag,
    /// Gamemode as an unsigned byte.
    Gamemode,
    /// Previous gamemode as a signed byte (-1 = none).
    PreviousGamemode,
    /// Varint-prefixed list of world identifiers.
    WorldNames,
    /// The registry container NBT.
    RegistryNbt,
    /// The current dimension as an NBT compound.
    DimensionNbt,
    /// The current dimension as an identifier string.
    DimensionKey,
    /// Dimension as a signed byte (1.7 - 1.8).
    DimensionLegacyByte,
    /// Dimension as an int (1.9 - 1.15.2).
    DimensionInt,
    /// World difficulty byte, removed in 1.14.
    Difficulty,
    /// SHA-256 prefix of the world seed (1.15+).
    HashedSeed,
    MaxPlayersByte,
    MaxPlayersVarInt,
    /// Level type string ("flat"), replaced by the debug/flat flags in 1.16.
    LevelType,
    ViewDistance,
    SimulationDistance,
    ReducedDebugInfo,
    EnableRespawnScreen,
    DoLimitedCrafting,
    /// Identifier of the world being spawned into (1.16+).
    WorldName,
    IsDebug,
    IsFlat,
    /// Optional death location; the verifier always sends "absent".
    LastDeathLocation,
    PortalCooldown,
}

use JoinGameField::*;

/// Field sequence per layout branch. Versions between two branches use the
/// older branch (e.g. 1.12 uses the 1.9 layout).
pub fn layout(version: ProtocolVersion) -> &'static [JoinGameField] {
    use ProtocolVersion as V;

    if version >= V::V1_20_2 {
        &[
            EntityId,
            Hardcore,
            WorldNames,
            MaxPlayersVarInt,
            ViewDistance,
            SimulationDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            DoLimitedCrafting,
            DimensionKey,
            WorldName,
            HashedSeed,
            Gamemode,
            PreviousGamemode,
            IsDebug,
            IsFlat,
            LastDeathLocation,
            PortalCooldown,
        ]
    } else if version >= V::V1_20 {
        &[
            EntityId,
            Hardcore,
            Gamemode,
            PreviousGamemode,
            WorldNames,
            RegistryNbt,
            DimensionKey,
            WorldName,
            HashedSeed,
            MaxPlayersVarInt,
            ViewDistance,
            SimulationDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            IsDebug,
            IsFlat,
            LastDeathLocation,
            PortalCooldown,
        ]
    } else if version >= V::V1_19 {
        // 1.19, 1.19.1 and 1.19.4 differ in registry contents, not layout.
        &[
            EntityId,
            Hardcore,
            Gamemode,
            PreviousGamemode,
            WorldNames,
            RegistryNbt,
            DimensionKey,
            WorldName,
            HashedSeed,
            MaxPlayersVarInt,
            ViewDistance,
            SimulationDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            IsDebug,
            IsFlat,
            LastDeathLocation,
        ]
    } else if version >= V::V1_18 {
        &[
            EntityId,
            Hardcore,
            Gamemode,
            PreviousGamemode,
            WorldNames,
            RegistryNbt,
            DimensionNbt,
            WorldName,
            HashedSeed,
            MaxPlayersVarInt,
            ViewDistance,
            SimulationDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            IsDebug,
            IsFlat,
        ]
    } else if version >= V::V1_16_2 {
        &[
            EntityId,
            Hardcore,
            Gamemode,
            PreviousGamemode,
            WorldNames,
            RegistryNbt,
            DimensionNbt,
            WorldName,
            HashedSeed,
            MaxPlayersVarInt,
            ViewDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            IsDebug,
            IsFlat,
        ]
    } else if version >= V::V1_16 {
        &[
            EntityId,
            Gamemode,
            PreviousGamemode,
            WorldNames,
            RegistryNbt,
            DimensionKey,
            WorldName,
            HashedSeed,
            MaxPlayersByte,
            ViewDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
            IsDebug,
            IsFlat,
        ]
    } else if version >= V::V1_15 {
        &[
            EntityId,
            GamemodeWithHardcoreFlag,
            DimensionInt,
            HashedSeed,
            MaxPlayersByte,
            LevelType,
            ViewDistance,
            ReducedDebugInfo,
            EnableRespawnScreen,
        ]
    } else if version >= V::V1_14 {
        &[
            EntityId,
            GamemodeWithHardcoreFlag,
            DimensionInt,
            MaxPlayersByte,
            LevelType,
            ViewDistance,
            ReducedDebugInfo,
        ]
    } else if version >= V::V1_9 {
        &[
            EntityId,
            GamemodeWithHardcoreFlag,
            DimensionInt,
            Difficulty,
            MaxPlayersByte,
            LevelType,
            ReducedDebugInfo,
        ]
    } else if version >= V::V1_8 {
        &[
            EntityId,
            GamemodeWithHardcoreFlag,
            DimensionLegacyByte,
            Difficulty,
            MaxPlayersByte,
            LevelType,
            ReducedDebugInfo,
        ]
    } else {
        &[
            EntityId,
            GamemodeWithHardcoreFlag,
            DimensionLegacyByte,
            Difficulty,
            MaxPlayersByte,
            LevelType,
        ]
    }
}

/// Values feeding the layout. One instance per version bracket is built at
/// startup; the registry and dimension compounds differ per bracket.
#[derive(Debug, Clone)]
pub struct JoinGameData {
    pub entity_id: i32,
    pub hardcore: bool,
    pub gamemode: u8,
    pub previous_gamemode: i8,
    pub world_names: Vec<String>,
    pub registry: CompoundTag,
    pub dimension: CompoundTag,
    pub dimension_key: String,
    pub world_name: String,
    pub dimension_id: i32,
    pub difficulty: u8,
    pub hashed_seed: i64,
    pub max_players: i32,
    pub level_type: String,
    pub view_distance: i32,
    pub simulation_distance: i32,
    pub reduced_debug_info: bool,
    pub enable_respawn_screen: bool,
    pub do_limited_crafting: bool,
    pub is_debug: bool,
    pub is_flat: bool,
    pub portal_cooldown: i32,
}

impl JoinGameData {
    /// Encodes the packet payload for `version` by walking its layout.
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        for &field in layout(version) {
            match field {
                EntityId => encoder.write_i32(self.entity_id),
                Hardcore => encoder.write_bool(self.hardcore),
                GamemodeWithHardcoreFlag => {
                    let mut gamemode = self.gamemode;
                    if self.hardcore {
                        gamemode |= 0x08;
                    }
                    encoder.write_u8(gamemode);
                }
                Gamemode => encoder.write_u8(self.gamemode),
                PreviousGamemode => encoder.write_i8(self.previous_gamemode),
                WorldNames => {
                    encoder.write_var_int(self.world_names.len() as i32);
                    for name in &self.world_names {
                        encoder.write_string(name);
                    }
                }
                RegistryNbt => nbt::write_named(&self.registry, encoder.buffer_mut()),
                DimensionNbt => nbt::write_named(&self.dimension, encoder.buffer_mut()),
                DimensionKey => encoder.write_string(&self.dimension_key),
                DimensionLegacyByte => encoder.write_i8(self.dimension_id as i8),
                DimensionInt => encoder.write_i32(self.dimension_id),
                Difficulty => encoder.write_u8(self.difficulty),
                HashedSeed => encoder.write_i64(self.hashed_seed),
                MaxPlayersByte => encoder.write_u8(self.max_players.clamp(0, 255) as u8),
                MaxPlayersVarInt => {
                    encoder.write_var_int(self.max_players);
                }
                LevelType => encoder.write_string(&self.level_type),
                ViewDistance => {
                    encoder.write_var_int(self.view_distance);
                }
                SimulationDistance => {
                    encoder.write_var_int(self.simulation_distance);
                }
                ReducedDebugInfo => encoder.write_bool(self.reduced_debug_info),
                EnableRespawnScreen => encoder.write_bool(self.enable_respawn_screen),
                DoLimitedCrafting => encoder.write_bool(self.do_limited_crafting),
                WorldName => encoder.write_string(&self.world_name),
                IsDebug => encoder.write_bool(self.is_debug),
                IsFlat => encoder.write_bool(self.is_flat),
                LastDeathLocation => encoder.write_bool(false),
                PortalCooldown => {
                    encoder.write_var_int(self.portal_cooldown);
                }
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::Decoder;

    fn data() -> JoinGameData {
        let mut registry = CompoundTag::new();
        registry.put_string("marker", "registry");
        let mut dimension = CompoundTag::new();
        dimension.put_string("name", "minecraft:overworld");
        JoinGameData {
            entity_id: 1,
            hardcore: false,
            gamemode: 3,
            previous_gamemode: -1,
            world_names: vec!["minecraft:overworld".into()],
            registry,
            dimension,
            dimension_key: "minecraft:overworld".into(),
            world_name: "minecraft:overworld".into(),
            dimension_id: 0,
            difficulty: 0,
            hashed_seed: 0,
            max_players: 1,
            level_type: "flat".into(),
            view_distance: 2,
            simulation_distance: 2,
            reduced_debug_info: true,
            enable_respawn_screen: false,
            do_limited_crafting: false,
            is_debug: false,
            is_flat: true,
            portal_cooldown: 0,
        }
    }

    #[test]
    fn legacy_1_7_layout() {
        let payload = data().encode(ProtocolVersion::V1_7_2);
        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_i32().unwrap(), 1);
        assert_eq!(decoder.read_u8().unwrap(), 3);
        assert_eq!(decoder.read_i8().unwrap(), 0);
        assert_eq!(decoder.read_u8().unwrap(), 0);
        assert_eq!(decoder.read_u8().unwrap(), 1);
        assert_eq!(decoder.read_string().unwrap(), "flat");
        assert!(decoder.is_finished());
    }

    #[test]
    fn reduced_debug_added_in_1_8() {
        let v7 = data().encode(ProtocolVersion::V1_7_2);
        let v8 = data().encode(ProtocolVersion::V1_8);
        assert_eq!(v8.len(), v7.len() + 1);
    }

    #[test]
    fn hardcore_folds_into_legacy_gamemode() {
        let mut hardcore = data();
        hardcore.hardcore = true;
        let payload = hardcore.encode(ProtocolVersion::V1_8);
        let mut decoder = Decoder::new(&payload);
        decoder.read_i32().unwrap();
        assert_eq!(decoder.read_u8().unwrap(), 3 | 0x08);
    }

    #[test]
    fn modern_1_20_2_layout_has_no_registry() {
        let payload = data().encode(ProtocolVersion::V1_20_2);
        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_i32().unwrap(), 1);
        assert!(!decoder.read_bool().unwrap()); // hardcore
        assert_eq!(decoder.read_var_int().unwrap(), 1); // world count
        assert_eq!(decoder.read_string().unwrap(), "minecraft:overworld");
        assert_eq!(decoder.read_var_int().unwrap(), 1); // max players
        // The registry compound must not be embedded in this layout.
        assert!(!payload
            .windows(b"registry".len())
            .any(|window| window == b"registry"));
    }

    #[test]
    fn registry_nbt_embedded_in_1_16_2() {
        let payload = data().encode(ProtocolVersion::V1_16_2);
        assert!(payload
            .windows(b"registry".len())
            .any(|window| window == b"registry"));
    }

    #[test]
    fn layout_is_table_driven() {
        // Every supported version must have a layout, and layouts must
        // start with the entity id.
        for &version in ProtocolVersion::ALL {
            let fields = layout(version);
            assert!(!fields.is_empty());
            assert_eq!(fields[0], EntityId);
        }
    }
}
