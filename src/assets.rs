//! Everything expensive is built once here, after configuration is known,
//! and shared read-only: per-version `JoinGame` images, the registry
//! payload for the Configuration phase, the empty spawn chunk, the barrier
//! platform block update, and the falling-motion table.

use crate::{
    config::Config,
    protocol::{
        encoder::Encoder,
        nbt::{self, CompoundTag, Tag},
        packet::join_game::JoinGameData,
        version::ProtocolVersion,
    },
};
use anyhow::Context;
use flate2::{write::ZlibEncoder, Compression};
use std::{collections::HashMap, io::Write, sync::Arc};

/// The platform is an 8x8 grid of barrier blocks.
pub const BLOCKS_PER_ROW: i32 = 8;
/// Y level of the barrier blocks; their top surface is at `PLATFORM_Y + 1`.
pub const PLATFORM_Y: i32 = 255;
/// Blocks above the platform the static part of the spawn buffer adds.
const SPAWN_BUFFER: i32 = 5;
/// Spawn X/Z, over the middle of the platform.
pub const SPAWN_X: f64 = BLOCKS_PER_ROW as f64;
pub const SPAWN_Z: f64 = BLOCKS_PER_ROW as f64;

/// Shipped GZIP-compressed registry blobs.
const DAMAGE_TYPE_1194: &[u8] = include_bytes!("../assets/damage_type_1194.nbt");
const DAMAGE_TYPE_120: &[u8] = include_bytes!("../assets/damage_type_120.nbt");

/// Whether (x, z) is over the platform.
pub fn on_platform(x: f64, z: f64) -> bool {
    let min = (BLOCKS_PER_ROW / 2) as f64;
    let max = (3 * BLOCKS_PER_ROW / 2) as f64;
    (min..max).contains(&x) && (min..max).contains(&z)
}

/// The pre-tabulated per-tick fall amounts.
///
/// `motion(i)` is how far a freshly spawned player falls during tick `i`;
/// the table has `max_movement_ticks + 11` entries so the session can keep
/// predicting for ten ticks past the gravity window without ever indexing
/// past the end.
#[derive(Debug, Clone)]
pub struct MotionTable {
    motions: Vec<f64>,
    max_movement_ticks: u32,
}

impl MotionTable {
    pub fn new(max_movement_ticks: u32) -> Self {
        let max_prediction_tick = max_movement_ticks + 10;
        let motions = (0..=max_prediction_tick)
            .map(|i| -(((0.98f64).powi(i as i32) - 1.0) * 3.92))
            .collect();
        Self {
            motions,
            max_movement_ticks,
        }
    }

    /// Last tick the table can predict.
    pub fn max_prediction_tick(&self) -> u32 {
        self.motions.len() as u32 - 1
    }

    /// Fall amount during tick `tick`. `None` past the prediction window.
    pub fn motion(&self, tick: u32) -> Option<f64> {
        self.motions.get(tick as usize).copied()
    }

    /// Total fall after ticks `0..=tick`.
    pub fn cumulative(&self, tick: u32) -> f64 {
        self.motions[..=(tick as usize).min(self.motions.len() - 1)]
            .iter()
            .sum()
    }

    /// Fall distance covered by the gravity window (`max_movement_ticks`
    /// ticks).
    pub fn max_fall_distance(&self) -> f64 {
        self.motions[..self.max_movement_ticks as usize].iter().sum()
    }
}

/// Immutable precomputed assets, shared by reference across all sessions.
pub struct Assets {
    pub motion: MotionTable,
    /// Y the player spawns at; high enough that the whole gravity window
    /// happens in free fall above the platform.
    pub spawn_y: f64,
    join_game: HashMap<ProtocolVersion, Arc<[u8]>>,
    /// `RegistryData` payload for the Configuration phase (1.20.2+).
    registry_payload: Arc<[u8]>,
    empty_chunk: HashMap<ProtocolVersion, Arc<[u8]>>,
    platform_update: HashMap<ProtocolVersion, Arc<[u8]>>,
}

impl Assets {
    /// Builds every image. Called once at startup.
    pub fn prepare(config: &Config) -> anyhow::Result<Self> {
        let motion = MotionTable::new(config.max_movement_ticks);
        let spawn_y = f64::from(PLATFORM_Y + SPAWN_BUFFER) + motion.max_fall_distance().ceil();

        let damage_type_1194 = nbt::read_gzipped(DAMAGE_TYPE_1194)
            .context("shipped blob damage_type_1194.nbt is corrupt")?;
        let damage_type_120 = nbt::read_gzipped(DAMAGE_TYPE_120)
            .context("shipped blob damage_type_120.nbt is corrupt")?;

        let mut join_game = HashMap::new();
        let mut empty_chunk = HashMap::new();
        let mut platform_update = HashMap::new();
        for &version in ProtocolVersion::ALL {
            let data = join_game_data(config, version, &damage_type_1194, &damage_type_120);
            join_game.insert(version, Arc::from(data.encode(version).into_boxed_slice()));
            empty_chunk.insert(version, Arc::from(chunk_payload(version)?.into_boxed_slice()));
            platform_update.insert(
                version,
                Arc::from(platform_payload(version).into_boxed_slice()),
            );
        }

        // The Configuration-phase registry reuses the newest bracket's
        // registry compound in the nameless network form.
        let registry = registry_container(ProtocolVersion::V1_20_2, &damage_type_1194, &damage_type_120);
        let mut registry_payload = Vec::new();
        nbt::write_nameless(&registry, &mut registry_payload);

        Ok(Self {
            motion,
            spawn_y,
            join_game,
            registry_payload: Arc::from(registry_payload.into_boxed_slice()),
            empty_chunk,
            platform_update,
        })
    }

    pub fn join_game(&self, version: ProtocolVersion) -> Arc<[u8]> {
        Arc::clone(&self.join_game[&version])
    }

    pub fn registry_payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.registry_payload)
    }

    pub fn empty_chunk(&self, version: ProtocolVersion) -> Arc<[u8]> {
        Arc::clone(&self.empty_chunk[&version])
    }

    pub fn platform_update(&self, version: ProtocolVersion) -> Arc<[u8]> {
        Arc::clone(&self.platform_update[&version])
    }
}

/// Registry id of `minecraft:barrier` in the block-state registry, which
/// reshuffles between versions. Pre-1.13 uses block id 166 shifted past the
/// four metadata bits.
fn barrier_state_id(version: ProtocolVersion) -> i32 {
    use ProtocolVersion as V;
    if version >= V::V1_20 {
        10368
    } else if version >= V::V1_19_4 {
        10221
    } else if version >= V::V1_19 {
        8143
    } else if version >= V::V1_17 {
        7850
    } else if version >= V::V1_16 {
        7536
    } else if version >= V::V1_14 {
        7000
    } else if version >= V::V1_13 {
        6493
    } else {
        166 << 4
    }
}

/// The dimension description every bracket shares, per the flat limbo
/// world: no ceiling, skylight on, 256 blocks tall.
fn dimension_details(version: ProtocolVersion) -> CompoundTag {
    let infiniburn = if version >= ProtocolVersion::V1_18_2 {
        "#minecraft:infiniburn_nether"
    } else {
        "minecraft:infiniburn_nether"
    };

    let mut details = CompoundTag::new();
    details
        .put_bool("natural", false)
        .put_float("ambient_light", 0.0)
        .put_bool("shrunk", false)
        .put_bool("ultrawarm", false)
        .put_bool("has_ceiling", false)
        .put_bool("has_skylight", true)
        .put_bool("piglin_safe", false)
        .put_bool("bed_works", false)
        .put_bool("respawn_anchor_works", false)
        .put_bool("has_raids", false)
        .put_int("logical_height", 256)
        .put_string("infiniburn", infiniburn)
        .put_double("coordinate_scale", 1.0)
        .put_string("effects", "minecraft:overworld")
        .put_int("min_y", 0)
        .put_int("height", 256)
        .put_int("monster_spawn_block_light_limit", 0)
        .put_int("monster_spawn_light_level", 0);
    details
}

/// The dimension entry as it appears in the registry list.
fn dimension_entry(version: ProtocolVersion) -> CompoundTag {
    let details = dimension_details(version);
    if version >= ProtocolVersion::V1_16_2 {
        let mut entry = CompoundTag::new();
        entry
            .put_string("name", "minecraft:overworld")
            .put_int("id", 0)
            .put_compound("element", details);
        entry
    } else {
        let mut entry = details;
        entry.put_string("name", "minecraft:overworld");
        entry
    }
}

/// The registry container embedded in `JoinGame` (1.16 - 1.20.1) or sent
/// as `RegistryData` (1.20.2+).
fn registry_container(
    version: ProtocolVersion,
    damage_type_1194: &CompoundTag,
    damage_type_120: &CompoundTag,
) -> CompoundTag {
    use ProtocolVersion as V;

    let dimensions = vec![Tag::Compound(dimension_entry(version))];
    let mut container = CompoundTag::new();

    if version >= V::V1_16_2 {
        let mut dimension_registry = CompoundTag::new();
        dimension_registry
            .put_string("type", "minecraft:dimension_type")
            .put_list("value", dimensions);
        container.put_compound("minecraft:dimension_type", dimension_registry);

        let mut effects = CompoundTag::new();
        effects
            .put_int("sky_color", 7907327)
            .put_int("fog_color", 12638463)
            .put_int("water_color", 0)
            .put_int("water_fog_color", 0);

        let mut element = CompoundTag::new();
        element
            .put_float("depth", 0.125)
            .put_float("temperature", 0.8)
            .put_float("scale", 0.05)
            .put_float("downfall", 0.4)
            .put_string("category", "plains")
            .put_compound("effects", effects);
        if version >= V::V1_19_4 {
            element.put_bool("has_precipitation", false);
        } else {
            element.put_string("precipitation", "rain");
        }

        let mut plains = CompoundTag::new();
        plains
            .put_string("name", "minecraft:plains")
            .put_int("id", 1)
            .put_compound("element", element);

        let mut biome_registry = CompoundTag::new();
        biome_registry
            .put_string("type", "minecraft:worldgen/biome")
            .put_list("value", vec![Tag::Compound(plains)]);
        container.put_compound("minecraft:worldgen/biome", biome_registry);

        if version == V::V1_19_4 {
            container.put_compound("minecraft:damage_type", damage_type_1194.clone());
        } else if version >= V::V1_20 {
            container.put_compound("minecraft:damage_type", damage_type_120.clone());
        }
    } else {
        container.put_list("dimension", dimensions);
    }

    container
}

/// Assembles the `JoinGame` field values for one version.
fn join_game_data(
    config: &Config,
    version: ProtocolVersion,
    damage_type_1194: &CompoundTag,
    damage_type_120: &CompoundTag,
) -> JoinGameData {
    let registry = registry_container(version, damage_type_1194, damage_type_120);
    let dimension = if version >= ProtocolVersion::V1_16_2 {
        dimension_entry(version)
            .get_compound("element")
            .cloned()
            .unwrap_or_default()
    } else {
        dimension_entry(version)
    };

    JoinGameData {
        entity_id: 1,
        hardcore: false,
        gamemode: config.gamemode_id,
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

/// Heightmaps compound sent with 1.14+ chunks: one zeroed MOTION_BLOCKING
/// long array (9 bits per column, packed).
fn heightmaps(version: ProtocolVersion) -> CompoundTag {
    let longs = if version >= ProtocolVersion::V1_16 { 37 } else { 36 };
    let mut compound = CompoundTag::new();
    compound.put_long_array("MOTION_BLOCKING", vec![0; longs]);
    compound
}

/// The payload of the empty chunk at (0, 0).
fn chunk_payload(version: ProtocolVersion) -> anyhow::Result<Vec<u8>> {
    use ProtocolVersion as V;

    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);
    encoder.write_i32(0); // chunk x
    encoder.write_i32(0); // chunk z

    if version < V::V1_9 {
        // 1.7 / 1.8: ground-up continuous, empty section bitmask, biome
        // plane only. 1.7 additionally zlib-compresses the column data.
        encoder.write_bool(true);
        encoder.write_u16(0); // primary bitmask
        if version < V::V1_8 {
            encoder.write_u16(0); // add bitmask
            let mut deflated = ZlibEncoder::new(Vec::new(), Compression::fast());
            deflated.write_all(&[0u8; 256])?;
            let deflated = deflated.finish()?;
            encoder.write_i32(deflated.len() as i32);
            encoder.write_slice(&deflated);
        } else {
            encoder.write_var_int(256);
            encoder.write_slice(&[0u8; 256]);
        }
    } else if version < V::V1_14 {
        encoder.write_bool(true);
        encoder.write_var_int(0); // section bitmask
        if version >= V::V1_13 {
            // biomes went from bytes to ints in 1.13
            encoder.write_var_int(256 * 4);
            encoder.write_slice(&[0u8; 1024]);
        } else {
            encoder.write_var_int(256);
            encoder.write_slice(&[0u8; 256]);
        }
        if version >= V::V1_9_4 {
            encoder.write_var_int(0); // block entities
        }
    } else if version < V::V1_18 {
        encoder.write_bool(true);
        if version >= V::V1_17 {
            encoder.write_var_int(1); // section bitset: one empty long
            encoder.write_i64(0);
        } else {
            encoder.write_var_int(0); // section bitmask
        }
        nbt::write_named(&heightmaps(version), encoder.buffer_mut());
        if version >= V::V1_15 {
            // explicit biome field, 1024 ints (varints since 1.16.2)
            if version >= V::V1_16_2 {
                encoder.write_var_int(1024);
                for _ in 0..1024 {
                    encoder.write_var_int(1);
                }
            } else {
                for _ in 0..1024 {
                    encoder.write_i32(1);
                }
            }
        }
        encoder.write_var_int(0); // data size
        encoder.write_var_int(0); // block entities
    } else {
        // 1.18+: always-full chunk with paletted sections plus light data.
        nbt::write_named(&heightmaps(version), encoder.buffer_mut());

        let mut sections = Vec::new();
        let mut section_encoder = Encoder::new(&mut sections);
        for _ in 0..16 {
            section_encoder.write_i16(0); // non-air count
            // block states: single-valued palette of air
            section_encoder.write_u8(0);
            section_encoder.write_var_int(0);
            section_encoder.write_var_int(0);
            // biomes: single-valued palette of plains
            section_encoder.write_u8(0);
            section_encoder.write_var_int(1);
            section_encoder.write_var_int(0);
        }
        encoder.write_var_int(sections.len() as i32);
        encoder.write_slice(&sections);
        encoder.write_var_int(0); // block entities

        if version < V::V1_20 {
            encoder.write_bool(true); // trust edges
        }
        for _ in 0..4 {
            encoder.write_var_int(0); // sky/block light bitsets
        }
        encoder.write_var_int(0); // sky light array count
        encoder.write_var_int(0); // block light array count
    }

    Ok(buf)
}

/// The `UpdateSectionBlocks` payload: 64 barrier blocks forming the
/// platform, in sub-chunk (0, 15, 0).
fn platform_payload(version: ProtocolVersion) -> Vec<u8> {
    use ProtocolVersion as V;

    let state = barrier_state_id(version);
    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf);

    if version >= V::V1_16_2 {
        let section_y = i64::from(PLATFORM_Y / 16);
        encoder.write_i64(section_y & 0xFFFFF); // section (0, 15, 0)
        if version < V::V1_20 {
            encoder.write_bool(true); // suppress light updates
        }
        encoder.write_var_int((BLOCKS_PER_ROW * BLOCKS_PER_ROW) as i32);
        for x in 0..BLOCKS_PER_ROW {
            for z in 0..BLOCKS_PER_ROW {
                let local_x = i64::from(x + BLOCKS_PER_ROW / 2);
                let local_z = i64::from(z + BLOCKS_PER_ROW / 2);
                let local_y = i64::from(PLATFORM_Y & 15);
                let entry =
                    (i64::from(state) << 12) | (local_x << 8) | (local_z << 4) | local_y;
                encoder.write_var_long(entry);
            }
        }
    } else {
        encoder.write_i32(0); // chunk x
        encoder.write_i32(0); // chunk z
        encoder.write_var_int((BLOCKS_PER_ROW * BLOCKS_PER_ROW) as i32);
        for x in 0..BLOCKS_PER_ROW {
            for z in 0..BLOCKS_PER_ROW {
                let local_x = (x + BLOCKS_PER_ROW / 2) as u8;
                let local_z = (z + BLOCKS_PER_ROW / 2) as u8;
                encoder.write_u8((local_x << 4) | local_z);
                encoder.write_u8(PLATFORM_Y as u8);
                encoder.write_var_int(state);
            }
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::Decoder;

    #[test]
    fn motion_table_length_is_window_plus_eleven() {
        let table = MotionTable::new(8);
        assert_eq!(table.max_prediction_tick(), 18);
        assert_eq!(table.motion(18).is_some(), true);
        assert_eq!(table.motion(19), None);
    }

    #[test]
    fn motion_values_match_the_formula() {
        let table = MotionTable::new(8);
        assert_eq!(table.motion(0), Some(0.0));
        let expected_tick_one = -((0.98f64.powi(1) - 1.0) * 3.92);
        assert!((table.motion(1).unwrap() - expected_tick_one).abs() < 1e-12);
        assert!(table.motion(5).unwrap() > table.motion(1).unwrap());
    }

    #[test]
    fn cumulative_is_a_prefix_sum() {
        let table = MotionTable::new(8);
        let by_hand: f64 = (0..=3).map(|i| table.motion(i).unwrap()).sum();
        assert!((table.cumulative(3) - by_hand).abs() < 1e-12);
    }

    #[test]
    fn spawn_clears_the_gravity_window() {
        let config = Config::default();
        let assets = Assets::prepare(&config).unwrap();
        let fall = assets.motion.cumulative(config.max_movement_ticks - 1);
        // After the whole gravity window the player is still above the
        // platform top.
        assert!(assets.spawn_y - fall >= f64::from(PLATFORM_Y + 1));
        // And the prediction window is long enough to reach it.
        let total = assets.motion.cumulative(assets.motion.max_prediction_tick());
        assert!(assets.spawn_y - total < f64::from(PLATFORM_Y + 1));
    }

    #[test]
    fn platform_bounds() {
        assert!(on_platform(8.0, 8.0));
        assert!(on_platform(4.0, 11.9));
        assert!(!on_platform(3.9, 8.0));
        assert!(!on_platform(8.0, 12.0));
    }

    #[test]
    fn platform_payload_modern_has_64_entries() {
        let payload = platform_payload(ProtocolVersion::V1_20);
        let mut decoder = Decoder::new(&payload);
        let section = decoder.read_i64().unwrap();
        assert_eq!(section, 15); // sub-chunk (0, 15, 0)
        assert_eq!(decoder.read_var_int().unwrap(), 64);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let entry = decoder.read_var_long().unwrap();
            assert_eq!(entry >> 12, i64::from(barrier_state_id(ProtocolVersion::V1_20)));
            assert_eq!(entry & 0xF, 15); // local y
            seen.insert(entry & 0xFF0);
        }
        assert_eq!(seen.len(), 64);
        assert!(decoder.is_finished());
    }

    #[test]
    fn platform_payload_legacy_uses_records() {
        let payload = platform_payload(ProtocolVersion::V1_9);
        let mut decoder = Decoder::new(&payload);
        assert_eq!(decoder.read_i32().unwrap(), 0);
        assert_eq!(decoder.read_i32().unwrap(), 0);
        assert_eq!(decoder.read_var_int().unwrap(), 64);
        let (x, y) = (decoder.read_u8().unwrap(), decoder.read_u8().unwrap());
        assert_eq!(x, (4 << 4) | 4);
        assert_eq!(y, 255);
    }

    #[test]
    fn images_prepared_for_every_version() {
        let assets = Assets::prepare(&Config::default()).unwrap();
        for &version in ProtocolVersion::ALL {
            assert!(!assets.join_game(version).is_empty());
            assert!(!assets.empty_chunk(version).is_empty());
            assert!(!assets.platform_update(version).is_empty());
        }
        assert!(!assets.registry_payload().is_empty());
    }

    #[test]
    fn registry_embedded_only_in_the_right_brackets() {
        let assets = Assets::prepare(&Config::default()).unwrap();
        let needle = b"minecraft:dimension_type";
        let embedded = |version| {
            assets
                .join_game(version)
                .windows(needle.len())
                .any(|w| w == needle)
        };
        assert!(!embedded(ProtocolVersion::V1_15_2));
        assert!(embedded(ProtocolVersion::V1_16_2));
        assert!(embedded(ProtocolVersion::V1_20));
        // 1.20.2 moved the registry into the Configuration phase.
        assert!(!embedded(ProtocolVersion::V1_20_2));
        assert!(assets
            .registry_payload()
            .windows(needle.len())
            .any(|w| w == needle));
    }

    #[test]
    fn damage_types_only_since_1_19_4() {
        let assets = Assets::prepare(&Config::default()).unwrap();
        let needle = b"minecraft:damage_type";
        let embedded = |version: ProtocolVersion| {
            assets
                .join_game(version)
                .windows(needle.len())
                .any(|w| w == needle)
        };
        assert!(!embedded(ProtocolVersion::V1_19_1));
        assert!(embedded(ProtocolVersion::V1_19_4));
        assert!(embedded(ProtocolVersion::V1_20));
    }
}
