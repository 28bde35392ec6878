//! The protocol version negotiated in the handshake.
//!
//! Variant order is release order, so the derived `Ord` is the comparison
//! used by every feature gate in the codec and the session.

/// A supported protocol version.
///
/// The wire identifier (the integer the client sends in its handshake) is
/// not monotone with release order for old snapshots, which is why the
/// comparison operator works on the variant order instead of the raw number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum::AsRefStr)]
pub enum ProtocolVersion {
    V1_7_2,
    V1_7_6,
    V1_8,
    V1_9,
    V1_9_1,
    V1_9_2,
    V1_9_4,
    V1_10,
    V1_11,
    V1_11_1,
    V1_12,
    V1_12_1,
    V1_12_2,
    V1_13,
    V1_13_1,
    V1_13_2,
    V1_14,
    V1_14_1,
    V1_14_2,
    V1_14_3,
    V1_14_4,
    V1_15,
    V1_15_1,
    V1_15_2,
    V1_16,
    V1_16_1,
    V1_16_2,
    V1_16_3,
    V1_16_4,
    V1_17,
    V1_17_1,
    V1_18,
    V1_18_2,
    V1_19,
    V1_19_1,
    V1_19_3,
    V1_19_4,
    V1_20,
    V1_20_2,
    V1_20_3,
}

impl ProtocolVersion {
    /// All versions, oldest to newest.
    pub const ALL: &'static [ProtocolVersion] = &[
        Self::V1_7_2,
        Self::V1_7_6,
        Self::V1_8,
        Self::V1_9,
        Self::V1_9_1,
        Self::V1_9_2,
        Self::V1_9_4,
        Self::V1_10,
        Self::V1_11,
        Self::V1_11_1,
        Self::V1_12,
        Self::V1_12_1,
        Self::V1_12_2,
        Self::V1_13,
        Self::V1_13_1,
        Self::V1_13_2,
        Self::V1_14,
        Self::V1_14_1,
        Self::V1_14_2,
        Self::V1_14_3,
        Self::V1_14_4,
        Self::V1_15,
        Self::V1_15_1,
        Self::V1_15_2,
        Self::V1_16,
        Self::V1_16_1,
        Self::V1_16_2,
        Self::V1_16_3,
        Self::V1_16_4,
        Self::V1_17,
        Self::V1_17_1,
        Self::V1_18,
        Self::V1_18_2,
        Self::V1_19,
        Self::V1_19_1,
        Self::V1_19_3,
        Self::V1_19_4,
        Self::V1_20,
        Self::V1_20_2,
        Self::V1_20_3,
    ];

    /// Maps the handshake integer to a version.
    ///
    /// Several releases share a wire number (e.g. 1.16.4 and 1.16.5 are both
    /// 754); the mapping picks the canonical one. `None` means the version
    /// is outside the supported range and the connection must be rejected.
    pub fn from_number(number: i32) -> Option<Self> {
        Some(match number {
            4 => Self::V1_7_2,
            5 => Self::V1_7_6,
            47 => Self::V1_8,
            107 => Self::V1_9,
            108 => Self::V1_9_1,
            109 => Self::V1_9_2,
            110 => Self::V1_9_4,
            210 => Self::V1_10,
            315 => Self::V1_11,
            316 => Self::V1_11_1,
            335 => Self::V1_12,
            338 => Self::V1_12_1,
            340 => Self::V1_12_2,
            393 => Self::V1_13,
            401 => Self::V1_13_1,
            404 => Self::V1_13_2,
            477 => Self::V1_14,
            480 => Self::V1_14_1,
            485 => Self::V1_14_2,
            490 => Self::V1_14_3,
            498 => Self::V1_14_4,
            573 => Self::V1_15,
            575 => Self::V1_15_1,
            578 => Self::V1_15_2,
            735 => Self::V1_16,
            736 => Self::V1_16_1,
            751 => Self::V1_16_2,
            753 => Self::V1_16_3,
            754 => Self::V1_16_4,
            755 => Self::V1_17,
            756 => Self::V1_17_1,
            757 => Self::V1_18,
            758 => Self::V1_18_2,
            759 => Self::V1_19,
            760 => Self::V1_19_1,
            761 => Self::V1_19_3,
            762 => Self::V1_19_4,
            763 => Self::V1_20,
            764 => Self::V1_20_2,
            765 => Self::V1_20_3,
            _ => return None,
        })
    }

    /// The handshake integer for this version.
    pub fn number(self) -> i32 {
        match self {
            Self::V1_7_2 => 4,
            Self::V1_7_6 => 5,
            Self::V1_8 => 47,
            Self::V1_9 => 107,
            Self::V1_9_1 => 108,
            Self::V1_9_2 => 109,
            Self::V1_9_4 => 110,
            Self::V1_10 => 210,
            Self::V1_11 => 315,
            Self::V1_11_1 => 316,
            Self::V1_12 => 335,
            Self::V1_12_1 => 338,
            Self::V1_12_2 => 340,
            Self::V1_13 => 393,
            Self::V1_13_1 => 401,
            Self::V1_13_2 => 404,
            Self::V1_14 => 477,
            Self::V1_14_1 => 480,
            Self::V1_14_2 => 485,
            Self::V1_14_3 => 490,
            Self::V1_14_4 => 498,
            Self::V1_15 => 573,
            Self::V1_15_1 => 575,
            Self::V1_15_2 => 578,
            Self::V1_16 => 735,
            Self::V1_16_1 => 736,
            Self::V1_16_2 => 751,
            Self::V1_16_3 => 753,
            Self::V1_16_4 => 754,
            Self::V1_17 => 755,
            Self::V1_17_1 => 756,
            Self::V1_18 => 757,
            Self::V1_18_2 => 758,
            Self::V1_19 => 759,
            Self::V1_19_1 => 760,
            Self::V1_19_3 => 761,
            Self::V1_19_4 => 762,
            Self::V1_20 => 763,
            Self::V1_20_2 => 764,
            Self::V1_20_3 => 765,
        }
    }

    /// Whether this version has the Configuration phase between Login and
    /// Play.
    pub fn has_configuration_phase(self) -> bool {
        self >= Self::V1_20_2
    }
}
