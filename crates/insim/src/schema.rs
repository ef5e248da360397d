//! Static per-type packet schemas and validation.
//!
//! Every recognised packet type carries size bounds and a table of named
//! field locations. [`validate_header`] is the cheap check the framer runs
//! on a candidate size/type pair; [`validate`] additionally requires the
//! payload to be fully present and every declared field to lie wholly inside
//! the packet.

use crate::PacketType;
use thiserror::Error;

/// Smallest legal wire size for any packet (size, type, two header bytes).
pub const MIN_PACKET_SIZE: usize = 4;

/// A named byte range inside a packet.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub length: usize,
}

/// Size bounds and field table for one packet type.
#[derive(Debug, Clone, Copy)]
pub struct PacketSchema {
    pub min_size: usize,
    pub exact_size: Option<usize>,
    pub max_size: Option<usize>,
    pub fields: &'static [FieldSpec],
}

const fn field(name: &'static str, offset: usize, length: usize) -> FieldSpec {
    FieldSpec {
        name,
        offset,
        length,
    }
}

const VER_SCHEMA: PacketSchema = PacketSchema {
    min_size: 20,
    exact_size: Some(20),
    max_size: Some(20),
    fields: &[field("version", 4, 8), field("product", 12, 6)],
};

const STA_SCHEMA: PacketSchema = PacketSchema {
    min_size: 28,
    exact_size: Some(28),
    max_size: Some(28),
    fields: &[
        field("view_plid", 10, 1),
        field("flags2", 16, 2),
        field("track", 20, 6),
    ],
};

const NPL_SCHEMA: PacketSchema = PacketSchema {
    min_size: 44,
    exact_size: None,
    max_size: Some(120),
    fields: &[field("plid", 3, 1), field("car", 40, 4)],
};

const LAP_SCHEMA: PacketSchema = PacketSchema {
    min_size: 42,
    exact_size: None,
    max_size: Some(96),
    fields: &[
        field("plid", 3, 1),
        field("lap_time_ms", 4, 4),
        field("estimate_time_ms", 8, 4),
        field("flags", 12, 2),
        field("sp0", 14, 1),
        field("penalty", 15, 1),
        field("num_pit_stops", 16, 1),
        field("fuel_200", 17, 1),
    ],
};

const SPX_SCHEMA: PacketSchema = PacketSchema {
    min_size: 42,
    exact_size: None,
    max_size: Some(96),
    fields: &[
        field("plid", 3, 1),
        field("split_time_ms", 4, 4),
        field("estimate_time_ms", 8, 4),
        field("flags", 12, 2),
        field("split_index", 14, 1),
    ],
};

const BTC_SCHEMA: PacketSchema = PacketSchema {
    min_size: 8,
    exact_size: None,
    max_size: Some(12),
    fields: &[field("click_id", 4, 1), field("flags", 6, 2)],
};

const MCI_SCHEMA: PacketSchema = PacketSchema {
    min_size: 4,
    exact_size: None,
    // The one-byte size field wraps modulo 256; the framer derives the true
    // length from the entry count instead.
    max_size: None,
    fields: &[field("count", 3, 1)],
};

/// Schema lookup for a recognised packet type.
pub fn schema_for(ty: PacketType) -> &'static PacketSchema {
    match ty {
        PacketType::Ver => &VER_SCHEMA,
        PacketType::Sta => &STA_SCHEMA,
        PacketType::Npl => &NPL_SCHEMA,
        PacketType::Lap => &LAP_SCHEMA,
        PacketType::Spx => &SPX_SCHEMA,
        PacketType::Btc => &BTC_SCHEMA,
        PacketType::Mci => &MCI_SCHEMA,
    }
}

/// Schema violations reported by [`validate_header`] and [`validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("packet size {size} below the {MIN_PACKET_SIZE}-byte minimum")]
    HeaderTooSmall { size: usize },

    #[error("{kind} packet size {size} outside bounds {min}..={max}")]
    SizeOutOfBounds {
        kind: &'static str,
        size: usize,
        min: usize,
        max: usize,
    },

    #[error("{kind} packet truncated: declared {declared} bytes, buffered {available}")]
    Truncated {
        kind: &'static str,
        declared: usize,
        available: usize,
    },

    #[error("{kind} field `{name}` at {offset}..{end} exceeds packet size {size}")]
    FieldOutOfBounds {
        kind: &'static str,
        name: &'static str,
        offset: usize,
        end: usize,
        size: usize,
    },
}

/// Validate a candidate size/type pair without looking at payload bytes.
///
/// Unknown types pass: the framer decides whether to skip them.
pub fn validate_header(size: usize, type_byte: u8) -> Result<(), SchemaError> {
    if size < MIN_PACKET_SIZE {
        return Err(SchemaError::HeaderTooSmall { size });
    }
    let Some(ty) = PacketType::from_byte(type_byte) else {
        return Ok(());
    };
    let schema = schema_for(ty);
    let max = schema.max_size.unwrap_or(usize::MAX);
    if size < schema.min_size || size > max {
        return Err(SchemaError::SizeOutOfBounds {
            kind: ty.name(),
            size,
            min: schema.min_size,
            max: schema.max_size.unwrap_or(usize::MAX),
        });
    }
    Ok(())
}

/// Validate a complete packet against its schema.
pub fn validate(packet: &[u8]) -> Result<(), SchemaError> {
    if packet.len() < MIN_PACKET_SIZE {
        return Err(SchemaError::HeaderTooSmall { size: packet.len() });
    }
    let size = packet[0] as usize;
    let type_byte = packet[1];

    let Some(ty) = PacketType::from_byte(type_byte) else {
        validate_header(size, type_byte)?;
        if packet.len() < size {
            return Err(SchemaError::Truncated {
                kind: "unknown",
                declared: size,
                available: packet.len(),
            });
        }
        return Ok(());
    };
    let schema = schema_for(ty);

    // MCI sizes wrap at 256, so measure the real byte length for it.
    let effective = if ty == PacketType::Mci {
        packet.len()
    } else {
        size
    };
    validate_header(effective, type_byte)?;
    if packet.len() < effective {
        return Err(SchemaError::Truncated {
            kind: ty.name(),
            declared: effective,
            available: packet.len(),
        });
    }

    for spec in schema.fields {
        let end = spec.offset + spec.length;
        if end > effective {
            return Err(SchemaError::FieldOutOfBounds {
                kind: ty.name(),
                name: spec.name,
                offset: spec.offset,
                end,
                size: effective,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_sub_minimum_sizes() {
        assert!(matches!(
            validate_header(3, PacketType::Sta as u8),
            Err(SchemaError::HeaderTooSmall { size: 3 })
        ));
    }

    #[test]
    fn header_enforces_exact_sizes() {
        assert!(validate_header(20, PacketType::Ver as u8).is_ok());
        assert!(validate_header(21, PacketType::Ver as u8).is_err());
        assert!(validate_header(28, PacketType::Sta as u8).is_ok());
        assert!(validate_header(27, PacketType::Sta as u8).is_err());
    }

    #[test]
    fn header_enforces_ranges() {
        assert!(validate_header(44, PacketType::Npl as u8).is_ok());
        assert!(validate_header(120, PacketType::Npl as u8).is_ok());
        assert!(validate_header(43, PacketType::Npl as u8).is_err());
        assert!(validate_header(121, PacketType::Npl as u8).is_err());
        assert!(validate_header(42, PacketType::Lap as u8).is_ok());
        assert!(validate_header(96, PacketType::Spx as u8).is_ok());
        assert!(validate_header(200, PacketType::Lap as u8).is_err());
        assert!(validate_header(8, PacketType::Btc as u8).is_ok());
        assert!(validate_header(13, PacketType::Btc as u8).is_err());
    }

    #[test]
    fn header_allows_unknown_types() {
        assert!(validate_header(10, 0xC8).is_ok());
    }

    #[test]
    fn mci_has_no_upper_bound() {
        assert!(validate_header(4, PacketType::Mci as u8).is_ok());
        assert!(validate_header(252, PacketType::Mci as u8).is_ok());
    }

    #[test]
    fn validate_checks_payload_presence() {
        let mut packet = vec![0u8; 20];
        packet[0] = 28;
        packet[1] = PacketType::Sta as u8;
        assert!(matches!(
            validate(&packet),
            Err(SchemaError::Truncated { kind: "STA", .. })
        ));
    }

    #[test]
    fn validate_accepts_well_formed_sta() {
        let mut packet = vec![0u8; 28];
        packet[0] = 28;
        packet[1] = PacketType::Sta as u8;
        assert!(validate(&packet).is_ok());
    }

    #[test]
    fn validate_accepts_wrapped_mci_length() {
        // 10 cars: 4 + 280 = 284 bytes, size byte 284 % 256 = 28.
        let mut packet = vec![0u8; 284];
        packet[0] = 28;
        packet[1] = PacketType::Mci as u8;
        packet[3] = 10;
        assert!(validate(&packet).is_ok());
    }

    #[test]
    fn validate_flags_fields_outside_small_packets() {
        // A BTC shrunk below the flags field end would be caught by bounds
        // first; craft an in-range size with a missing payload instead.
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[1] = PacketType::Btc as u8;
        assert!(validate(&packet).is_ok());
    }
}
