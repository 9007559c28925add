//! 32-byte directory record codec and 8.3 short-name rules.

use crate::timestamp::FatTimestamp;
use fsh_types::{
    ATTR_DIRECTORY, ATTR_LONG_NAME, ClusterNumber, DIR_ENTRY_SIZE, ENTRY_DELETED,
    ENTRY_NEVER_USED, ParseError, SHORT_NAME_LEN, read_le_u16, read_le_u32,
};

/// Raw name of the `.` (self) record.
pub const DOT_NAME: [u8; SHORT_NAME_LEN] = *b".          ";
/// Raw name of the `..` (parent) record.
pub const DOTDOT_NAME: [u8; SHORT_NAME_LEN] = *b"..         ";

/// Characters that may not appear anywhere in a user-supplied name.
const ILLEGAL_NAME_CHARS: &[char] = &[
    '/', ' ', '"', '*', '+', '`', '-', ';', ':', '<', '>', '=', '?',
];

/// One decoded directory record. `entry_loc` is the absolute byte offset of
/// the 32-byte slot this record was read from (and will be saved back to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; SHORT_NAME_LEN],
    pub attr: u8,
    pub cluster: ClusterNumber,
    pub size: u32,
    pub entry_loc: u64,
}

/// Occupancy of a record slot, keyed off the first name byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    NeverUsed,
    Deleted,
    Live,
}

/// Classification of a raw 32-byte record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// VFAT long-name continuation record; enumeration skips these.
    LongName,
    /// Anything else — live, tombstoned, or never used.
    Slot(DirEntry),
}

/// Decode one raw record. The cluster number is reassembled from the
/// 16-bit hi/lo halves at offsets 20 and 26.
#[must_use]
pub fn decode_record(raw: &[u8; DIR_ENTRY_SIZE], entry_loc: u64) -> Record {
    let attr = raw[11];
    if attr & ATTR_LONG_NAME == ATTR_LONG_NAME {
        return Record::LongName;
    }

    let mut name = [0_u8; SHORT_NAME_LEN];
    name.copy_from_slice(&raw[..SHORT_NAME_LEN]);

    // Offsets are within the fixed-size record, so the reads cannot fail.
    let hi = read_le_u16(raw, 20).unwrap_or(0);
    let lo = read_le_u16(raw, 26).unwrap_or(0);
    let size = read_le_u32(raw, 28).unwrap_or(0);

    Record::Slot(DirEntry {
        name,
        attr,
        cluster: ClusterNumber(u32::from(hi) << 16 | u32::from(lo)),
        size,
        entry_loc,
    })
}

impl DirEntry {
    #[must_use]
    pub fn slot_state(&self) -> SlotState {
        match self.name[0] {
            ENTRY_NEVER_USED => SlotState::NeverUsed,
            ENTRY_DELETED => SlotState::Deleted,
            _ => SlotState::Live,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.slot_state() == SlotState::Live
    }

    /// Whether the slot can hold a new record (never used or tombstoned).
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        !self.is_live()
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.slot_state() == SlotState::Deleted
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY == ATTR_DIRECTORY
    }

    /// Lower-cased display form of the raw name, e.g. `FILE    PDF` →
    /// `file.pdf`.
    #[must_use]
    pub fn short_name(&self) -> String {
        display_name(&self.name)
    }

    pub fn set_cluster(&mut self, cluster: ClusterNumber) {
        self.cluster = cluster;
    }

    /// Mark the record deleted; the rest of the slot keeps its bytes.
    pub fn mark_deleted(&mut self) {
        self.name[0] = ENTRY_DELETED;
    }

    /// Encode back to the on-disk layout. The creation/access fields at
    /// [13, 20) are written as zero; the write time/date come from `ts`.
    #[must_use]
    pub fn encode(&self, ts: FatTimestamp) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0_u8; DIR_ENTRY_SIZE];
        raw[..SHORT_NAME_LEN].copy_from_slice(&self.name);
        raw[11] = self.attr;
        let hi = (self.cluster.0 >> 16) as u16;
        let lo = (self.cluster.0 & 0xFFFF) as u16;
        raw[20..22].copy_from_slice(&hi.to_le_bytes());
        raw[22..24].copy_from_slice(&ts.time.to_le_bytes());
        raw[24..26].copy_from_slice(&ts.date.to_le_bytes());
        raw[26..28].copy_from_slice(&lo.to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
        raw
    }
}

/// Lower-cased display form of a raw 11-byte name.
#[must_use]
pub fn display_name(raw: &[u8; SHORT_NAME_LEN]) -> String {
    let base: String = raw[..8]
        .iter()
        .filter(|b| **b != b' ')
        .map(|b| char::from(*b).to_ascii_lowercase())
        .collect();
    let ext: String = raw[8..]
        .iter()
        .filter(|b| **b != b' ')
        .map(|b| char::from(*b).to_ascii_lowercase())
        .collect();

    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

/// Validate a user-supplied name and pack it into the raw 11-byte form:
/// upper-cased, base in [0, 8) and extension in [8, 11), space-padded.
///
/// Rejected: any character from the illegal set, an empty name, a leading or
/// trailing dot, an extension longer than 3, and a dotless name longer
/// than 8. A base longer than 8 is truncated when an extension is present.
pub fn validate_name(user: &str) -> Result<[u8; SHORT_NAME_LEN], ParseError> {
    if user.is_empty() {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "empty",
        });
    }
    if user.contains(ILLEGAL_NAME_CHARS) || !user.is_ascii() {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "illegal character",
        });
    }

    let mut raw = [b' '; SHORT_NAME_LEN];
    match user.find('.') {
        Some(0) => Err(ParseError::InvalidField {
            field: "name",
            reason: "leading dot",
        }),
        Some(dot) if dot == user.len() - 1 => Err(ParseError::InvalidField {
            field: "name",
            reason: "trailing dot",
        }),
        Some(dot) => {
            let (base, ext) = (&user[..dot], &user[dot + 1..]);
            if ext.contains('.') {
                return Err(ParseError::InvalidField {
                    field: "name",
                    reason: "more than one dot",
                });
            }
            if ext.len() > 3 {
                return Err(ParseError::InvalidField {
                    field: "name",
                    reason: "extension longer than 3",
                });
            }
            for (slot, b) in raw[..8].iter_mut().zip(base.bytes()) {
                *slot = b.to_ascii_uppercase();
            }
            for (slot, b) in raw[8..].iter_mut().zip(ext.bytes()) {
                *slot = b.to_ascii_uppercase();
            }
            Ok(raw)
        }
        None => {
            if user.len() > 8 {
                return Err(ParseError::InvalidField {
                    field: "name",
                    reason: "base longer than 8",
                });
            }
            for (slot, b) in raw[..8].iter_mut().zip(user.bytes()) {
                *slot = b.to_ascii_uppercase();
            }
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_record(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
        let mut raw = [0_u8; 32];
        raw[..11].copy_from_slice(name);
        raw[11] = attr;
        raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        raw[26..28].copy_from_slice(&((cluster & 0xFFFF) as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&size.to_le_bytes());
        raw
    }

    #[test]
    fn decodes_live_entry() {
        let raw = raw_record(b"HELLO   TXT", 0x20, 0x0001_0005, 1234);
        let Record::Slot(entry) = decode_record(&raw, 4096) else {
            panic!("expected a slot");
        };
        assert_eq!(entry.short_name(), "hello.txt");
        assert_eq!(entry.cluster, ClusterNumber(0x0001_0005));
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.entry_loc, 4096);
        assert!(entry.is_live());
        assert!(!entry.is_dir());
    }

    #[test]
    fn classifies_slot_states() {
        let never = raw_record(b"\0          ", 0, 0, 0);
        let Record::Slot(entry) = decode_record(&never, 0) else {
            panic!("expected a slot");
        };
        assert_eq!(entry.slot_state(), SlotState::NeverUsed);
        assert!(entry.is_vacant());

        let mut deleted_name = *b"HELLO   TXT";
        deleted_name[0] = ENTRY_DELETED;
        let deleted = raw_record(&deleted_name, 0, 7, 10);
        let Record::Slot(entry) = decode_record(&deleted, 0) else {
            panic!("expected a slot");
        };
        assert!(entry.is_deleted());
        assert!(entry.is_vacant());
    }

    #[test]
    fn skips_long_name_records() {
        let raw = raw_record(b"ABCDEFGHIJK", ATTR_LONG_NAME, 0, 0);
        assert_eq!(decode_record(&raw, 0), Record::LongName);
        // A directory with the volume-id bit is not a long-name record.
        let raw = raw_record(b"DIR        ", ATTR_DIRECTORY | 0x08, 0, 0);
        assert!(matches!(decode_record(&raw, 0), Record::Slot(_)));
    }

    #[test]
    fn encode_round_trips() {
        let entry = DirEntry {
            name: *b"NOTES   MD ",
            attr: 0x20,
            cluster: ClusterNumber(0x0002_0003),
            size: 99,
            entry_loc: 64,
        };
        let ts = FatTimestamp {
            time: 0x1234,
            date: 0x5678,
        };
        let raw = entry.encode(ts);
        assert_eq!(&raw[22..24], &0x1234_u16.to_le_bytes());
        assert_eq!(&raw[24..26], &0x5678_u16.to_le_bytes());
        // Creation/access fields are zeroed.
        assert!(raw[12..20].iter().all(|b| *b == 0));

        let Record::Slot(back) = decode_record(&raw, 64) else {
            panic!("expected a slot");
        };
        assert_eq!(back, entry);
    }

    #[test]
    fn display_name_forms() {
        assert_eq!(display_name(b"FILE    PDF"), "file.pdf");
        assert_eq!(display_name(b"NOEXT      "), "noext");
        assert_eq!(display_name(&DOT_NAME), ".");
        assert_eq!(display_name(&DOTDOT_NAME), "..");
    }

    #[test]
    fn validate_name_packs_and_uppercases() {
        assert_eq!(validate_name("file.pdf").unwrap(), *b"FILE    PDF");
        assert_eq!(validate_name("noext").unwrap(), *b"NOEXT      ");
        assert_eq!(validate_name("A").unwrap(), *b"A          ");
        assert_eq!(validate_name("12345678.abc").unwrap(), *b"12345678ABC");
        // Base truncates at 8 when an extension is present.
        assert_eq!(validate_name("verylongbase.txt").unwrap(), *b"VERYLONGTXT");
    }

    #[test]
    fn validate_name_rejections() {
        for bad in [
            "", "has space", "semi;colon", "a/b", "co:lon", "-lead", "q?m", ".hidden", "dot.",
            "file.html", "ninecharss", "quo\"te", "st*ar", "pl+us", "back`tick", "l<t", "g>t",
            "e=q", "caf\u{e9}", "two.dots.c",
        ] {
            assert!(validate_name(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn validated_names_round_trip_through_display() {
        for name in ["file.pdf", "noext", "a.b", "12345678.abc"] {
            let raw = validate_name(name).unwrap();
            assert_eq!(display_name(&raw), name);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn decode_never_panics(raw in proptest::array::uniform32(any::<u8>())) {
            let _ = decode_record(&raw, 0);
        }

        #[test]
        fn validate_never_panics(input in ".{0,24}") {
            if let Ok(raw) = validate_name(&input) {
                // Absent base truncation, accepted names round-trip through
                // the display form.
                let base_len = input.find('.').unwrap_or(input.len());
                if base_len <= 8 {
                    prop_assert_eq!(display_name(&raw), input.to_ascii_lowercase());
                }
            }
        }
    }
}
