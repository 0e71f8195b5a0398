//! UEFI Firmware Volume (FV)
//!
//! For reference, see the UEFI Platform Initialization (PI) specification,
//! volume 3, "Firmware Storage Code Definitions".
//!
//! A firmware volume starts with a fixed header, followed by a block map,
//! which is a list of (count, size) pairs terminated by an all-zero entry.
//! There is no table pointing to firmware volumes, so we find them by their
//! signature, which is 8-byte aligned and sits 40 bytes into the header.

use core::fmt::{self, Display};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{error::FlashError, guid::Guid};

pub const FV_MAGIC: &str = "_FVH";
pub const FV_MAGIC_BYTES: &[u8] = FV_MAGIC.as_bytes();
const FV_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

// Offset of the signature within the header
const SIGNATURE_OFFSET: usize = 40;
// Where to start looking and how far to step
const SCAN_START: usize = 32;
const SCAN_STEP: usize = 8;

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct Header {
    pub zeros: [u8; 16],
    pub file_system_guid: Guid,
    /// Length of the entire volume, including this header
    pub length: u64,
    pub signature: u32,
    pub attr_mask: u8,
    pub header_len: u16,
    pub checksum: u16,
    pub reserved: [u8; 3],
    pub revision: u8,
    pub unused: [u8; 3],
}

pub const HEADER_SIZE: usize = size_of::<Header>();

#[derive(
    Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(C)]
pub struct Block {
    pub count: u32,
    pub size: u32,
}

pub const BLOCK_SIZE: usize = size_of::<Block>();

/// Smallest possible volume: a header and the block map terminator.
pub const MIN_SIZE: usize = HEADER_SIZE + BLOCK_SIZE;

impl Block {
    fn is_terminator(&self) -> bool {
        self.count == 0 && self.size == 0
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Block { count, size } = self;
        write!(f, "{count} x 0x{size:x}")
    }
}

/// Search for the signature of a firmware volume with 8-byte alignment.
/// If found, return the offset at which the volume starts.
pub fn find_fv_offset(data: &[u8]) -> Option<usize> {
    if data.len() < SCAN_START {
        return None;
    }
    let l = FV_MAGIC_BYTES.len();
    for o in (SCAN_START..data.len()).step_by(SCAN_STEP) {
        if data.get(o..o + l) != Some(FV_MAGIC_BYTES) {
            continue;
        }
        // The header would start before the data we were given.
        let Some(start) = o.checked_sub(SIGNATURE_OFFSET) else {
            trace!("{FV_MAGIC} @ {o:08x} without room for a header, skipping");
            continue;
        };
        return Some(start);
    }
    None
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FirmwareVolume {
    /// Offset relative to the start of the data scanned
    pub offset: usize,
    pub header: Header,
    pub blocks: Vec<Block>,
}

impl FirmwareVolume {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, FlashError> {
        let l = data.len();
        if l < MIN_SIZE {
            return Err(FlashError::ImageTooSmall(format!(
                "firmware volume @ {offset:08x} needs at least {MIN_SIZE} bytes, got {l}"
            )));
        }
        let Ok((header, mut rest)) = Header::read_from_prefix(data) else {
            return Err(FlashError::InvalidRecordSize {
                expected: HEADER_SIZE,
                got: l,
            });
        };

        let mut blocks = Vec::new();
        loop {
            let Ok((block, r)) = Block::read_from_prefix(rest) else {
                let n = blocks.len();
                return Err(FlashError::TruncatedData(format!(
                    "block map of firmware volume @ {offset:08x} ends after {n} entries without terminator"
                )));
            };
            rest = r;
            if block.is_terminator() {
                trace!("  block map terminator");
                break;
            }
            trace!("  block {block}");
            blocks.push(block);
        }

        let fv = Self {
            offset,
            header,
            blocks,
        };
        debug!("{FV_MAGIC} @ {offset:08x}, size 0x{:08x}", fv.size());
        Ok(fv)
    }

    /// Declared size of the whole volume
    pub fn size(&self) -> usize {
        usize::try_from(self.header.length).unwrap_or(usize::MAX)
    }

    /// Number of bytes taken by the header and the block map, terminator
    /// included, as actually decoded
    pub fn header_size(&self) -> usize {
        HEADER_SIZE + (self.blocks.len() + 1) * BLOCK_SIZE
    }

    /// Total size of all blocks as described by the block map
    pub fn block_map_size(&self) -> u64 {
        self.blocks
            .iter()
            .map(|b| b.count as u64 * b.size as u64)
            .fold(0, u64::saturating_add)
    }

    /// Short name of the file system, if it is a known one
    pub fn file_system_name(&self) -> Option<&'static str> {
        let g = self.header.file_system_guid;
        g.file_system_name()
    }

    /// Re-encode the header and block map, including the terminator.
    pub fn to_vec(&self) -> Vec<u8> {
        let terminator = Block { count: 0, size: 0 };
        [
            self.header.as_bytes(),
            self.blocks.as_bytes(),
            terminator.as_bytes(),
        ]
        .concat()
    }

    pub fn validate(&self) -> Vec<FlashError> {
        let mut issues = Vec::new();
        let o = self.offset;
        let h = self.header;
        if h.zeros.iter().any(|b| *b != 0) {
            issues.push(FlashError::InvalidVolume(format!(
                "{o:08x}: zero vector is not all zero: {:02x?}",
                h.zeros
            )));
        }
        let sig = h.signature;
        if sig != FV_SIGNATURE {
            issues.push(FlashError::InvalidVolume(format!(
                "{o:08x}: signature {sig:08x}, wanted {FV_SIGNATURE:08x} ({FV_MAGIC})"
            )));
        }
        let s = self.size();
        let hs = self.header_size();
        if s < hs {
            issues.push(FlashError::InvalidVolume(format!(
                "{o:08x}: length 0x{s:x} smaller than header and block map (0x{hs:x})"
            )));
        }
        issues
    }
}

impl Display for FirmwareVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.offset;
        let s = self.size();
        let g = self.header.file_system_guid;
        let n = self.file_system_name().unwrap_or("unknown");
        let a = self.header.attr_mask;
        let hl = self.header.header_len;
        let cs = self.header.checksum;
        let r = self.header.revision;
        writeln!(f, "{FV_MAGIC} @ {o:08x}, size 0x{s:08x}, {g} ({n})")?;
        writeln!(
            f,
            "  attributes {a:02x}, header length {hl}, checksum {cs:04x}, revision {r}"
        )?;
        let blocks: Vec<String> = self.blocks.iter().map(|b| b.to_string()).collect();
        write!(f, "  blocks: {}", blocks.join(", "))
    }
}

/// Build a volume header with the given length and block map, terminator
/// included unless `terminate` is false.
#[cfg(test)]
pub(crate) fn fake_volume(length: u64, blocks: &[(u32, u32)], terminate: bool) -> Vec<u8> {
    let header = Header {
        zeros: [0; 16],
        file_system_guid: crate::guid::FFS2,
        length,
        signature: FV_SIGNATURE,
        attr_mask: 0xff,
        header_len: 0x48,
        checksum: 0x1234,
        reserved: [0; 3],
        revision: 2,
        unused: [0; 3],
    };
    let mut d = header.as_bytes().to_vec();
    for (count, size) in blocks {
        d.extend_from_slice(Block { count: *count, size: *size }.as_bytes());
    }
    if terminate {
        d.extend_from_slice(&[0; BLOCK_SIZE]);
    }
    d
}

#[test]
fn header_layout() {
    assert_eq!(HEADER_SIZE, 56);
    let d = fake_volume(0x1000, &[], true);
    assert_eq!(&d[40..44], FV_MAGIC_BYTES);
    assert_eq!(&d[32..40], &0x1000u64.to_le_bytes());
    assert_eq!(d[44], 0xff);
    assert_eq!(&d[45..47], &[0x48, 0x00]);
    assert_eq!(d[52], 2);
}

#[test]
fn find_at_start() {
    let mut d = fake_volume(0x1000, &[(1, 0x1000)], true);
    d.resize(0x1000, 0xff);
    assert_eq!(find_fv_offset(&d), Some(0));
}

#[test]
fn find_with_offset() {
    let mut d = vec![0xff; 0x100];
    d.extend_from_slice(&fake_volume(0x1000, &[(1, 0x1000)], true));
    assert_eq!(find_fv_offset(&d), Some(0x100));
}

#[test]
fn find_nothing() {
    assert_eq!(find_fv_offset(&[0xff; 0x1000]), None);
    assert_eq!(find_fv_offset(&[0xff; 16]), None);
    // Not 8-byte aligned
    let mut d = vec![0; 0x100];
    d[0x44..0x48].copy_from_slice(FV_MAGIC_BYTES);
    assert_eq!(find_fv_offset(&d), None);
    // Signature cut off at the end
    let mut d = vec![0; 0x42];
    d[0x40..0x42].copy_from_slice(&FV_MAGIC_BYTES[..2]);
    assert_eq!(find_fv_offset(&d), None);
}

#[test]
fn skip_signature_without_header() {
    let mut d = vec![0; 0x100];
    d[32..36].copy_from_slice(FV_MAGIC_BYTES);
    assert_eq!(find_fv_offset(&d), None);
    d[0x58..0x5c].copy_from_slice(FV_MAGIC_BYTES);
    assert_eq!(find_fv_offset(&d), Some(0x30));
}

#[test]
fn parse_block_map() {
    let blocks = [(0x10, 0x1000), (1, 0x200), (4, 0x40)];
    let d = fake_volume(0x10300, &blocks, true);
    let fv = FirmwareVolume::parse(&d, 0).unwrap();
    assert_eq!(
        fv.blocks,
        [
            Block {
                count: 0x10,
                size: 0x1000
            },
            Block {
                count: 1,
                size: 0x200
            },
            Block {
                count: 4,
                size: 0x40
            },
        ]
    );
    assert_eq!(fv.size(), 0x10300);
    assert_eq!(fv.header_size(), HEADER_SIZE + 4 * BLOCK_SIZE);
    assert_eq!(fv.block_map_size(), 0x10300);
    assert_eq!(fv.file_system_name(), Some("FFSv2"));
    assert_eq!(fv.to_vec(), d);
    assert!(fv.validate().is_empty());
}

#[test]
fn parse_stops_at_terminator() {
    let mut d = fake_volume(0x1000, &[(1, 0x1000)], true);
    // whatever follows the terminator is not part of the block map
    d.extend_from_slice(Block { count: 7, size: 7 }.as_bytes());
    let fv = FirmwareVolume::parse(&d, 0).unwrap();
    assert_eq!(fv.blocks.len(), 1);
}

#[test]
fn parse_truncated_block_map() {
    let blocks = [(0x10, 0x1000), (1, 0x200), (4, 0x40)];
    let d = fake_volume(0x10300, &blocks, false);
    let r = FirmwareVolume::parse(&d, 0);
    assert!(matches!(r, Err(FlashError::TruncatedData(_))));
    // A partial block entry does not count either.
    let mut d = d;
    d.extend_from_slice(&[0; 4]);
    let r = FirmwareVolume::parse(&d, 0);
    assert!(matches!(r, Err(FlashError::TruncatedData(_))));
}

#[test]
fn parse_too_small() {
    let d = fake_volume(0x1000, &[], true);
    let r = FirmwareVolume::parse(&d[..MIN_SIZE - 1], 0);
    assert!(matches!(r, Err(FlashError::ImageTooSmall(_))));
}

#[test]
fn validate_inconsistent() {
    let mut d = fake_volume(0x20, &[(1, 0x20)], true);
    d[3] = 0xaa;
    let fv = FirmwareVolume::parse(&d, 0x100).unwrap();
    let issues = fv.validate();
    assert_eq!(issues.len(), 2);
    assert!(
        issues
            .iter()
            .all(|i| matches!(i, FlashError::InvalidVolume(m) if m.starts_with("00000100")))
    );
}

#[test]
fn validate_signature() {
    let mut d = fake_volume(0x1000, &[(1, 0x1000)], true);
    d[40..44].copy_from_slice(b"_FVX");
    let fv = FirmwareVolume::parse(&d, 0).unwrap();
    let issues = fv.validate();
    assert_eq!(issues.len(), 1);
    assert!(matches!(&issues[0], FlashError::InvalidVolume(m) if m.contains("signature")));
}
