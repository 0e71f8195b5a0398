//! Intel Flash Descriptor (IFD)
//!
//! For reference, see
//! <https://www.intel.com/content/dam/www/public/us/en/documents/datasheets/io-controller-hub-8-datasheet.pdf>
//! and coreboot `util/ifdtool/`.
//!
//! The descriptor starts with a signature, either at the very beginning of
//! the image (ICH8/9/10) or after 16 reserved bytes (PCH). The Descriptor Map
//! follows immediately. It holds the base addresses of the other sections,
//! commonly abbreviated as xxBA.
//! NOTE: The base addresses are compact values in units of 16 bytes, so we
//! need to expand them to get the real offsets.
//!
//! | Section                      | Meaning                                |
//! | ---------------------------- | -------------------------------------- |
//! | Signature + Descriptor Map   | Offsets of other sections              |
//! | Components                   | Flash parts and their parameters       |
//! | Regions                      | Flash partitions as offsets            |
//! | Masters                      | Access control for regions             |

use core::fmt::{self, Display};

use log::debug;
use serde::{Deserialize, Serialize};
use zerocopy::IntoBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{error::FlashError, read_record};

pub const SIGNATURE: [u8; 4] = [0x5a, 0xa5, 0xf0, 0x0f];

// PCH images reserve the first 16 bytes; ICH8/9/10 start with the signature.
const PCH_SIGNATURE_OFFSET: usize = 16;

/// Base addresses count in units of this many bytes.
pub const BASE_UNIT: usize = 0x10;

/// Largest base address that still points into the descriptor.
pub const MAX_BASE: u8 = 0xe0;

/// Find the flash descriptor signature and return the offset at which the
/// Descriptor Map begins, i.e., right after the signature.
/// The PCH position takes precedence over the legacy one.
pub fn locate_descriptor_signature(data: &[u8]) -> Option<usize> {
    let l = SIGNATURE.len();
    let pch = PCH_SIGNATURE_OFFSET;
    if data.get(pch..pch + l) == Some(&SIGNATURE[..]) {
        debug!("IFD signature found @ {pch:08x} (PCH)");
        return Some(pch + l);
    }
    if data.get(..l) == Some(&SIGNATURE[..]) {
        debug!("IFD signature found @ 00000000 (ICH)");
        return Some(l);
    }
    None
}

/// The Descriptor Map, made up of the four FLMAP registers.
///
/// The "number of" fields are stored as is, which on real hardware is
/// commonly the count minus one.
#[derive(
    Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(C)]
pub struct FlashDescriptorMap {
    // FLMAP0
    pub component_base: u8,
    pub number_of_flash_chips: u8,
    pub region_base: u8,
    pub number_of_regions: u8,
    // FLMAP1
    pub master_base: u8,
    pub number_of_masters: u8,
    pub pch_straps_base: u8,
    pub number_of_pch_straps: u8,
    // FLMAP2
    pub proc_straps_base: u8,
    pub number_of_proc_straps: u8,
    pub icc_table_base: u8,
    pub number_of_icc_table_entries: u8,
    // FLMAP3
    pub dmi_table_base: u8,
    pub number_of_dmi_table_entries: u8,
    pub reserved0: u8,
    pub reserved1: u8,
}

pub const DESCRIPTOR_MAP_SIZE: usize = size_of::<FlashDescriptorMap>();

fn expand(base: u8) -> usize {
    base as usize * BASE_UNIT
}

impl FlashDescriptorMap {
    pub fn parse(data: &[u8]) -> Result<Self, FlashError> {
        read_record(data)
    }

    pub fn component_offset(&self) -> usize {
        expand(self.component_base)
    }

    pub fn region_offset(&self) -> usize {
        expand(self.region_base)
    }

    pub fn master_offset(&self) -> usize {
        expand(self.master_base)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Check that the base addresses we follow stay within the descriptor.
    pub fn validate(&self) -> Vec<FlashError> {
        let bases = [
            ("MasterBase", self.master_base),
            ("RegionBase", self.region_base),
            ("ComponentBase", self.component_base),
        ];
        bases
            .into_iter()
            .filter(|(_, b)| *b > MAX_BASE)
            .map(|(name, b)| {
                FlashError::InvalidBaseAddr(format!(
                    "{name} too large: expected at most {MAX_BASE:#04x}, got {b:#04x}"
                ))
            })
            .collect()
    }
}

impl Display for FlashDescriptorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nc = self.number_of_flash_chips;
        let fcba = self.component_offset();
        let nr = self.number_of_regions;
        let frba = self.region_offset();
        let nm = self.number_of_masters;
        let fmba = self.master_offset();
        let isl = self.number_of_pch_straps;
        let fisba = expand(self.pch_straps_base);
        writeln!(f, "        components: {nc:2}, base: 0x{fcba:08x}")?;
        writeln!(f, "           regions: {nr:2}, base: 0x{frba:08x}")?;
        writeln!(f, "           masters: {nm:2}, base: 0x{fmba:08x}")?;
        write!(f, "        PCH straps: {isl:2}, base: 0x{fisba:08x}")
    }
}

#[cfg(test)]
fn with_signature_at(size: usize, pos: usize) -> Vec<u8> {
    let mut d = vec![0u8; size];
    d[pos..pos + SIGNATURE.len()].copy_from_slice(&SIGNATURE);
    d
}

#[test]
fn signature_pch() {
    let d = with_signature_at(64, 16);
    assert_eq!(locate_descriptor_signature(&d), Some(20));
}

#[test]
fn signature_ich() {
    let d = with_signature_at(64, 0);
    assert_eq!(locate_descriptor_signature(&d), Some(4));
}

#[test]
/// An image carrying both must be treated as PCH.
fn signature_pch_takes_precedence() {
    let mut d = with_signature_at(64, 0);
    d[16..20].copy_from_slice(&SIGNATURE);
    assert_eq!(locate_descriptor_signature(&d), Some(20));
}

#[test]
fn signature_not_found() {
    assert_eq!(locate_descriptor_signature(&[0u8; 64]), None);
    assert_eq!(locate_descriptor_signature(&[0u8; 2]), None);
    // Too short for the PCH position, but still fine for the legacy one.
    assert_eq!(locate_descriptor_signature(&SIGNATURE), Some(4));
}

#[test]
fn descriptor_map_fields() {
    let raw: Vec<u8> = (0..DESCRIPTOR_MAP_SIZE as u8).collect();
    let m = FlashDescriptorMap::parse(&raw).unwrap();
    assert_eq!(m.component_base, 0);
    assert_eq!(m.region_base, 2);
    assert_eq!(m.master_base, 4);
    assert_eq!(m.reserved1, 15);
    assert_eq!(m.region_offset(), 0x20);
    assert_eq!(m.master_offset(), 0x40);
    assert_eq!(m.to_vec(), raw);
}

#[test]
fn descriptor_map_too_short() {
    let r = FlashDescriptorMap::parse(&[0u8; 10]);
    assert_eq!(
        r,
        Err(FlashError::InvalidRecordSize {
            expected: DESCRIPTOR_MAP_SIZE,
            got: 10
        })
    );
}

#[test]
fn descriptor_map_validate() {
    let mut raw = [0u8; DESCRIPTOR_MAP_SIZE];
    raw[0] = 0x03;
    raw[2] = 0x04;
    raw[4] = 0x06;
    let m = FlashDescriptorMap::parse(&raw).unwrap();
    assert!(m.validate().is_empty());

    raw[0] = 0xff;
    raw[4] = 0xe1;
    let m = FlashDescriptorMap::parse(&raw).unwrap();
    let issues = m.validate();
    assert_eq!(issues.len(), 2);
    assert!(matches!(&issues[0], FlashError::InvalidBaseAddr(m) if m.starts_with("MasterBase")));
    assert!(matches!(&issues[1], FlashError::InvalidBaseAddr(m) if m.starts_with("ComponentBase")));
}
