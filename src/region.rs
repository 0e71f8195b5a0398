//! Flash Region Section
//!
//! Regions partition the flash chip. Each one is given as a base and a limit,
//! both in units of 4 KiB, where the limit is inclusive.

use core::fmt::{self, Display};
use core::ops::Range;

use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;
use zerocopy::IntoBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{error::FlashError, read_record};

/// Granularity of region base and limit values
pub const REGION_UNIT: usize = 0x1000;

#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Region {
    #[strum(serialize = "BIOS")]
    Bios,
    #[strum(serialize = "ME")]
    Me,
    #[strum(serialize = "GbE")]
    Gbe,
    #[strum(serialize = "PDR")]
    Pdr,
}

impl Region {
    /// All regions in the order they are declared in the section.
    pub const ALL: [Region; 4] = [Region::Bios, Region::Me, Region::Gbe, Region::Pdr];
}

#[derive(
    Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(C)]
pub struct FlashRegionSection {
    pub reserved: u16,
    pub flash_block_erase_size: u16,
    pub bios_base: u16,
    pub bios_limit: u16,
    pub me_base: u16,
    pub me_limit: u16,
    pub gbe_base: u16,
    pub gbe_limit: u16,
    pub pdr_base: u16,
    pub pdr_limit: u16,
    // Not interpreted, but retained so that we can write back 1:1.
    pub tail: [u8; 16],
}

pub const REGION_SECTION_SIZE: usize = size_of::<FlashRegionSection>();

impl FlashRegionSection {
    pub fn parse(data: &[u8]) -> Result<Self, FlashError> {
        read_record(data)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Raw base and limit of a region.
    pub fn region(&self, r: Region) -> (u16, u16) {
        match r {
            Region::Bios => (self.bios_base, self.bios_limit),
            Region::Me => (self.me_base, self.me_limit),
            Region::Gbe => (self.gbe_base, self.gbe_limit),
            Region::Pdr => (self.pdr_base, self.pdr_limit),
        }
    }

    pub fn is_present(&self, r: Region) -> bool {
        self.region(r).1 != 0
    }

    /// Regions with a non-zero limit, in declaration order.
    pub fn available_regions(&self) -> Vec<Region> {
        Region::ALL
            .into_iter()
            .filter(|r| self.is_present(*r))
            .collect()
    }

    /// Byte range of a region within the image, if it is present and used.
    pub fn range(&self, r: Region) -> Option<Range<usize>> {
        let (base, limit) = self.region(r);
        if limit == 0 || base > limit {
            return None;
        }
        Some(base as usize * REGION_UNIT..(limit as usize + 1) * REGION_UNIT)
    }
}

impl Display for FlashRegionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .available_regions()
            .iter()
            .map(|r| r.to_string())
            .collect();
        writeln!(f, "  Regions: {}", names.join(","))?;
        for r in Region::ALL {
            let (b, l) = self.region(r);
            let u = match self.range(r) {
                Some(range) => format!("{:08x} - {:08x}", range.start, range.end - 1),
                None => "unused".to_string(),
            };
            writeln!(f, "  {:4} base {b:04x} limit {l:04x}: {u}", r.to_string())?;
        }
        write!(f, "  Erase block size: {:04x}", self.flash_block_erase_size)
    }
}

#[cfg(test)]
fn section(bios: (u16, u16), me: (u16, u16), gbe: (u16, u16), pdr: (u16, u16)) -> Vec<u8> {
    let words = [0, 0, bios.0, bios.1, me.0, me.1, gbe.0, gbe.1, pdr.0, pdr.1];
    let mut d: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    d.resize(REGION_SECTION_SIZE, 0xff);
    d
}

#[test]
fn available_regions_in_declaration_order() {
    let d = section((1, 5), (0, 0), (6, 3), (0, 0));
    let r = FlashRegionSection::parse(&d).unwrap();
    let names: Vec<String> = r.available_regions().iter().map(|r| r.to_string()).collect();
    assert_eq!(names, ["BIOS", "GbE"]);

    let d = section((0, 0), (1, 2), (0, 0), (3, 4));
    let r = FlashRegionSection::parse(&d).unwrap();
    assert_eq!(r.available_regions(), [Region::Me, Region::Pdr]);
}

#[test]
fn fields_are_little_endian() {
    let mut d = section((0x0201, 0x0403), (0, 0), (0, 0), (0, 0));
    d[2] = 0x10;
    let r = FlashRegionSection::parse(&d).unwrap();
    assert_eq!(r.flash_block_erase_size, 0x0010);
    assert_eq!(r.region(Region::Bios), (0x0201, 0x0403));
}

#[test]
/// We should be able to write back the original data 1:1.
fn to_vec() {
    let mut d = section((1, 0x1ff), (3, 0x100), (0x7fff, 0), (0, 0));
    d[30] = 0x42;
    let r = FlashRegionSection::parse(&d).unwrap();
    assert_eq!(r.to_vec(), d);
}

#[test]
fn ranges() {
    let d = section((0x200, 0x3ff), (3, 0x1ff), (5, 4), (0, 0));
    let r = FlashRegionSection::parse(&d).unwrap();
    assert_eq!(r.range(Region::Bios), Some(0x20_0000..0x40_0000));
    assert_eq!(r.range(Region::Me), Some(0x3000..0x20_0000));
    // base above limit means unused
    assert_eq!(r.range(Region::Gbe), None);
    assert_eq!(r.range(Region::Pdr), None);
}

#[test]
fn too_short() {
    let d = section((1, 2), (0, 0), (0, 0), (0, 0));
    let r = FlashRegionSection::parse(&d[..20]);
    assert_eq!(
        r,
        Err(FlashError::InvalidRecordSize {
            expected: REGION_SECTION_SIZE,
            got: 20
        })
    );
}
