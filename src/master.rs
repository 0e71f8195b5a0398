//! Flash Master Section
//!
//! Each master (host CPU/BIOS, ME, GbE) has an ID and a read and a write
//! mask over the regions. The mask bits changed meaning across generations
//! and are kept raw here.

use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;
use zerocopy::IntoBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{error::FlashError, read_record};

#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Master {
    #[strum(serialize = "BIOS")]
    Bios,
    #[strum(serialize = "ME")]
    Me,
    #[strum(serialize = "GbE")]
    Gbe,
}

impl Master {
    pub const ALL: [Master; 3] = [Master::Bios, Master::Me, Master::Gbe];
}

/// ID and access masks of a single master
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct Access {
    pub id: u16,
    pub read: u8,
    pub write: u8,
}

impl Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Access { id, read, write } = self;
        write!(f, "ID {id:04x}, read {read:08b}, write {write:08b}")
    }
}

#[derive(
    Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(C)]
pub struct FlashMasterSection {
    pub bios_id: u16,
    pub bios_read: u8,
    pub bios_write: u8,
    pub me_id: u16,
    pub me_read: u8,
    pub me_write: u8,
    pub gbe_id: u16,
    pub gbe_read: u8,
    pub gbe_write: u8,
}

pub const MASTER_SECTION_SIZE: usize = size_of::<FlashMasterSection>();

impl FlashMasterSection {
    pub fn parse(data: &[u8]) -> Result<Self, FlashError> {
        read_record(data)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn access(&self, m: Master) -> Access {
        let (id, read, write) = match m {
            Master::Bios => (self.bios_id, self.bios_read, self.bios_write),
            Master::Me => (self.me_id, self.me_read, self.me_write),
            Master::Gbe => (self.gbe_id, self.gbe_read, self.gbe_write),
        };
        Access { id, read, write }
    }
}

impl Display for FlashMasterSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = Master::ALL
            .iter()
            .map(|m| format!("  {:4} {}", m.to_string(), self.access(*m)))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
static MASTERS: [u8; MASTER_SECTION_SIZE] = [
    0x00, 0x00, 0x0b, 0x0a, // BIOS
    0x00, 0x00, 0x0d, 0x0c, // ME
    0x18, 0x01, 0x09, 0x08, // GbE
];

#[test]
fn parse_masters() {
    let m = FlashMasterSection::parse(&MASTERS).unwrap();
    assert_eq!(
        m.access(Master::Bios),
        Access {
            id: 0,
            read: 0x0b,
            write: 0x0a
        }
    );
    assert_eq!(m.me_read, 0x0d);
    assert_eq!(m.me_write, 0x0c);
    assert_eq!(m.gbe_id, 0x0118);
    assert_eq!(m.access(Master::Gbe).write, 0x08);
}

#[test]
/// We should be able to write back the original data 1:1.
fn to_vec() {
    let m = FlashMasterSection::parse(&MASTERS).unwrap();
    assert_eq!(m.to_vec(), MASTERS);
}

#[test]
fn too_short() {
    let r = FlashMasterSection::parse(&MASTERS[..11]);
    assert_eq!(
        r,
        Err(FlashError::InvalidRecordSize {
            expected: MASTER_SECTION_SIZE,
            got: 11
        })
    );
}
