//! Flash component parameters (FLCOMP)
//!
//! A single dword of packed fields describing the flash chips and the clock
//! frequencies the controller may use with them.

use core::fmt::{self, Display};

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};

use crate::error::FlashError;

pub const PARAMS_SIZE: usize = 4;

/// SPI clock frequency as encoded in the component parameters.
///
/// Not every value is defined. The raw value is always retained.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct Frequency(u8);

impl Frequency {
    pub const M20: Self = Self(0);
    pub const M33: Self = Self(1);
    pub const M48: Self = Self(2);
    pub const M50_30: Self = Self(4);
    pub const M17: Self = Self(6);

    const fn from_bits(val: u8) -> Self {
        Self(val)
    }

    const fn into_bits(self) -> u8 {
        self.0
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("20MHz"),
            1 => Some("33MHz"),
            2 => Some("48MHz"),
            4 => Some("50MHz/30MHz"),
            6 => Some("17MHz"),
            _ => None,
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "Unknown ({})", self.0),
        }
    }
}

// byte 0: densities
// byte 1: reserved
// byte 2: read clock, fast read
// byte 3: write/erase clock, read ID/status clock, dual output fast read
#[bitfield(u32)]
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashParams {
    #[bits(4)]
    pub first_chip_density: u8,
    #[bits(4)]
    pub second_chip_density: u8,

    _r: u8,

    _r: bool,
    #[bits(3)]
    pub read_clock_frequency: Frequency,
    pub fast_read_enabled: bool,
    #[bits(3)]
    pub fast_read_frequency: Frequency,

    #[bits(3)]
    pub flash_write_frequency: Frequency,
    #[bits(3)]
    pub flash_read_status_frequency: Frequency,
    _r: bool,
    pub dual_output_fast_read_supported: bool,
}

impl FlashParams {
    /// Decode the parameters from exactly four bytes.
    pub fn parse(data: &[u8]) -> Result<Self, FlashError> {
        let Ok(raw) = <[u8; PARAMS_SIZE]>::try_from(data) else {
            return Err(FlashError::InvalidRecordSize {
                expected: PARAMS_SIZE,
                got: data.len(),
            });
        };
        Ok(Self::from_bits(u32::from_le_bytes(raw)))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.into_bits().to_le_bytes().to_vec()
    }
}

impl Display for FlashParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d1 = self.first_chip_density();
        let d2 = self.second_chip_density();
        let rcf = self.read_clock_frequency();
        let fre = self.fast_read_enabled();
        let frf = self.fast_read_frequency();
        let fwf = self.flash_write_frequency();
        let fsf = self.flash_read_status_frequency();
        let dof = self.dual_output_fast_read_supported();
        writeln!(f, "  First chip density:       {d1}")?;
        writeln!(f, "  Second chip density:      {d2}")?;
        writeln!(f, "  Read clock frequency:     {rcf}")?;
        writeln!(f, "  Fast read enabled:        {fre}")?;
        writeln!(f, "  Fast read frequency:      {frf}")?;
        writeln!(f, "  Write/erase frequency:    {fwf}")?;
        writeln!(f, "  Read status frequency:    {fsf}")?;
        write!(f, "  Dual output fast read:    {dof}")
    }
}

#[test]
fn densities() {
    let p = FlashParams::parse(&[0x53, 0, 0, 0]).unwrap();
    assert_eq!(p.first_chip_density(), 3);
    assert_eq!(p.second_chip_density(), 5);
}

#[test]
fn frequencies() {
    // read clock 33MHz, fast read on, fast read 50/30MHz
    let b2: u8 = (1 << 1) | (1 << 4) | (4 << 5);
    // write 48MHz, read status 17MHz, dual output
    let b3: u8 = 2 | (6 << 3) | (1 << 7);
    let p = FlashParams::parse(&[0, 0, b2, b3]).unwrap();
    assert_eq!(p.read_clock_frequency(), Frequency::M33);
    assert!(p.fast_read_enabled());
    assert_eq!(p.fast_read_frequency(), Frequency::M50_30);
    assert_eq!(p.flash_write_frequency(), Frequency::M48);
    assert_eq!(p.flash_read_status_frequency(), Frequency::M17);
    assert!(p.dual_output_fast_read_supported());
}

#[test]
fn unmapped_frequency_is_kept() {
    let p = FlashParams::parse(&[0, 0, 3 << 1, 0]).unwrap();
    let rcf = p.read_clock_frequency();
    assert_eq!(rcf.raw(), 3);
    assert_eq!(rcf.name(), None);
    assert_eq!(rcf.to_string(), "Unknown (3)");
    assert_eq!(p.fast_read_frequency(), Frequency::M20);
}

#[test]
/// We should be able to write back the original data 1:1, reserved bits included.
fn to_vec() {
    let raw = [0xa7, 0x5c, 0xff, 0x41];
    let p = FlashParams::parse(&raw).unwrap();
    assert_eq!(p.to_vec(), raw);
}

#[test]
fn wrong_size() {
    assert_eq!(
        FlashParams::parse(&[0, 0, 0]),
        Err(FlashError::InvalidRecordSize {
            expected: PARAMS_SIZE,
            got: 3
        })
    );
    assert!(FlashParams::parse(&[0; 5]).is_err());
}
