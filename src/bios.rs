//! BIOS region
//!
//! The BIOS region holds a sequence of firmware volumes, possibly with gaps
//! between them. We scan for one volume after the other, skipping over each
//! volume found as a whole, so that nested volumes are not picked up.

use core::fmt::{self, Display};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::FlashError,
    fv::{FirmwareVolume, find_fv_offset},
};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BiosRegion {
    /// Offset of the region within the image
    pub base: usize,
    pub volumes: Vec<FirmwareVolume>,
}

impl BiosRegion {
    /// Find all firmware volumes in the given data, in order.
    /// Offsets of the volumes are relative to the start of `data`, which is
    /// expected to sit at `base` within the image.
    pub fn parse(data: &[u8], base: usize) -> Result<Self, FlashError> {
        let mut volumes = Vec::new();
        let mut cursor = 0;
        while cursor < data.len() {
            let Some(o) = find_fv_offset(&data[cursor..]) else {
                break;
            };
            let offset = cursor + o;
            let fv = FirmwareVolume::parse(&data[offset..], offset)?;
            // A bogus length must neither send us backwards nor keep us in
            // place, so skip at least what we have just decoded.
            let consumed = fv.size().max(fv.header_size());
            cursor = offset.saturating_add(consumed);
            volumes.push(fv);
        }
        debug!("Found {} firmware volume(s) @ {base:08x}", volumes.len());
        Ok(Self { base, volumes })
    }

    pub fn validate(&self) -> Vec<FlashError> {
        self.volumes.iter().flat_map(|fv| fv.validate()).collect()
    }
}

impl Display for BiosRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.volumes.len();
        let b = self.base;
        write!(f, "{n} firmware volume(s) in region @ {b:08x}")?;
        for fv in &self.volumes {
            write!(f, "\n{fv}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
use crate::fv::{FV_MAGIC_BYTES, fake_volume};

#[cfg(test)]
fn padded_volume(length: usize, blocks: &[(u32, u32)]) -> Vec<u8> {
    let mut d = fake_volume(length as u64, blocks, true);
    d.resize(length, 0xff);
    d
}

#[test]
fn empty_region() {
    let br = BiosRegion::parse(&[0xff; 0x1000], 0).unwrap();
    assert!(br.volumes.is_empty());
    let br = BiosRegion::parse(&[0u8; 0], 0).unwrap();
    assert!(br.volumes.is_empty());
}

#[test]
fn two_consecutive_volumes() {
    let mut d = padded_volume(0x2000, &[(2, 0x1000)]);
    d.extend_from_slice(&padded_volume(0x1000, &[(1, 0x1000)]));
    let br = BiosRegion::parse(&d, 0).unwrap();
    assert_eq!(br.volumes.len(), 2);
    assert_eq!(br.volumes[0].offset, 0);
    assert_eq!(br.volumes[0].size(), 0x2000);
    assert_eq!(br.volumes[1].offset, 0x2000);
    assert_eq!(br.volumes[1].size(), 0x1000);
    assert!(br.validate().is_empty());
}

#[test]
fn volumes_with_gaps() {
    let mut d = vec![0xff; 0x100];
    d.extend_from_slice(&padded_volume(0x1000, &[(1, 0x1000)]));
    d.extend_from_slice(&[0xff; 0x800]);
    d.extend_from_slice(&padded_volume(0x1000, &[(1, 0x1000)]));
    d.extend_from_slice(&[0xff; 0x100]);
    let br = BiosRegion::parse(&d, 0).unwrap();
    let offsets: Vec<usize> = br.volumes.iter().map(|fv| fv.offset).collect();
    assert_eq!(offsets, [0x100, 0x1900]);
}

#[test]
/// A volume nested within another one is skipped along with its parent.
fn nested_volume_is_skipped() {
    let mut d = padded_volume(0x2000, &[(2, 0x1000)]);
    let inner = fake_volume(0x100, &[(1, 0x100)], true);
    d[0x800..0x800 + inner.len()].copy_from_slice(&inner);
    let br = BiosRegion::parse(&d, 0).unwrap();
    assert_eq!(br.volumes.len(), 1);
}

#[test]
/// Even with a zero length, the scan has to make progress.
fn zero_length_volumes_terminate() {
    let mut d = fake_volume(0, &[(1, 0x100)], true);
    d.resize(0x48, 0xff);
    d.extend_from_slice(&fake_volume(0, &[(1, 0x100)], true));
    d.resize(0x200, 0xff);
    let br = BiosRegion::parse(&d, 0).unwrap();
    assert_eq!(br.volumes.len(), 2);
    assert_eq!(br.volumes[1].offset, 0x48);
    assert_eq!(br.validate().len(), 2);
}

#[test]
fn huge_length_ends_scan() {
    let mut d = padded_volume(0x1000, &[(1, 0x1000)]);
    d[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
    d.extend_from_slice(&padded_volume(0x1000, &[(1, 0x1000)]));
    let br = BiosRegion::parse(&d, 0).unwrap();
    assert_eq!(br.volumes.len(), 1);
}

#[test]
fn truncated_volume_aborts_scan() {
    let mut d = padded_volume(0x1000, &[(1, 0x1000)]);
    // second volume cut off in its block map
    let second = fake_volume(0x1000, &[(1, 0x1000)], true);
    d.extend_from_slice(&second[..second.len() - 4]);
    let r = BiosRegion::parse(&d, 0);
    assert!(matches!(r, Err(FlashError::TruncatedData(_))));
}

#[test]
fn signature_only_is_too_small() {
    let mut d = vec![0u8; 0x38];
    d[0x28..0x2c].copy_from_slice(FV_MAGIC_BYTES);
    let r = BiosRegion::parse(&d, 0);
    assert!(matches!(r, Err(FlashError::ImageTooSmall(_))));
}
