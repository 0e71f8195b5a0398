#![doc = include_str!("../README.md")]

use core::fmt::{self, Debug, Display};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;

pub mod bios;
pub mod error;
pub mod fv;
pub mod guid;
pub mod ifd;
pub mod master;
pub mod params;
pub mod region;

use bios::BiosRegion;
use error::FlashError;
use ifd::{DESCRIPTOR_MAP_SIZE, FlashDescriptorMap, locate_descriptor_signature};
use master::{FlashMasterSection, MASTER_SECTION_SIZE};
use params::{FlashParams, PARAMS_SIZE};
use region::{FlashRegionSection, REGION_SECTION_SIZE, Region};

/// Read a fixed-size record from the start of a slice.
pub(crate) fn read_record<T: FromBytes>(data: &[u8]) -> Result<T, FlashError> {
    match T::read_from_prefix(data) {
        Ok((r, _)) => Ok(r),
        Err(_) => Err(FlashError::InvalidRecordSize {
            expected: size_of::<T>(),
            got: data.len(),
        }),
    }
}

/// Get the window of `size` bytes at `start`, or tell why there is none.
fn window<'a>(
    data: &'a [u8],
    start: usize,
    size: usize,
    what: &str,
) -> Result<&'a [u8], FlashError> {
    match data.get(start..start + size) {
        Some(w) => Ok(w),
        None => Err(FlashError::ImageTooSmall(format!(
            "{what} @ {start:08x} needs {size} bytes, image size is {:08x}",
            data.len()
        ))),
    }
}

/// A full flash image in descriptor mode
#[derive(Serialize, Deserialize, Clone)]
pub struct FlashImage {
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
    pub descriptor_map_start: usize,
    pub component_start: usize,
    pub region_start: usize,
    pub master_start: usize,
    pub descriptor_map: FlashDescriptorMap,
    /// Missing if the component section lies outside of the image
    pub params: Option<FlashParams>,
    pub region: FlashRegionSection,
    pub master: FlashMasterSection,
    pub bios: Option<BiosRegion>,
}

impl FlashImage {
    pub fn parse(data: &[u8]) -> Result<Self, FlashError> {
        let l = data.len();
        if l < DESCRIPTOR_MAP_SIZE {
            return Err(FlashError::ImageTooSmall(format!(
                "got {l} bytes, a descriptor map alone takes {DESCRIPTOR_MAP_SIZE}"
            )));
        }
        let Some(descriptor_map_start) = locate_descriptor_signature(data) else {
            return Err(FlashError::SignatureNotFound);
        };

        let d = window(data, descriptor_map_start, DESCRIPTOR_MAP_SIZE, "descriptor map")?;
        let descriptor_map = FlashDescriptorMap::parse(d)?;

        let component_start = descriptor_map.component_offset();
        let params = match window(data, component_start, PARAMS_SIZE, "component section") {
            Ok(d) => Some(FlashParams::parse(d)?),
            Err(e) => {
                warn!("{e}");
                None
            }
        };

        let region_start = descriptor_map.region_offset();
        let d = window(data, region_start, REGION_SECTION_SIZE, "region section")?;
        let region = FlashRegionSection::parse(d)?;

        let master_start = descriptor_map.master_offset();
        let d = window(data, master_start, MASTER_SECTION_SIZE, "master section")?;
        let master = FlashMasterSection::parse(d)?;

        let bios = match region.range(Region::Bios) {
            Some(r) if r.start < l => {
                info!("BIOS region @ {:08x}", r.start);
                let end = r.end.min(l);
                Some(BiosRegion::parse(&data[r.start..end], r.start)?)
            }
            Some(r) => {
                warn!("BIOS region @ {:08x} out of bounds, only got {l:08x}", r.start);
                None
            }
            None => {
                if region.is_present(Region::Bios) {
                    let (b, li) = region.region(Region::Bios);
                    warn!("BIOS region base {b:04x} above limit {li:04x}, not scanning");
                }
                None
            }
        };

        Ok(Self {
            data: data.to_vec(),
            descriptor_map_start,
            component_start,
            region_start,
            master_start,
            descriptor_map,
            params,
            region,
            master,
            bios,
        })
    }

    /// Newer (PCH) images reserve 16 bytes before the signature.
    pub fn is_pch(&self) -> bool {
        self.descriptor_map_start == 20
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Run a set of checks on the image and return a list of what is wrong.
    /// None of these prevent decoding.
    pub fn validate(&self) -> Vec<FlashError> {
        let mut issues = Vec::new();
        if locate_descriptor_signature(&self.data).is_none() {
            issues.push(FlashError::SignatureNotFound);
        }
        issues.extend(self.descriptor_map.validate());
        if self.params.is_none() {
            let c = self.component_start;
            if let Err(e) = window(&self.data, c, PARAMS_SIZE, "component section") {
                issues.push(e);
            }
        }
        let l = self.data.len();
        for r in self.region.available_regions() {
            let Some(range) = self.region.range(r) else {
                let (b, li) = self.region.region(r);
                issues.push(FlashError::InvalidRegion(format!(
                    "{r} base {b:04x} above limit {li:04x}"
                )));
                continue;
            };
            if range.end > l {
                let (s, e) = (range.start, range.end);
                issues.push(FlashError::RegionOutOfBounds(format!(
                    "{r} @ {s:08x}..{e:08x}, image size is {l:08x}"
                )));
            }
        }
        if let Some(bios) = &self.bios {
            issues.extend(bios.validate());
        }
        issues
    }
}

/// Parse a flash image and validate it in one go.
pub fn decode(data: &[u8]) -> Result<(FlashImage, Vec<FlashError>), FlashError> {
    let image = FlashImage::parse(data)?;
    let issues = image.validate();
    Ok((image, issues))
}

impl Debug for FlashImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashImage")
            .field("size", &self.data.len())
            .field("descriptor_map_start", &self.descriptor_map_start)
            .field("component_start", &self.component_start)
            .field("region_start", &self.region_start)
            .field("master_start", &self.master_start)
            .field("descriptor_map", &self.descriptor_map)
            .field("params", &self.params)
            .field("region", &self.region)
            .field("master", &self.master)
            .field("bios", &self.bios)
            .finish()
    }
}

impl Display for FlashImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.data.len();
        let layout = if self.is_pch() { "PCH" } else { "ICH" };
        let dm = self.descriptor_map_start;
        writeln!(f, "Flash image of 0x{s:08x} bytes, {layout} layout, map @ {dm:08x}")?;
        writeln!(f, "== Descriptor Map ==")?;
        writeln!(f, "{}", self.descriptor_map)?;
        writeln!(f, "== Components @ {:08x} ==", self.component_start)?;
        match &self.params {
            Some(p) => writeln!(f, "{p}")?,
            None => writeln!(f, "(outside of the image)")?,
        }
        writeln!(f, "== Regions @ {:08x} ==", self.region_start)?;
        writeln!(f, "{}", self.region)?;
        writeln!(f, "== Masters @ {:08x} ==", self.master_start)?;
        write!(f, "{}", self.master)
    }
}

#[cfg(test)]
const IMAGE_SIZE: usize = 0x3000;

/// A minimal image with two firmware volumes in a BIOS region of 8 KiB.
#[cfg(test)]
fn fake_image(pch: bool) -> Vec<u8> {
    let mut d = vec![0xff; IMAGE_SIZE];
    let sig = if pch { 16 } else { 0 };
    d[sig..sig + 4].copy_from_slice(&ifd::SIGNATURE);
    let mut map = [0u8; DESCRIPTOR_MAP_SIZE];
    map[0] = 0x03; // components @ 0x30
    map[2] = 0x04; // regions @ 0x40
    map[4] = 0x07; // masters @ 0x70
    d[sig + 4..sig + 4 + DESCRIPTOR_MAP_SIZE].copy_from_slice(&map);
    d[0x30..0x34].copy_from_slice(&[0x11, 0x00, 0x02, 0x00]);
    let words: [u16; 10] = [0, 0, 1, 2, 0, 0, 0, 0, 0, 0];
    for (i, w) in words.iter().enumerate() {
        let o = 0x40 + 2 * i;
        d[o..o + 2].copy_from_slice(&w.to_le_bytes());
    }
    d[0x70..0x7c].copy_from_slice(&[
        0x00, 0x00, 0x0b, 0x0a, 0x00, 0x00, 0x0d, 0x0c, 0x18, 0x01, 0x09, 0x08,
    ]);
    for o in [0x1000, 0x2000] {
        let v = fv::fake_volume(0x1000, &[(1, 0x1000)], true);
        d[o..o + v.len()].copy_from_slice(&v);
    }
    d
}

#[test]
fn parse_pch_image() {
    let d = fake_image(true);
    let img = FlashImage::parse(&d).unwrap();
    assert!(img.is_pch());
    assert_eq!(img.descriptor_map_start, 20);
    assert_eq!(img.component_start, 0x30);
    assert_eq!(img.region_start, 0x40);
    assert_eq!(img.master_start, 0x70);
    let p = img.params.as_ref().unwrap();
    assert_eq!(p.read_clock_frequency(), params::Frequency::M33);
    assert_eq!(img.region.available_regions(), [Region::Bios]);
    assert_eq!(img.master.gbe_id, 0x0118);
    assert_eq!(img.data(), &d[..]);

    let bios = img.bios.as_ref().unwrap();
    assert_eq!(bios.base, 0x1000);
    let offsets: Vec<usize> = bios.volumes.iter().map(|v| v.offset).collect();
    assert_eq!(offsets, [0, 0x1000]);
    assert!(img.validate().is_empty());
}

#[test]
fn parse_ich_image() {
    let d = fake_image(false);
    let img = FlashImage::parse(&d).unwrap();
    assert!(!img.is_pch());
    assert_eq!(img.descriptor_map_start, 4);
    assert_eq!(img.region_start, 0x40);
}

#[test]
fn too_small() {
    let r = FlashImage::parse(&[0u8; 10]);
    assert!(matches!(r, Err(FlashError::ImageTooSmall(_))));
}

#[test]
fn no_signature() {
    let r = FlashImage::parse(&[0u8; 0x100]);
    assert_eq!(r.unwrap_err(), FlashError::SignatureNotFound);
}

#[test]
fn section_beyond_image() {
    let d = fake_image(true);
    // the master section no longer fits
    let r = FlashImage::parse(&d[..0x78]);
    assert!(matches!(r, Err(FlashError::ImageTooSmall(m)) if m.starts_with("master section")));
}

#[test]
fn no_bios_region() {
    let mut d = fake_image(true);
    // BIOS limit 0
    d[0x46..0x48].copy_from_slice(&[0, 0]);
    let img = FlashImage::parse(&d).unwrap();
    assert!(img.bios.is_none());
    assert!(img.region.available_regions().is_empty());
}

#[test]
fn validation_issues() {
    let mut d = fake_image(true);
    // master base 0xe1 is beyond the permitted maximum
    d[24] = 0xe1;
    // BIOS limit 5 reaches beyond the image
    d[0x46..0x48].copy_from_slice(&5u16.to_le_bytes());
    let (img, issues) = decode(&d).unwrap();
    assert_eq!(img.master_start, 0xe10);
    assert_eq!(issues.len(), 2);
    assert!(matches!(&issues[0], FlashError::InvalidBaseAddr(m) if m.starts_with("MasterBase")));
    assert!(matches!(&issues[1], FlashError::RegionOutOfBounds(m) if m.starts_with("BIOS")));
    // the part of the BIOS region we have is still scanned
    assert_eq!(img.bios.map(|b| b.volumes.len()), Some(2));
}

#[test]
fn truncated_volume_fails_image() {
    let mut d = fake_image(true);
    // replace the terminator of the second volume and everything after it
    let o = 0x2000 + fv::HEADER_SIZE + fv::BLOCK_SIZE;
    d[o..].fill(0x01);
    let r = FlashImage::parse(&d);
    assert!(matches!(r, Err(FlashError::TruncatedData(_))));
}

#[test]
fn component_section_beyond_image() {
    let mut d = fake_image(true);
    // components @ 0x200, past the end of what is left
    d[20] = 0x20;
    let (img, issues) = decode(&d[..0x100]).unwrap();
    assert!(img.params.is_none());
    assert_eq!(img.region_start, 0x40);
    assert_eq!(img.master.gbe_id, 0x0118);
    assert_eq!(issues.len(), 2);
    assert!(matches!(&issues[0], FlashError::ImageTooSmall(m) if m.starts_with("component section @ 00000200")));
    // the BIOS region of the full image is gone as well
    assert!(matches!(&issues[1], FlashError::RegionOutOfBounds(m) if m.starts_with("BIOS")));
}

#[test]
fn bios_base_above_limit() {
    let mut d = fake_image(true);
    d[0x44..0x46].copy_from_slice(&3u16.to_le_bytes());
    d[0x46..0x48].copy_from_slice(&2u16.to_le_bytes());
    let (img, issues) = decode(&d).unwrap();
    assert_eq!(img.region.available_regions(), [Region::Bios]);
    assert!(img.bios.is_none());
    assert_eq!(issues.len(), 1);
    assert!(matches!(&issues[0], FlashError::InvalidRegion(m) if m.starts_with("BIOS")));
}

#[test]
fn bios_region_starts_beyond_image() {
    let mut d = fake_image(true);
    // 0x3000..0x6000, the image ends at 0x3000
    d[0x44..0x46].copy_from_slice(&3u16.to_le_bytes());
    d[0x46..0x48].copy_from_slice(&5u16.to_le_bytes());
    let (img, issues) = decode(&d).unwrap();
    assert!(img.bios.is_none());
    assert_eq!(issues.len(), 1);
    assert!(matches!(&issues[0], FlashError::RegionOutOfBounds(m) if m.starts_with("BIOS @ 00003000")));
}
