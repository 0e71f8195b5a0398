//! GUIDs as found in firmware volume headers, and the well-known file system
//! GUIDs from the UEFI PI specification and EDK2.

use core::fmt::{self, Display};

use phf::phf_map;
use serde::{Deserialize, Serialize};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

/// A GUID in its on-flash (mixed-endian) representation.
#[derive(
    Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
#[repr(C)]
pub struct Guid(pub [u8; 16]);

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        let d1 = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let d2 = u16::from_le_bytes([b[4], b[5]]);
        let d3 = u16::from_le_bytes([b[6], b[7]]);
        write!(f, "{d1:08X}-{d2:04X}-{d3:04X}-{:02X}{:02X}-", b[8], b[9])?;
        for x in &b[10..] {
            write!(f, "{x:02X}")?;
        }
        Ok(())
    }
}

// Keyed by the on-flash bytes
static FILE_SYSTEMS: phf::Map<&'static [u8], &'static str> = phf_map! {
    // 7A9354D9-0468-444A-81CE-0BF617D890DF
    b"\xd9\x54\x93\x7a\x68\x04\x4a\x44\x81\xce\x0b\xf6\x17\xd8\x90\xdf" => "FFSv1",
    // 8C8CE578-8A3D-4F1C-9935-896185C32DD3
    b"\x78\xe5\x8c\x8c\x3d\x8a\x1c\x4f\x99\x35\x89\x61\x85\xc3\x2d\xd3" => "FFSv2",
    // 5473C07A-3DCB-4DCA-BD6F-1E9689E7349A
    b"\x7a\xc0\x73\x54\xcb\x3d\xca\x4d\xbd\x6f\x1e\x96\x89\xe7\x34\x9a" => "FFSv3",
    // FFF12B8D-7696-4C8B-A985-2747075B4F50
    b"\x8d\x2b\xf1\xff\x96\x76\x8b\x4c\xa9\x85\x27\x47\x07\x5b\x4f\x50" => "NVRAM",
    // AD3FFFFF-D28B-44C4-9F13-9EA98A97F9F0
    b"\xff\xff\x3f\xad\x8b\xd2\xc4\x44\x9f\x13\x9e\xa9\x8a\x97\xf9\xf0" => "Intel FS",
};

impl Guid {
    /// Short name of a known firmware volume file system.
    pub fn file_system_name(&self) -> Option<&'static str> {
        FILE_SYSTEMS.get(self.0.as_slice()).copied()
    }
}

#[cfg(test)]
pub(crate) const FFS2: Guid = Guid([
    0x78, 0xe5, 0x8c, 0x8c, 0x3d, 0x8a, 0x1c, 0x4f, 0x99, 0x35, 0x89, 0x61, 0x85, 0xc3, 0x2d, 0xd3,
]);

#[test]
fn display() {
    assert_eq!(FFS2.to_string(), "8C8CE578-8A3D-4F1C-9935-896185C32DD3");
}

#[test]
fn known_file_systems() {
    assert_eq!(FFS2.file_system_name(), Some("FFSv2"));
    assert_eq!(Guid([0xff; 16]).file_system_name(), None);
}

#[test]
fn file_system_keys_match_text_form() {
    let names = [
        ("7A9354D9-0468-444A-81CE-0BF617D890DF", "FFSv1"),
        ("5473C07A-3DCB-4DCA-BD6F-1E9689E7349A", "FFSv3"),
        ("FFF12B8D-7696-4C8B-A985-2747075B4F50", "NVRAM"),
        ("AD3FFFFF-D28B-44C4-9F13-9EA98A97F9F0", "Intel FS"),
    ];
    for (k, v) in FILE_SYSTEMS.entries() {
        let mut b = [0u8; 16];
        b.copy_from_slice(k);
        let g = Guid(b);
        if let Some((t, _)) = names.iter().find(|(_, n)| n == v) {
            assert_eq!(g.to_string(), *t);
        }
        assert_eq!(g.file_system_name(), Some(*v));
    }
}
