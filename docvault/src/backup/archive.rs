//! Compressed single-file container bundling a snapshot's artifacts.
//!
//! The container is `DVAR | version | entry count (u32)` followed by entries of
//! `name len (u16) | name | data len (u64) | data`, all big-endian, and the
//! whole buffer is zstd-compressed.

use crate::utils::{Result, VaultError};
use std::io::Read;

const ARCHIVE_MAGIC: &[u8; 4] = b"DVAR";
const ARCHIVE_VERSION: u8 = 1;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

pub const PAYLOAD_ENTRY: &str = "payload.json";
pub const ENCRYPTED_PAYLOAD_ENTRY: &str = "payload.json.enc";
pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const TABLES_DIR: &str = "tables/";

/// Default bound on the decompressed size of a container.
pub const DEFAULT_MAX_UNPACKED: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self { name: name.into(), data }
    }
}

pub fn pack(entries: &[ArchiveEntry], level: i32) -> Result<Vec<u8>> {
    let count = u32::try_from(entries.len())
        .map_err(|_| VaultError::Archive("too many entries".into()))?;
    let mut raw = Vec::new();
    raw.extend_from_slice(ARCHIVE_MAGIC);
    raw.push(ARCHIVE_VERSION);
    raw.extend_from_slice(&count.to_be_bytes());
    for entry in entries {
        let name_len = u16::try_from(entry.name.len())
            .map_err(|_| VaultError::Archive(format!("entry name too long: {}", entry.name)))?;
        raw.extend_from_slice(&name_len.to_be_bytes());
        raw.extend_from_slice(entry.name.as_bytes());
        raw.extend_from_slice(&(entry.data.len() as u64).to_be_bytes());
        raw.extend_from_slice(&entry.data);
    }
    Ok(zstd::stream::encode_all(raw.as_slice(), level)?)
}

/// Unpack a container, refusing one that decompresses to more than `limit` bytes.
pub fn unpack(bytes: &[u8], limit: u64) -> Result<Vec<ArchiveEntry>> {
    let decoder = zstd::stream::Decoder::new(bytes)
        .map_err(|e| VaultError::Archive(format!("decompress: {e}")))?;
    let mut raw = Vec::new();
    decoder
        .take(limit.saturating_add(1))
        .read_to_end(&mut raw)
        .map_err(|e| VaultError::Archive(format!("decompress: {e}")))?;
    if raw.len() as u64 > limit {
        return Err(VaultError::Archive(format!("archive expands beyond {limit} bytes")));
    }
    let mut reader = Reader { buf: &raw, pos: 0 };

    if reader.take(4)? != ARCHIVE_MAGIC {
        return Err(VaultError::Archive("bad archive magic".into()));
    }
    let version = reader.take(1)?[0];
    if version != ARCHIVE_VERSION {
        return Err(VaultError::Archive(format!("unsupported archive version {version}")));
    }
    let count = reader.u32()?;

    let mut entries = Vec::new();
    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name = std::str::from_utf8(reader.take(name_len)?)
            .map_err(|_| VaultError::Archive("entry name is not UTF-8".into()))?
            .to_string();
        let data_len = usize::try_from(reader.u64()?)
            .map_err(|_| VaultError::Archive("entry too large".into()))?;
        let data = reader.take(data_len)?.to_vec();
        entries.push(ArchiveEntry { name, data });
    }
    Ok(entries)
}

/// Whether `bytes` start with a zstd frame.
pub fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(&ZSTD_MAGIC)
}

pub fn file_name(backup_id: &str) -> String {
    format!("docvault-{backup_id}.dva")
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| VaultError::Archive("truncated archive".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_entries() {
        let entries = vec![
            ArchiveEntry::new(PAYLOAD_ENTRY, b"{\"collections\":{}}".to_vec()),
            ArchiveEntry::new(format!("{TABLES_DIR}leads.csv"), b"id\n".to_vec()),
            ArchiveEntry::new("empty", Vec::new()),
        ];
        let packed = pack(&entries, 3).unwrap();
        assert!(is_archive(&packed));
        assert_eq!(unpack(&packed, DEFAULT_MAX_UNPACKED).unwrap(), entries);
    }

    #[test]
    fn test_expansion_beyond_limit_rejected() {
        let bomb = zstd::stream::encode_all(&vec![0u8; 4 * 1024 * 1024][..], 19).unwrap();
        assert!(bomb.len() < 4096);
        match unpack(&bomb, 1024 * 1024) {
            Err(VaultError::Archive(msg)) => assert!(msg.contains("expands beyond")),
            other => panic!("expected size error, got {other:?}"),
        }

        let entries = vec![ArchiveEntry::new(PAYLOAD_ENTRY, b"{}".to_vec())];
        let packed = pack(&entries, 3).unwrap();
        assert_eq!(unpack(&packed, 64).unwrap(), entries);
    }

    #[test]
    fn test_truncated_container_rejected() {
        let raw = b"DVAR\x01\x00\x00\x00\x02\x00\x05ab";
        let packed = zstd::stream::encode_all(&raw[..], 1).unwrap();
        assert!(matches!(unpack(&packed, DEFAULT_MAX_UNPACKED), Err(VaultError::Archive(_))));
    }

    #[test]
    fn test_foreign_data_rejected() {
        assert!(!is_archive(b"{\"collections\":{}}"));
        assert!(unpack(b"plain", DEFAULT_MAX_UNPACKED).is_err());
    }
}
