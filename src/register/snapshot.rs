// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-handshake project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register file snapshots
//!
//! A snapshot is a flat sequence of `(addr: u16, value: u16)` pairs, both
//! little-endian, one pair per non-zero cell. Files are written to a temporary
//! file in the same directory and renamed into place, so a crash while saving
//! leaves either the previous snapshot or the new one, never a mix.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, info};

use super::RegisterStore;

/// Serialise every non-zero cell of `cells`.
pub fn encode(cells: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (addr, value) in cells.iter().enumerate() {
        if *value != 0 {
            bytes.extend_from_slice(&(addr as u16).to_le_bytes());
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

/// Parse a snapshot into `(addr, value)` pairs.
pub fn decode(bytes: &[u8]) -> Result<Vec<(u16, u16)>> {
    if bytes.len() % 4 != 0 {
        bail!(
            "Snapshot length {} is not a whole number of address/value pairs",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|pair| {
            (
                u16::from_le_bytes([pair[0], pair[1]]),
                u16::from_le_bytes([pair[2], pair[3]]),
            )
        })
        .collect())
}

/// Write the current content of `store` to `path`.
pub fn save(store: &RegisterStore, path: &Path) -> Result<()> {
    let cells = store.snapshot()?;
    let bytes = encode(&cells);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary snapshot in {:?}", dir))?;
    file.write_all(&bytes)
        .context("Failed to write register snapshot")?;
    file.as_file()
        .sync_all()
        .context("Failed to flush register snapshot")?;
    file.persist(path)
        .with_context(|| format!("Failed to move snapshot into place at {:?}", path))?;

    debug!("Saved {} non-zero registers to {:?}", bytes.len() / 4, path);
    Ok(())
}

/// Restore the cells listed in the snapshot at `path` into `store`.
///
/// The snapshot is validated as a whole before anything is written: a file
/// with a truncated pair or an address beyond the store is rejected.
/// Returns the number of restored cells.
pub fn restore(store: &RegisterStore, path: &Path) -> Result<usize> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read register snapshot {:?}", path))?;
    let pairs = decode(&bytes)?;

    if let Some((addr, _)) = pairs.iter().find(|(addr, _)| *addr > store.max_address()) {
        bail!(
            "Snapshot cell {} is beyond maximum address {}",
            addr,
            store.max_address()
        );
    }

    for (addr, value) in &pairs {
        store.write(*addr, *value)?;
    }
    info!("Restored {} registers from {:?}", pairs.len(), path);
    Ok(pairs.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_little_endian_pairs() {
        let mut cells = vec![0u16; 600];
        cells[1] = 0x0102;
        cells[500] = 0xA0B0;
        assert_eq!(
            encode(&cells),
            vec![0x01, 0x00, 0x02, 0x01, 0xF4, 0x01, 0xB0, 0xA0]
        );
    }

    #[test]
    fn test_truncated_snapshot_is_rejected() {
        assert!(decode(&[1, 0, 2]).is_err());
        assert_eq!(decode(&[]).unwrap(), vec![]);
    }

    #[test]
    fn test_save_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers.snap");

        let source = RegisterStore::new(999);
        source.write_many(400, &[9, 1234, 0, 7]).unwrap();
        save(&source, &path).unwrap();

        let target = RegisterStore::new(999);
        assert_eq!(restore(&target, &path).unwrap(), 3);
        assert_eq!(target.read(400, 4).unwrap(), vec![9, 1234, 0, 7]);
    }

    #[test]
    fn test_restore_rejects_addresses_beyond_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registers.snap");
        std::fs::write(&path, encode(&{
            let mut cells = vec![0u16; 2000];
            cells[10] = 1;
            cells[1500] = 2;
            cells
        }))
        .unwrap();

        let target = RegisterStore::new(999);
        assert!(restore(&target, &path).is_err());
        assert_eq!(target.read_one(10).unwrap(), 0);
    }
}
