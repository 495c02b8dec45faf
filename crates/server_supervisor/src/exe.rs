//! Rewrites the subsystem field of a Windows PE executable.
//!
//! The dedicated server ships as a GUI-subsystem binary; switching it to
//! the console subsystem makes it write its output to inherited pipes.

use crate::error::{Result, ServerError};
use std::path::Path;
use tracing::info;

const PE_POINTER_OFFSET: usize = 0x3c;
const PE_SIGNATURE: u32 = 0x4550;
const SUBSYSTEM_OFFSET: usize = 0x5c;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Windows = 2,
    Console = 3,
}

/// Patches `bytes` in place.
pub fn patch_subsystem_bytes(bytes: &mut [u8], subsystem: Subsystem) -> std::result::Result<(), String> {
    let pointer = bytes
        .get(PE_POINTER_OFFSET..PE_POINTER_OFFSET + 2)
        .ok_or("file too short for a DOS header")?;
    let pe_offset = u16::from_le_bytes([pointer[0], pointer[1]]) as usize;

    let signature = bytes
        .get(pe_offset..pe_offset + 4)
        .ok_or("PE header offset is out of range")?;
    let signature = u32::from_le_bytes([signature[0], signature[1], signature[2], signature[3]]);
    if signature != PE_SIGNATURE {
        return Err("PE signature not found".to_string());
    }

    let field = bytes
        .get_mut(pe_offset + SUBSYSTEM_OFFSET)
        .ok_or("optional header is truncated")?;
    *field = subsystem as u8;
    Ok(())
}

/// Patches the executable at `path`, writing a modified copy next to it
/// and renaming it over the original.
pub async fn patch_subsystem(path: &Path, subsystem: Subsystem) -> Result<()> {
    let mut bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ServerError::io(path, e))?;

    patch_subsystem_bytes(&mut bytes, subsystem).map_err(|reason| ServerError::InvalidExecutable {
        path: path.to_path_buf(),
        reason,
    })?;

    let mut staging = path.as_os_str().to_os_string();
    staging.push(".modified");
    let staging = std::path::PathBuf::from(staging);

    tokio::fs::write(&staging, &bytes)
        .await
        .map_err(|e| ServerError::io(&staging, e))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|e| ServerError::io(path, e))?;

    info!("Set {} to the {:?} subsystem", path.display(), subsystem);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_pe() -> Vec<u8> {
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = b'M';
        bytes[1] = b'Z';
        bytes[PE_POINTER_OFFSET..PE_POINTER_OFFSET + 2].copy_from_slice(&0x80u16.to_le_bytes());
        bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
        bytes[0x80 + SUBSYSTEM_OFFSET] = Subsystem::Windows as u8;
        bytes
    }

    #[test]
    fn test_patch_sets_console_subsystem() {
        let mut bytes = fake_pe();
        patch_subsystem_bytes(&mut bytes, Subsystem::Console).unwrap();
        assert_eq!(bytes[0x80 + SUBSYSTEM_OFFSET], 3);
    }

    #[test]
    fn test_patch_rejects_non_pe_files() {
        let mut bytes = vec![0u8; 0x100];
        assert!(patch_subsystem_bytes(&mut bytes, Subsystem::Console).is_err());
        assert!(patch_subsystem_bytes(&mut [0u8; 4], Subsystem::Console).is_err());
    }

    #[tokio::test]
    async fn test_patch_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cs2.exe");
        std::fs::write(&path, fake_pe()).unwrap();

        patch_subsystem(&path, Subsystem::Console).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap()[0x80 + SUBSYSTEM_OFFSET], 3);
        assert!(!dir.path().join("cs2.exe.modified").exists());
    }
}
