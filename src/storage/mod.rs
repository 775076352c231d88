//-
// Copyright (c) 2020, the ocmigrate authors
//
// This file is part of ocmigrate.
//
// Ocmigrate is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Ocmigrate is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// ocmigrate. If not, see <http://www.gnu.org/licenses/>.

//! On-disk state written during export and consulted during import.
//!
//! Everything under a mailbox's export directory goes through this module:
//! the two folder identity tables (`kv`) and the per-message files (`codec`).

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub mod codec;
pub mod kv;

/// Name of the per-mailbox table mapping folder ids to well-known kinds.
pub const SYSTEM_FOLDER_DB: &str = "systemfolder.tdb";
/// Name of the per-mailbox table mapping folder ids to display names.
pub const FOLDER_MAP_DB: &str = "foldermap.tdb";

/// String-encode a folder or message identifier for use as a table key or
/// file name component.
///
/// This encoding is part of the persisted layout; import relies on it to
/// match directory names back to table keys.
pub fn id_key(id: u64) -> String {
    format!("{:#x}", id)
}

/// Parse an identifier previously encoded with `id_key`.
pub fn parse_id_key(key: &str) -> Option<u64> {
    u64::from_str_radix(key.strip_prefix("0x")?, 16).ok()
}

/// Write `data` into the file at `path`, atomically, staging within the
/// file's own directory.
pub(crate) fn write_atomic(
    path: &Path,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tf = tempfile::NamedTempFile::new_in(dir)?;
    tf.as_file_mut().write_all(data)?;
    fs::set_permissions(tf.path(), fs::Permissions::from_mode(mode))?;
    tf.as_file_mut().sync_all()?;
    tf.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_key_round_trip() {
        assert_eq!("0x1", id_key(1));
        assert_eq!("0xdeadbeef", id_key(0xdead_beef));
        assert_eq!(Some(0xdead_beef), parse_id_key("0xdeadbeef"));
        assert_eq!(None, parse_id_key("deadbeef"));
        assert_eq!(None, parse_id_key("0xzz"));
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        write_atomic(&path, 0o600, b"first").unwrap();
        write_atomic(&path, 0o600, b"second").unwrap();
        assert_eq!(b"second".to_vec(), fs::read(&path).unwrap());
    }
}
