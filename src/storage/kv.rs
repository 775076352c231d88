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

//! A small persisted string-to-string table.
//!
//! Two of these live at each mailbox's export root: `foldermap.tdb` maps
//! folder ids to display names, and `systemfolder.tdb` maps folder ids to
//! well-known-folder kinds. Export opens them read-write (starting from an
//! empty table), import opens them read-only.
//!
//! The table is held in memory and flushed as one CBOR document through an
//! atomic rename, so a crashed export leaves either the previous table or
//! the new one, never a torn file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::write_atomic;
use crate::support::error::Error;

#[derive(Debug)]
pub struct KvStore {
    path: PathBuf,
    map: BTreeMap<String, String>,
    writable: bool,
}

impl KvStore {
    /// Open a fresh read-write table at `path`.
    ///
    /// Any previous table at the same path is superseded on the first
    /// `flush`; until then it is left untouched on disk.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<KvStore, Error> {
        Ok(KvStore {
            path: path.as_ref().to_owned(),
            map: BTreeMap::new(),
            writable: true,
        })
    }

    /// Open the table at `path` read-only, loading its full content.
    pub fn open_read(path: impl AsRef<Path>) -> Result<KvStore, Error> {
        let data = fs::read(path.as_ref())?;
        let map = serde_cbor::from_slice(&data)?;
        Ok(KvStore {
            path: path.as_ref().to_owned(),
            map,
            writable: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::ReadOnlyStore);
        }
        self.map.insert(key.into(), value.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Write the current table content out, atomically.
    pub fn flush(&mut self) -> Result<(), Error> {
        if !self.writable {
            return Err(Error::ReadOnlyStore);
        }
        let data = serde_cbor::to_vec(&self.map)?;
        write_atomic(&self.path, 0o600, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_flush_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foldermap.tdb");

        let mut store = KvStore::open_rw(&path).unwrap();
        store.put("0x1", "Top of Information Store").unwrap();
        store.put("0x2a", "Sent Items").unwrap();
        store.flush().unwrap();

        let store = KvStore::open_read(&path).unwrap();
        assert_eq!(2, store.len());
        assert_eq!(Some("Sent Items"), store.get("0x2a"));
        assert!(store.exists("0x1"));
        assert!(!store.exists("0x3"));
    }

    #[test]
    fn read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("systemfolder.tdb");

        let mut store = KvStore::open_rw(&path).unwrap();
        store.put("0x1", "1").unwrap();
        store.flush().unwrap();

        let mut store = KvStore::open_read(&path).unwrap();
        assert_matches!(Err(Error::ReadOnlyStore), store.put("0x2", "9"));
        assert_matches!(Err(Error::ReadOnlyStore), store.flush());
    }

    #[test]
    fn open_read_requires_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            Err(Error::Io(..)),
            KvStore::open_read(dir.path().join("missing.tdb"))
        );
    }

    #[test]
    fn rw_store_starts_empty_without_touching_old_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foldermap.tdb");

        let mut store = KvStore::open_rw(&path).unwrap();
        store.put("0x1", "Inbox").unwrap();
        store.flush().unwrap();

        let store = KvStore::open_rw(&path).unwrap();
        assert!(store.is_empty());
        // Not flushed, so the old table survives.
        drop(store);
        let store = KvStore::open_read(&path).unwrap();
        assert_eq!(Some("Inbox"), store.get("0x1"));
    }
}
