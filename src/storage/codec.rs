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

//! Serialisation of a single exported message to a file.
//!
//! Export writes one file per message, named `0x<mid>.msg`, into the export
//! directory of the folder holding the message. Import reads the file back
//! and recreates the message on the destination store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::write_atomic;
use crate::support::error::Error;

/// A message property value.
///
/// The variants cover the property types the migration actually moves;
/// anything more exotic is up to the store backend to render as one of
/// these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    /// Unix timestamp, seconds.
    Time(i64),
}

pub type PropertySet = BTreeMap<String, PropertyValue>;

/// The persisted form of one exported message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageFile {
    /// Source folder the message was exported from.
    pub folder_id: u64,
    /// Container class of the source folder, used to classify the item
    /// again at import time.
    pub container_class: Option<String>,
    /// Size of the message on the source store, in bytes.
    pub size: u64,
    /// Best-effort recipient list; may be empty.
    pub recipients: Vec<String>,
    /// Attachments, as (file name, byte size) pairs.
    pub attachments: Vec<AttachmentEntry>,
    pub properties: PropertySet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentEntry {
    pub name: Option<String>,
    pub size: u64,
}

/// File name under which a message with id `mid` is exported.
pub fn message_file_name(mid: u64) -> String {
    format!("{:#x}.msg", mid)
}

/// True if `name` looks like a file written by `serialize_message`.
pub fn is_message_file_name(name: &str) -> bool {
    name.starts_with("0x") && name.ends_with(".msg")
}

pub fn serialize_message(
    path: &Path,
    message: &MessageFile,
) -> Result<(), Error> {
    let data = serde_cbor::to_vec(message)?;
    write_atomic(path, 0o600, &data)?;
    Ok(())
}

pub fn deserialize_message(path: &Path) -> Result<MessageFile, Error> {
    let data = fs::read(path)?;
    serde_cbor::from_slice(&data).map_err(|e| {
        Error::BadMessageFile(format!("{}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn message_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(message_file_name(0x4001));

        let mut properties = PropertySet::new();
        properties.insert(
            "PidTagSubject".to_owned(),
            PropertyValue::Str("Quarterly numbers".to_owned()),
        );
        properties
            .insert("PidTagMessageSize".to_owned(), PropertyValue::Int(1024));
        let message = MessageFile {
            folder_id: 0x2001,
            container_class: Some("IPF.Note".to_owned()),
            size: 1024,
            recipients: vec!["bob@example.com".to_owned()],
            attachments: vec![AttachmentEntry {
                name: Some("numbers.ods".to_owned()),
                size: 512,
            }],
            properties,
        };

        serialize_message(&path, &message).unwrap();
        assert_eq!(message, deserialize_message(&path).unwrap());
    }

    #[test]
    fn garbage_file_is_reported_as_bad_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0x1.msg");
        fs::write(&path, b"not cbor at all").unwrap();
        assert_matches!(
            Err(Error::BadMessageFile(..)),
            deserialize_message(&path)
        );
    }

    #[test]
    fn message_file_names() {
        assert_eq!("0x4001.msg", message_file_name(0x4001));
        assert!(is_message_file_name("0x4001.msg"));
        assert!(!is_message_file_name("foldermap.tdb"));
        assert!(!is_message_file_name("4001.msg"));
    }
}
