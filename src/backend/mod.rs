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

//! The seam between the migration pipelines and the mailbox stores.
//!
//! The daemon never talks a store wire protocol itself. CONNECT hands a
//! credential profile to a `SessionFactory`; everything after that goes
//! through the resulting `MailboxSession`, which exposes exactly the
//! operations the walks need. The `memory` module provides the in-tree
//! implementation used by the test suite and the `memory` backend kind.

use std::sync::Arc;

use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::storage::codec::PropertySet;
use crate::support::error::Error;

pub mod memory;

pub type FolderId = u64;
pub type MessageId = u64;

/// The well-known mailbox folders, with their conventional Outlook
/// discriminants.
///
/// The numeric values are persisted in `systemfolder.tdb`, so they are part
/// of the on-disk contract and must not be renumbered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr,
)]
#[repr(u32)]
pub enum WellKnownFolder {
    TopInformationStore = 1,
    DeletedItems = 3,
    Outbox = 4,
    SentMail = 5,
    Inbox = 6,
    Calendar = 9,
    Contacts = 10,
    Journal = 11,
    Notes = 12,
    Tasks = 13,
}

impl WellKnownFolder {
    pub fn from_raw(raw: u32) -> Option<Self> {
        use self::WellKnownFolder::*;
        match raw {
            1 => Some(TopInformationStore),
            3 => Some(DeletedItems),
            4 => Some(Outbox),
            5 => Some(SentMail),
            6 => Some(Inbox),
            9 => Some(Calendar),
            10 => Some(Contacts),
            11 => Some(Journal),
            12 => Some(Notes),
            13 => Some(Tasks),
            _ => None,
        }
    }
}

/// The credential profile CONNECT passes to a factory.
///
/// `profile_name` is freshly generated per logon attempt and never reused;
/// backends that materialise profiles on disk may key temporary state on it.
#[derive(Clone, Debug)]
pub struct ProfileRequest {
    pub profile_name: String,
    pub username: String,
    pub password: String,
    pub address: String,
    pub workstation: String,
    pub debug_level: u32,
    pub dump_data: bool,
}

/// One row of a folder's child-folder table.
#[derive(Clone, Debug, Default)]
pub struct FolderRow {
    pub id: FolderId,
    pub name: String,
    pub container_class: Option<String>,
    pub child_count: u64,
    pub content_count: u64,
    pub message_size: u64,
}

/// One row of a folder's content table.
#[derive(Clone, Copy, Debug)]
pub struct MessageRow {
    pub id: MessageId,
    pub size: u64,
    pub has_attachments: bool,
}

#[derive(Clone, Debug)]
pub struct AttachmentRow {
    pub filename: Option<String>,
    pub size: u64,
}

/// One entry of the global address list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalEntry {
    pub name: String,
    pub email: String,
    pub account: String,
    pub address_type: String,
}

/// A paging cursor over the global address list.
pub trait GalPager: Send {
    /// Fetch up to `count` further entries; a short page means the list is
    /// exhausted.
    fn next_page(&mut self, count: usize) -> Result<Vec<GalEntry>, Error>;
}

/// An authenticated session against one mailbox store.
///
/// Folder and message handles are plain ids scoped to this session.
pub trait MailboxSession: Send + Sync {
    /// The name of the server this session is bound to, for reporting.
    fn server_name(&self) -> String;

    /// Open `username`'s store and return its root folder.
    fn open_user_store(&self, username: &str) -> Result<FolderId, Error>;

    /// Resolve a well-known folder within the store rooted at `store`.
    fn default_folder(
        &self,
        store: FolderId,
        kind: WellKnownFolder,
    ) -> Result<FolderId, Error>;

    /// The well-known classification of `folder`, if it has one.
    fn well_known_kind(&self, folder: FolderId) -> Option<WellKnownFolder>;

    /// Open the folder `id` under `parent`. Opening a store root under
    /// itself is allowed.
    fn open_folder(
        &self,
        parent: FolderId,
        id: FolderId,
    ) -> Result<FolderId, Error>;

    fn folder_name(&self, folder: FolderId) -> Result<String, Error>;

    fn container_class(
        &self,
        folder: FolderId,
    ) -> Result<Option<String>, Error>;

    fn child_folders(
        &self,
        folder: FolderId,
    ) -> Result<Vec<FolderRow>, Error>;

    fn messages(&self, folder: FolderId) -> Result<Vec<MessageRow>, Error>;

    fn attachments(
        &self,
        message: MessageId,
    ) -> Result<Vec<AttachmentRow>, Error>;

    fn message_properties(
        &self,
        message: MessageId,
    ) -> Result<PropertySet, Error>;

    /// Best effort; stores without a recipient table return an empty list.
    fn message_recipients(
        &self,
        message: MessageId,
    ) -> Result<Vec<String>, Error>;

    /// Create a child folder named `name` under `parent`, or open it if a
    /// folder of that name already exists.
    fn create_folder(
        &self,
        parent: FolderId,
        name: &str,
    ) -> Result<FolderId, Error>;

    fn create_message(
        &self,
        folder: FolderId,
        properties: &PropertySet,
        recipients: &[String],
    ) -> Result<MessageId, Error>;

    /// Total number of entries in the global address list.
    fn gal_count(&self) -> Result<usize, Error>;

    fn gal(&self) -> Result<Box<dyn GalPager>, Error>;
}

impl std::fmt::Debug for dyn MailboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxSession")
            .field("server", &self.server_name())
            .finish()
    }
}

/// Opens sessions from credential profiles. One factory serves every server
/// address; CONNECT calls it once per side.
pub trait SessionFactory: Send + Sync {
    fn connect(
        &self,
        profile: &ProfileRequest,
    ) -> Result<Arc<dyn MailboxSession>, Error>;
}
