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

//! An in-memory mailbox store.
//!
//! `MemoryNetwork` plays the role of the world: it routes a connection
//! profile to the `MemoryBackend` registered under the profile's server
//! address and checks credentials there. Tests build source and destination
//! stores through the builder methods on `MemoryBackend`; the `memory`
//! backend kind in the daemon configuration starts with an empty network.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::*;
use crate::storage::codec::{PropertySet, PropertyValue};
use crate::support::error::Error;

struct Account {
    password: String,
    store_root: FolderId,
}

struct MemFolder {
    name: String,
    parent: Option<FolderId>,
    container_class: Option<String>,
    kind: Option<WellKnownFolder>,
    children: Vec<FolderId>,
    messages: Vec<MessageId>,
}

struct MemMessage {
    size: u64,
    properties: PropertySet,
    recipients: Vec<String>,
    attachments: Vec<AttachmentRow>,
}

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<String, Account>,
    gal: Vec<GalEntry>,
    folders: BTreeMap<FolderId, MemFolder>,
    messages: BTreeMap<MessageId, MemMessage>,
    next_id: u64,
}

impl Inner {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn folder(&self, id: FolderId) -> Result<&MemFolder, Error> {
        self.folders.get(&id).ok_or(Error::FolderNotFound(id))
    }

    fn message(&self, id: MessageId) -> Result<&MemMessage, Error> {
        self.messages.get(&id).ok_or(Error::MessageNotFound(id))
    }
}

/// One simulated mailbox server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBackend {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        MemoryBackend {
            name: name.to_owned(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Create an account and its store root, returning the root folder id.
    pub fn add_account(&self, username: &str, password: &str) -> FolderId {
        let mut inner = self.inner.lock().unwrap();
        let root = inner.alloc_id();
        inner.folders.insert(
            root,
            MemFolder {
                name: "Top of Information Store".to_owned(),
                parent: None,
                container_class: None,
                kind: Some(WellKnownFolder::TopInformationStore),
                children: Vec::new(),
                messages: Vec::new(),
            },
        );
        inner.accounts.insert(
            username.to_owned(),
            Account {
                password: password.to_owned(),
                store_root: root,
            },
        );
        root
    }

    pub fn add_folder(
        &self,
        parent: FolderId,
        name: &str,
        container_class: Option<&str>,
    ) -> FolderId {
        self.insert_folder(parent, name, container_class, None)
    }

    pub fn add_system_folder(
        &self,
        parent: FolderId,
        name: &str,
        container_class: Option<&str>,
        kind: WellKnownFolder,
    ) -> FolderId {
        self.insert_folder(parent, name, container_class, Some(kind))
    }

    fn insert_folder(
        &self,
        parent: FolderId,
        name: &str,
        container_class: Option<&str>,
        kind: Option<WellKnownFolder>,
    ) -> FolderId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc_id();
        inner.folders.insert(
            id,
            MemFolder {
                name: name.to_owned(),
                parent: Some(parent),
                container_class: container_class.map(str::to_owned),
                kind,
                children: Vec::new(),
                messages: Vec::new(),
            },
        );
        inner
            .folders
            .get_mut(&parent)
            .expect("parent folder missing")
            .children
            .push(id);
        id
    }

    pub fn add_message(
        &self,
        folder: FolderId,
        size: u64,
        subject: &str,
    ) -> MessageId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.alloc_id();
        let mut properties = PropertySet::new();
        properties.insert(
            "PidTagSubject".to_owned(),
            PropertyValue::Str(subject.to_owned()),
        );
        properties.insert(
            "PidTagMessageSize".to_owned(),
            PropertyValue::Int(size as i64),
        );
        inner.messages.insert(
            id,
            MemMessage {
                size,
                properties,
                recipients: Vec::new(),
                attachments: Vec::new(),
            },
        );
        inner
            .folders
            .get_mut(&folder)
            .expect("folder missing")
            .messages
            .push(id);
        id
    }

    pub fn add_recipient(&self, message: MessageId, recipient: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .get_mut(&message)
            .expect("message missing")
            .recipients
            .push(recipient.to_owned());
    }

    pub fn add_attachment(
        &self,
        message: MessageId,
        filename: Option<&str>,
        size: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .messages
            .get_mut(&message)
            .expect("message missing")
            .attachments
            .push(AttachmentRow {
                filename: filename.map(str::to_owned),
                size,
            });
    }

    pub fn add_gal_entry(
        &self,
        name: &str,
        email: &str,
        account: &str,
        address_type: &str,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.gal.push(GalEntry {
            name: name.to_owned(),
            email: email.to_owned(),
            account: account.to_owned(),
            address_type: address_type.to_owned(),
        });
    }

    /// Test helper: the child of `parent` named `name`, if any.
    pub fn folder_named(
        &self,
        parent: FolderId,
        name: &str,
    ) -> Option<FolderId> {
        let inner = self.inner.lock().unwrap();
        inner
            .folders
            .get(&parent)?
            .children
            .iter()
            .copied()
            .find(|c| inner.folders[c].name == name)
    }

    /// Test helper: how many messages `folder` holds.
    pub fn message_count(&self, folder: FolderId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .folders
            .get(&folder)
            .map(|f| f.messages.len())
            .unwrap_or(0)
    }

    fn open_session(
        &self,
        profile: &ProfileRequest,
    ) -> Result<Arc<dyn MailboxSession>, Error> {
        {
            let inner = self.inner.lock().unwrap();
            let account =
                inner.accounts.get(&profile.username).ok_or_else(|| {
                    Error::Logon(format!("no such user: {}", profile.username))
                })?;
            if account.password != profile.password {
                return Err(Error::Logon(format!(
                    "invalid password for {}",
                    profile.username
                )));
            }
        }
        Ok(Arc::new(MemorySession {
            server: self.name.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Routes connection profiles to registered `MemoryBackend` servers.
pub struct MemoryNetwork {
    servers: Mutex<BTreeMap<String, MemoryBackend>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork {
            servers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a server under `address` and return a handle to populate it.
    pub fn add_server(&self, address: &str) -> MemoryBackend {
        let backend = MemoryBackend::new(address);
        self.servers
            .lock()
            .unwrap()
            .insert(address.to_owned(), backend.clone());
        backend
    }
}

impl SessionFactory for MemoryNetwork {
    fn connect(
        &self,
        profile: &ProfileRequest,
    ) -> Result<Arc<dyn MailboxSession>, Error> {
        let backend = self
            .servers
            .lock()
            .unwrap()
            .get(&profile.address)
            .cloned()
            .ok_or_else(|| {
                Error::Backend(format!(
                    "no route to server: {}",
                    profile.address
                ))
            })?;
        backend.open_session(profile)
    }
}

struct MemorySession {
    server: String,
    inner: Arc<Mutex<Inner>>,
}

impl MailboxSession for MemorySession {
    fn server_name(&self) -> String {
        self.server.clone()
    }

    fn open_user_store(&self, username: &str) -> Result<FolderId, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(username)
            .map(|a| a.store_root)
            .ok_or_else(|| Error::UserNotFound(username.to_owned()))
    }

    fn default_folder(
        &self,
        store: FolderId,
        kind: WellKnownFolder,
    ) -> Result<FolderId, Error> {
        let inner = self.inner.lock().unwrap();
        let mut queue = vec![store];
        while let Some(id) = queue.pop() {
            let folder = inner.folder(id)?;
            if Some(kind) == folder.kind {
                return Ok(id);
            }
            queue.extend(&folder.children);
        }
        Err(Error::Backend(format!(
            "store {:#x} has no {:?} folder",
            store, kind
        )))
    }

    fn well_known_kind(&self, folder: FolderId) -> Option<WellKnownFolder> {
        let inner = self.inner.lock().unwrap();
        inner.folders.get(&folder).and_then(|f| f.kind)
    }

    fn open_folder(
        &self,
        parent: FolderId,
        id: FolderId,
    ) -> Result<FolderId, Error> {
        let inner = self.inner.lock().unwrap();
        let folder = inner.folder(id)?;
        if id == parent || Some(parent) == folder.parent {
            Ok(id)
        } else {
            Err(Error::FolderNotFound(id))
        }
    }

    fn folder_name(&self, folder: FolderId) -> Result<String, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.folder(folder)?.name.clone())
    }

    fn container_class(
        &self,
        folder: FolderId,
    ) -> Result<Option<String>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.folder(folder)?.container_class.clone())
    }

    fn child_folders(
        &self,
        folder: FolderId,
    ) -> Result<Vec<FolderRow>, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .folder(folder)?
            .children
            .iter()
            .map(|&id| {
                let child = inner.folder(id)?;
                let message_size = child
                    .messages
                    .iter()
                    .filter_map(|m| inner.messages.get(m))
                    .map(|m| m.size)
                    .sum();
                Ok(FolderRow {
                    id,
                    name: child.name.clone(),
                    container_class: child.container_class.clone(),
                    child_count: child.children.len() as u64,
                    content_count: child.messages.len() as u64,
                    message_size,
                })
            })
            .collect()
    }

    fn messages(&self, folder: FolderId) -> Result<Vec<MessageRow>, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .folder(folder)?
            .messages
            .iter()
            .map(|&id| {
                let message = inner.message(id)?;
                Ok(MessageRow {
                    id,
                    size: message.size,
                    has_attachments: !message.attachments.is_empty(),
                })
            })
            .collect()
    }

    fn attachments(
        &self,
        message: MessageId,
    ) -> Result<Vec<AttachmentRow>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.message(message)?.attachments.clone())
    }

    fn message_properties(
        &self,
        message: MessageId,
    ) -> Result<PropertySet, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.message(message)?.properties.clone())
    }

    fn message_recipients(
        &self,
        message: MessageId,
    ) -> Result<Vec<String>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.message(message)?.recipients.clone())
    }

    fn create_folder(
        &self,
        parent: FolderId,
        name: &str,
    ) -> Result<FolderId, Error> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner
            .folder(parent)?
            .children
            .iter()
            .copied()
            .find(|c| inner.folders[c].name == name);
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = inner.alloc_id();
        inner.folders.insert(
            id,
            MemFolder {
                name: name.to_owned(),
                parent: Some(parent),
                container_class: None,
                kind: None,
                children: Vec::new(),
                messages: Vec::new(),
            },
        );
        inner
            .folders
            .get_mut(&parent)
            .ok_or(Error::FolderNotFound(parent))?
            .children
            .push(id);
        Ok(id)
    }

    fn create_message(
        &self,
        folder: FolderId,
        properties: &PropertySet,
        recipients: &[String],
    ) -> Result<MessageId, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.folder(folder)?;
        let size = match properties.get("PidTagMessageSize") {
            Some(&PropertyValue::Int(v)) if v >= 0 => v as u64,
            _ => 0,
        };
        let id = inner.alloc_id();
        inner.messages.insert(
            id,
            MemMessage {
                size,
                properties: properties.clone(),
                recipients: recipients.to_vec(),
                attachments: Vec::new(),
            },
        );
        inner
            .folders
            .get_mut(&folder)
            .ok_or(Error::FolderNotFound(folder))?
            .messages
            .push(id);
        Ok(id)
    }

    fn gal_count(&self) -> Result<usize, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.gal.len())
    }

    fn gal(&self) -> Result<Box<dyn GalPager>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(Box::new(MemoryGalPager {
            entries: inner.gal.clone(),
            pos: 0,
        }))
    }
}

struct MemoryGalPager {
    entries: Vec<GalEntry>,
    pos: usize,
}

impl GalPager for MemoryGalPager {
    fn next_page(&mut self, count: usize) -> Result<Vec<GalEntry>, Error> {
        let end = (self.pos + count).min(self.entries.len());
        let page = self.entries[self.pos..end].to_vec();
        self.pos = end;
        Ok(page)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn profile(username: &str, password: &str, address: &str) -> ProfileRequest {
        ProfileRequest {
            profile_name: "test_profile".to_owned(),
            username: username.to_owned(),
            password: password.to_owned(),
            address: address.to_owned(),
            workstation: "testhost".to_owned(),
            debug_level: 0,
            dump_data: false,
        }
    }

    #[test]
    fn logon_and_routing() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        server.add_account("alice", "secret");

        assert_matches!(
            Err(Error::Backend(..)),
            network.connect(&profile("alice", "secret", "other.example.com"))
        );
        assert_matches!(
            Err(Error::Logon(..)),
            network.connect(&profile("alice", "wrong", "mail.example.com"))
        );
        assert_matches!(
            Err(Error::Logon(..)),
            network.connect(&profile("bob", "secret", "mail.example.com"))
        );

        let session = network
            .connect(&profile("alice", "secret", "mail.example.com"))
            .unwrap();
        assert_eq!("mail.example.com", session.server_name());
        let root = session.open_user_store("alice").unwrap();
        assert_eq!(
            Some(WellKnownFolder::TopInformationStore),
            session.well_known_kind(root)
        );
    }

    #[test]
    fn hierarchy_and_content_tables() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        let root = server.add_account("alice", "secret");
        let inbox = server.add_system_folder(
            root,
            "Inbox",
            Some("IPF.Note"),
            WellKnownFolder::Inbox,
        );
        let m = server.add_message(inbox, 2048, "hello");
        server.add_attachment(m, Some("a.txt"), 17);

        let session = network
            .connect(&profile("alice", "secret", "mail.example.com"))
            .unwrap();

        let rows = session.child_folders(root).unwrap();
        assert_eq!(1, rows.len());
        assert_eq!("Inbox", rows[0].name);
        assert_eq!(Some("IPF.Note".to_owned()), rows[0].container_class);
        assert_eq!(1, rows[0].content_count);
        assert_eq!(2048, rows[0].message_size);

        let messages = session.messages(inbox).unwrap();
        assert_eq!(1, messages.len());
        assert!(messages[0].has_attachments);
        assert_eq!(2048, messages[0].size);
        assert_eq!(1, session.attachments(m).unwrap().len());
    }

    #[test]
    fn create_folder_opens_existing() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        let root = server.add_account("alice", "secret");
        let session = network
            .connect(&profile("alice", "secret", "mail.example.com"))
            .unwrap();

        let a = session.create_folder(root, "Projects").unwrap();
        let b = session.create_folder(root, "Projects").unwrap();
        assert_eq!(a, b);
        assert_eq!(1, session.child_folders(root).unwrap().len());
    }

    #[test]
    fn default_folder_lookup() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        let root = server.add_account("alice", "secret");
        let calendar = server.add_system_folder(
            root,
            "Calendar",
            Some("IPF.Appointment"),
            WellKnownFolder::Calendar,
        );
        let session = network
            .connect(&profile("alice", "secret", "mail.example.com"))
            .unwrap();

        assert_eq!(
            root,
            session
                .default_folder(root, WellKnownFolder::TopInformationStore)
                .unwrap()
        );
        assert_eq!(
            calendar,
            session.default_folder(root, WellKnownFolder::Calendar).unwrap()
        );
        assert_matches!(
            Err(Error::Backend(..)),
            session.default_folder(root, WellKnownFolder::Tasks)
        );
    }
}
