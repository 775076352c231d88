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

//! The export pipeline.
//!
//! Re-walks the folder tree the estimate built, against the live source
//! store, and stages everything on disk: one directory per folder (named by
//! folder id), one file per message, and the two folder identity tables at
//! the mailbox's export root. Counters are reset at the start of each
//! mailbox, so `seen` reflects the state of the store at export time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info, warn};

use super::cancelled;
use super::counters::{Category, Phase};
use super::tree::{FolderTree, NodeIx};
use crate::backend::{
    FolderId, MailboxSession, MessageRow, WellKnownFolder,
};
use crate::control::state::{unix_now, JobState, Mailbox, Status};
use crate::storage::codec::{
    message_file_name, serialize_message, AttachmentEntry, MessageFile,
};
use crate::storage::kv::KvStore;
use crate::storage::{id_key, FOLDER_MAP_DB, SYSTEM_FOLDER_DB};
use crate::support::error::Error;

/// The well-known kinds export records in `systemfolder.tdb`.
///
/// Matching folders are reopened by kind on the destination instead of
/// being recreated by name. Extend as more kinds prove safe to map.
const RECORDED_KINDS: &[WellKnownFolder] = &[
    WellKnownFolder::TopInformationStore,
    WellKnownFolder::Calendar,
    WellKnownFolder::Contacts,
];

pub fn run(
    status: Arc<Status>,
    session: Arc<dyn MailboxSession>,
    export_root: PathBuf,
    cancel: Arc<AtomicBool>,
) {
    info!("Starting mailbox export to {}", export_root.display());
    for mailbox in status.mailboxes() {
        if cancelled(&cancel) {
            info!("Export cancelled");
            return;
        }

        match export_mailbox(&*session, &mailbox, &export_root, &cancel) {
            Ok(()) => mailbox.with_stats(|stats| {
                info!(
                    "Exported mailbox {}: {}",
                    mailbox.username, stats.counters
                );
            }),
            Err(e) => {
                warn!("Export of {} failed: {}", mailbox.username, e);
                mailbox
                    .with_stats(|stats| stats.last_error = Some(e.to_string()));
            }
        }
    }

    if cancelled(&cancel) {
        info!("Export cancelled");
        return;
    }
    status.finish_job(JobState::Exported);
    info!("Mailbox export complete");
}

struct ExportMaps {
    system: KvStore,
    folders: KvStore,
}

fn export_mailbox(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    export_root: &Path,
    cancel: &AtomicBool,
) -> Result<(), Error> {
    let tree = mailbox
        .with_stats(|stats| stats.tree.clone())
        .ok_or(Error::NoFolderTree)?;
    mailbox.with_stats(|stats| {
        stats.counters.reset();
        stats.start_time = Some(unix_now());
        stats.end_time = None;
        stats.last_error = None;
    });

    let mailbox_dir = export_root.join(&mailbox.username);
    create_export_directory(&mailbox_dir)?;
    let mut maps = ExportMaps {
        system: KvStore::open_rw(mailbox_dir.join(SYSTEM_FOLDER_DB))?,
        folders: KvStore::open_rw(mailbox_dir.join(FOLDER_MAP_DB))?,
    };

    let store = session.open_user_store(&mailbox.username)?;
    walk(
        session,
        mailbox,
        &tree,
        tree.root(),
        store,
        &mailbox_dir,
        &mut maps,
        cancel,
    );

    maps.system.flush()?;
    maps.folders.flush()?;
    mailbox.with_stats(|stats| stats.end_time = Some(unix_now()));
    Ok(())
}

/// Create the per-mailbox export directory, renaming any previous export
/// aside with a timestamp suffix rather than destroying it.
fn create_export_directory(path: &Path) -> Result<(), Error> {
    match fs::metadata(path) {
        Ok(md) if md.is_dir() => {
            let backup = PathBuf::from(format!(
                "{}-{}",
                path.display(),
                chrono::Local::now().format("%Y%m%d%H%M%S")
            ));
            info!(
                "Moving previous export {} to {}",
                path.display(),
                backup.display()
            );
            fs::rename(path, &backup)?;
        }
        Ok(_) => {
            return Err(Error::ExportPathNotDir(path.display().to_string()))
        }
        Err(ref e) if io::ErrorKind::NotFound == e.kind() => (),
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(path)?;
    Ok(())
}

fn walk(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    tree: &FolderTree,
    node: NodeIx,
    parent_handle: FolderId,
    parent_dir: &Path,
    maps: &mut ExportMaps,
    cancel: &AtomicBool,
) {
    if cancelled(cancel) {
        return;
    }

    let folder_node = tree.node(node);
    let folder = match session.open_folder(parent_handle, folder_node.id) {
        Ok(folder) => folder,
        Err(e) => {
            warn!(
                "{}: cannot open folder {} ({:#x}): {}",
                mailbox.username, folder_node.path, folder_node.id, e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
            return;
        }
    };

    debug!("{}: exporting {}", mailbox.username, folder_node.path);
    mailbox.with_stats(|stats| stats.counters.record_folder(Phase::Seen));

    let key = id_key(folder_node.id);
    if let Some(kind) = session
        .well_known_kind(folder)
        .filter(|k| RECORDED_KINDS.contains(k))
    {
        if let Err(e) = maps.system.put(&key, (kind as u32).to_string()) {
            warn!("{}: cannot record system folder: {}", mailbox.username, e);
        }
    }
    if let Err(e) = maps.folders.put(&key, &folder_node.name) {
        warn!("{}: cannot record folder name: {}", mailbox.username, e);
    }

    let folder_dir = parent_dir.join(&key);
    if let Err(e) = fs::create_dir_all(&folder_dir) {
        warn!(
            "{}: cannot create {}: {}",
            mailbox.username,
            folder_dir.display(),
            e
        );
        mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
        return;
    }
    mailbox.with_stats(|stats| stats.counters.record_folder(Phase::Exported));

    let class = session.container_class(folder).unwrap_or(None);
    let category = Category::from_container_class(class.as_deref());

    if cancelled(cancel) {
        return;
    }
    match session.messages(folder) {
        Ok(rows) => {
            for row in rows {
                if cancelled(cancel) {
                    return;
                }
                export_message(
                    session,
                    mailbox,
                    folder_node.id,
                    &class,
                    category,
                    row,
                    &folder_dir,
                );
            }
        }
        Err(e) => {
            warn!(
                "{}: cannot list messages in {}: {}",
                mailbox.username, folder_node.path, e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
        }
    }

    for child in tree.children(node) {
        walk(
            session, mailbox, tree, child, folder, &folder_dir, maps, cancel,
        );
    }
}

/// Serialize one message. A failure is logged and the `exported` tally is
/// simply not bumped; one corrupt message must not sink the folder.
fn export_message(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    folder_id: u64,
    class: &Option<String>,
    category: Category,
    row: MessageRow,
    folder_dir: &Path,
) {
    mailbox.with_stats(|stats| {
        stats.counters.record(Phase::Seen, category, row.size)
    });

    let attachments = if row.has_attachments {
        match session.attachments(row.id) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "{}: cannot list attachments of {:#x}: {}",
                    mailbox.username, row.id, e
                );
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    for attachment in &attachments {
        mailbox.with_stats(|stats| {
            stats
                .counters
                .record_attachment(Phase::Seen, attachment.size)
        });
    }

    let properties = match session.message_properties(row.id) {
        Ok(properties) => properties,
        Err(e) => {
            warn!(
                "{}: cannot read properties of {:#x}: {}",
                mailbox.username, row.id, e
            );
            return;
        }
    };
    // Recipients are best effort; not every store exposes a recipient
    // table for every item class.
    let recipients = session.message_recipients(row.id).unwrap_or_default();

    let message = MessageFile {
        folder_id,
        container_class: class.clone(),
        size: row.size,
        recipients,
        attachments: attachments
            .iter()
            .map(|a| AttachmentEntry {
                name: a.filename.clone(),
                size: a.size,
            })
            .collect(),
        properties,
    };

    let path = folder_dir.join(message_file_name(row.id));
    match serialize_message(&path, &message) {
        Ok(()) => mailbox.with_stats(|stats| {
            stats.counters.record(Phase::Exported, category, row.size);
            for attachment in &attachments {
                stats
                    .counters
                    .record_attachment(Phase::Exported, attachment.size);
            }
        }),
        Err(e) => warn!(
            "{}: cannot write {}: {}",
            mailbox.username,
            path.display(),
            e
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::memory::MemoryNetwork;
    use crate::backend::{ProfileRequest, SessionFactory};
    use crate::storage::codec::deserialize_message;
    use crate::support::system_config::BackendConfig;

    fn session_for(
        network: &MemoryNetwork,
        address: &str,
    ) -> Arc<dyn MailboxSession> {
        network
            .connect(&ProfileRequest {
                profile_name: "p".to_owned(),
                username: "alice".to_owned(),
                password: "secret".to_owned(),
                address: address.to_owned(),
                workstation: "test".to_owned(),
                debug_level: 0,
                dump_data: false,
            })
            .unwrap()
    }

    fn estimate_then_export(
        network: &MemoryNetwork,
        status: &Arc<Status>,
        export_root: &Path,
    ) {
        let session = session_for(network, "mail.example.com");
        status.begin_operation(JobState::Estimating).unwrap();
        super::super::estimate::run(
            Arc::clone(status),
            Arc::clone(&session),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(JobState::Estimated, status.state());

        status.begin_operation(JobState::Exporting).unwrap();
        run(
            Arc::clone(status),
            session,
            export_root.to_owned(),
            Arc::new(AtomicBool::new(false)),
        );
    }

    #[test]
    fn exports_single_note_message() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        let root = server.add_account("alice", "secret");
        let notes = server.add_folder(root, "Notes", Some("IPF.Note"));
        let m = server.add_message(notes, 1024, "hello");

        let status = Arc::new(Status::new(&BackendConfig::default()));
        status.replace_mailboxes(vec!["alice".to_owned()]);
        let dir = tempfile::tempdir().unwrap();
        estimate_then_export(&network, &status, dir.path());

        assert_eq!(JobState::Exported, status.state());
        let mailbox = &status.mailboxes()[0];
        mailbox.with_stats(|stats| {
            assert_eq!(1, stats.counters.email.seen.count);
            assert_eq!(1024, stats.counters.email.seen.bytes);
            assert_eq!(1, stats.counters.email.exported.count);
            assert_eq!(1024, stats.counters.email.exported.bytes);
            assert_eq!(0, stats.counters.attachment.exported.count);
            assert_eq!(2, stats.counters.folders.seen);
            assert_eq!(2, stats.counters.folders.exported);
        });

        // Layout: <root>/alice/0x<rootid>/0x<notesid>/0x<mid>.msg plus the
        // two tables at the mailbox root.
        let mailbox_dir = dir.path().join("alice");
        assert!(mailbox_dir.join(SYSTEM_FOLDER_DB).is_file());
        assert!(mailbox_dir.join(FOLDER_MAP_DB).is_file());
        let message_path = mailbox_dir
            .join(id_key(root))
            .join(id_key(notes))
            .join(message_file_name(m));
        let message = deserialize_message(&message_path).unwrap();
        assert_eq!(1024, message.size);
        assert_eq!(Some("IPF.Note".to_owned()), message.container_class);
        assert_eq!(notes, message.folder_id);
    }

    #[test]
    fn records_folder_maps() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        let root = server.add_account("alice", "secret");
        let calendar = server.add_system_folder(
            root,
            "Calendar",
            Some("IPF.Appointment"),
            WellKnownFolder::Calendar,
        );
        let projects = server.add_folder(root, "Projects", None);

        let status = Arc::new(Status::new(&BackendConfig::default()));
        status.replace_mailboxes(vec!["alice".to_owned()]);
        let dir = tempfile::tempdir().unwrap();
        estimate_then_export(&network, &status, dir.path());

        let mailbox_dir = dir.path().join("alice");
        let system =
            KvStore::open_read(mailbox_dir.join(SYSTEM_FOLDER_DB)).unwrap();
        let folders =
            KvStore::open_read(mailbox_dir.join(FOLDER_MAP_DB)).unwrap();

        assert_eq!(
            Some((WellKnownFolder::TopInformationStore as u32)
                .to_string()
                .as_str()),
            system.get(&id_key(root))
        );
        assert_eq!(
            Some((WellKnownFolder::Calendar as u32).to_string().as_str()),
            system.get(&id_key(calendar))
        );
        assert!(!system.exists(&id_key(projects)));

        // Every folder, system or not, lands in the name map.
        assert_eq!(Some("Calendar"), folders.get(&id_key(calendar)));
        assert_eq!(Some("Projects"), folders.get(&id_key(projects)));
        assert_eq!(3, folders.len());
    }

    #[test]
    fn export_without_estimate_records_error() {
        let network = MemoryNetwork::new();
        let server = network.add_server("mail.example.com");
        server.add_account("alice", "secret");

        let status = Arc::new(Status::new(&BackendConfig::default()));
        status.replace_mailboxes(vec!["alice".to_owned()]);
        status.begin_operation(JobState::Exporting).unwrap();
        let dir = tempfile::tempdir().unwrap();
        run(
            Arc::clone(&status),
            session_for(&network, "mail.example.com"),
            dir.path().to_owned(),
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(JobState::Exported, status.state());
        status.mailboxes()[0].with_stats(|stats| {
            assert!(stats
                .last_error
                .as_ref()
                .unwrap()
                .contains("No folder tree"));
        });
    }

    #[test]
    fn old_export_directory_is_rotated_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice");
        fs::create_dir_all(path.join("old")).unwrap();

        create_export_directory(&path).unwrap();
        assert!(path.is_dir());
        assert!(!path.join("old").exists());
        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name().to_string_lossy().starts_with("alice-")
            })
            .count();
        assert_eq!(1, rotated);
    }

    #[test]
    fn plain_file_in_the_way_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice");
        fs::write(&path, b"junk").unwrap();
        assert_matches!(
            Err(Error::ExportPathNotDir(..)),
            create_export_directory(&path)
        );
    }
}
