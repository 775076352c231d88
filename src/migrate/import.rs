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

//! The import pipeline.
//!
//! Walks the directory tree a previous export staged and recreates it on
//! the destination store. Folders recorded in `systemfolder.tdb` are
//! resolved by well-known kind on the destination; everything else is
//! created (or reopened) by the display name recorded in `foldermap.tdb`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info, warn};

use super::cancelled;
use super::counters::{Category, Phase};
use crate::backend::{FolderId, MailboxSession, WellKnownFolder};
use crate::control::state::{unix_now, JobState, Mailbox, Status};
use crate::storage::codec::{deserialize_message, is_message_file_name};
use crate::storage::kv::KvStore;
use crate::storage::{parse_id_key, FOLDER_MAP_DB, SYSTEM_FOLDER_DB};
use crate::support::error::Error;

pub fn run(
    status: Arc<Status>,
    session: Arc<dyn MailboxSession>,
    export_root: PathBuf,
    cancel: Arc<AtomicBool>,
) {
    info!("Starting mailbox import from {}", export_root.display());
    for mailbox in status.mailboxes() {
        if cancelled(&cancel) {
            info!("Import cancelled");
            return;
        }

        match import_mailbox(&*session, &mailbox, &export_root, &cancel) {
            Ok(()) => mailbox.with_stats(|stats| {
                info!(
                    "Imported mailbox {}: {}",
                    mailbox.username, stats.counters
                );
            }),
            Err(e) => {
                warn!("Import of {} failed: {}", mailbox.username, e);
                mailbox
                    .with_stats(|stats| stats.last_error = Some(e.to_string()));
            }
        }
    }

    if cancelled(&cancel) {
        info!("Import cancelled");
        return;
    }
    status.finish_job(JobState::Imported);
    info!("Mailbox import complete");
}

struct ImportMaps {
    system: KvStore,
    folders: KvStore,
}

fn import_mailbox(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    export_root: &Path,
    cancel: &AtomicBool,
) -> Result<(), Error> {
    mailbox.with_stats(|stats| {
        stats.counters.reset_imported();
        stats.start_time = Some(unix_now());
        stats.end_time = None;
        stats.last_error = None;
    });

    let mailbox_dir = export_root.join(&mailbox.username);
    let maps = ImportMaps {
        system: KvStore::open_read(mailbox_dir.join(SYSTEM_FOLDER_DB))?,
        folders: KvStore::open_read(mailbox_dir.join(FOLDER_MAP_DB))?,
    };

    let store = session.open_user_store(&mailbox.username)?;
    import_dir(session, mailbox, &maps, &mailbox_dir, store, store, cancel);

    mailbox.with_stats(|stats| stats.end_time = Some(unix_now()));
    Ok(())
}

/// Import the folder directories under `dir` into `dest_parent`.
///
/// `dir` itself has already been resolved to a destination folder (or, at
/// the top level, is the mailbox export root whose folder directories hang
/// off the store root).
fn import_dir(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    maps: &ImportMaps,
    dir: &Path,
    store: FolderId,
    dest_parent: FolderId,
    cancel: &AtomicBool,
) {
    if cancelled(cancel) {
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "{}: cannot read {}: {}",
                mailbox.username,
                dir.display(),
                e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
            return;
        }
    };

    for entry in entries {
        if cancelled(cancel) {
            return;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    "{}: error listing {}: {}",
                    mailbox.username,
                    dir.display(),
                    e
                );
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();

        if path.is_dir() {
            if parse_id_key(&name).is_none() {
                debug!("Skipping stray directory {}", path.display());
                continue;
            }
            match resolve_folder(session, maps, &name, store, dest_parent) {
                Ok(folder) => {
                    mailbox.with_stats(|stats| {
                        stats.counters.record_folder(Phase::Imported)
                    });
                    import_dir(
                        session, mailbox, maps, &path, store, folder, cancel,
                    );
                }
                Err(e) => {
                    warn!(
                        "{}: cannot resolve folder {}: {}",
                        mailbox.username, name, e
                    );
                    mailbox.with_stats(|stats| {
                        stats.last_error = Some(e.to_string())
                    });
                }
            }
        } else if is_message_file_name(&name) {
            import_message(session, mailbox, &path, dest_parent);
        }
        // Anything else (the .tdb tables, stray files) is left alone.
    }
}

/// Map one exported folder directory to a destination folder.
///
/// System folders are opened by their recorded kind; everything else is
/// created, or reopened, by recorded name under `dest_parent`.
fn resolve_folder(
    session: &dyn MailboxSession,
    maps: &ImportMaps,
    key: &str,
    store: FolderId,
    dest_parent: FolderId,
) -> Result<FolderId, Error> {
    if let Some(raw) = maps.system.get(key) {
        let kind = raw
            .parse::<u32>()
            .ok()
            .and_then(WellKnownFolder::from_raw)
            .ok_or_else(|| {
                Error::Backend(format!(
                    "unknown system folder kind {:?} for {}",
                    raw, key
                ))
            })?;
        return session.default_folder(store, kind);
    }

    let name = maps
        .folders
        .get(key)
        .ok_or_else(|| Error::Backend(format!("no recorded name for {}", key)))?;
    session.create_folder(dest_parent, name)
}

/// Recreate one exported message. Per-file failures are logged and
/// skipped; the `imported` tally only moves on success.
fn import_message(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    path: &Path,
    folder: FolderId,
) {
    let message = match deserialize_message(path) {
        Ok(message) => message,
        Err(e) => {
            warn!("{}: {}", mailbox.username, e);
            return;
        }
    };

    let category =
        Category::from_container_class(message.container_class.as_deref());
    match session.create_message(
        folder,
        &message.properties,
        &message.recipients,
    ) {
        Ok(_) => mailbox.with_stats(|stats| {
            stats
                .counters
                .record(Phase::Imported, category, message.size);
            for attachment in &message.attachments {
                stats
                    .counters
                    .record_attachment(Phase::Imported, attachment.size);
            }
        }),
        Err(e) => warn!(
            "{}: cannot import {}: {}",
            mailbox.username,
            path.display(),
            e
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryNetwork};
    use crate::backend::{ProfileRequest, SessionFactory};
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

    /// Build a populated source, run estimate and export, and return the
    /// destination backend ready for import.
    fn exported_fixture(
        network: &MemoryNetwork,
        status: &Arc<Status>,
        export_root: &Path,
    ) -> (MemoryBackend, FolderId) {
        let source = network.add_server("mail.example.com");
        let src_root = source.add_account("alice", "secret");
        let calendar = source.add_system_folder(
            src_root,
            "Calendar",
            Some("IPF.Appointment"),
            WellKnownFolder::Calendar,
        );
        let projects = source.add_folder(src_root, "Projects", None);
        source.add_message(calendar, 200, "standup");
        let m = source.add_message(projects, 1000, "plan");
        source.add_recipient(m, "bob@example.com");

        let session = session_for(network, "mail.example.com");
        status.replace_mailboxes(vec!["alice".to_owned()]);
        status.begin_operation(JobState::Estimating).unwrap();
        super::super::estimate::run(
            Arc::clone(status),
            Arc::clone(&session),
            Arc::new(AtomicBool::new(false)),
        );
        status.begin_operation(JobState::Exporting).unwrap();
        super::super::export::run(
            Arc::clone(status),
            session,
            export_root.to_owned(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(JobState::Exported, status.state());

        let dest = network.add_server("openchange.example.com");
        let dest_root = dest.add_account("alice", "secret");
        dest.add_system_folder(
            dest_root,
            "Agenda",
            Some("IPF.Appointment"),
            WellKnownFolder::Calendar,
        );
        (dest, dest_root)
    }

    #[test]
    fn imports_exported_mailbox() {
        let network = MemoryNetwork::new();
        let status = Arc::new(Status::new(&BackendConfig::default()));
        let dir = tempfile::tempdir().unwrap();
        let (dest, dest_root) =
            exported_fixture(&network, &status, dir.path());

        let session = session_for(&network, "openchange.example.com");
        status.begin_operation(JobState::Importing).unwrap();
        run(
            Arc::clone(&status),
            session,
            dir.path().to_owned(),
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(JobState::Imported, status.state());
        status.mailboxes()[0].with_stats(|stats| {
            assert!(stats.last_error.is_none(), "{:?}", stats.last_error);
            assert_eq!(1, stats.counters.email.imported.count);
            assert_eq!(1000, stats.counters.email.imported.bytes);
            assert_eq!(1, stats.counters.appointment.imported.count);
            assert_eq!(200, stats.counters.appointment.imported.bytes);
            assert_eq!(2, stats.counters.total.imported.count);
            // Root, Calendar, Projects.
            assert_eq!(3, stats.counters.folders.imported);
            // Export history is untouched by the import pass.
            assert_eq!(2, stats.counters.total.exported.count);
        });

        // The calendar item went into the existing destination calendar by
        // kind, not into a recreated folder named "Calendar".
        let agenda = dest.folder_named(dest_root, "Agenda").unwrap();
        assert_eq!(1, dest.message_count(agenda));
        assert!(dest.folder_named(dest_root, "Calendar").is_none());

        // The user folder was recreated by name.
        let projects = dest.folder_named(dest_root, "Projects").unwrap();
        assert_eq!(1, dest.message_count(projects));
    }

    #[test]
    fn import_without_export_records_error() {
        let network = MemoryNetwork::new();
        let dest = network.add_server("openchange.example.com");
        dest.add_account("alice", "secret");

        let status = Arc::new(Status::new(&BackendConfig::default()));
        status.replace_mailboxes(vec!["alice".to_owned()]);
        status.begin_operation(JobState::Importing).unwrap();
        let dir = tempfile::tempdir().unwrap();
        run(
            Arc::clone(&status),
            session_for(&network, "openchange.example.com"),
            dir.path().to_owned(),
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(JobState::Imported, status.state());
        status.mailboxes()[0]
            .with_stats(|stats| assert!(stats.last_error.is_some()));
    }
}
