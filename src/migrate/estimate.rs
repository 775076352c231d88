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

//! The estimate pipeline.
//!
//! Walks each mailbox's live folder hierarchy top-down, building the folder
//! tree that export will reuse and tallying every item as `seen`. Nothing
//! is written to disk.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info, warn};

use super::cancelled;
use super::counters::{Category, Phase};
use super::tree::{FolderTree, NodeIx};
use crate::backend::{FolderId, MailboxSession};
use crate::control::state::{unix_now, JobState, Mailbox, Status};
use crate::support::error::Error;

pub fn run(
    status: Arc<Status>,
    session: Arc<dyn MailboxSession>,
    cancel: Arc<AtomicBool>,
) {
    info!("Starting mailbox estimation");
    for mailbox in status.mailboxes() {
        if cancelled(&cancel) {
            info!("Estimation cancelled");
            return;
        }

        match estimate_mailbox(&*session, &mailbox, &cancel) {
            Ok(()) => mailbox.with_stats(|stats| {
                info!(
                    "Estimated mailbox {}: {}",
                    mailbox.username, stats.counters
                );
            }),
            Err(e) => {
                warn!("Estimation of {} failed: {}", mailbox.username, e);
                mailbox
                    .with_stats(|stats| stats.last_error = Some(e.to_string()));
            }
        }
    }

    if cancelled(&cancel) {
        info!("Estimation cancelled");
        return;
    }
    status.finish_job(JobState::Estimated);
    info!("Mailbox estimation complete");
}

fn estimate_mailbox(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    cancel: &AtomicBool,
) -> Result<(), Error> {
    mailbox.with_stats(|stats| {
        stats.counters.reset();
        stats.start_time = Some(unix_now());
        stats.end_time = None;
        stats.tree = None;
        stats.last_error = None;
    });

    let root = session.open_user_store(&mailbox.username)?;
    let root_name = session.folder_name(root)?;
    let mut tree = FolderTree::new(root, &root_name);
    let root_node = tree.root();
    walk(session, mailbox, &mut tree, root_node, root, cancel);

    mailbox.with_stats(|stats| {
        stats.tree = Some(tree);
        stats.end_time = Some(unix_now());
    });
    Ok(())
}

/// Visit one folder: tally its contents, discover its children, recurse.
///
/// Failures here are isolated to the folder; siblings and the rest of the
/// mailbox still get walked.
fn walk(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    tree: &mut FolderTree,
    node: NodeIx,
    parent_handle: FolderId,
    cancel: &AtomicBool,
) {
    if cancelled(cancel) {
        return;
    }

    let id = tree.node(node).id;
    let folder = match session.open_folder(parent_handle, id) {
        Ok(folder) => folder,
        Err(e) => {
            warn!(
                "{}: cannot open folder {} ({:#x}): {}",
                mailbox.username,
                tree.node(node).path,
                id,
                e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
            return;
        }
    };

    debug!("{}: estimating {}", mailbox.username, tree.node(node).path);
    mailbox.with_stats(|stats| stats.counters.record_folder(Phase::Seen));

    let class = session.container_class(folder).unwrap_or(None);
    let category = Category::from_container_class(class.as_deref());

    if cancelled(cancel) {
        return;
    }
    match session.messages(folder) {
        Ok(rows) => {
            for row in rows {
                mailbox.with_stats(|stats| {
                    stats.counters.record(Phase::Seen, category, row.size)
                });
                if row.has_attachments {
                    tally_attachments(session, mailbox, row.id);
                }
            }
        }
        Err(e) => {
            warn!(
                "{}: cannot list messages in {}: {}",
                mailbox.username,
                tree.node(node).path,
                e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
        }
    }

    match session.child_folders(folder) {
        Ok(children) => {
            for child in children {
                let child_node = tree.add_child(node, child.id, &child.name);
                walk(session, mailbox, tree, child_node, folder, cancel);
            }
        }
        Err(e) => {
            warn!(
                "{}: cannot list subfolders of {}: {}",
                mailbox.username,
                tree.node(node).path,
                e
            );
            mailbox.with_stats(|stats| stats.last_error = Some(e.to_string()));
        }
    }
}

fn tally_attachments(
    session: &dyn MailboxSession,
    mailbox: &Mailbox,
    message: crate::backend::MessageId,
) {
    match session.attachments(message) {
        Ok(attachments) => {
            for attachment in attachments {
                mailbox.with_stats(|stats| {
                    stats
                        .counters
                        .record_attachment(Phase::Seen, attachment.size)
                });
            }
        }
        Err(e) => warn!(
            "{}: cannot list attachments of {:#x}: {}",
            mailbox.username, message, e
        ),
    }
}
