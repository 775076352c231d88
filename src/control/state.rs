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

//! The shared control state.
//!
//! One `Status` exists per process. All mutation goes through its methods,
//! which serialise on an internal mutex held only for short, bounded
//! sections. The lock is never held across a walk, a store call, or a
//! thread join; STATUS must stay responsive while a multi-minute export
//! runs.
//!
//! Per-mailbox progress lives behind each `Mailbox`'s own lock so the
//! worker can tally items without touching the `Status` lock at all.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::backend::MailboxSession;
use crate::migrate::counters::Counters;
use crate::migrate::request_cancel;
use crate::migrate::tree::FolderTree;
use crate::support::error::Error;
use crate::support::system_config::BackendConfig;

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The job state machine. The numeric values appear on the wire in STATUS
/// responses.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Estimating = 1,
    Estimated = 2,
    Exporting = 3,
    Exported = 4,
    Importing = 5,
    Imported = 6,
}

impl JobState {
    /// True for the three states in which a worker thread owns the job.
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            JobState::Estimating | JobState::Exporting | JobState::Importing
        )
    }
}

/// The two sides of a migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Remote,
    Local,
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Side::Remote => "remote",
            Side::Local => "local",
        }
    }
}

/// One side's store connection. Fully replaced on every CONNECT; a failed
/// logon leaves `session` empty and `last_error` set.
struct BackendConnection {
    session: Option<Arc<dyn MailboxSession>>,
    server: Option<String>,
    last_error: Option<String>,
    debug_level: u32,
    dump_data: bool,
}

impl BackendConnection {
    fn new(config: &BackendConfig) -> Self {
        BackendConnection {
            session: None,
            server: None,
            last_error: None,
            debug_level: config.debug_level,
            dump_data: config.dump_data,
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connected: self.session.is_some(),
            server: self.server.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Mutable per-mailbox data, guarded by the `Mailbox` lock.
#[derive(Default)]
pub struct MailboxStats {
    pub counters: Counters,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub tree: Option<FolderTree>,
    pub last_error: Option<String>,
}

/// One user being migrated.
pub struct Mailbox {
    pub username: String,
    stats: Mutex<MailboxStats>,
}

impl Mailbox {
    pub fn new(username: String) -> Self {
        Mailbox {
            username,
            stats: Mutex::new(MailboxStats::default()),
        }
    }

    /// Run `f` with the stats locked. Keep `f` brief; STATUS snapshots
    /// take this lock too.
    pub fn with_stats<R>(&self, f: impl FnOnce(&mut MailboxStats) -> R) -> R {
        f(&mut self.stats.lock().unwrap())
    }

    fn snapshot(&self) -> MailboxSnapshot {
        let stats = self.stats.lock().unwrap();
        MailboxSnapshot {
            name: self.username.clone(),
            start_time: stats.start_time,
            end_time: stats.end_time,
            folder_count: stats.counters.folders.seen,
            counters: stats.counters,
            error: stats.last_error.clone(),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

struct StatusInner {
    state: JobState,
    rpc_run: bool,
    mailboxes: Vec<Arc<Mailbox>>,
    remote: BackendConnection,
    local: BackendConnection,
    worker: Option<Worker>,
    job_start: Option<i64>,
    job_end: Option<i64>,
}

impl StatusInner {
    fn connection_mut(&mut self, side: Side) -> &mut BackendConnection {
        match side {
            Side::Remote => &mut self.remote,
            Side::Local => &mut self.local,
        }
    }

    fn connection(&self, side: Side) -> &BackendConnection {
        match side {
            Side::Remote => &self.remote,
            Side::Local => &self.local,
        }
    }
}

pub struct Status {
    inner: Mutex<StatusInner>,
}

impl Status {
    pub fn new(config: &BackendConfig) -> Self {
        Status {
            inner: Mutex::new(StatusInner {
                state: JobState::Idle,
                rpc_run: true,
                mailboxes: Vec::new(),
                remote: BackendConnection::new(config),
                local: BackendConnection::new(config),
                worker: None,
                job_start: None,
                job_end: None,
            }),
        }
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().unwrap().state
    }

    pub fn rpc_run(&self) -> bool {
        self.inner.lock().unwrap().rpc_run
    }

    pub fn clear_rpc_run(&self) {
        self.inner.lock().unwrap().rpc_run = false;
    }

    /// The busy gate. Refuses if a worker currently owns the job;
    /// otherwise records the new in-progress state and the job start time.
    ///
    /// Joins the previous (necessarily finished) worker outside the lock.
    pub fn begin_operation(&self, new: JobState) -> Result<(), Error> {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.in_progress() {
                return Err(Error::OperationInProgress);
            }
            inner.state = new;
            inner.job_start = Some(unix_now());
            inner.job_end = None;
            inner.worker.take()
        };
        if let Some(worker) = previous {
            let _ = worker.handle.join();
        }
        Ok(())
    }

    /// Attach the worker spawned for the operation begun with
    /// `begin_operation`.
    pub fn store_worker(
        &self,
        handle: JoinHandle<()>,
        cancel: Arc<AtomicBool>,
    ) {
        self.inner.lock().unwrap().worker = Some(Worker { handle, cancel });
    }

    /// Worker-side: record the terminal state and job end time.
    ///
    /// Deliberately bypasses the busy gate; the worker itself is the thing
    /// that was busy.
    pub fn finish_job(&self, terminal: JobState) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = terminal;
        inner.job_end = Some(unix_now());
    }

    /// Request cancellation of the active worker, then join it.
    ///
    /// The flag is raised under the lock but the join happens outside it;
    /// the worker may need the lock to publish its last counters before it
    /// observes the flag. No-op when no worker is attached.
    pub fn cancel_operation(&self) {
        let worker = {
            let mut inner = self.inner.lock().unwrap();
            let worker = inner.worker.take();
            if let Some(ref worker) = worker {
                request_cancel(&worker.cancel);
            }
            worker
        };
        if let Some(worker) = worker {
            let _ = worker.handle.join();
        }
    }

    /// Wait for the active worker to finish without cancelling it.
    pub fn join_worker(&self) {
        let worker = self.inner.lock().unwrap().worker.take();
        if let Some(worker) = worker {
            let _ = worker.handle.join();
        }
    }

    /// Discard the job list and install fresh zero-counter mailboxes.
    pub fn replace_mailboxes(&self, usernames: Vec<String>) {
        let mailboxes = usernames
            .into_iter()
            .map(|u| Arc::new(Mailbox::new(u)))
            .collect();
        self.inner.lock().unwrap().mailboxes = mailboxes;
    }

    /// SET_USERS: replace the job list without starting a worker. Any
    /// previous estimate no longer describes the list, so the state drops
    /// back to `Idle`.
    pub fn replace_users(&self, usernames: Vec<String>) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.in_progress() {
            return Err(Error::OperationInProgress);
        }
        inner.mailboxes = usernames
            .into_iter()
            .map(|u| Arc::new(Mailbox::new(u)))
            .collect();
        inner.state = JobState::Idle;
        inner.job_start = None;
        inner.job_end = None;
        Ok(())
    }

    pub fn mailboxes(&self) -> Vec<Arc<Mailbox>> {
        self.inner.lock().unwrap().mailboxes.clone()
    }

    pub fn has_mailboxes(&self) -> bool {
        !self.inner.lock().unwrap().mailboxes.is_empty()
    }

    /// Tear down one side's connection, returning the debug settings to
    /// apply to its replacement.
    pub fn reset_connection(&self, side: Side) -> (u32, bool) {
        let mut inner = self.inner.lock().unwrap();
        let conn = inner.connection_mut(side);
        conn.session = None;
        conn.server = None;
        conn.last_error = None;
        (conn.debug_level, conn.dump_data)
    }

    pub fn record_session(
        &self,
        side: Side,
        session: Arc<dyn MailboxSession>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let conn = inner.connection_mut(side);
        conn.server = Some(session.server_name());
        conn.session = Some(session);
        conn.last_error = None;
    }

    pub fn record_connect_error(&self, side: Side, error: String) {
        let mut inner = self.inner.lock().unwrap();
        let conn = inner.connection_mut(side);
        conn.session = None;
        conn.server = None;
        conn.last_error = Some(error);
    }

    pub fn session(
        &self,
        side: Side,
    ) -> Result<Arc<dyn MailboxSession>, Error> {
        self.inner
            .lock()
            .unwrap()
            .connection(side)
            .session
            .clone()
            .ok_or(Error::NotConnected(side.name()))
    }

    /// The STATUS view: job state, connection health, per-mailbox
    /// breakdown, and job-wide totals.
    pub fn snapshot(&self) -> StatusSnapshot {
        let (state, remote, local, mailboxes, start_time, end_time) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.state,
                inner.remote.snapshot(),
                inner.local.snapshot(),
                inner.mailboxes.clone(),
                inner.job_start,
                inner.job_end,
            )
        };

        let users: Vec<MailboxSnapshot> =
            mailboxes.iter().map(|m| m.snapshot()).collect();
        let mut totals = Counters::default();
        for user in &users {
            totals.accumulate(&user.counters);
        }

        StatusSnapshot {
            state,
            remote,
            local,
            start_time,
            end_time,
            users,
            totals,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: JobState,
    pub remote: ConnectionSnapshot,
    pub local: ConnectionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub users: Vec<MailboxSnapshot>,
    pub totals: Counters,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub folder_count: u64,
    pub counters: Counters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn status() -> Status {
        Status::new(&BackendConfig::default())
    }

    #[test]
    fn busy_gate_refuses_second_operation() {
        let status = status();
        status.begin_operation(JobState::Estimating).unwrap();
        assert_matches!(
            Err(Error::OperationInProgress),
            status.begin_operation(JobState::Exporting)
        );
        assert_eq!(JobState::Estimating, status.state());

        status.finish_job(JobState::Estimated);
        status.begin_operation(JobState::Exporting).unwrap();
        assert_eq!(JobState::Exporting, status.state());
    }

    #[test]
    fn cancel_without_worker_is_a_no_op() {
        let status = status();
        status.cancel_operation();
        assert_eq!(JobState::Idle, status.state());
    }

    #[test]
    fn replace_users_gated_and_resets_state() {
        let status = status();
        status.replace_mailboxes(vec!["alice".to_owned()]);
        status.begin_operation(JobState::Estimating).unwrap();
        assert_matches!(
            Err(Error::OperationInProgress),
            status.replace_users(vec!["bob".to_owned()])
        );

        status.finish_job(JobState::Estimated);
        status.replace_users(vec!["bob".to_owned()]).unwrap();
        assert_eq!(JobState::Idle, status.state());
        let mailboxes = status.mailboxes();
        assert_eq!(1, mailboxes.len());
        assert_eq!("bob", mailboxes[0].username.as_str());
    }

    #[test]
    fn snapshot_aggregates_mailboxes() {
        use crate::migrate::counters::{Category, Phase};

        let status = status();
        status
            .replace_mailboxes(vec!["alice".to_owned(), "bob".to_owned()]);
        for mailbox in status.mailboxes() {
            mailbox.with_stats(|s| {
                s.counters.record(Phase::Seen, Category::Email, 100);
                s.counters.record_folder(Phase::Seen);
            });
        }

        let snapshot = status.snapshot();
        assert_eq!(JobState::Idle, snapshot.state);
        assert!(!snapshot.remote.connected);
        assert_eq!(2, snapshot.users.len());
        assert_eq!(1, snapshot.users[0].folder_count);
        assert_eq!(2, snapshot.totals.email.seen.count);
        assert_eq!(200, snapshot.totals.email.seen.bytes);
        assert_eq!(2, snapshot.totals.folders.seen);
    }

    #[test]
    fn cancelled_worker_leaves_in_progress_state() {
        let status = Arc::new(status());
        status.begin_operation(JobState::Exporting).unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            while !crate::migrate::cancelled(&thread_cancel) {
                std::thread::yield_now();
            }
            // Cancelled workers do not reach finish_job.
        });
        status.store_worker(handle, cancel);

        status.cancel_operation();
        assert_eq!(JobState::Exporting, status.state());
        assert_matches!(
            Err(Error::OperationInProgress),
            status.begin_operation(JobState::Estimating)
        );
    }
}
