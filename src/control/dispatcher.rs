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

//! Maps decoded control requests onto the shared state and the pipelines.
//!
//! `handle` always produces a valid JSON response and never panics on the
//! request path; whatever goes wrong becomes a `{code:1}` response. Long
//! operations are validated first, gated through the busy check, and then
//! handed to a freshly spawned worker thread; the response goes out
//! immediately and progress is polled via STATUS.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use log::{info, warn};
use rand::Rng;
use serde::Serialize;

use super::protocol::{self, ConnectParams, Credentials, Request};
use super::state::{JobState, Side, Status};
use crate::backend::{GalEntry, ProfileRequest, SessionFactory};
use crate::migrate::{estimate, export, import};
use crate::support::error::Error;

pub struct Dispatcher {
    status: Arc<Status>,
    factory: Arc<dyn SessionFactory>,
    export_root: PathBuf,
}

impl Dispatcher {
    pub fn new(
        status: Arc<Status>,
        factory: Arc<dyn SessionFactory>,
        export_root: PathBuf,
    ) -> Self {
        Dispatcher {
            status,
            factory,
            export_root,
        }
    }

    /// Handle one raw control message, returning the raw response.
    pub fn handle(&self, raw: &[u8]) -> Vec<u8> {
        let request = match protocol::decode(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected control message: {}", e);
                return protocol::error(e);
            }
        };

        match request {
            Request::Status => protocol::payload(self.status.snapshot()),
            Request::Exit => self.exit(),
            Request::Cancel => self.cancel(),
            Request::Connect(params) => self.connect(params),
            Request::GetUsers => self.get_users(),
            Request::SetUsers(users) => self.set_users(users),
            Request::Estimate(users) => self.estimate(users),
            Request::Export => self.export(),
            Request::Import => self.import(),
            Request::Unknown(command) => {
                warn!("Unknown command {}", command);
                protocol::failure()
            }
        }
    }

    fn exit(&self) -> Vec<u8> {
        info!("Exit requested");
        self.status.clear_rpc_run();
        protocol::ok()
    }

    fn cancel(&self) -> Vec<u8> {
        info!("Cancel requested");
        self.status.cancel_operation();
        protocol::ok()
    }

    /// Connect the remote side, then the local side. A remote failure is
    /// returned before local is touched; a local failure leaves the
    /// already-connected remote in place.
    fn connect(&self, params: ConnectParams) -> Vec<u8> {
        if let Err(e) = self.connect_side(Side::Remote, params.remote) {
            return protocol::error(e);
        }
        if let Err(e) = self.connect_side(Side::Local, params.local) {
            return protocol::error(e);
        }
        protocol::ok()
    }

    fn connect_side(
        &self,
        side: Side,
        credentials: Credentials,
    ) -> Result<(), Error> {
        let (debug_level, dump_data) = self.status.reset_connection(side);
        let profile = ProfileRequest {
            profile_name: random_profile_name(),
            username: credentials.username,
            password: credentials.password,
            address: credentials.address,
            workstation: workstation_name(),
            debug_level,
            dump_data,
        };
        info!(
            "Connecting to {} server {} as {}",
            side.name(),
            profile.address,
            profile.username
        );
        match self.factory.connect(&profile) {
            Ok(session) => {
                self.status.record_session(side, session);
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} server failed: {}", side.name(), e);
                self.status.record_connect_error(side, e.to_string());
                Err(e)
            }
        }
    }

    fn get_users(&self) -> Vec<u8> {
        let session = match self.status.session(Side::Remote) {
            Ok(session) => session,
            Err(e) => return protocol::error(e),
        };

        let fetch = || -> Result<Vec<GalEntry>, Error> {
            let total = session.gal_count()?;
            let mut pager = session.gal()?;
            let mut users = Vec::new();
            // Page size starts small and creeps upward; large fixed batches
            // trip server-side table limits. The budget applies from the
            // first page, unlike earlier migration tooling which bumped it
            // before its first fetch and so paged 9, 11, ...
            let mut batch = 7;
            loop {
                let page = pager.next_page(batch)?;
                let short = page.len() < batch;
                users.extend(page);
                if short || users.len() >= total {
                    break;
                }
                batch += 2;
            }
            Ok(users)
        };

        match fetch() {
            Ok(users) => protocol::payload(UsersPayload {
                count: users.len(),
                users,
            }),
            Err(e) => {
                warn!("Address list query failed: {}", e);
                protocol::error(e)
            }
        }
    }

    fn set_users(&self, users: Vec<String>) -> Vec<u8> {
        match self.status.replace_users(users) {
            Ok(()) => protocol::ok(),
            Err(e) => protocol::error(e),
        }
    }

    fn estimate(&self, users: Vec<String>) -> Vec<u8> {
        let session = match self.status.session(Side::Remote) {
            Ok(session) => session,
            Err(e) => return protocol::error(e),
        };
        if let Err(e) = self.status.begin_operation(JobState::Estimating) {
            return protocol::error(e);
        }
        self.status.replace_mailboxes(users);

        let status = Arc::clone(&self.status);
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            estimate::run(status, session, thread_cancel)
        });
        self.status.store_worker(handle, cancel);
        protocol::ok()
    }

    fn export(&self) -> Vec<u8> {
        let session = match self.status.session(Side::Remote) {
            Ok(session) => session,
            Err(e) => return protocol::error(e),
        };
        if !self.status.has_mailboxes() {
            return protocol::error(Error::NoMailboxes);
        }
        if let Err(e) = self.status.begin_operation(JobState::Exporting) {
            return protocol::error(e);
        }

        let status = Arc::clone(&self.status);
        let export_root = self.export_root.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            export::run(status, session, export_root, thread_cancel)
        });
        self.status.store_worker(handle, cancel);
        protocol::ok()
    }

    fn import(&self) -> Vec<u8> {
        let session = match self.status.session(Side::Local) {
            Ok(session) => session,
            Err(e) => return protocol::error(e),
        };
        if !self.status.has_mailboxes() {
            return protocol::error(Error::NoMailboxes);
        }
        if let Err(e) = self.status.begin_operation(JobState::Importing) {
            return protocol::error(e);
        }

        let status = Arc::clone(&self.status);
        let export_root = self.export_root.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            import::run(status, session, export_root, thread_cancel)
        });
        self.status.store_worker(handle, cancel);
        protocol::ok()
    }
}

#[derive(Serialize)]
struct UsersPayload {
    count: usize,
    users: Vec<GalEntry>,
}

/// Store profiles are throwaway; a random name per logon attempt keeps
/// concurrent daemons from trampling each other's profile stores.
fn random_profile_name() -> String {
    let mut rng = rand::thread_rng();
    (0..15)
        .map(|_| rng.sample(rand::distributions::Alphanumeric))
        .collect()
}

fn workstation_name() -> String {
    let mut buf = [0u8; 256];
    nix::unistd::gethostname(&mut buf)
        .ok()
        .and_then(|name| name.to_str().ok().map(str::to_owned))
        .unwrap_or_else(|| "localhost".to_owned())
}
