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

use std::sync::Arc;

use log::{error, info};

use crate::backend::memory::MemoryNetwork;
use crate::backend::SessionFactory;
use crate::control::dispatcher::Dispatcher;
use crate::control::state::Status;
use crate::rpc;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

pub(super) fn serve(system_config: SystemConfig) {
    let factory: Arc<dyn SessionFactory> =
        match &*system_config.backend.kind {
            "memory" => Arc::new(MemoryNetwork::new()),
            kind => {
                eprintln!("Unknown backend kind '{}'", kind);
                EX_CONFIG.exit()
            }
        };

    let status = Arc::new(Status::new(&system_config.backend));
    let dispatcher = Dispatcher::new(
        Arc::clone(&status),
        factory,
        system_config.export.path.clone(),
    );

    if let Err(e) = rpc::run(&system_config.amqp, &status, &dispatcher) {
        error!("Control loop failed: {}", e);
        EX_UNAVAILABLE.exit()
    }

    // An operation started just before EXIT keeps running; let it finish
    // before the process goes away.
    status.join_worker();
    info!("Exiting");
}
