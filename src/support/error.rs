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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Operation in progress")]
    OperationInProgress,
    #[error("Not connected to {0} server")]
    NotConnected(&'static str),
    #[error("No mailboxes to process")]
    NoMailboxes,
    #[error("No folder tree; run an estimation first")]
    NoFolderTree,
    #[error("Logon failure: {0}")]
    Logon(String),
    #[error("No such user: {0}")]
    UserNotFound(String),
    #[error("No such folder: {0:#x}")]
    FolderNotFound(u64),
    #[error("No such message: {0:#x}")]
    MessageNotFound(u64),
    #[error("Malformed message file: {0}")]
    BadMessageFile(String),
    #[error("Store is open read-only")]
    ReadOnlyStore,
    #[error("Export path exists and is not a directory: {0}")]
    ExportPathNotDir(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Amqp(#[from] amiquip::Error),
}
