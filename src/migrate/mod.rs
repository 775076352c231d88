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

//! The three long-running pipelines and the models they share.
//!
//! Each pipeline runs on the single worker thread, processes the job's
//! mailboxes one at a time, and publishes progress through the mailbox
//! counters so STATUS can report without coordinating with the walk. A
//! mailbox that fails outright is recorded and skipped; the pipeline keeps
//! going. Cancellation is cooperative: the walks poll a shared flag at the
//! top of each recursion and between expensive calls, so a cancelled worker
//! always stops at a point where no file or store handle is half-written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod counters;
pub mod estimate;
pub mod export;
pub mod import;
pub mod tree;

pub(crate) fn cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::SeqCst)
}

pub(crate) fn request_cancel(cancel: &Arc<AtomicBool>) {
    cancel.store(true, Ordering::SeqCst);
}
