//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

//! The single serial background worker.
//!
//! Long scans over the storage file (such as rebuilding the conversation
//! list) are handed off to this worker so the foreground thread stays
//! responsive. At most one background thread exists at any given time, and
//! it runs tasks strictly in the order they were submitted, so at most one
//! scan is ever in flight. Submitting never runs the task on the submitting
//! thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::error;

type Task = Box<dyn FnOnce() + Send>;

lazy_static! {
    /// The current background work queue.
    ///
    /// If `None`, no background worker thread is currently running.
    static ref BACKGROUND_WORK: Mutex<Option<VecDeque<Task>>> =
        Mutex::new(None);
}

/// Run the given task on the background worker.
///
/// This call returns immediately and `task` is invoked at some point in the
/// future, after every task submitted before it.
pub fn run_in_background(task: impl FnOnce() + Send + 'static) {
    let mut work = BACKGROUND_WORK.lock().unwrap();
    work.get_or_insert_with(|| {
        std::thread::spawn(run_background_work);
        VecDeque::new()
    })
    .push_back(Box::new(task));
}

fn run_background_work() {
    loop {
        let task = {
            let mut work = BACKGROUND_WORK.lock().unwrap();

            let popped = work.as_mut().and_then(|w| w.pop_front());
            match popped {
                Some(task) => task,
                None => {
                    *work = None;
                    break;
                },
            }
        };

        // A panicking task must not take the worker with it, or everything
        // queued behind it would never run.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Background task panicked");
        }
    }
}
