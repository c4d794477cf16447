// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection health bookkeeping.
//
// Label printers keep a job buffer across TCP sessions. After an unclean
// session (failed open, failed write, watchdog cancellation) the buffer
// may hold a partial job, so the next dispatch must flush it before
// sending anything. One `ConnectionHealth` is owned per engine instance;
// it starts dirty because a fresh process cannot know what the previous
// one left behind.

use std::sync::Mutex;

/// Whether the next connection needs a buffer clear before its command.
///
/// The lock is held only for the read or write itself, never across I/O.
/// Dispatches are serialized, so read-then-clear inside one dispatch
/// cannot interleave with another dispatch; the watchdog may mark the
/// state dirty concurrently, which is always safe.
pub struct ConnectionHealth {
    needs_clear: Mutex<bool>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            needs_clear: Mutex::new(true),
        }
    }

    pub fn needs_clear(&self) -> bool {
        *self.needs_clear.lock().expect("connection health lock poisoned")
    }

    /// Record an unclean session end. The next dispatch will clear.
    pub fn mark_dirty(&self) {
        *self.needs_clear.lock().expect("connection health lock poisoned") = true;
    }

    /// Record a successful buffer clear on a freshly opened connection.
    pub fn mark_clean(&self) {
        *self.needs_clear.lock().expect("connection health lock poisoned") = false;
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}
