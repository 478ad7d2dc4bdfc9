// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use crate::error::DncError;

/// Cancellation signal shared between a session and its worker
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock() = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Checkpoint: fails with `Cancelled` once the signal is set
    pub fn check(&self) -> Result<(), DncError> {
        if self.is_cancelled() {
            Err(DncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if the operation is cancelled
    pub fn sleep(&self, duration: Duration) -> Result<(), DncError> {
        let deadline = Instant::now() + duration;
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if wake.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        let cancelled = *cancelled;
        if cancelled { Err(DncError::Cancelled) } else { Ok(()) }
    }
}
