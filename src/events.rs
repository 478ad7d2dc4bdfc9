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
use std::sync::mpsc::{self, Receiver, Sender};
use parking_lot::Mutex;
use crate::error::DncError;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Waiting,
    Sending,
    Receiving,
    NotConnected,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Receive,
    Send,
}

// ============================================================================
// Notification Trait
// ============================================================================

/// Notifications raised by a session.
///
/// Every method defaults to doing nothing, so a front end only overrides what
/// it shows. Calls come from the session's worker thread.
pub trait SessionEvents: Send + Sync {
    fn state_changed(&self, _state: SessionState) {}

    fn chunk_received(&self, _data: &str) {}

    fn bad_chunk_received(&self, _data: &str) {}

    fn chunk_sent(&self, _percent_complete: f64) {}

    fn operation_completed(&self, _kind: OperationKind) {}

    fn operation_cancelled(&self, _kind: OperationKind) {}

    fn exception_occurred(&self, _error: &DncError) {}
}

// ============================================================================
// Channel Adapter
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ChunkReceived(String),
    BadChunkReceived(String),
    ChunkSent(f64),
    Completed(OperationKind),
    Cancelled(OperationKind),
    Fault(String),
}

/// Forwards every notification into an mpsc channel
pub struct ChannelEvents {
    tx: Mutex<Sender<SessionEvent>>,
}

impl ChannelEvents {
    pub fn new() -> (Arc<Self>, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelEvents { tx: Mutex::new(tx) }), rx)
    }

    fn send(&self, event: SessionEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.lock().send(event);
    }
}

impl SessionEvents for ChannelEvents {
    fn state_changed(&self, state: SessionState) {
        self.send(SessionEvent::StateChanged(state));
    }

    fn chunk_received(&self, data: &str) {
        self.send(SessionEvent::ChunkReceived(data.to_string()));
    }

    fn bad_chunk_received(&self, data: &str) {
        self.send(SessionEvent::BadChunkReceived(data.to_string()));
    }

    fn chunk_sent(&self, percent_complete: f64) {
        self.send(SessionEvent::ChunkSent(percent_complete));
    }

    fn operation_completed(&self, kind: OperationKind) {
        self.send(SessionEvent::Completed(kind));
    }

    fn operation_cancelled(&self, kind: OperationKind) {
        self.send(SessionEvent::Cancelled(kind));
    }

    fn exception_occurred(&self, error: &DncError) {
        self.send(SessionEvent::Fault(error.to_string()));
    }
}

// ============================================================================
// State Cell
// ============================================================================

/// Session state plus its subscriber, shared with the worker thread
pub struct StateCell {
    state: Mutex<SessionState>,
    events: Arc<dyn SessionEvents>,
}

impl StateCell {
    pub fn new(events: Arc<dyn SessionEvents>) -> Self {
        StateCell {
            state: Mutex::new(SessionState::Unknown),
            events,
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    /// Stores the new state and notifies the subscriber if it changed
    pub fn set(&self, state: SessionState) {
        if self.store_if(state, |_| true) {
            self.notify(state);
        }
    }

    /// Stores `state` only if `allow` accepts the current one. Returns true
    /// when the state changed; the caller is then responsible for `notify`.
    pub fn store_if(&self, state: SessionState, allow: impl FnOnce(SessionState) -> bool) -> bool {
        let mut current = self.state.lock();
        if *current == state || !allow(*current) {
            return false;
        }

        tracing::debug!(previous = ?*current, ?state, "session state changed");
        *current = state;
        true
    }

    pub fn notify(&self, state: SessionState) {
        self.events.state_changed(state);
    }

    pub fn events(&self) -> &dyn SessionEvents {
        self.events.as_ref()
    }
}

// ============================================================================
// Tests
// ============================================================================
