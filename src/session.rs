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
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use crate::cancel::CancelToken;
use crate::error::DncError;
use crate::events::{OperationKind, SessionEvents, SessionState, StateCell};
use crate::protocol::{ControlCodes, SessionConfig, TransferOptions};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::transport::{TcpWire, Transport, Wire};

// ============================================================================
// Link
// ============================================================================

/// Everything a worker needs to drive the wire for one operation
pub struct Link {
    pub transport: Transport,
    pub cancel: CancelToken,
    pub config: SessionConfig,
    pub codes: ControlCodes,
    pub status: Arc<StateCell>,
}

#[cfg(test)]
impl Link {
    pub fn for_test(
        wire: Box<dyn Wire>,
        config: SessionConfig,
        events: Arc<dyn SessionEvents>,
    ) -> Self {
        Link {
            transport: Transport::new(wire),
            cancel: CancelToken::new(),
            config,
            codes: ControlCodes::default(),
            status: Arc::new(StateCell::new(events)),
        }
    }
}

// ============================================================================
// Operation
// ============================================================================

/// The single in-flight background operation
struct Operation {
    id: u64,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl Operation {
    fn stop(self) {
        self.cancel.cancel();

        // A subscriber may stop the session from inside a callback
        if self.handle.thread().id() == std::thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!(id = self.id, "operation worker panicked");
        }
    }
}

type OperationSlot = Arc<Mutex<Option<Operation>>>;

// ============================================================================
// Session
// ============================================================================

/// One controller connection and the operation running over it
pub struct Session {
    config: SessionConfig,
    codes: ControlCodes,
    transport: Mutex<Option<Transport>>,
    status: Arc<StateCell>,
    operation: OperationSlot,
    next_id: AtomicU64,
}

impl Session {
    pub fn new(config: SessionConfig, codes: ControlCodes, events: Arc<dyn SessionEvents>) -> Self {
        let status = Arc::new(StateCell::new(events));
        status.set(SessionState::NotConnected);

        Session {
            config: SessionConfig { buffer_size: config.buffer_size.max(1), ..config },
            codes,
            transport: Mutex::new(None),
            status,
            operation: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.status.get()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens a TCP connection to the controller.
    ///
    /// Network failures are not returned: they leave the session `NotConnected`.
    pub fn connect(&self, host: &str, port: u16) -> SessionState {
        self.close();

        match TcpWire::connect(host, port, self.config.io_timeout) {
            Ok(wire) => {
                info!(host, port, "connected");
                self.attach(Box::new(wire));
            }
            Err(e) => {
                warn!(host, port, error = %e, "connect failed");
                self.status.set(SessionState::NotConnected);
            }
        }

        self.state()
    }

    /// Uses an already open wire as the session's connection
    pub fn attach(&self, wire: Box<dyn Wire>) {
        *self.transport.lock() = Some(Transport::new(wire));
        self.status.set(SessionState::Idle);
    }

    /// Starts receiving from the controller in the background
    pub fn read_in(&self, options: TransferOptions) -> Result<(), DncError> {
        self.start(OperationKind::Receive, move |link| {
            Receiver::new(link, options).run()
        })
    }

    /// Starts sending `payload` to the controller in the background
    pub fn write_out(&self, payload: &str, options: TransferOptions) -> Result<(), DncError> {
        let payload = payload.to_string();
        self.start(OperationKind::Send, move |link| {
            Sender::new(link, payload, options).run()
        })
    }

    /// Cancels the running operation and waits for its worker to finish
    pub fn stop_operation(&self) {
        let operation = self.operation.lock().take();
        if let Some(operation) = operation {
            info!(id = operation.id, "stopping operation");
            operation.stop();
        }
    }

    /// Stops any operation and drops the connection
    pub fn close(&self) {
        self.stop_operation();

        if let Some(transport) = self.transport.lock().take() {
            if let Err(e) = transport.shutdown() {
                warn!(error = %e, "shutdown failed");
            }
            info!("connection closed");
        }

        self.status.set(SessionState::NotConnected);
    }

    fn start<F>(&self, kind: OperationKind, body: F) -> Result<(), DncError>
    where
        F: FnOnce(&Link) -> Result<(), DncError> + Send + 'static,
    {
        self.codes.validate()?;
        let transport = self.transport.lock().clone().ok_or(DncError::NotConnected)?;

        let mut slot = self.operation.lock();
        if slot.is_some() || transport.is_busy() {
            return Err(DncError::OperationInProgress);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let link = Link {
            transport,
            cancel: cancel.clone(),
            config: self.config,
            codes: self.codes,
            status: Arc::clone(&self.status),
        };
        let operations = Arc::clone(&self.operation);

        let handle = std::thread::Builder::new()
            .name(format!("dnc-{kind:?}-{id}").to_lowercase())
            .spawn(move || {
                let result = body(&link);

                // Free the slot first so a subscriber can start the next operation
                let done = {
                    let mut slot = operations.lock();
                    if slot.as_ref().is_some_and(|op| op.id == id) {
                        slot.take()
                    } else {
                        None
                    }
                };
                drop(done);

                finish(&link, kind, result);
                settle(&link, &operations);
            })?;

        info!(id, ?kind, "operation started");
        *slot = Some(Operation { id, cancel, handle });
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Raises exactly one terminal notification for the operation's outcome.
///
/// A body that ran to completion counts as completed even if a stop raced it.
fn finish(link: &Link, kind: OperationKind, result: Result<(), DncError>) {
    let events = link.status.events();

    match result {
        Ok(()) => {
            info!(?kind, "operation completed");
            events.operation_completed(kind);
        }
        Err(DncError::Cancelled) => {
            info!(?kind, "operation cancelled");
            events.operation_cancelled(kind);
        }
        Err(_) if link.cancel.is_cancelled() => {
            info!(?kind, "operation cancelled");
            events.operation_cancelled(kind);
        }
        Err(e) => {
            error!(?kind, error = %e, "operation failed");
            events.exception_occurred(&e);
        }
    }
}

/// Returns the session to idle, unless it was closed or a new operation has
/// already been admitted.
fn settle(link: &Link, operations: &OperationSlot) {
    let changed = {
        let slot = operations.lock();
        slot.is_none()
            && link
                .status
                .store_if(SessionState::Idle, |current| current != SessionState::NotConnected)
    };

    if changed {
        link.status.notify(SessionState::Idle);
    }
}

// ============================================================================
// Tests
// ============================================================================
