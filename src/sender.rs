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

use tracing::{debug, info};
use crate::chunk::{Chunk, ChunkState};
use crate::error::DncError;
use crate::events::SessionState;
use crate::protocol::TransferOptions;
use crate::sanitize::prepare_outbound;
use crate::session::Link;

// ============================================================================
// Flow Control Signal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    None,
    ClearToSend,
    Pause,
}

// ============================================================================
// Sender
// ============================================================================

/// Pushes a program to the controller, one chunk per pacing interval, while
/// the controller keeps it cleared with DC1/DC3.
pub struct Sender<'a> {
    link: &'a Link,
    payload: String,
    options: TransferOptions,
}

impl<'a> Sender<'a> {
    pub fn new(link: &'a Link, payload: String, options: TransferOptions) -> Self {
        Sender { link, payload, options }
    }

    pub fn run(self) -> Result<(), DncError> {
        let link = self.link;
        link.cancel.check()?;

        let data = prepare_outbound(&self.payload, &self.options, &link.codes)?;
        let chunks = split_chunks(&data, link.config.buffer_size);
        info!(bytes = data.len(), chunks = chunks.len(), "send started");

        let mut cleared = false;
        let mut next = 0;

        link.status.set(SessionState::Waiting);

        while next < chunks.len() {
            link.cancel.check()?;
            let signal = self.poll_signal()?;
            link.cancel.check()?;

            if signal == Signal::ClearToSend && !cleared {
                debug!("received clear-to-send");
                cleared = true;
                link.status.set(SessionState::Sending);
            } else if signal == Signal::Pause && cleared {
                debug!("received pause");
                cleared = false;
                link.status.set(SessionState::Waiting);
            }

            if cleared {
                let chunk = &chunks[next];
                link.transport.send_text(&chunk.data)?;
                debug!(id = chunk.id(), bytes = chunk.data.len(), "sent chunk");
                next += 1;

                link.status
                    .events()
                    .chunk_sent(percent_complete(next, chunks.len()));
            }

            link.cancel.check()?;
            link.cancel.sleep(link.config.send_delay)?;
        }

        link.cancel.check()?;
        info!(chunks = chunks.len(), "send finished");
        Ok(())
    }

    fn poll_signal(&self) -> Result<Signal, DncError> {
        let codes = &self.link.codes;
        let signal = match self.link.transport.poll_code()? {
            Some(code) if code == codes.clear_to_send => Signal::ClearToSend,
            Some(code) if code == codes.pause => Signal::Pause,
            Some(code) => {
                debug!(code, "ignoring byte outside flow control");
                Signal::None
            }
            None => Signal::None,
        };
        Ok(signal)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Cuts the payload into chunks of at most `size` bytes, numbered from zero
pub fn split_chunks(data: &str, size: usize) -> Vec<Chunk> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let mut end = size.min(rest.len());
        while !rest.is_char_boundary(end) {
            end += 1;
        }

        let mut chunk = Chunk::new(chunks.len());
        chunk.data = rest[..end].to_string();
        chunk.state = ChunkState::ReadyForProcessing;
        chunks.push(chunk);

        rest = &rest[end..];
    }

    chunks
}

/// Percentage of chunks sent, rounded to one decimal with ties to even
pub fn percent_complete(sent: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (sent as f64 / total as f64 * 1000.0).round_ties_even() / 10.0
}

// ============================================================================
// Tests
// ============================================================================
