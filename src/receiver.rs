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

use tracing::{debug, info, warn};
use crate::chunk::{BlockMarker, Chunk, ChunkState};
use crate::error::DncError;
use crate::events::SessionState;
use crate::protocol::{ControlCodes, TransferOptions};
use crate::sanitize::to_crlf;
use crate::session::Link;

// ============================================================================
// Block Framing
// ============================================================================

/// Crops the chunk to the part inside the DC2/DC4 bounds.
///
/// A chunk with no framing byte is kept whole while a block is open and
/// ignored otherwise. Out-of-order framing bytes mark the chunk as an error
/// and leave its data as read.
pub fn clip_block(chunk: &mut Chunk, codes: &ControlCodes) -> Result<(), DncError> {
    let marks: Vec<(usize, u8)> = chunk
        .data
        .bytes()
        .enumerate()
        .filter(|&(_, b)| codes.is_framing(b))
        .collect();

    if marks.is_empty() {
        if chunk.carry != BlockMarker::Enter {
            chunk.state = ChunkState::Ignore;
        }
        return Ok(());
    }

    let mut start = 0;
    let mut end = chunk.data.len();

    for (idx, code) in marks {
        if code == codes.enter_block {
            if chunk.carry == BlockMarker::None {
                start = idx + 1;
                chunk.carry = BlockMarker::Enter;
            } else {
                debug!(id = chunk.id(), idx, "enter-block inside a block");
                chunk.state = ChunkState::Error;
            }
        } else if code == codes.end_block {
            if chunk.carry == BlockMarker::Enter {
                end = idx;
                chunk.carry = BlockMarker::End;
            } else {
                debug!(id = chunk.id(), idx, "end-block outside a block");
                chunk.state = ChunkState::Error;
            }
        } else {
            return Err(DncError::UnknownControlCode(code));
        }
    }

    if chunk.state != ChunkState::Error {
        match chunk.data.get(start..end) {
            Some(body) => chunk.data = body.to_string(),
            None => chunk.state = ChunkState::Error,
        }
    }

    Ok(())
}

/// Runs the framing and newline stages on a freshly read chunk
pub fn process_chunk(
    chunk: &mut Chunk,
    options: &TransferOptions,
    codes: &ControlCodes,
) -> Result<(), DncError> {
    if !options.raw_mode {
        if !options.ignore_control_codes {
            clip_block(chunk, codes)?;
        }

        if options.fix_newline && chunk.state != ChunkState::Error {
            chunk.data = to_crlf(&chunk.data);
        }
    }

    if chunk.state == ChunkState::ReadyForProcessing {
        chunk.state = ChunkState::Processed;
    }

    Ok(())
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Reads blocks from the controller until it ends the transmission
pub struct Receiver<'a> {
    link: &'a Link,
    options: TransferOptions,
}

impl<'a> Receiver<'a> {
    pub fn new(link: &'a Link, options: TransferOptions) -> Self {
        Receiver { link, options }
    }

    pub fn run(&self) -> Result<(), DncError> {
        let link = self.link;
        link.cancel.check()?;

        let mut chunk = Chunk::new(0);
        link.status.set(SessionState::Receiving);
        info!(options = ?self.options, "receive started");

        loop {
            link.cancel.check()?;

            if !link.transport.bytes_available()? {
                link.cancel.sleep(link.config.idle_poll)?;
                continue;
            }

            link.cancel.check()?;
            self.fill(&mut chunk)?;
            link.cancel.check()?;

            if chunk.state == ChunkState::ReadyForProcessing {
                process_chunk(&mut chunk, &self.options, &link.codes)?;
            }

            self.dispatch(&chunk);

            if !self.options.ignore_control_codes && chunk.carry == BlockMarker::End {
                info!(chunks = chunk.id() + 1, "controller ended the block");
                return Ok(());
            }

            chunk = chunk.successor();
        }
    }

    fn fill(&self, chunk: &mut Chunk) -> Result<(), DncError> {
        let data = self.link.transport.read_chunk(self.link.config.buffer_size)?;
        if data.is_empty() {
            return Err(DncError::ConnectionClosed);
        }

        debug!(id = chunk.id(), bytes = data.len(), "read chunk");
        chunk.data = data;
        chunk.state = ChunkState::ReadyForProcessing;
        Ok(())
    }

    fn dispatch(&self, chunk: &Chunk) {
        let events = self.link.status.events();
        match chunk.state {
            ChunkState::Processed => events.chunk_received(&chunk.data),
            ChunkState::Error => {
                warn!(id = chunk.id(), "bad chunk received");
                events.bad_chunk_received(&chunk.data);
            }
            _ => debug!(id = chunk.id(), state = ?chunk.state, "chunk dropped"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelEvents, SessionEvent};
    use crate::protocol::{DC2, DC4, SessionConfig};
    use crate::transport::{MockWire, WireOp};
    use std::time::Duration;

    fn framed(parts: &[&[u8]]) -> Option<Vec<u8>> {
        Some(parts.concat())
    }

    fn ready(data: &str, carry: BlockMarker) -> Chunk {
        let mut chunk = Chunk::new(0);
        chunk.data = data.to_string();
        chunk.state = ChunkState::ReadyForProcessing;
        chunk.carry = carry;
        chunk
    }

    fn run_receiver(
        arrivals: Vec<Option<Vec<u8>>>,
        buffer_size: usize,
        options: TransferOptions,
    ) -> (Result<(), DncError>, Vec<SessionEvent>, Vec<WireOp>) {
        let wire = MockWire::new(arrivals);
        let log = wire.log();
        let (events, rx) = ChannelEvents::new();
        let config = SessionConfig {
            buffer_size,
            idle_poll: Duration::from_millis(1),
            ..SessionConfig::default()
        };
        let link = Link::for_test(Box::new(wire), config, events);

        let result = Receiver::new(&link, options).run();
        (result, rx.try_iter().collect(), log.ops())
    }

    fn received(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChunkReceived(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn bad(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::BadChunkReceived(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_clip_single_block() {
        let mut chunk = ready("junk\u{12}BODY\u{14}junk", BlockMarker::None);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.data, "BODY");
        assert_eq!(chunk.state, ChunkState::ReadyForProcessing);
        assert_eq!(chunk.carry, BlockMarker::End);
    }

    #[test]
    fn test_clip_inside_open_block() {
        let mut chunk = ready("G01 X1.\n", BlockMarker::Enter);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.data, "G01 X1.\n");
        assert_eq!(chunk.state, ChunkState::ReadyForProcessing);
        assert_eq!(chunk.carry, BlockMarker::Enter);
    }

    #[test]
    fn test_clip_noise_outside_block() {
        let mut chunk = ready("noise", BlockMarker::None);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Ignore);
    }

    #[test]
    fn test_clip_end_after_carry() {
        let mut chunk = ready("M30\n%\u{14}\0\0", BlockMarker::Enter);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.data, "M30\n%");
        assert_eq!(chunk.carry, BlockMarker::End);
    }

    #[test]
    fn test_clip_double_enter_is_error() {
        let mut chunk = ready("\u{12}AB\u{12}CD", BlockMarker::None);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Error);
        assert_eq!(chunk.data, "\u{12}AB\u{12}CD");
        assert_eq!(chunk.carry, BlockMarker::Enter);
    }

    #[test]
    fn test_clip_end_without_enter_is_error() {
        let mut chunk = ready("AB\u{14}", BlockMarker::None);
        clip_block(&mut chunk, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Error);
        assert_eq!(chunk.carry, BlockMarker::None);
    }

    #[test]
    fn test_clip_custom_codes() {
        let codes = ControlCodes {
            enter_block: b'[',
            end_block: b']',
            ..ControlCodes::default()
        };
        let mut chunk = ready("xx[O0001]yy", BlockMarker::None);
        clip_block(&mut chunk, &codes).unwrap();
        assert_eq!(chunk.data, "O0001");
    }

    #[test]
    fn test_process_fix_newline() {
        let options = TransferOptions { fix_newline: true, ..Default::default() };
        let mut chunk = ready("\u{12}%\nO0001\n\u{14}", BlockMarker::None);
        process_chunk(&mut chunk, &options, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Processed);
        assert_eq!(chunk.data, "%\r\nO0001\r\n");
    }

    #[test]
    fn test_process_error_skips_newline() {
        let options = TransferOptions { fix_newline: true, ..Default::default() };
        let mut chunk = ready("A\n\u{14}", BlockMarker::None);
        process_chunk(&mut chunk, &options, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Error);
        assert_eq!(chunk.data, "A\n\u{14}");
    }

    #[test]
    fn test_process_raw_mode() {
        let options = TransferOptions { raw_mode: true, fix_newline: true, ..Default::default() };
        let mut chunk = ready("\u{12}A\n\u{14}", BlockMarker::None);
        process_chunk(&mut chunk, &options, &ControlCodes::default()).unwrap();
        assert_eq!(chunk.state, ChunkState::Processed);
        assert_eq!(chunk.data, "\u{12}A\n\u{14}");
        assert_eq!(chunk.carry, BlockMarker::None);
    }

    #[test]
    fn test_receive_single_block() {
        let arrivals = vec![
            None,
            framed(&[b"junk", &[DC2], b"BODY", &[DC4], b"junk"]),
            Some(b"never read".to_vec()),
        ];

        let (result, events, ops) = run_receiver(arrivals, 960, TransferOptions::default());
        result.expect("Receive should complete");

        assert_eq!(received(&events), vec!["BODY"]);
        assert!(bad(&events).is_empty());
        assert_eq!(events[0], SessionEvent::StateChanged(SessionState::Receiving));
        assert_eq!(ops.len(), 1, "Should stop reading after end-block");
    }

    #[test]
    fn test_receive_block_across_reads() {
        let arrivals = vec![
            Some(b"leader".to_vec()),
            framed(&[b"xx", &[DC2], b"%\nO0001\n"]),
            None,
            Some(b"G00 X0\n".to_vec()),
            framed(&[b"M30\n%", &[DC4]]),
        ];

        let (result, events, _) = run_receiver(arrivals, 960, TransferOptions::default());
        result.expect("Receive should complete");
        assert_eq!(received(&events), vec!["%\nO0001\n", "G00 X0\n", "M30\n%"]);
    }

    #[test]
    fn test_receive_buffer_smaller_than_block() {
        let arrivals = vec![framed(&[&[DC2], b"ABCDEFGH", &[DC4]])];

        let (result, events, ops) = run_receiver(arrivals, 4, TransferOptions::default());
        result.expect("Receive should complete");
        assert_eq!(received(&events), vec!["ABC", "DEFG", "H"]);
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn test_receive_bad_chunk_is_not_fatal() {
        let arrivals = vec![
            framed(&[&[DC2], b"AB", &[DC2], b"CD"]),
            framed(&[b"EF", &[DC4]]),
        ];

        let (result, events, _) = run_receiver(arrivals, 960, TransferOptions::default());
        result.expect("Receive should complete");
        assert_eq!(bad(&events), vec!["\u{12}AB\u{12}CD"]);
        assert_eq!(received(&events), vec!["EF"]);
    }

    #[test]
    fn test_receive_connection_closed() {
        let arrivals = vec![framed(&[&[DC2], b"AB"]), Some(Vec::new())];

        let (result, events, _) = run_receiver(arrivals, 960, TransferOptions::default());
        assert!(matches!(result, Err(DncError::ConnectionClosed)));
        assert_eq!(received(&events), vec!["AB"]);
    }

    #[test]
    fn test_receive_ignore_control_codes_runs_until_closed() {
        let options = TransferOptions {
            ignore_control_codes: true,
            fix_newline: true,
            ..Default::default()
        };
        let arrivals = vec![
            framed(&[&[DC2], b"A\n", &[DC4]]),
            Some(b"B\n".to_vec()),
            Some(Vec::new()),
        ];

        let (result, events, _) = run_receiver(arrivals, 960, options);
        assert!(matches!(result, Err(DncError::ConnectionClosed)));
        assert_eq!(received(&events), vec!["\u{12}A\r\n\u{14}", "B\r\n"]);
    }
}
