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

//! DNC protocol constants and per-transfer settings

use std::time::Duration;
use crate::error::DncError;

/// Device control 1 - controller is clear to receive data
pub const DC1: u8 = 0x11;

/// Device control 2 - controller enters a data block (punch on)
pub const DC2: u8 = 0x12;

/// Device control 3 - controller asks the sender to pause
pub const DC3: u8 = 0x13;

/// Device control 4 - controller ends the data block (punch off)
pub const DC4: u8 = 0x14;

/// Program delimiter on punched tape
pub const PROGRAM_MARK: char = '%';

/// Port the controller's DNC interface usually listens on
pub const DEFAULT_PORT: u16 = 10001;

// ============================================================================
// Control Codes
// ============================================================================

/// The four control bytes used for framing and flow control.
///
/// Controllers in the field mostly agree on the DC1-DC4 defaults, but the
/// table is kept per session so an odd controller can be targeted without
/// touching the framer or the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCodes {
    pub clear_to_send: u8,
    pub enter_block: u8,
    pub pause: u8,
    pub end_block: u8,
}

impl Default for ControlCodes {
    fn default() -> Self {
        ControlCodes {
            clear_to_send: DC1,
            enter_block: DC2,
            pause: DC3,
            end_block: DC4,
        }
    }
}

impl ControlCodes {
    /// True for the enter-block and end-block bytes
    pub fn is_framing(&self, byte: u8) -> bool {
        byte == self.enter_block || byte == self.end_block
    }

    /// True for the clear-to-send and pause bytes
    pub fn is_flow(&self, byte: u8) -> bool {
        byte == self.clear_to_send || byte == self.pause
    }

    pub fn contains(&self, byte: u8) -> bool {
        self.is_framing(byte) || self.is_flow(byte)
    }

    /// All four codes must differ, otherwise framing and flow control are ambiguous.
    pub fn are_distinct(&self) -> bool {
        let codes = [self.clear_to_send, self.enter_block, self.pause, self.end_block];
        codes
            .iter()
            .enumerate()
            .all(|(i, a)| codes[i + 1..].iter().all(|b| a != b))
    }

    /// Wire text is decoded as ASCII, so a code above 0x7F could never be seen.
    pub fn are_ascii(&self) -> bool {
        [self.clear_to_send, self.enter_block, self.pause, self.end_block]
            .iter()
            .all(u8::is_ascii)
    }

    pub fn validate(&self) -> Result<(), DncError> {
        if !self.are_ascii() {
            return Err(DncError::InvalidControlCodes("codes must be 0x00-0x7F"));
        }
        if !self.are_distinct() {
            return Err(DncError::InvalidControlCodes("codes must all be different"));
        }
        Ok(())
    }
}

// ============================================================================
// Transfer Options
// ============================================================================

/// Pipeline stages to enable for a single read or write operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Receive: convert bare LF to CR+LF
    pub fix_newline: bool,
    /// Receive: do not frame on DC2/DC4 and never stop on end-block
    pub ignore_control_codes: bool,
    /// Both: pass data through untouched
    pub raw_mode: bool,
    /// Send: leave the tail after the last `%` alone
    pub no_end_block: bool,
    /// Send: do not look for a program header or prepend `%`
    pub no_start_block: bool,
}

// ============================================================================
// Session Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bytes per wire read and characters per outbound chunk
    pub buffer_size: usize,
    /// Pause between outbound chunks
    pub send_delay: Duration,
    /// Read and write timeout on the socket
    pub io_timeout: Duration,
    /// Sleep while the receive side has nothing to read
    pub idle_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            buffer_size: 960,
            send_delay: Duration::from_millis(1000),
            io_timeout: Duration::from_millis(5000),
            idle_poll: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    pub fn new(buffer_size: usize, send_delay_ms: u64) -> Self {
        SessionConfig {
            buffer_size: buffer_size.max(1),
            send_delay: Duration::from_millis(send_delay_ms),
            ..SessionConfig::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codes() {
        let codes = ControlCodes::default();
        assert!(codes.is_framing(DC2));
        assert!(codes.is_framing(DC4));
        assert!(!codes.is_framing(DC1));
        assert!(codes.is_flow(DC1));
        assert!(codes.is_flow(DC3));
        assert!(!codes.contains(b'%'));
        assert!(codes.are_distinct());
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let codes = ControlCodes {
            pause: DC1,
            ..ControlCodes::default()
        };
        assert!(!codes.are_distinct());
        assert!(matches!(codes.validate(), Err(DncError::InvalidControlCodes(_))));
    }

    #[test]
    fn test_high_codes_rejected() {
        let codes = ControlCodes {
            enter_block: 0x92,
            ..ControlCodes::default()
        };
        assert!(codes.are_distinct());
        assert!(!codes.are_ascii());
        assert!(matches!(codes.validate(), Err(DncError::InvalidControlCodes(_))));
        assert!(ControlCodes::default().validate().is_ok());
    }

    #[test]
    fn test_config_new_clamps_buffer() {
        let config = SessionConfig::new(0, 200);
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.send_delay, Duration::from_millis(200));
        assert_eq!(config.io_timeout, Duration::from_millis(5000));
    }
}
