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

#[derive(Debug, thiserror::Error)]
pub enum DncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation in progress")]
    OperationInProgress,

    #[error("Not connected")]
    NotConnected,

    #[error("No program header found (expected ':' or 'O' followed by four digits)")]
    NoProgramHeader,

    #[error("Invalid control codes: {0}")]
    InvalidControlCodes(&'static str),

    #[error("Unknown control code parsed: 0x{0:02X}")]
    UnknownControlCode(u8),

    #[error("Connection closed by controller")]
    ConnectionClosed,

    #[error("Operation cancelled")]
    Cancelled,
}
