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

//! Line ending and control byte cleanup for data entering or leaving the wire

use crate::error::DncError;
use crate::protocol::{ControlCodes, PROGRAM_MARK, TransferOptions};

/// Converts every LF not already preceded by CR into CR+LF
pub fn to_crlf(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 16);
    let mut prev = None;

    for ch in text.chars() {
        if ch == '\n' && prev != Some('\r') {
            result.push('\r');
        }
        result.push(ch);
        prev = Some(ch);
    }

    result
}

/// Converts CR+LF into LF
pub fn to_lf(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Drops control bytes left over in files saved from an earlier transfer
pub fn strip_control_codes(text: &str, codes: &ControlCodes) -> String {
    text.chars()
        .filter(|&c| !(c.is_ascii() && codes.contains(c as u8)))
        .collect()
}

/// Byte index of the first program number: a leader (`:`, `O` or `o`)
/// followed by exactly four digits.
pub fn find_program_header(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();

    (0..bytes.len()).find(|&i| {
        matches!(bytes[i], b':' | b'O' | b'o')
            && bytes.len() > i + 4
            && bytes[i + 1..i + 5].iter().all(u8::is_ascii_digit)
            && !bytes.get(i + 5).is_some_and(u8::is_ascii_digit)
    })
}

/// Coerces the payload to 7-bit ASCII so chunking by bytes never splits a character
pub fn to_ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Readies a program for sending.
///
/// Line endings become LF and stray control bytes are removed. Then, unless
/// disabled, everything before the first program number is trimmed and a `%`
/// line is put in front, and the text is cut right after its last `%` (or a
/// `%` is appended when there is none past the start).
pub fn prepare_outbound(
    text: &str,
    options: &TransferOptions,
    codes: &ControlCodes,
) -> Result<String, DncError> {
    let text = to_ascii(text);
    if options.raw_mode {
        return Ok(text);
    }

    let mut data = strip_control_codes(&to_lf(&text), codes);

    if !options.no_start_block {
        let start = find_program_header(&data).ok_or(DncError::NoProgramHeader)?;
        data = format!("{PROGRAM_MARK}\n{}", &data[start..]);
    }

    if !options.no_end_block {
        match data.rfind(PROGRAM_MARK) {
            Some(end) if end > 0 => data.truncate(end + 1),
            _ => data.push(PROGRAM_MARK),
        }
    }

    Ok(data)
}

// ============================================================================
// Tests
// ============================================================================
