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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    UnProcessed,
    ReadyForProcessing,
    Processed,
    Ignore,
    Error,
}

/// Last framing byte seen on the stream, carried from one chunk to the next
/// because a socket read rarely lines up with a block boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockMarker {
    #[default]
    None,
    Enter,
    End,
}

/// One unit of data in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: usize,
    pub data: String,
    pub state: ChunkState,
    pub carry: BlockMarker,
}

impl Chunk {
    pub fn new(id: usize) -> Self {
        Chunk {
            id,
            data: String::new(),
            state: ChunkState::UnProcessed,
            carry: BlockMarker::None,
        }
    }

    /// The next chunk of the same stream. Only the carry survives.
    pub fn successor(&self) -> Self {
        Chunk {
            id: self.id + 1,
            data: String::new(),
            state: ChunkState::UnProcessed,
            carry: self.carry,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = ChunkState> {
        prop_oneof![
            Just(ChunkState::UnProcessed),
            Just(ChunkState::ReadyForProcessing),
            Just(ChunkState::Processed),
            Just(ChunkState::Ignore),
            Just(ChunkState::Error),
        ]
    }

    fn any_marker() -> impl Strategy<Value = BlockMarker> {
        prop_oneof![
            Just(BlockMarker::None),
            Just(BlockMarker::Enter),
            Just(BlockMarker::End),
        ]
    }

    #[test]
    fn test_new_chunk() {
        let chunk = Chunk::new(7);
        assert_eq!(chunk.id(), 7);
        assert_eq!(chunk.state, ChunkState::UnProcessed);
        assert_eq!(chunk.carry, BlockMarker::None);
        assert!(chunk.data.is_empty());
    }

    proptest! {
        #[test]
        fn successor_keeps_carry_and_resets_state(
            id in 0usize..1_000_000,
            data in ".*",
            state in any_state(),
            carry in any_marker(),
        ) {
            let mut chunk = Chunk::new(id);
            chunk.data = data;
            chunk.state = state;
            chunk.carry = carry;

            let next = chunk.successor();
            prop_assert_eq!(next.id(), id + 1);
            prop_assert_eq!(next.state, ChunkState::UnProcessed);
            prop_assert_eq!(next.carry, carry);
        }
    }
}
