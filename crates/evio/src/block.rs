//! v4 block framing codec.
//!
//! A block is an 8-word header followed directly by its events: full bank
//! structures, back to back, uncompressed. Unlike a v6 record there is no
//! index array, no user-header area, and no compression — the generation's
//! simplicity is the point. Event boundaries are recovered by reading each
//! bank's own length word, not from a separate table.

use crate::buffer::{read_u32_words, write_u32_words, ByteOrder};
use crate::error::{Error, Result};
use crate::header::{BitInfo, BlockHeader};

pub struct Block {
    pub header: BlockHeader,
    events: Vec<Vec<u8>>,
}

impl Block {
    pub fn encode(
        events: &[Vec<u8>],
        block_number: u32,
        order: ByteOrder,
        is_last: bool,
        has_dictionary: bool,
        has_first_event: bool,
    ) -> Result<Vec<u8>> {
        let payload_words: u32 = events.iter().map(|e| (e.len() / 4) as u32).sum();
        let total_words = BlockHeader::HEADER_WORDS + payload_words;

        let header = BlockHeader {
            total_words,
            block_number,
            header_words: BlockHeader::HEADER_WORDS,
            event_count: events.len() as u32,
            bit_info: BitInfo {
                version: 4,
                is_last,
                has_dictionary,
                has_first_event,
            },
        };

        let mut out = Vec::with_capacity(total_words as usize * 4);
        write_u32_words(&mut out, order, &header.encode())?;
        for event in events {
            out.extend_from_slice(event);
        }
        Ok(out)
    }

    /// Parses the header, then walks the payload event by event: each
    /// event's own first word gives its length (words, minus one, per the
    /// bank-header convention), so the next event always starts immediately
    /// after the current one ends.
    pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<(Block, ByteOrder)> {
        let header_bytes = BlockHeader::WORD_COUNT * 4;
        if bytes.len() < header_bytes {
            return Err(Error::Truncated {
                offset: 0,
                expected: header_bytes,
            });
        }
        let (order, header) = Self::decode_header(bytes, order)?;

        let mut cursor = header_bytes;
        let mut events = Vec::with_capacity(header.event_count as usize);
        for _ in 0..header.event_count {
            if cursor + 4 > bytes.len() {
                return Err(Error::Truncated {
                    offset: cursor,
                    expected: 4,
                });
            }
            let length_word = read_u32_words(&mut std::io::Cursor::new(&bytes[cursor..cursor + 4]), order, 1)?[0];
            let event_words = length_word + 1;
            let event_len = event_words as usize * 4;
            if cursor + event_len > bytes.len() {
                return Err(Error::Truncated {
                    offset: cursor,
                    expected: event_len,
                });
            }
            events.push(bytes[cursor..cursor + event_len].to_vec());
            cursor += event_len;
        }

        Ok((Block { header, events }, order))
    }

    fn decode_header(bytes: &[u8], order: ByteOrder) -> Result<(ByteOrder, BlockHeader)> {
        let words_len = BlockHeader::WORD_COUNT * 4;
        let words = read_u32_words(&mut std::io::Cursor::new(&bytes[..words_len]), order, BlockHeader::WORD_COUNT)?;
        match BlockHeader::decode(&words) {
            Ok(h) => Ok((order, h)),
            Err(Error::MagicMismatch { .. }) => {
                let flipped = order.opposite();
                let words = read_u32_words(
                    &mut std::io::Cursor::new(&bytes[..words_len]),
                    flipped,
                    BlockHeader::WORD_COUNT,
                )?;
                let header = BlockHeader::decode(&words)?;
                Ok((flipped, header))
            }
            Err(e) => Err(e),
        }
    }

    pub fn event_count(&self) -> u32 {
        self.header.event_count
    }

    pub fn get_event(&self, index: usize) -> Result<&[u8]> {
        self.events
            .get(index)
            .map(|v| v.as_slice())
            .ok_or(Error::EventIndexOutOfRange {
                index: index as u32,
                count: self.events.len() as u32,
            })
    }

    pub fn events(&self) -> &[Vec<u8>] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Payload, StructureNode};
    use crate::types::DataType;

    fn sample_event(tag: u16, value: i32) -> Vec<u8> {
        let mut bank = StructureNode::new_bank(tag, 0, DataType::Int32);
        bank.set_payload(Payload::Int32(vec![value])).unwrap();
        bank.encode(ByteOrder::Little).unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let events = vec![sample_event(1, 10), sample_event(2, 20), sample_event(3, 30)];
        let bytes = Block::encode(&events, 1, ByteOrder::Little, true, false, false).unwrap();
        let (block, order) = Block::decode(&bytes, ByteOrder::Little).unwrap();
        assert_eq!(order, ByteOrder::Little);
        assert_eq!(block.event_count(), 3);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(block.get_event(i).unwrap(), &event[..]);
        }
    }

    #[test]
    fn detects_opposite_byte_order() {
        let events = vec![sample_event(7, 42)];
        let bytes = Block::encode(&events, 0, ByteOrder::Big, true, false, false).unwrap();
        let (block, order) = Block::decode(&bytes, ByteOrder::Little).unwrap();
        assert_eq!(order, ByteOrder::Big);
        assert_eq!(block.get_event(0).unwrap(), &events[0][..]);
    }

    #[test]
    fn empty_block_has_zero_events() {
        let bytes = Block::encode(&[], 5, ByteOrder::Little, true, false, false).unwrap();
        let (block, _) = Block::decode(&bytes, ByteOrder::Little).unwrap();
        assert_eq!(block.event_count(), 0);
        assert!(block.events().is_empty());
    }
}
