//! v6 record framing codec.
//!
//! A record is: 14-word header | index array (one 32-bit word per event,
//! length in bytes) | optional user-header (padded to a 4-byte boundary,
//! then to the next word) | event-payload area. When compression is
//! enabled, the index array is left uncompressed (random access needs it);
//! only the payload area is compressed.

use crate::buffer::{read_u32_words, write_u32_words, ByteOrder};
use crate::compression;
use crate::error::{Error, Result};
use crate::header::{BitInfo, CompressionKind, RecordHeader, MAGIC};

pub struct Record {
    pub header: RecordHeader,
    user_header: Vec<u8>,
    /// Per-event byte length, in the order events were written.
    index: Vec<u32>,
    /// Decompressed, contiguous event bytes.
    payload: Vec<u8>,
}

fn pad_to_word(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

impl Record {
    /// Gathers event byte lengths, writes the index, copies events
    /// contiguously, optionally compresses the payload area, fills the
    /// header, and returns the final serialized record.
    pub fn encode(
        events: &[Vec<u8>],
        user_header: &[u8],
        compression: CompressionKind,
        record_number: u32,
        order: ByteOrder,
        has_dictionary: bool,
        has_first_event: bool,
        is_last: bool,
    ) -> Result<Vec<u8>> {
        let index_bytes: Vec<u8> = {
            let mut buf = crate::buffer::ByteBuffer::new(events.len() * 4, order);
            for event in events {
                buf.put_u32(event.len() as u32);
            }
            buf.into_vec()
        };

        let mut payload = Vec::new();
        for event in events {
            payload.extend_from_slice(event);
        }

        let user_header_padding = pad_to_word(user_header.len());
        let mut padded_user_header = user_header.to_vec();
        padded_user_header.extend(std::iter::repeat(0u8).take(user_header_padding));

        let uncompressed_len = payload.len();
        let mut compressed_payload = compression::compress(compression, &payload)?;
        let payload_padding = pad_to_word(compressed_payload.len());
        compressed_payload.extend(std::iter::repeat(0u8).take(payload_padding));

        let header = RecordHeader {
            record_length_words: 0, // patched below
            record_number,
            header_length_words: RecordHeader::HEADER_WORDS,
            event_count: events.len() as u32,
            index_array_length_bytes: index_bytes.len() as u32,
            bit_info: BitInfo {
                version: 6,
                is_last,
                has_dictionary,
                has_first_event,
            },
            user_header_length_bytes: padded_user_header.len() as u32,
            uncompressed_data_length_bytes: uncompressed_len as u32,
            compression,
            compressed_data_length_words: (compressed_payload.len() / 4) as u32,
            user_register_1: 0,
            user_register_2: 0,
        };

        let total_words = RecordHeader::HEADER_WORDS as usize
            + index_bytes.len() / 4
            + padded_user_header.len() / 4
            + compressed_payload.len() / 4;
        let header = RecordHeader {
            record_length_words: total_words as u32,
            ..header
        };

        let mut out = Vec::with_capacity(total_words * 4);
        write_u32_words(&mut out, order, &header.encode())?;
        out.extend_from_slice(&index_bytes);
        out.extend_from_slice(&padded_user_header);
        out.extend_from_slice(&compressed_payload);
        Ok(out)
    }

    /// Validates the magic, byte-swapping the header in place if the
    /// buffer's declared order turns out to be wrong, decompresses the
    /// payload area if needed, and indexes events for O(1) access.
    pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<(Record, ByteOrder)> {
        let (order, header) = Self::decode_header(bytes, order)?;

        let mut cursor = RecordHeader::HEADER_WORDS as usize * 4;
        let index_len = header.index_array_length_bytes as usize;
        let index_bytes = slice_checked(bytes, cursor, index_len)?;
        let mut index_reader = std::io::Cursor::new(index_bytes);
        let index = read_u32_words(&mut index_reader, order, index_len / 4)?;
        cursor += index_len;

        let user_header_len = header.user_header_length_bytes as usize;
        let user_header = slice_checked(bytes, cursor, user_header_len)?.to_vec();
        cursor += user_header_len;

        let compressed_len = header.compressed_data_length_words as usize * 4;
        let compressed_payload = slice_checked(bytes, cursor, compressed_len)?;
        let payload = compression::decompress(
            header.compression,
            compressed_payload,
            header.uncompressed_data_length_bytes as usize,
        )?;

        Ok((
            Record {
                header,
                user_header,
                index,
                payload,
            },
            order,
        ))
    }

    fn decode_header(bytes: &[u8], order: ByteOrder) -> Result<(ByteOrder, RecordHeader)> {
        let words_len = RecordHeader::WORD_COUNT * 4;
        if bytes.len() < words_len {
            return Err(Error::Truncated {
                offset: 0,
                expected: words_len,
            });
        }
        let words = read_u32_words(&mut std::io::Cursor::new(&bytes[..words_len]), order, RecordHeader::WORD_COUNT)?;
        match RecordHeader::decode(&words) {
            Ok(h) => Ok((order, h)),
            Err(Error::MagicMismatch { .. }) => {
                let flipped = order.opposite();
                let words = read_u32_words(
                    &mut std::io::Cursor::new(&bytes[..words_len]),
                    flipped,
                    RecordHeader::WORD_COUNT,
                )?;
                let header = RecordHeader::decode(&words)?;
                Ok((flipped, header))
            }
            Err(e) => Err(e),
        }
    }

    pub fn event_count(&self) -> u32 {
        self.header.event_count
    }

    pub fn user_header(&self) -> &[u8] {
        &self.user_header
    }

    /// Returns the `index`-th (0-based) event's raw bytes.
    pub fn get_event(&self, index: usize) -> Result<&[u8]> {
        if index >= self.index.len() {
            return Err(Error::EventIndexOutOfRange {
                index: index as u32,
                count: self.index.len() as u32,
            });
        }
        let start: usize = self.index[..index].iter().map(|&n| n as usize).sum();
        let len = self.index[index] as usize;
        slice_checked(&self.payload, start, len)
    }
}

fn slice_checked(bytes: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    if start + len > bytes.len() {
        return Err(Error::Truncated {
            offset: start,
            expected: len,
        });
    }
    Ok(&bytes[start..start + len])
}

/// Also checks a record header's own declared magic, ignoring the file's
/// generation magic constant (used by the writer trailer, which has
/// `event_count == 0`).
pub fn is_trailer(header: &RecordHeader) -> bool {
    header.event_count == 0 && header.bit_info.is_last
}

pub const HEADER_MAGIC: u32 = MAGIC;
