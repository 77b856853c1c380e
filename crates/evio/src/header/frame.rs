//! Block (v4), record (v6), and file (v6) header layouts.

use crate::error::{Error, Result};

use super::{FILE_TYPE_EVIO, FILE_TYPE_HIPO, MAGIC};

/// Compression applied to a record's payload area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompressionKind {
    None,
    Lz4,
    Lz4Best,
    Gzip,
}

impl CompressionKind {
    pub fn from_nybble(v: u8) -> Result<CompressionKind> {
        match v & 0xf {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Lz4),
            2 => Ok(CompressionKind::Lz4Best),
            3 => Ok(CompressionKind::Gzip),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }

    pub fn to_nybble(self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Lz4 => 1,
            CompressionKind::Lz4Best => 2,
            CompressionKind::Gzip => 3,
        }
    }
}

/// Bit-info word shared by v4 block and v6 record headers: low byte is the
/// format version, bit 8 is last-block/last-record, bit 9 has-dictionary,
/// bit 10 has-first-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitInfo {
    pub version: u8,
    pub is_last: bool,
    pub has_dictionary: bool,
    pub has_first_event: bool,
}

impl BitInfo {
    pub fn decode(word: u32) -> BitInfo {
        BitInfo {
            version: (word & 0xff) as u8,
            is_last: word & (1 << 8) != 0,
            has_dictionary: word & (1 << 9) != 0,
            has_first_event: word & (1 << 10) != 0,
        }
    }

    pub fn encode(&self) -> u32 {
        let mut w = self.version as u32;
        if self.is_last {
            w |= 1 << 8;
        }
        if self.has_dictionary {
            w |= 1 << 9;
        }
        if self.has_first_event {
            w |= 1 << 10;
        }
        w
    }
}

/// v4 block header: 8 × 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub total_words: u32,
    pub block_number: u32,
    pub header_words: u32,
    pub event_count: u32,
    pub bit_info: BitInfo,
}

impl BlockHeader {
    pub const WORD_COUNT: usize = 8;
    pub const HEADER_WORDS: u32 = 8;

    pub fn decode(words: &[u32]) -> Result<BlockHeader> {
        if words.len() < Self::WORD_COUNT {
            return Err(Error::Truncated {
                offset: 0,
                expected: Self::WORD_COUNT * 4,
            });
        }
        let magic = words[7];
        if magic != MAGIC {
            return Err(Error::MagicMismatch {
                expected: MAGIC,
                found: magic,
            });
        }
        Ok(BlockHeader {
            total_words: words[0],
            block_number: words[1],
            header_words: words[2],
            event_count: words[3],
            bit_info: BitInfo::decode(words[5]),
        })
    }

    pub fn encode(&self) -> [u32; Self::WORD_COUNT] {
        [
            self.total_words,
            self.block_number,
            self.header_words,
            self.event_count,
            0, // reserved
            self.bit_info.encode(),
            0, // reserved
            MAGIC,
        ]
    }
}

/// v6 record header: 14 × 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_length_words: u32,
    pub record_number: u32,
    pub header_length_words: u32,
    pub event_count: u32,
    pub index_array_length_bytes: u32,
    pub bit_info: BitInfo,
    pub user_header_length_bytes: u32,
    pub uncompressed_data_length_bytes: u32,
    pub compression: CompressionKind,
    pub compressed_data_length_words: u32,
    pub user_register_1: u64,
    pub user_register_2: u64,
}

impl RecordHeader {
    pub const WORD_COUNT: usize = 14;
    pub const HEADER_WORDS: u32 = 14;

    pub fn decode(words: &[u32]) -> Result<RecordHeader> {
        if words.len() < Self::WORD_COUNT {
            return Err(Error::Truncated {
                offset: 0,
                expected: Self::WORD_COUNT * 4,
            });
        }
        let magic = words[7];
        if magic != MAGIC {
            return Err(Error::MagicMismatch {
                expected: MAGIC,
                found: magic,
            });
        }
        let compression = CompressionKind::from_nybble((words[9] >> 28) as u8)?;
        let compressed_data_length_words = words[9] & 0x0fff_ffff;
        Ok(RecordHeader {
            record_length_words: words[0],
            record_number: words[1],
            header_length_words: words[2],
            event_count: words[3],
            index_array_length_bytes: words[4],
            bit_info: BitInfo::decode(words[5]),
            user_header_length_bytes: words[6],
            uncompressed_data_length_bytes: words[8],
            compression,
            compressed_data_length_words,
            user_register_1: ((words[10] as u64) << 32) | words[11] as u64,
            user_register_2: ((words[12] as u64) << 32) | words[13] as u64,
        })
    }

    pub fn encode(&self) -> [u32; Self::WORD_COUNT] {
        [
            self.record_length_words,
            self.record_number,
            self.header_length_words,
            self.event_count,
            self.index_array_length_bytes,
            self.bit_info.encode(),
            self.user_header_length_bytes,
            MAGIC,
            self.uncompressed_data_length_bytes,
            ((self.compression.to_nybble() as u32) << 28) | (self.compressed_data_length_words & 0x0fff_ffff),
            (self.user_register_1 >> 32) as u32,
            (self.user_register_1 & 0xffff_ffff) as u32,
            (self.user_register_2 >> 32) as u32,
            (self.user_register_2 & 0xffff_ffff) as u32,
        ]
    }
}

/// v6 file header: 14 × 32-bit words echoing the record
/// layout, with the first word replaced by a file type code and two extra
/// 64-bit fields (trailer position, user register) in place of the record's
/// event-index bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub file_type: u32,
    pub generation: u32,
    pub header_length_words: u32,
    pub record_count: u32,
    pub bit_info: BitInfo,
    pub user_header_length_bytes: u32,
    pub trailer_position: u64,
    pub user_register: u64,
}

impl FileHeader {
    pub const WORD_COUNT: usize = 14;
    pub const HEADER_WORDS: u32 = 14;

    pub fn is_hipo(&self) -> bool {
        self.file_type == FILE_TYPE_HIPO
    }

    pub fn decode(words: &[u32]) -> Result<FileHeader> {
        if words.len() < Self::WORD_COUNT {
            return Err(Error::Truncated {
                offset: 0,
                expected: Self::WORD_COUNT * 4,
            });
        }
        let file_type = words[0];
        if file_type != FILE_TYPE_EVIO && file_type != FILE_TYPE_HIPO {
            return Err(Error::MagicMismatch {
                expected: FILE_TYPE_EVIO,
                found: file_type,
            });
        }
        let magic = words[7];
        if magic != MAGIC {
            return Err(Error::MagicMismatch {
                expected: MAGIC,
                found: magic,
            });
        }
        Ok(FileHeader {
            file_type,
            generation: words[1],
            header_length_words: words[2],
            record_count: words[3],
            bit_info: BitInfo::decode(words[5]),
            user_header_length_bytes: words[6],
            trailer_position: ((words[8] as u64) << 32) | words[9] as u64,
            user_register: ((words[10] as u64) << 32) | words[11] as u64,
        })
    }

    pub fn encode(&self) -> [u32; Self::WORD_COUNT] {
        [
            self.file_type,
            self.generation,
            self.header_length_words,
            self.record_count,
            0, // reserved (no per-file index-array length)
            self.bit_info.encode(),
            self.user_header_length_bytes,
            MAGIC,
            (self.trailer_position >> 32) as u32,
            (self.trailer_position & 0xffff_ffff) as u32,
            (self.user_register >> 32) as u32,
            (self.user_register & 0xffff_ffff) as u32,
            0,
            0,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_round_trips() {
        let h = BlockHeader {
            total_words: 100,
            block_number: 3,
            header_words: BlockHeader::HEADER_WORDS,
            event_count: 5,
            bit_info: BitInfo {
                version: 4,
                is_last: true,
                has_dictionary: false,
                has_first_event: true,
            },
        };
        let words = h.encode();
        assert_eq!(BlockHeader::decode(&words).unwrap(), h);
    }

    #[test]
    fn block_header_rejects_bad_magic() {
        let mut words = [0u32; BlockHeader::WORD_COUNT];
        words[7] = 0xdead_beef;
        assert!(matches!(
            BlockHeader::decode(&words),
            Err(Error::MagicMismatch { .. })
        ));
    }

    #[test]
    fn record_header_round_trips() {
        let h = RecordHeader {
            record_length_words: 200,
            record_number: 1,
            header_length_words: RecordHeader::HEADER_WORDS,
            event_count: 10,
            index_array_length_bytes: 40,
            bit_info: BitInfo {
                version: 6,
                is_last: false,
                has_dictionary: true,
                has_first_event: false,
            },
            user_header_length_bytes: 0,
            uncompressed_data_length_bytes: 1000,
            compression: CompressionKind::Lz4,
            compressed_data_length_words: 100,
            user_register_1: 0x1122_3344_5566_7788,
            user_register_2: 0,
        };
        let words = h.encode();
        assert_eq!(RecordHeader::decode(&words).unwrap(), h);
    }

    #[test]
    fn file_header_accepts_both_hipo_and_evio_type_codes() {
        let base = FileHeader {
            file_type: FILE_TYPE_EVIO,
            generation: 6,
            header_length_words: FileHeader::HEADER_WORDS,
            record_count: 0,
            bit_info: BitInfo {
                version: 6,
                is_last: false,
                has_dictionary: false,
                has_first_event: false,
            },
            user_header_length_bytes: 0,
            trailer_position: 0,
            user_register: 0,
        };
        assert_eq!(FileHeader::decode(&base.encode()).unwrap(), base);

        let hipo = FileHeader {
            file_type: FILE_TYPE_HIPO,
            ..base
        };
        let decoded = FileHeader::decode(&hipo.encode()).unwrap();
        assert!(decoded.is_hipo());
    }
}
