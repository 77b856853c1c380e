//! Reader: sequential and random-access reading of v4 block files and
//! v6/HIPO record files.
//!
//! Construction walks the file once, building a table of record/block file
//! offsets and cumulative event counts (the trailer's own index is not yet
//! consumed for O(1) indexing — see `DESIGN.md` — so this always performs
//! a per-record/per-block header scan rather than jumping straight to the
//! trailer). After that, at most one record or block is held decoded in
//! memory at a time, evicted and replaced as `get_event` moves between
//! units.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::block::Block;
use crate::buffer::{read_u32_words, ByteOrder};
use crate::error::{Error, Result};
use crate::header::{
    decode_sidecar_user_header, BlockHeader, FileHeader, RecordHeader, FILE_TYPE_EVIO,
    FILE_TYPE_HIPO, MAGIC,
};
use crate::record::Record;
use crate::tree::{Payload, StructureNode};
use crate::types::StructureKind;

enum Source {
    File(File),
    Buffer(Vec<u8>),
}

impl Source {
    fn len(&self) -> Result<u64> {
        Ok(match self {
            Source::File(f) => f.metadata()?.len(),
            Source::Buffer(b) => b.len() as u64,
        })
    }

    /// Reads exactly `len` bytes starting at `offset`. Files seek for each
    /// call so the reader never materializes the whole file in memory;
    /// buffers just slice.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        match self {
            Source::File(f) => {
                f.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; len];
                f.read_exact(&mut buf).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        Error::Truncated {
                            offset: offset as usize,
                            expected: len,
                        }
                    } else {
                        Error::Io(e)
                    }
                })?;
                Ok(buf)
            }
            Source::Buffer(b) => {
                let start = offset as usize;
                if start + len > b.len() {
                    return Err(Error::Truncated {
                        offset: start,
                        expected: len,
                    });
                }
                Ok(b[start..start + len].to_vec())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordEntry {
    offset: u64,
    header: RecordHeader,
    /// Count of real (non-dictionary/first-event) events before this record.
    cumulative_before: u32,
}

#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    offset: u64,
    header: BlockHeader,
    cumulative_before: u32,
    /// Events to skip at the front of this block (dictionary/first-event
    /// banks embedded in block 0).
    skip: u32,
}

enum Framing {
    V6 {
        records: Vec<RecordEntry>,
    },
    V4 {
        blocks: Vec<BlockEntry>,
    },
}

enum Cached {
    Record(usize, Record),
    Block(usize, Block),
}

/// Parses headers, indexes records/blocks, and hands out events by number
/// or via forward iteration.
pub struct Reader {
    source: Source,
    order: ByteOrder,
    version: u8,
    dictionary_xml: Option<String>,
    first_event: Option<Vec<u8>>,
    framing: Framing,
    event_count: u32,
    cached: Option<Cached>,
    /// Next 0-based event index `next_event`/`parse_next_event` will return.
    cursor: u32,
    /// Byte offset of the last unit whose header decoded successfully;
    /// used to keep the reader positioned at the start of an offending
    /// record/block after a decode failure.
    last_good_offset: u64,
}

impl Reader {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Reader> {
        let file = File::open(path)?;
        Reader::open(Source::File(file))
    }

    pub fn from_buffer(bytes: Vec<u8>) -> Result<Reader> {
        Reader::open(Source::Buffer(bytes))
    }

    fn open(mut source: Source) -> Result<Reader> {
        let len = source.len()?;
        let probe_len = len.min(56) as usize;
        if probe_len < 32 {
            return Err(Error::Truncated {
                offset: 0,
                expected: 32,
            });
        }
        let probe = source.read_at(0, probe_len)?;
        let (order, is_v6) = detect(&probe)?;

        if is_v6 {
            Reader::open_v6(source, order, len)
        } else {
            Reader::open_v4(source, order, len)
        }
    }

    fn open_v6(mut source: Source, order: ByteOrder, len: u64) -> Result<Reader> {
        let header_bytes = source.read_at(0, FileHeader::WORD_COUNT * 4)?;
        let words = read_u32_words(
            &mut std::io::Cursor::new(&header_bytes),
            order,
            FileHeader::WORD_COUNT,
        )?;
        let file_header = FileHeader::decode(&words)?;

        let user_header_len = file_header.user_header_length_bytes as usize;
        let (dictionary_xml, first_event) = if user_header_len > 0 {
            let bytes = source.read_at((FileHeader::WORD_COUNT * 4) as u64, user_header_len)?;
            let (xml, fe) = decode_sidecar_user_header(&bytes, order)?;
            (if xml.is_empty() { None } else { Some(xml) }, fe)
        } else {
            (None, None)
        };

        let mut offset = (FileHeader::WORD_COUNT * 4) as u64 + user_header_len as u64;
        let mut records = Vec::new();
        let mut cumulative = 0u32;
        let mut last_good_offset = 0u64;

        while offset < len {
            let header_bytes = source.read_at(offset, RecordHeader::WORD_COUNT * 4)?;
            let words = read_u32_words(
                &mut std::io::Cursor::new(&header_bytes),
                order,
                RecordHeader::WORD_COUNT,
            )?;
            let header = RecordHeader::decode(&words)?;
            last_good_offset = offset;
            tracing::debug!(offset, record_number = header.record_number, event_count = header.event_count, "indexed record");

            if !crate::record::is_trailer(&header) {
                records.push(RecordEntry {
                    offset,
                    header,
                    cumulative_before: cumulative,
                });
                cumulative += header.event_count;
            }
            offset += header.record_length_words as u64 * 4;
            if header.bit_info.is_last {
                break;
            }
        }

        Ok(Reader {
            source,
            order,
            version: 6,
            dictionary_xml,
            first_event,
            framing: Framing::V6 { records },
            event_count: cumulative,
            cached: None,
            cursor: 0,
            last_good_offset,
        })
    }

    fn open_v4(mut source: Source, order: ByteOrder, len: u64) -> Result<Reader> {
        let mut offset = 0u64;
        let mut blocks = Vec::new();
        let mut cumulative = 0u32;
        let mut dictionary_xml = None;
        let mut first_event = None;
        let mut last_good_offset = 0u64;
        let mut block_index = 0usize;

        while offset < len {
            let header_bytes = source.read_at(offset, BlockHeader::WORD_COUNT * 4)?;
            let words = read_u32_words(
                &mut std::io::Cursor::new(&header_bytes),
                order,
                BlockHeader::WORD_COUNT,
            )?;
            let header = BlockHeader::decode(&words)?;
            last_good_offset = offset;
            tracing::debug!(offset, block_number = header.block_number, event_count = header.event_count, "indexed block");

            let mut skip = 0u32;
            if block_index == 0 && (header.bit_info.has_dictionary || header.bit_info.has_first_event) {
                let block_bytes = source.read_at(offset, header.total_words as usize * 4)?;
                let (block, _) = Block::decode(&block_bytes, order)?;
                let mut next = 0usize;
                if header.bit_info.has_dictionary {
                    let mut buf = crate::buffer::ByteBuffer::wrap(block.get_event(next)?.to_vec(), order);
                    let node = StructureNode::decode(&mut buf, StructureKind::Bank)?;
                    if let crate::tree::Body::Leaf(Payload::StringArray(strings)) = node.body {
                        dictionary_xml = strings.into_iter().next();
                    }
                    next += 1;
                    skip += 1;
                }
                if header.bit_info.has_first_event {
                    first_event = Some(block.get_event(next)?.to_vec());
                    skip += 1;
                }
            }

            let user_events = header.event_count - skip;
            blocks.push(BlockEntry {
                offset,
                header,
                cumulative_before: cumulative,
                skip,
            });
            cumulative += user_events;
            offset += header.total_words as u64 * 4;
            block_index += 1;
            if header.bit_info.is_last {
                break;
            }
        }

        Ok(Reader {
            source,
            order,
            version: 4,
            dictionary_xml,
            first_event,
            framing: Framing::V4 { blocks },
            event_count: cumulative,
            cached: None,
            cursor: 0,
            last_good_offset,
        })
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Number of records (v6) or blocks (v4) the file was indexed into,
    /// excluding a v6 trailer.
    pub fn record_count(&self) -> usize {
        match &self.framing {
            Framing::V6 { records } => records.len(),
            Framing::V4 { blocks } => blocks.len(),
        }
    }

    pub fn evio_version(&self) -> u8 {
        self.version
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn dictionary_xml(&self) -> Option<&str> {
        self.dictionary_xml.as_deref()
    }

    pub fn first_event(&self) -> Option<&[u8]> {
        self.first_event.as_deref()
    }

    fn locate_record(&self, one_based: u32) -> Result<usize> {
        let records = match &self.framing {
            Framing::V6 { records } => records,
            Framing::V4 { .. } => unreachable!(),
        };
        if one_based == 0 || one_based > self.event_count {
            return Err(Error::EventIndexOutOfRange {
                index: one_based,
                count: self.event_count,
            });
        }
        let zero_based = one_based - 1;
        // Binary search for the last record whose cumulative_before <= zero_based.
        let mut lo = 0usize;
        let mut hi = records.len();
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if records[mid].cumulative_before <= zero_based {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn locate_block(&self, one_based: u32) -> Result<usize> {
        let blocks = match &self.framing {
            Framing::V4 { blocks } => blocks,
            Framing::V6 { .. } => unreachable!(),
        };
        if one_based == 0 || one_based > self.event_count {
            return Err(Error::EventIndexOutOfRange {
                index: one_based,
                count: self.event_count,
            });
        }
        let zero_based = one_based - 1;
        let mut lo = 0usize;
        let mut hi = blocks.len();
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if blocks[mid].cumulative_before <= zero_based {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// 1-based random access: binary-searches the cumulative index, loads
    /// the containing record/block (decompressing if needed, caching it),
    /// and returns the event's raw serialized bytes.
    pub fn get_event(&mut self, one_based: u32) -> Result<Vec<u8>> {
        match &self.framing {
            Framing::V6 { .. } => {
                let idx = self.locate_record(one_based)?;
                let record = self.load_record(idx)?;
                let entry = match &self.framing {
                    Framing::V6 { records } => records[idx],
                    _ => unreachable!(),
                };
                let local = (one_based - 1 - entry.cumulative_before) as usize;
                record.get_event(local).map(|b| b.to_vec())
            }
            Framing::V4 { .. } => {
                let idx = self.locate_block(one_based)?;
                let block = self.load_block(idx)?;
                let entry = match &self.framing {
                    Framing::V4 { blocks } => blocks[idx],
                    _ => unreachable!(),
                };
                let local = (one_based - 1 - entry.cumulative_before) as usize + entry.skip as usize;
                block.get_event(local).map(|b| b.to_vec())
            }
        }
    }

    fn load_record(&mut self, idx: usize) -> Result<&Record> {
        if let Some(Cached::Record(cached_idx, _)) = &self.cached {
            if *cached_idx == idx {
                return match &self.cached {
                    Some(Cached::Record(_, r)) => Ok(r),
                    _ => unreachable!(),
                };
            }
        }
        let entry = match &self.framing {
            Framing::V6 { records } => records[idx],
            _ => unreachable!(),
        };
        let total_bytes = entry.header.record_length_words as usize * 4;
        let bytes = self.source.read_at(entry.offset, total_bytes)?;
        tracing::trace!(offset = entry.offset, "decoding record (possibly decompressing)");
        let (record, _order) = Record::decode(&bytes, self.order)?;
        self.cached = Some(Cached::Record(idx, record));
        match &self.cached {
            Some(Cached::Record(_, r)) => Ok(r),
            _ => unreachable!(),
        }
    }

    fn load_block(&mut self, idx: usize) -> Result<&Block> {
        if let Some(Cached::Block(cached_idx, _)) = &self.cached {
            if *cached_idx == idx {
                return match &self.cached {
                    Some(Cached::Block(_, b)) => Ok(b),
                    _ => unreachable!(),
                };
            }
        }
        let entry = match &self.framing {
            Framing::V4 { blocks } => blocks[idx],
            _ => unreachable!(),
        };
        let total_bytes = entry.header.total_words as usize * 4;
        let bytes = self.source.read_at(entry.offset, total_bytes)?;
        let (block, _order) = Block::decode(&bytes, self.order)?;
        self.cached = Some(Cached::Block(idx, block));
        match &self.cached {
            Some(Cached::Block(_, b)) => Ok(b),
            _ => unreachable!(),
        }
    }

    /// As `get_event`, but parses the returned bytes into a tree.
    pub fn parse_event(&mut self, one_based: u32) -> Result<StructureNode> {
        let bytes = self.get_event(one_based)?;
        let mut buf = crate::buffer::ByteBuffer::wrap(bytes, self.order);
        StructureNode::decode(&mut buf, StructureKind::Bank)
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Positions forward iteration so the next `next_event`/`parse_next_event`
    /// call returns event `n` (1-based).
    pub fn go_to_event_number(&mut self, n: u32) -> Result<()> {
        if n == 0 || n > self.event_count + 1 {
            return Err(Error::EventIndexOutOfRange {
                index: n,
                count: self.event_count,
            });
        }
        self.cursor = n - 1;
        Ok(())
    }

    /// Positions forward iteration at whichever event starts the record or
    /// block containing byte offset `offset`.
    pub fn position(&mut self, offset: u64) -> Result<()> {
        let cumulative_before = match &self.framing {
            Framing::V6 { records } => records
                .iter()
                .rev()
                .find(|r| r.offset <= offset)
                .map(|r| r.cumulative_before),
            Framing::V4 { blocks } => blocks
                .iter()
                .rev()
                .find(|b| b.offset <= offset)
                .map(|b| b.cumulative_before),
        };
        self.cursor = cumulative_before.unwrap_or(0);
        Ok(())
    }

    pub fn next_event(&mut self) -> Result<Option<Vec<u8>>> {
        if self.cursor >= self.event_count {
            return Ok(None);
        }
        let event = self.get_event(self.cursor + 1)?;
        self.cursor += 1;
        Ok(Some(event))
    }

    pub fn parse_next_event(&mut self) -> Result<Option<StructureNode>> {
        match self.next_event()? {
            None => Ok(None),
            Some(bytes) => {
                let mut buf = crate::buffer::ByteBuffer::wrap(bytes, self.order);
                Ok(Some(StructureNode::decode(&mut buf, StructureKind::Bank)?))
            }
        }
    }

    #[allow(dead_code)]
    fn last_good_offset(&self) -> u64 {
        self.last_good_offset
    }
}

/// Determines byte order and v4-vs-v6 framing by trying both orders against
/// both header shapes: a reader that finds the byte-swapped magic value
/// flips its declared byte order and swaps all subsequent header fields.
fn detect(probe: &[u8]) -> Result<(ByteOrder, bool)> {
    for &order in &[ByteOrder::Big, ByteOrder::Little] {
        if probe.len() >= 56 {
            let words = read_u32_words(&mut std::io::Cursor::new(&probe[..56]), order, 14)?;
            let is_file_type = words[0] == FILE_TYPE_EVIO || words[0] == FILE_TYPE_HIPO;
            if is_file_type && words[7] == MAGIC {
                return Ok((order, true));
            }
        }
        if probe.len() >= 32 {
            let words = read_u32_words(&mut std::io::Cursor::new(&probe[..32]), order, 8)?;
            if words[7] == MAGIC {
                return Ok((order, false));
            }
        }
    }
    Err(Error::MagicMismatch {
        expected: MAGIC,
        found: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::CompressionKind;
    use crate::types::DataType;
    use crate::writer::{Writer, WriterConfig};

    fn sample_event(tag: u16, value: i32) -> StructureNode {
        let mut bank = StructureNode::new_bank(tag, 0, DataType::Int32);
        bank.set_payload(Payload::Int32(vec![value])).unwrap();
        bank
    }

    #[test]
    fn random_access_matches_write_order() {
        let config = WriterConfig::default().with_byte_order(ByteOrder::Little);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..10 {
            writer.write_event(&sample_event(1, i)).unwrap();
        }
        writer.close().unwrap();
        let bytes = writer.into_buffer().unwrap();

        let mut reader = Reader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 10);
        for i in 0..10u32 {
            let node = reader.parse_event(i + 1).unwrap();
            match node.body {
                crate::tree::Body::Leaf(Payload::Int32(v)) => assert_eq!(v, vec![i as i32]),
                _ => panic!("expected int32 leaf"),
            }
        }
    }

    #[test]
    fn forward_iteration_terminates_with_none() {
        let mut writer = Writer::new_buffer(WriterConfig::default()).unwrap();
        writer.write_event(&sample_event(1, 1)).unwrap();
        writer.close().unwrap();
        let mut reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert!(reader.next_event().unwrap().is_some());
        assert!(reader.next_event().unwrap().is_none());
        reader.rewind();
        assert!(reader.next_event().unwrap().is_some());
    }

    #[test]
    fn v4_round_trips_through_reader() {
        let config = WriterConfig::default()
            .with_version(4)
            .with_byte_order(ByteOrder::Big);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..4 {
            writer.write_event(&sample_event(2, i)).unwrap();
        }
        writer.close().unwrap();
        let mut reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert_eq!(reader.evio_version(), 4);
        assert_eq!(reader.event_count(), 4);
        assert_eq!(reader.byte_order(), ByteOrder::Big);
    }

    #[test]
    fn v4_dictionary_and_first_event_are_recovered_and_not_counted() {
        let xml = r#"<xmlDict><dictEntry name="A" tag="2" num="0"/></xmlDict>"#;
        let fe = sample_event(9, 99).encode(ByteOrder::Little).unwrap();
        let config = WriterConfig::default()
            .with_version(4)
            .with_byte_order(ByteOrder::Little)
            .with_dictionary_xml(xml)
            .with_first_event(fe.clone());
        let mut writer = Writer::new_buffer(config).unwrap();
        writer.write_event(&sample_event(2, 1)).unwrap();
        writer.close().unwrap();
        let mut reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert_eq!(reader.event_count(), 1);
        assert_eq!(reader.dictionary_xml(), Some(xml));
        assert_eq!(reader.first_event(), Some(fe.as_slice()));
    }

    #[test]
    fn opposite_byte_order_file_is_detected() {
        let config = WriterConfig::default().with_byte_order(ByteOrder::Big);
        let mut writer = Writer::new_buffer(config).unwrap();
        writer.write_event(&sample_event(1, 5)).unwrap();
        writer.close().unwrap();
        let reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert_eq!(reader.byte_order(), ByteOrder::Big);
    }

    #[test]
    fn compressed_record_round_trips_through_reader() {
        let config = WriterConfig::default().with_compression(CompressionKind::Lz4);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..20 {
            writer.write_event(&sample_event(3, i)).unwrap();
        }
        writer.close().unwrap();
        let mut reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert_eq!(reader.event_count(), 20);
        let node = reader.parse_event(10).unwrap();
        match node.body {
            crate::tree::Body::Leaf(Payload::Int32(v)) => assert_eq!(v, vec![9]),
            _ => panic!("expected int32 leaf"),
        }
    }

    #[test]
    fn out_of_range_event_index_is_an_error() {
        let mut writer = Writer::new_buffer(WriterConfig::default()).unwrap();
        writer.write_event(&sample_event(1, 1)).unwrap();
        writer.close().unwrap();
        let mut reader = Reader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert!(matches!(
            reader.get_event(5),
            Err(Error::EventIndexOutOfRange { .. })
        ));
    }
}
