//! Writer: accepts events, batches them into v6 records or v4 blocks,
//! flushes to a file or in-memory buffer, optionally splitting by size,
//! optionally offloading compression to the background ring in [`pool`].

mod pool;

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::block::Block;
use crate::buffer::{write_u32_words, ByteOrder};
use crate::error::{Error, Result};
use crate::header::{
    encode_sidecar_user_header, BitInfo, CompressionKind, FileHeader, FILE_TYPE_EVIO,
};
use crate::record::Record;
use crate::tree::{Payload, StructureNode};
use crate::types::DataType;
use pool::{CompressionPool, PendingRecord};

/// Construction parameters for a [`Writer`]. Plain builder struct with a
/// `Default`, collapsing the source's two diverging v4/v6 constructors
/// into a single parameter record with `version` as a field.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WriterConfig {
    pub version: u8,
    pub max_record_bytes: u32,
    pub max_events_per_record: u32,
    pub byte_order: ByteOrder,
    /// Empty string means "no dictionary".
    pub dictionary_xml: String,
    pub overwrite: bool,
    pub append: bool,
    /// Pre-serialized bytes of an event re-emitted at the start of every
    /// split file segment.
    pub first_event: Option<Vec<u8>>,
    pub stream_id: u32,
    pub split_number: u32,
    pub split_increment: u32,
    pub stream_count: u32,
    /// `None` means "never split"; `Some(n)` splits once the current file
    /// reaches at least `n` bytes.
    pub split_bytes: Option<u64>,
    pub compression: CompressionKind,
    /// 0 means compress synchronously on the caller's thread.
    pub compression_threads: usize,
    pub ring_size: usize,
    /// v6 file-header type code. `FILE_TYPE_EVIO` by default; set to
    /// `FILE_TYPE_HIPO` to emit a HIPO-flavored file (same record framing,
    /// different file-header type code). Ignored for v4.
    pub file_type: u32,
}

impl Default for WriterConfig {
    fn default() -> WriterConfig {
        WriterConfig {
            version: 6,
            max_record_bytes: 8 * 1024 * 1024,
            max_events_per_record: 10_000,
            byte_order: ByteOrder::native(),
            dictionary_xml: String::new(),
            overwrite: true,
            append: false,
            first_event: None,
            stream_id: 0,
            split_number: 1,
            split_increment: 1,
            stream_count: 1,
            split_bytes: None,
            compression: CompressionKind::None,
            compression_threads: 0,
            ring_size: 4,
            file_type: FILE_TYPE_EVIO,
        }
    }
}

impl WriterConfig {
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
    pub fn with_max_record_bytes(mut self, n: u32) -> Self {
        self.max_record_bytes = n;
        self
    }
    pub fn with_max_events_per_record(mut self, n: u32) -> Self {
        self.max_events_per_record = n;
        self
    }
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }
    pub fn with_dictionary_xml(mut self, xml: impl Into<String>) -> Self {
        self.dictionary_xml = xml.into();
        self
    }
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }
    pub fn with_first_event(mut self, bytes: Vec<u8>) -> Self {
        self.first_event = Some(bytes);
        self
    }
    pub fn with_stream(mut self, stream_id: u32, stream_count: u32) -> Self {
        self.stream_id = stream_id;
        self.stream_count = stream_count;
        self
    }
    pub fn with_split_bytes(mut self, n: u64) -> Self {
        self.split_bytes = Some(n);
        self
    }
    pub fn with_split_number(mut self, seed: u32, increment: u32) -> Self {
        self.split_number = seed;
        self.split_increment = increment;
        self
    }
    pub fn with_compression(mut self, kind: CompressionKind) -> Self {
        self.compression = kind;
        self
    }
    pub fn with_compression_threads(mut self, n: usize) -> Self {
        self.compression_threads = n;
        self
    }
    pub fn with_ring_size(mut self, n: usize) -> Self {
        self.ring_size = n;
        self
    }
    pub fn with_file_type(mut self, file_type: u32) -> Self {
        self.file_type = file_type;
        self
    }
}

/// Substitutes printf-style `%d` tokens in a split/stream filename template:
/// the first `%d` becomes the stream id (only if more than one stream is
/// configured), every other `%d` becomes the split number.
fn format_path(template: &str, stream_id: u32, split_number: u32, stream_count: u32) -> String {
    let mut out = String::new();
    let mut rest = template;
    let mut seen_stream_token = false;
    while let Some(pos) = rest.find("%d") {
        out.push_str(&rest[..pos]);
        if stream_count > 1 && !seen_stream_token {
            out.push_str(&stream_id.to_string());
            seen_stream_token = true;
        } else {
            out.push_str(&split_number.to_string());
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

fn open_for_writer(path: &str, overwrite: bool, append: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    } else if overwrite {
        opts.truncate(true);
    } else {
        opts.create_new(true);
    }
    Ok(opts.open(path)?)
}

enum Target {
    File {
        file: File,
        /// `Some` when the path carries `%d` tokens and further splits are
        /// possible; `None` for a plain fixed path.
        path_template: Option<String>,
        bytes_written: u64,
        split_number: u32,
    },
    Buffer(Vec<u8>),
}

impl Target {
    fn position(&self) -> u64 {
        match self {
            Target::File { bytes_written, .. } => *bytes_written,
            Target::Buffer(buf) => buf.len() as u64,
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Target::File {
                file, bytes_written, ..
            } => {
                file.write_all(bytes)?;
                *bytes_written += bytes.len() as u64;
            }
            Target::Buffer(buf) => buf.extend_from_slice(bytes),
        }
        Ok(())
    }

    /// Overwrites 4 bytes at an absolute offset already written, then
    /// restores the cursor to end-of-file for further appends. Used to
    /// patch a v4 block's bit-info word once the following block (or
    /// `close()`) reveals it was actually the last one.
    fn patch_u32_at(&mut self, offset: u64, value: u32, order: ByteOrder) -> Result<()> {
        match self {
            Target::File {
                file, bytes_written, ..
            } => {
                file.seek(SeekFrom::Start(offset))?;
                let mut word = Vec::with_capacity(4);
                write_u32_words(&mut word, order, &[value])?;
                file.write_all(&word)?;
                file.seek(SeekFrom::Start(*bytes_written))?;
            }
            Target::Buffer(buf) => {
                let mut word = Vec::with_capacity(4);
                write_u32_words(&mut word, order, &[value])?;
                let start = offset as usize;
                buf[start..start + 4].copy_from_slice(&word);
            }
        }
        Ok(())
    }

    /// As `patch_u32_at`, but for a big `(high, low)` word pair — used to
    /// patch the v6 file header's `trailer_position` once the trailer has
    /// actually been written, so a reader that trusts the file header can
    /// jump straight to the trailer's index instead of scanning for it.
    fn patch_u64_at(&mut self, offset: u64, value: u64, order: ByteOrder) -> Result<()> {
        self.patch_u32_at(offset, (value >> 32) as u32, order)?;
        self.patch_u32_at(offset + 4, (value & 0xffff_ffff) as u32, order)
    }
}

fn dictionary_event(xml: &str, order: ByteOrder) -> Result<Vec<u8>> {
    let mut bank = StructureNode::new_bank(0, 0, DataType::StringArray);
    bank.set_payload(Payload::StringArray(vec![xml.to_string()]))?;
    bank.encode(order)
}

/// Accepts events, batches them into records/blocks, and flushes them to a
/// file or buffer.
pub struct Writer {
    config: WriterConfig,
    target: Target,
    pending_events: Vec<Vec<u8>>,
    pending_bytes: usize,
    record_number: u32,
    block_number: u32,
    poisoned: bool,
    closed: bool,
    is_first_record_of_file: bool,
    /// v4 only: absolute file offset of the bit-info word (word 5) of the
    /// most recently written block, so `close`/split can flip its
    /// last-block bit without re-writing the whole block.
    last_block_bitinfo_offset: Option<u64>,
    /// v6 only: `(file offset, record length in words)` per record written
    /// to the current file, consumed by the trailer on close/split.
    trailer_index: Vec<(u64, u32)>,
    /// v6 only: absolute file offset of the current segment's file header,
    /// so the trailer's own offset can be patched into it once known.
    file_header_offset: u64,
    pool: Option<CompressionPool>,
}

impl Writer {
    pub fn new_file(path: impl Into<String>, config: WriterConfig) -> Result<Writer> {
        let path = path.into();
        let has_template = path.contains("%d");
        if config.split_bytes.is_some() && !has_template {
            return Err(Error::MalformedHeader(
                "split_bytes requires a path containing a %d template".into(),
            ));
        }
        let resolved = if has_template {
            format_path(
                &path,
                config.stream_id,
                config.split_number,
                config.stream_count,
            )
        } else {
            path.clone()
        };
        let file = open_for_writer(&resolved, config.overwrite, config.append)?;
        let target = Target::File {
            file,
            path_template: has_template.then_some(path),
            bytes_written: 0,
            split_number: config.split_number,
        };
        Writer::new_with_target(target, config)
    }

    pub fn new_buffer(config: WriterConfig) -> Result<Writer> {
        Writer::new_with_target(Target::Buffer(Vec::new()), config)
    }

    fn new_with_target(target: Target, config: WriterConfig) -> Result<Writer> {
        let pool = if config.compression_threads > 0 {
            Some(CompressionPool::new(
                config.ring_size,
                config.compression_threads,
            ))
        } else {
            None
        };
        let mut writer = Writer {
            config,
            target,
            pending_events: Vec::new(),
            pending_bytes: 0,
            record_number: 0,
            block_number: 0,
            poisoned: false,
            closed: false,
            is_first_record_of_file: true,
            last_block_bitinfo_offset: None,
            trailer_index: Vec::new(),
            file_header_offset: 0,
            pool,
        };
        if writer.config.version == 6 {
            writer.file_header_offset = writer.target.position();
            writer.write_file_header()?;
        }
        Ok(writer)
    }

    fn write_file_header(&mut self) -> Result<()> {
        let user_header = encode_sidecar_user_header(
            &self.config.dictionary_xml,
            self.config.first_event.as_deref(),
            self.config.byte_order,
        );
        let header = FileHeader {
            file_type: self.config.file_type,
            generation: 6,
            header_length_words: FileHeader::HEADER_WORDS,
            record_count: 0,
            bit_info: BitInfo {
                version: 6,
                is_last: false,
                has_dictionary: !self.config.dictionary_xml.is_empty(),
                has_first_event: self.config.first_event.is_some(),
            },
            user_header_length_bytes: user_header.len() as u32,
            trailer_position: 0,
            user_register: 0,
        };
        let mut bytes = Vec::new();
        write_u32_words(&mut bytes, self.config.byte_order, &header.encode())?;
        bytes.extend_from_slice(&user_header);
        self.target.write_bytes(&bytes)
    }

    fn check_open(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::WriterClosed);
        }
        if self.closed {
            return Err(Error::WriterClosed);
        }
        Ok(())
    }

    /// Appends one event to the current in-flight record/block. Flushes
    /// first if adding it would exceed the configured size or count limit.
    pub fn write_event(&mut self, event: &StructureNode) -> Result<()> {
        let bytes = event.encode(self.config.byte_order)?;
        self.write_event_bytes(bytes)
    }

    /// As `write_event`, but for an already-serialized event (e.g. from a
    /// [`crate::builder::CompactBuilder`] or a [`crate::scan::ScannedNode`]
    /// forwarded unparsed).
    pub fn write_event_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.check_open()?;
        let result = self.write_event_bytes_inner(bytes);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "poisoning writer after failed write");
            self.poisoned = true;
        }
        result
    }

    fn write_event_bytes_inner(&mut self, bytes: Vec<u8>) -> Result<()> {
        let would_exceed_bytes = !self.pending_events.is_empty()
            && (self.pending_bytes + bytes.len()) as u32 > self.config.max_record_bytes;
        let would_exceed_count =
            self.pending_events.len() as u32 >= self.config.max_events_per_record;
        if would_exceed_bytes || would_exceed_count {
            self.flush_current(false)?;
        }
        self.pending_bytes += bytes.len();
        self.pending_events.push(bytes);
        Ok(())
    }

    /// Finalizes the current record/block without splitting.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        let result = (|| {
            self.flush_current(false)?;
            if let Some(pool) = &self.pool {
                for bytes in pool.drain_remaining()? {
                    self.commit_record_bytes(bytes)?;
                }
            }
            Ok(())
        })();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Flushes any in-flight record/block, appends a v6 trailer (or patches
    /// the v4 last-block flag), and finalizes the file.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = (|| {
            self.flush_current(true)?;
            if let Some(pool) = &self.pool {
                for bytes in pool.drain_remaining()? {
                    self.commit_record_bytes(bytes)?;
                }
            }
            if self.config.version == 6 {
                self.write_trailer()?;
            }
            if let Target::File { file, .. } = &mut self.target {
                file.flush()?;
            }
            Ok(())
        })();
        self.closed = true;
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Consumes the writer and returns the buffer's bytes. Only valid for
    /// an in-memory (non-file) writer; the writer must already be closed.
    pub fn into_buffer(self) -> Result<Vec<u8>> {
        match self.target {
            Target::Buffer(buf) => Ok(buf),
            Target::File { .. } => Err(Error::TypeMismatch(
                "into_buffer called on a file-backed writer".into(),
            )),
        }
    }

    fn flush_current(&mut self, is_last: bool) -> Result<()> {
        if self.config.version == 6 {
            self.flush_record(is_last)
        } else {
            self.flush_block(is_last)
        }
    }

    fn flush_block(&mut self, force_last: bool) -> Result<()> {
        if self.pending_events.is_empty() && !force_last {
            return Ok(());
        }
        if self.pending_events.is_empty() && force_last {
            // Nothing new to write; just flip the last-block bit on
            // whatever was already written (or, if nothing ever was, fall
            // through and emit a single empty last block).
            if let Some(offset) = self.last_block_bitinfo_offset.take() {
                let bit_info = BitInfo {
                    version: 4,
                    is_last: true,
                    has_dictionary: false,
                    has_first_event: false,
                };
                self.target
                    .patch_u32_at(offset, bit_info.encode(), self.config.byte_order)?;
                return Ok(());
            }
        }

        let mut events = Vec::new();
        let mut has_dictionary = false;
        let mut has_first_event = false;
        if self.is_first_record_of_file {
            if !self.config.dictionary_xml.is_empty() {
                events.push(dictionary_event(
                    &self.config.dictionary_xml,
                    self.config.byte_order,
                )?);
                has_dictionary = true;
            }
            if let Some(fe) = self.config.first_event.clone() {
                events.push(fe);
                has_first_event = true;
            }
        }
        events.extend(std::mem::take(&mut self.pending_events));
        self.pending_bytes = 0;

        let block_number = self.block_number;
        self.block_number += 1;
        let offset = self.target.position();
        let bytes = Block::encode(
            &events,
            block_number,
            self.config.byte_order,
            force_last,
            has_dictionary,
            has_first_event,
        )?;
        self.target.write_bytes(&bytes)?;
        self.last_block_bitinfo_offset = if force_last { None } else { Some(offset + 5 * 4) };
        self.is_first_record_of_file = false;
        tracing::debug!(block_number, event_count = events.len(), force_last, "flushed block");

        self.maybe_split()
    }

    fn flush_record(&mut self, _force_last: bool) -> Result<()> {
        // The last-record bit is reserved exclusively for the trailer
        // written by `write_trailer`: a data record never carries it, even
        // the final one flushed at `close`, so the reader's linear scan
        // never stops short of the real trailer.
        if self.pending_events.is_empty() {
            return Ok(());
        }
        let events = std::mem::take(&mut self.pending_events);
        self.pending_bytes = 0;
        let record_number = self.record_number;
        self.record_number += 1;
        tracing::debug!(record_number, event_count = events.len(), "flushing record");

        let job = PendingRecord {
            events,
            user_header: Vec::new(),
            record_number,
            order: self.config.byte_order,
            compression: self.config.compression,
            has_dictionary: false,
            has_first_event: false,
            is_last: false,
        };

        if let Some(pool) = &self.pool {
            for bytes in pool.submit(job)? {
                self.commit_record_bytes(bytes)?;
            }
        } else {
            let bytes = Record::encode(
                &job.events,
                &job.user_header,
                job.compression,
                job.record_number,
                job.order,
                job.has_dictionary,
                job.has_first_event,
                job.is_last,
            )?;
            self.commit_record_bytes(bytes)?;
        }
        self.is_first_record_of_file = false;
        self.maybe_split()
    }

    fn commit_record_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        let offset = self.target.position();
        let record_length_words = (bytes.len() / 4) as u32;
        self.trailer_index.push((offset, record_length_words));
        self.target.write_bytes(&bytes)
    }

    /// Appends a v6 trailer record: zero events, last-record bit set,
    /// carrying a 2-word-per-record index of every record's `(fileOffset,
    /// length)` written to the current file.
    fn write_trailer(&mut self) -> Result<()> {
        let mut index_bytes = Vec::with_capacity(self.trailer_index.len() * 8);
        for &(offset, length_words) in &self.trailer_index {
            write_u32_words(
                &mut index_bytes,
                self.config.byte_order,
                &[(offset / 4) as u32, length_words],
            )?;
        }
        let record_number = self.record_number;
        self.record_number += 1;
        let bytes = Record::encode(
            &[],
            &index_bytes,
            CompressionKind::None,
            record_number,
            self.config.byte_order,
            false,
            false,
            true,
        )?;
        let trailer_offset = self.target.position();
        self.target.write_bytes(&bytes)?;
        self.trailer_index.clear();

        // word 8 of the file header (trailer_position).
        let trailer_position_offset = self.file_header_offset + 8 * 4;
        self.target
            .patch_u64_at(trailer_position_offset, trailer_offset, self.config.byte_order)?;
        tracing::debug!(trailer_offset, "wrote v6 trailer and patched file header");
        Ok(())
    }

    /// If splitting is configured and the current file has grown past the
    /// threshold, finalizes it and opens the next split. Splits occur
    /// between events, never mid-event.
    fn maybe_split(&mut self) -> Result<()> {
        let limit = match self.config.split_bytes {
            Some(limit) => limit,
            None => return Ok(()),
        };
        // A record submitted to the compression pool may still be
        // in-flight; drain it into the current file before deciding
        // whether to split, or its bytes (and its record number) would
        // land in the wrong file once `self.target` is swapped below.
        if let Some(pool) = &self.pool {
            for bytes in pool.drain_remaining()? {
                self.commit_record_bytes(bytes)?;
            }
        }
        let exceeded = self.target.position() >= limit;
        if !exceeded {
            return Ok(());
        }
        let (path_template, next_split) = match &self.target {
            Target::File {
                path_template: Some(template),
                split_number,
                ..
            } => (template.clone(), split_number + self.config.split_increment),
            _ => return Ok(()),
        };

        if self.config.version == 6 {
            self.write_trailer()?;
        } else if let Some(offset) = self.last_block_bitinfo_offset.take() {
            let bit_info = BitInfo {
                version: 4,
                is_last: true,
                has_dictionary: false,
                has_first_event: false,
            };
            self.target
                .patch_u32_at(offset, bit_info.encode(), self.config.byte_order)?;
        }
        if let Target::File { file, .. } = &mut self.target {
            file.flush()?;
        }

        let resolved = format_path(
            &path_template,
            self.config.stream_id,
            next_split,
            self.config.stream_count,
        );
        tracing::info!(split_number = next_split, path = %resolved, "splitting output file");
        let file = open_for_writer(&resolved, true, false)?;
        self.target = Target::File {
            file,
            path_template: Some(path_template),
            bytes_written: 0,
            split_number: next_split,
        };
        self.record_number = 0;
        self.block_number = 0;
        self.is_first_record_of_file = true;
        self.last_block_bitinfo_offset = None;
        self.trailer_index.clear();

        if self.config.version == 6 {
            self.file_header_offset = self.target.position();
            self.write_file_header()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn sample_event(tag: u16, value: i32) -> StructureNode {
        let mut bank = StructureNode::new_bank(tag, 0, DataType::Int32);
        bank.set_payload(Payload::Int32(vec![value])).unwrap();
        bank
    }

    #[test]
    fn buffer_writer_round_trips_through_reader() {
        let config = WriterConfig::default().with_byte_order(ByteOrder::Little);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..5 {
            writer.write_event(&sample_event(1, i)).unwrap();
        }
        writer.close().unwrap();
        let bytes = writer.into_buffer().unwrap();

        let reader = Reader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 5);
    }

    #[test]
    fn event_count_limit_splits_into_multiple_records() {
        let config = WriterConfig::default()
            .with_byte_order(ByteOrder::Little)
            .with_max_events_per_record(2);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..5 {
            writer.write_event(&sample_event(1, i)).unwrap();
        }
        writer.close().unwrap();
        let bytes = writer.into_buffer().unwrap();
        let reader = Reader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 5);
        assert!(reader.record_count() >= 3);
    }

    #[test]
    fn writer_poisoned_after_close_rejects_further_writes() {
        let mut writer = Writer::new_buffer(WriterConfig::default()).unwrap();
        writer.write_event(&sample_event(1, 1)).unwrap();
        writer.close().unwrap();
        assert!(matches!(
            writer.write_event(&sample_event(1, 2)),
            Err(Error::WriterClosed)
        ));
    }

    #[test]
    fn threaded_compression_round_trips() {
        let config = WriterConfig::default()
            .with_byte_order(ByteOrder::Big)
            .with_compression(CompressionKind::Lz4)
            .with_compression_threads(2)
            .with_ring_size(2)
            .with_max_events_per_record(10);
        let mut writer = Writer::new_buffer(config).unwrap();
        for i in 0..100 {
            writer.write_event(&sample_event(2, i)).unwrap();
        }
        writer.close().unwrap();
        let bytes = writer.into_buffer().unwrap();
        let reader = Reader::from_buffer(bytes).unwrap();
        assert_eq!(reader.event_count(), 100);
    }

    #[test]
    fn dictionary_is_embedded_and_recoverable() {
        let xml = r#"<xmlDict><dictEntry name="A" tag="1" num="0"/></xmlDict>"#;
        let config = WriterConfig::default().with_dictionary_xml(xml);
        let mut writer = Writer::new_buffer(config).unwrap();
        writer.write_event(&sample_event(1, 7)).unwrap();
        writer.close().unwrap();
        let bytes = writer.into_buffer().unwrap();
        let reader = Reader::from_buffer(bytes).unwrap();
        assert_eq!(reader.dictionary_xml(), Some(xml));
    }

    #[test]
    fn format_path_substitutes_stream_then_split() {
        assert_eq!(format_path("run_%d_%d.evio", 2, 5, 3), "run_2_5.evio");
        assert_eq!(format_path("run_%d.evio", 2, 5, 1), "run_5.evio");
        assert_eq!(format_path("run.evio", 2, 5, 1), "run.evio");
    }
}
