//! EVIO: reader/writer for the self-describing, tree-structured EVIO
//! event-container format (legacy block-oriented v4, and record-oriented
//! v6/HIPO).
//!
//! Modules, leaves first: [`buffer`] (endian-aware byte spans), [`types`]
//! (payload/structure type catalog), [`header`] (fixed-layout bank/segment/
//! tagsegment/block/record/file headers), [`tree`] (the in-memory event
//! tree), [`builder`] (object and compact tree construction), [`dictionary`]
//! (XML tag/num name lookup), [`block`]/[`record`] (v4/v6 framing codecs),
//! [`writer`], [`reader`], [`scan`] (compact, unparsed node access), and
//! [`compression`] (the pluggable bulk-codec facade).

pub mod block;
pub mod buffer;
pub mod builder;
pub mod compression;
pub mod dictionary;
pub mod error;
pub mod header;
pub mod legacy;
pub mod reader;
pub mod record;
pub mod scan;
pub mod tree;
pub mod types;
pub mod writer;

pub use buffer::{ByteBuffer, ByteOrder};
pub use builder::{CompactBuilder, EventBuilder};
pub use dictionary::Dictionary;
pub use error::{Error, Result};
pub use reader::Reader;
pub use scan::{CompactReader, ScanNode, ScannedEvent};
pub use tree::{Payload, StructureNode};
pub use types::{DataType, StructureKind};
pub use writer::{Writer, WriterConfig};
