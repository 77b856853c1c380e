//! Fixed-layout descriptors for banks, segments, tagsegments, blocks,
//! records, and file headers.

mod frame;
mod structure;

pub use frame::{BitInfo, BlockHeader, CompressionKind, FileHeader, RecordHeader};
pub use structure::{BankHeader, SegmentHeader, TagSegmentHeader};

/// Magic number used to detect byte order and EVIO generation.
/// A reader encountering the byte-swapped value flips its declared byte
/// order and swaps all subsequent header fields on read.
pub const MAGIC: u32 = 0xc0da_0100;

/// v6 file-header type code, ASCII "EVIF".
pub const FILE_TYPE_EVIO: u32 = 0x4556_4946;

/// v6/HIPO file-header type code, ASCII "HIPR" (the HIPO magic; the literal
/// bytes spell "HIPR", not "HIPO" — see DESIGN.md).
pub const FILE_TYPE_HIPO: u32 = 0x4849_5052;

/// Packs the dictionary XML and/or first-event bytes into the v6 file
/// header's user-header region: the dictionary and first event are an
/// optional sidecar embedded in the user-header region of the first
/// container. Format: `[u32 dict_len][dict bytes][u32 first_event_len]
/// [first_event bytes]`, each field in the file's declared byte order —
/// there is no standard on-disk layout for *combining* both sidecars in one
/// region, so this crate picks the simplest self-describing one (see
/// DESIGN.md).
pub fn encode_sidecar_user_header(
    dictionary_xml: &str,
    first_event: Option<&[u8]>,
    order: crate::buffer::ByteOrder,
) -> Vec<u8> {
    let mut buf = crate::buffer::ByteBuffer::new(0, order);
    let dict_bytes = dictionary_xml.as_bytes();
    buf.put_u32(dict_bytes.len() as u32);
    buf.put_bytes(dict_bytes);
    let fe = first_event.unwrap_or(&[]);
    buf.put_u32(fe.len() as u32);
    buf.put_bytes(fe);
    buf.into_vec()
}

/// Inverse of [`encode_sidecar_user_header`]. Returns `(dictionary_xml,
/// first_event)`; an empty dictionary string means "none present", matching
/// the writer convention that an empty `dictionary_xml` means no dictionary.
pub fn decode_sidecar_user_header(
    bytes: &[u8],
    order: crate::buffer::ByteOrder,
) -> crate::error::Result<(String, Option<Vec<u8>>)> {
    let mut buf = crate::buffer::ByteBuffer::wrap(bytes.to_vec(), order);
    let dict_len = buf.get_u32()? as usize;
    let dict_bytes = buf.get_bytes(dict_len)?;
    let dictionary_xml = String::from_utf8(dict_bytes)
        .map_err(|e| crate::error::Error::MalformedHeader(format!("dictionary is not utf-8: {e}")))?;
    let fe_len = buf.get_u32()? as usize;
    let first_event = if fe_len == 0 {
        None
    } else {
        Some(buf.get_bytes(fe_len)?)
    };
    Ok((dictionary_xml, first_event))
}
