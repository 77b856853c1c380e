//! Data-type and structure-type catalog.
//!
//! Purely functional: code <-> name, code -> element width, code -> is
//! container. Every decoder consults this to know how to walk a body.

/// The 6-bit payload type code carried in a bank/segment/tagsegment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Unknown32,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    StringArray,
    Composite,
    Bank,
    Segment,
    TagSegment,
}

impl DataType {
    pub fn from_code(code: u8) -> DataType {
        match code {
            0x0 => DataType::Unknown32,
            0x6 => DataType::Int8,
            0x7 => DataType::Uint8,
            0x4 => DataType::Int16,
            0x5 => DataType::Uint16,
            0x1 => DataType::Int32,
            0xb => DataType::Uint32,
            0x9 => DataType::Int64,
            0xa => DataType::Uint64,
            0x2 => DataType::Float32,
            0x8 => DataType::Float64,
            0x3 => DataType::StringArray,
            0xf => DataType::Composite,
            0xe | 0x10 => DataType::Bank,
            0xd | 0x20 => DataType::Segment,
            0xc | 0x40 => DataType::TagSegment,
            // Unrecognized codes fall back to `Unknown32`: reported but
            // walked as raw words rather than aborting the parse.
            _ => DataType::Unknown32,
        }
    }

    /// The canonical code used when *writing* this type (banks/segments can
    /// be written to appear either as themselves or as "bank-of-X"/
    /// "segment-of-X" container markers; `to_code` returns the plain form).
    pub fn to_code(self) -> u8 {
        match self {
            DataType::Unknown32 => 0x0,
            DataType::Int32 => 0x1,
            DataType::Float32 => 0x2,
            DataType::StringArray => 0x3,
            DataType::Int16 => 0x4,
            DataType::Uint16 => 0x5,
            DataType::Int8 => 0x6,
            DataType::Uint8 => 0x7,
            DataType::Float64 => 0x8,
            DataType::Int64 => 0x9,
            DataType::Uint64 => 0xa,
            DataType::Uint32 => 0xb,
            DataType::TagSegment => 0xc,
            DataType::Segment => 0xd,
            DataType::Bank => 0xe,
            DataType::Composite => 0xf,
        }
    }

    /// Width, in bytes, of one element. Containers and composite return 0 —
    /// callers must not multiply by element count for those kinds.
    pub fn element_width(self) -> usize {
        match self {
            DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32
            | DataType::Uint32
            | DataType::Float32
            | DataType::Unknown32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
            DataType::StringArray | DataType::Composite => 0,
            DataType::Bank | DataType::Segment | DataType::TagSegment => 0,
        }
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            DataType::Bank | DataType::Segment | DataType::TagSegment
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Unknown32 => "unknown32",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::StringArray => "string",
            DataType::Composite => "composite",
            DataType::Bank => "bank",
            DataType::Segment => "segment",
            DataType::TagSegment => "tagsegment",
        }
    }
}

/// The container kind a [`crate::tree::StructureNode`] is, distinct from
/// `DataType` because a node's *own* kind (how its header is laid out) and
/// the declared payload type of its *children* are independent concepts —
/// a bank can declare a payload type of `Bank`, `Segment`, or `TagSegment`
/// and thereby mean "bank of banks", "bank of segments", etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Bank,
    Segment,
    TagSegment,
}

impl StructureKind {
    pub fn header_words(self) -> usize {
        match self {
            StructureKind::Bank => 2,
            StructureKind::Segment => 1,
            StructureKind::TagSegment => 1,
        }
    }

    /// Tagsegment payloads must be 4-byte aligned; no padding field exists
    /// for them.
    pub fn allows_padding(self) -> bool {
        !matches!(self, StructureKind::TagSegment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips() {
        for dt in [
            DataType::Int8,
            DataType::Uint8,
            DataType::Int16,
            DataType::Uint16,
            DataType::Int32,
            DataType::Uint32,
            DataType::Int64,
            DataType::Uint64,
            DataType::Float32,
            DataType::Float64,
            DataType::StringArray,
            DataType::Composite,
        ] {
            assert_eq!(DataType::from_code(dt.to_code()), dt);
        }
    }

    #[test]
    fn container_codes_classify_as_container() {
        assert!(DataType::from_code(0xe).is_container());
        assert!(DataType::from_code(0x10).is_container());
        assert!(DataType::from_code(0xd).is_container());
        assert!(DataType::from_code(0x20).is_container());
        assert!(DataType::from_code(0xc).is_container());
        assert!(DataType::from_code(0x40).is_container());
        assert!(!DataType::from_code(0x1).is_container());
    }

    #[test]
    fn unknown_code_tolerated_as_unknown32() {
        assert_eq!(DataType::from_code(0x3f), DataType::Unknown32);
    }

    #[test]
    fn element_widths_match_spec() {
        assert_eq!(DataType::Int8.element_width(), 1);
        assert_eq!(DataType::Uint16.element_width(), 2);
        assert_eq!(DataType::Float64.element_width(), 8);
    }
}
