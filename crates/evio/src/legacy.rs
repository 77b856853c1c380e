//! Legacy callback-style event walking: the source's C
//! `evioStreamParse`-style API, kept as a thin convenience wrapper rather
//! than a from-scratch zero-copy scanner.
//!
//! This builds an owned [`StructureNode`] tree with [`StructureNode::decode`]
//! and then walks it depth-first, invoking `visit` once per node in
//! pre-order with the node and its chain of ancestors. It exists for
//! callers porting code written against that older visitor-callback style;
//! new code should prefer [`crate::reader::Reader`] or
//! [`crate::scan::CompactReader`].

use crate::buffer::{ByteBuffer, ByteOrder};
use crate::error::Result;
use crate::tree::StructureNode;
use crate::types::StructureKind;

/// Parses `bytes` as one top-level event and walks it depth-first,
/// pre-order, calling `visit(node, ancestors)` for every node. `ancestors`
/// holds the path from the event root down to (but not including) `node`,
/// outermost first.
pub fn stream_parse<F>(bytes: &[u8], order: ByteOrder, mut visit: F) -> Result<()>
where
    F: FnMut(&StructureNode, &[&StructureNode]),
{
    let mut buf = ByteBuffer::wrap(bytes.to_vec(), order);
    let root = StructureNode::decode(&mut buf, StructureKind::Bank)?;
    let mut ancestors = Vec::new();
    walk(&root, &mut ancestors, &mut visit);
    Ok(())
}

fn walk<'a, F>(node: &'a StructureNode, ancestors: &mut Vec<&'a StructureNode>, visit: &mut F)
where
    F: FnMut(&StructureNode, &[&StructureNode]),
{
    visit(node, ancestors);
    ancestors.push(node);
    for child in node.children() {
        walk(child, ancestors, visit);
    }
    ancestors.pop();
}
