//! E1 — object builder.
//!
//! Maintains a stack of "currently open" structures on top of a
//! [`StructureNode`] tree so that callers can `open_bank`/`open_segment`/
//! `open_tagsegment`, append data or nested structures, then `close_structure`
//! (or `close_all`) rather than hand-assembling the tree themselves.

use crate::error::{Error, Result};
use crate::tree::{Payload, StructureNode};
use crate::types::DataType;

pub struct EventBuilder {
    root: StructureNode,
    /// Child index at each depth from `root` down to the current open node.
    open_path: Vec<usize>,
}

impl EventBuilder {
    /// Starts a new event; the root is always a bank — an event is the
    /// distinguished root node, and it is always a bank.
    pub fn new(tag: u16, num: u8, declared_type: DataType) -> EventBuilder {
        EventBuilder {
            root: StructureNode::new_bank(tag, num, declared_type),
            open_path: Vec::new(),
        }
    }

    pub fn get_event(&self) -> &StructureNode {
        &self.root
    }

    pub fn close_all(&mut self) {
        self.open_path.clear();
    }

    pub fn into_event(mut self) -> Result<StructureNode> {
        self.close_all();
        self.root.validate()?;
        Ok(self.root)
    }

    fn current_mut(&mut self) -> &mut StructureNode {
        let mut node = &mut self.root;
        for &idx in &self.open_path {
            node = match &mut node.body {
                crate::tree::Body::Children(children) => &mut children[idx],
                crate::tree::Body::Leaf(_) => unreachable!("open path never points through a leaf"),
            };
        }
        node
    }

    fn open_child(&mut self, child: StructureNode) -> Result<()> {
        let current = self.current_mut();
        current.add_child(child)?;
        let new_index = current.children().len() - 1;
        self.open_path.push(new_index);
        Ok(())
    }

    pub fn open_bank(&mut self, tag: u16, num: u8, declared_type: DataType) -> Result<()> {
        self.open_child(StructureNode::new_bank(tag, num, declared_type))
    }

    pub fn open_segment(&mut self, tag: u8, declared_type: DataType) -> Result<()> {
        self.open_child(StructureNode::new_segment(tag, declared_type))
    }

    pub fn open_tagsegment(&mut self, tag: u16, declared_type: DataType) -> Result<()> {
        self.open_child(StructureNode::new_tagsegment(tag, declared_type))
    }

    /// Attaches an already-built subtree as a child of the currently open
    /// structure, without making it the new current structure.
    pub fn add_child(&mut self, child: StructureNode) -> Result<()> {
        self.current_mut().add_child(child)
    }

    pub fn set_payload(&mut self, payload: Payload) -> Result<()> {
        self.current_mut().set_payload(payload)
    }

    /// Closes the innermost open structure, making its parent current again.
    pub fn close_structure(&mut self) -> Result<()> {
        if self.open_path.pop().is_none() {
            return Err(Error::StackUnderflow);
        }
        Ok(())
    }

    pub fn remove_child(&mut self, index: usize) -> Result<StructureNode> {
        self.current_mut().remove_child(index)
    }

    /// Removes the currently open structure from its parent and makes the
    /// parent current again.
    pub fn remove_structure(&mut self) -> Result<StructureNode> {
        let index = self.open_path.pop().ok_or(Error::StackUnderflow)?;
        self.current_mut().remove_child(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nested_bank_of_banks() {
        let mut b = EventBuilder::new(1, 1, DataType::Bank);
        b.open_bank(2, 2, DataType::Int32).unwrap();
        b.set_payload(Payload::Int32(vec![1, 2, 3])).unwrap();
        b.close_structure().unwrap();

        let event = b.into_event().unwrap();
        assert_eq!(event.children().len(), 1);
        assert_eq!(event.children()[0].tag, 2);
    }

    #[test]
    fn close_structure_without_open_frame_errors() {
        let mut b = EventBuilder::new(1, 1, DataType::Int32);
        assert!(matches!(b.close_structure(), Err(Error::StackUnderflow)));
    }

    #[test]
    fn remove_structure_pops_and_detaches() {
        let mut b = EventBuilder::new(1, 0, DataType::Bank);
        b.open_bank(2, 0, DataType::Int8).unwrap();
        let removed = b.remove_structure().unwrap();
        assert_eq!(removed.tag, 2);
        assert_eq!(b.get_event().children().len(), 0);
    }
}
