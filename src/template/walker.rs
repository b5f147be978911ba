use super::dom::{Document, NodeId};

/// What the walker does after a node has been visited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the node's first child, or whatever follows it
    Descend,
    /// Continue at an explicit node; `None` ends the walk
    Goto(Option<NodeId>),
}

/// Pre-order cursor over a subtree that tolerates mutation.
///
/// The caller computes any continuation point before mutating the tree
/// and hands it back through [`Flow::Goto`], so the walker never has to
/// step from a node that was just detached.
#[derive(Debug)]
pub struct TreeWalker {
    root: NodeId,
    current: Option<NodeId>,
}

impl TreeWalker {
    pub fn new(root: NodeId, start: NodeId) -> Self {
        Self { root, current: Some(start) }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    pub fn apply(&mut self, doc: &Document, flow: Flow) {
        match flow {
            Flow::Descend => self.advance(doc),
            Flow::Goto(next) => self.current = next,
        }
    }

    pub fn advance(&mut self, doc: &Document) {
        self.current = self.current.and_then(|id| doc.next_in_order(id, self.root));
    }

    pub fn skip_subtree(&mut self, doc: &Document) {
        self.current = self.current.and_then(|id| doc.following(id, self.root));
    }
}
