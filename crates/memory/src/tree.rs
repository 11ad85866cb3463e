//! Shared nil sentinel for tree structures
//!
//! Binary-tree code elsewhere in the engine terminates every traversal at a
//! single shared "nil" node instead of special-casing null children. Nodes
//! here are arena indices rather than pointers: slot 0 is reserved for the
//! sentinel, so a node whose links all read [`NodeId::NIL`] links to the
//! sentinel, and the sentinel links to itself.
//!
//! Only the sentinel's existence, self-linkage and immutability live in this
//! crate; the tree algorithms that rely on it do not.

/// Node color tag, in the red-black sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Red node.
    Red,
    /// Black node. The sentinel is always black.
    Black,
}

/// Index of a node within a tree arena. Slot 0 is the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The sentinel's slot.
    pub const NIL: NodeId = NodeId(0);

    /// Wraps an arena index. Index 0 refers to the sentinel.
    #[inline]
    pub const fn from_index(index: u32) -> Self {
        NodeId(index)
    }

    /// The arena index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Whether this id is the sentinel slot.
    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

/// The self-linked nil node terminating tree traversal.
///
/// Constructed once, never mutated: the only access path is the shared
/// reference returned by [`sentinel`] (or a `static` of the caller's own for
/// additional tree flavors), so immutability holds at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentinelNode {
    /// Always [`Color::Black`].
    pub color: Color,
    /// Left child: the sentinel itself.
    pub left: NodeId,
    /// Right child: the sentinel itself.
    pub right: NodeId,
    /// Parent: the sentinel itself.
    pub parent: NodeId,
}

impl SentinelNode {
    /// A freshly self-linked sentinel, for tree flavors that keep their own
    /// static instance.
    pub const fn new() -> Self {
        Self {
            color: Color::Black,
            left: NodeId::NIL,
            right: NodeId::NIL,
            parent: NodeId::NIL,
        }
    }

    /// Whether every link points back at the sentinel slot.
    pub const fn is_self_linked(&self) -> bool {
        self.left.is_nil() && self.right.is_nil() && self.parent.is_nil()
    }
}

impl Default for SentinelNode {
    fn default() -> Self {
        Self::new()
    }
}

static SENTINEL: SentinelNode = SentinelNode::new();

/// The process-wide shared sentinel instance.
pub fn sentinel() -> &'static SentinelNode {
    &SENTINEL
}
