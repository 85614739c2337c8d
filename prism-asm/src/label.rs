//! Labels with buffer-threaded link chains.
//!
//! While unbound, a label keeps the head of a linked list of 32-bit
//! patch sites; each site stores the previous head, so the chain
//! lives inside the code buffer itself. Near (8-bit) links are kept
//! in a side list since one byte cannot hold a chain pointer.

/// Sentinel meaning "end of chain".
const END_OF_CHAIN: u32 = u32::MAX;

/// A branch target, bound at most once.
#[derive(Debug)]
pub struct Label {
    state: State,
    near_links: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unbound { link_head: u32 },
    Bound { position: u32 },
}

impl Label {
    /// A fresh unbound label.
    pub fn new() -> Label {
        Label {
            state: State::Unbound {
                link_head: END_OF_CHAIN,
            },
            near_links: Vec::new(),
        }
    }

    /// Whether the label has been bound to a position.
    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound { .. })
    }

    /// The bound position.
    ///
    /// # Panics
    ///
    /// Panics if the label is unbound.
    pub fn position(&self) -> u32 {
        match self.state {
            State::Bound { position } => position,
            State::Unbound { .. } => panic!("label is not bound"),
        }
    }

    /// Whether any 32-bit sites await patching.
    pub fn is_linked(&self) -> bool {
        matches!(self.state, State::Unbound { link_head } if link_head != END_OF_CHAIN)
    }

    /// Head of the 32-bit link chain.
    pub(crate) fn link_head(&self) -> u32 {
        match self.state {
            State::Unbound { link_head } => link_head,
            State::Bound { .. } => END_OF_CHAIN,
        }
    }

    /// The previous chain head, to be stored at a new 32-bit site,
    /// which then becomes the head.
    pub(crate) fn link_to(&mut self, position: u32) -> u32 {
        match self.state {
            State::Unbound { link_head } => {
                self.state = State::Unbound {
                    link_head: position,
                };
                link_head
            }
            State::Bound { .. } => panic!("linking a bound label"),
        }
    }

    /// Records an 8-bit patch site.
    pub(crate) fn near_link_to(&mut self, position: u32) {
        debug_assert!(!self.is_bound(), "near-linking a bound label");
        self.near_links.push(position);
    }

    pub(crate) fn take_near_links(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.near_links)
    }

    pub(crate) fn set_link_head(&mut self, head: u32) {
        self.state = State::Unbound { link_head: head };
    }

    /// Marks the label bound.
    ///
    /// # Panics
    ///
    /// Panics if already bound; labels bind once.
    pub(crate) fn bind_to(&mut self, position: u32) {
        assert!(!self.is_bound(), "labels can only be bound once");
        debug_assert!(!self.is_linked(), "chain must be drained before binding");
        debug_assert!(self.near_links.is_empty());
        self.state = State::Bound { position };
    }
}

impl Default for Label {
    fn default() -> Label {
        Label::new()
    }
}
