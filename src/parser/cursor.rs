//! Source-order walk over a previous parse tree.
//!
//! During an incremental parse each stack head carries one of these
//! cursors into the tree from the last parse. The cursor always sits on
//! the largest subtree starting at or after the head's position; the
//! parser either takes that subtree whole as its next lookahead, breaks
//! it down to expose smaller candidates, or walks past it.
//!
//! Positions are tracked in characters. The cursor remembers its
//! ancestors explicitly instead of relying on parent pointers in the
//! tree.

use super::language::SYM_ERROR;
use super::subtree::{Subtree, SyntaxTree};

#[derive(Clone)]
pub(crate) struct ReuseCursor {
    /// (branch, index of the entered child); innermost last
    ancestors: Vec<(Subtree, usize)>,
    current: Option<Subtree>,
    /// Start of the current node's extent (including padding), in chars
    position: usize,
}

impl ReuseCursor {
    pub(crate) fn new(previous: Option<&SyntaxTree>) -> ReuseCursor {
        ReuseCursor {
            ancestors: Vec::new(),
            current: previous.map(|tree| tree.root().clone()),
            position: 0,
        }
    }

    pub(crate) fn node(&self) -> Option<&Subtree> {
        self.current.as_ref()
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    /// Move to the next subtree to the right, at the same level or
    /// higher: the current node's next sibling, or failing that the
    /// closest ancestor's next sibling. Exhausts the cursor when no
    /// right neighbor exists anywhere.
    pub(crate) fn pop(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        self.position += current.total_chars();
        while let Some((parent, index)) = self.ancestors.pop() {
            if let Some(sibling) = parent.child(index + 1) {
                let sibling = sibling.clone();
                self.ancestors.push((parent, index + 1));
                self.current = Some(sibling);
                return;
            }
        }
    }

    /// Replace the current node by its first child, exposing finer
    /// reuse candidates. Error nodes and leaves cannot be broken down
    /// and are popped instead. Descends repeatedly while the exposed
    /// child is fragile.
    pub(crate) fn breakdown(&mut self) {
        loop {
            let Some(current) = self.current.clone() else {
                return;
            };
            if current.symbol() == SYM_ERROR {
                self.pop();
                return;
            }
            let Some(first) = current.child(0).cloned() else {
                self.pop();
                return;
            };
            self.ancestors.push((current, 0));
            let fragile = first.is_fragile();
            self.current = Some(first);
            if !fragile {
                return;
            }
        }
    }
}
