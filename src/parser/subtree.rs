//! Immutable, shared syntax trees.
//!
//! Subtrees are the currency of the whole runtime: the lexer produces
//! leaf subtrees, reductions wrap them into branches, the stack carries
//! them on its edges, and a finished parse hands the root back to the
//! caller as a [`SyntaxTree`]. Nodes are reference counted and never
//! mutated once shared; the few in-place updates the parser needs go
//! through copy-on-write.
//!
//! Every node caches its extent ([`Length`] of padding and content), so
//! walking a tree by source position never touches the text itself.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::base::Length;

use super::language::{
    Language, LexStateId, StateId, Symbol, SymbolMetadata, STATE_ERROR, SYM_ERROR,
};

#[cfg(test)]
thread_local! {
    static LIVE_NODES: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Number of subtree nodes currently alive on this thread. Used by tests
/// to prove that a released parse leaves nothing behind.
#[cfg(test)]
pub(crate) fn live_node_count() -> usize {
    LIVE_NODES.with(|c| c.get())
}

/// The payload of one tree node. Reached through [`Subtree`], which
/// handles the sharing.
pub(crate) struct SubtreeData {
    pub(crate) symbol: Symbol,
    /// Extent of skipped text (whitespace) before this node's content
    pub(crate) padding: Length,
    /// Extent of this node's own content
    pub(crate) size: Length,
    /// For branches: the parse state that existed when this node was
    /// reduced. [`STATE_ERROR`] on fragile branches and error nodes.
    pub(crate) parse_state: StateId,
    /// For leaves: the lex state that produced this token, when the
    /// token is only reproducible from that state. `None` means the
    /// token is context free and reusable from any lex state.
    pub(crate) lex_state: Option<LexStateId>,
    pub(crate) fragile_left: bool,
    pub(crate) fragile_right: bool,
    /// The token may appear anywhere (comments and other trivia)
    pub(crate) extra: bool,
    /// The symbol has a name in the grammar
    pub(crate) named: bool,
    /// Set by [`SyntaxTree::edit`] on every node overlapping an edit
    pub(crate) has_changes: bool,
    /// For error leaves: the codepoint the lexer was looking at
    pub(crate) lookahead_char: Option<char>,
    pub(crate) children: Vec<Subtree>,
    /// Cached number of error nodes in this subtree, for tree comparison
    pub(crate) error_count: u32,
    /// Cached tree height, for tree comparison
    pub(crate) depth: u32,
}

impl Clone for SubtreeData {
    fn clone(&self) -> Self {
        #[cfg(test)]
        LIVE_NODES.with(|c| c.set(c.get() + 1));
        SubtreeData {
            symbol: self.symbol,
            padding: self.padding,
            size: self.size,
            parse_state: self.parse_state,
            lex_state: self.lex_state,
            fragile_left: self.fragile_left,
            fragile_right: self.fragile_right,
            extra: self.extra,
            named: self.named,
            has_changes: self.has_changes,
            lookahead_char: self.lookahead_char,
            children: self.children.clone(),
            error_count: self.error_count,
            depth: self.depth,
        }
    }
}

#[cfg(test)]
impl Drop for SubtreeData {
    fn drop(&mut self) {
        LIVE_NODES.with(|c| c.set(c.get() - 1));
    }
}

/// A shared, immutable syntax tree node. Cloning is cheap (a reference
/// count bump); dropping the last clone releases the node and its
/// children transitively.
#[derive(Clone)]
pub struct Subtree {
    data: Arc<SubtreeData>,
}

impl Subtree {
    fn from_data(data: SubtreeData) -> Subtree {
        #[cfg(test)]
        LIVE_NODES.with(|c| c.set(c.get() + 1));
        Subtree {
            data: Arc::new(data),
        }
    }

    /// A token produced by the lexer
    pub fn leaf(symbol: Symbol, padding: Length, size: Length, metadata: SymbolMetadata) -> Subtree {
        Subtree::from_data(SubtreeData {
            symbol,
            padding,
            size,
            parse_state: 0,
            lex_state: None,
            fragile_left: false,
            fragile_right: false,
            extra: false,
            named: metadata.named,
            has_changes: false,
            lookahead_char: None,
            children: Vec::new(),
            error_count: u32::from(symbol == SYM_ERROR),
            depth: 0,
        })
    }

    /// A single-token error produced when the lex DFA finds no match
    pub fn error_leaf(size: Length, padding: Length, lookahead_char: Option<char>) -> Subtree {
        Subtree::from_data(SubtreeData {
            symbol: SYM_ERROR,
            padding,
            size,
            parse_state: STATE_ERROR,
            lex_state: None,
            fragile_left: true,
            fragile_right: true,
            extra: false,
            named: true,
            has_changes: false,
            lookahead_char,
            children: Vec::new(),
            error_count: 1,
            depth: 0,
        })
    }

    /// A branch wrapping `children`, with extents computed from them.
    /// The branch's padding is its first child's padding; the first
    /// child's own content starts the branch's content.
    pub fn node(symbol: Symbol, children: Vec<Subtree>, metadata: SymbolMetadata) -> Subtree {
        let (padding, size) = extent_of(&children);
        let error_count = children.iter().map(|c| c.data.error_count).sum::<u32>()
            + u32::from(symbol == SYM_ERROR);
        let depth = 1 + children.iter().map(|c| c.data.depth).max().unwrap_or(0);
        let is_error = symbol == SYM_ERROR;
        Subtree::from_data(SubtreeData {
            symbol,
            padding,
            size,
            parse_state: if is_error { STATE_ERROR } else { 0 },
            lex_state: None,
            fragile_left: is_error,
            fragile_right: is_error,
            extra: false,
            named: metadata.named,
            has_changes: false,
            lookahead_char: None,
            children,
            error_count,
            depth,
        })
    }

    /// Rebuild a branch around a new child list, keeping its identity
    /// (symbol, flags, recorded state) and recomputing extents. Used
    /// when surrounding extras are folded into an accepted root.
    pub(crate) fn with_children(&self, children: Vec<Subtree>) -> Subtree {
        let (padding, size) = extent_of(&children);
        let error_count = children.iter().map(|c| c.data.error_count).sum::<u32>()
            + u32::from(self.data.symbol == SYM_ERROR);
        let depth = 1 + children.iter().map(|c| c.data.depth).max().unwrap_or(0);
        Subtree::from_data(SubtreeData {
            symbol: self.data.symbol,
            padding,
            size,
            parse_state: self.data.parse_state,
            lex_state: self.data.lex_state,
            fragile_left: self.data.fragile_left,
            fragile_right: self.data.fragile_right,
            extra: self.data.extra,
            named: self.data.named,
            has_changes: false,
            lookahead_char: None,
            children,
            error_count,
            depth,
        })
    }

    /// Copy-on-write access for the parser's few in-place updates
    pub(crate) fn make_mut(&mut self) -> &mut SubtreeData {
        Arc::make_mut(&mut self.data)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.data.symbol
    }

    #[inline]
    pub fn padding(&self) -> Length {
        self.data.padding
    }

    #[inline]
    pub fn size(&self) -> Length {
        self.data.size
    }

    /// Full extent: padding plus content
    #[inline]
    pub fn total_size(&self) -> Length {
        self.data.padding + self.data.size
    }

    #[inline]
    pub fn total_chars(&self) -> usize {
        self.data.padding.chars + self.data.size.chars
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.data.children.len()
    }

    #[inline]
    pub fn children(&self) -> &[Subtree] {
        &self.data.children
    }

    pub fn child(&self, index: usize) -> Option<&Subtree> {
        self.data.children.get(index)
    }

    #[inline]
    pub fn is_extra(&self) -> bool {
        self.data.extra
    }

    #[inline]
    pub fn is_named(&self) -> bool {
        self.data.named
    }

    #[inline]
    pub fn has_changes(&self) -> bool {
        self.data.has_changes
    }

    /// A fragile subtree was built while the parse was ambiguous and is
    /// only trustworthy from the exact state that produced it.
    #[inline]
    pub fn is_fragile(&self) -> bool {
        self.data.fragile_left || self.data.fragile_right
    }

    #[inline]
    pub fn parse_state(&self) -> StateId {
        self.data.parse_state
    }

    #[inline]
    pub fn lex_state(&self) -> Option<LexStateId> {
        self.data.lex_state
    }

    #[inline]
    pub fn lookahead_char(&self) -> Option<char> {
        self.data.lookahead_char
    }

    pub(crate) fn error_count(&self) -> u32 {
        self.data.error_count
    }

    /// Order two candidate parses of the same text. Fewer error nodes
    /// wins, then the shallower tree, then the lexicographically smaller
    /// one by symbols.
    pub fn compare(a: &Subtree, b: &Subtree) -> Ordering {
        a.data
            .error_count
            .cmp(&b.data.error_count)
            .then(a.data.depth.cmp(&b.data.depth))
            .then(a.data.symbol.cmp(&b.data.symbol))
            .then_with(|| {
                for (ca, cb) in a.children().iter().zip(b.children()) {
                    match Subtree::compare(ca, cb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.child_count().cmp(&b.child_count())
            })
    }

    fn write_sexp(&self, language: &Language, out: &mut String) {
        if self.child_count() == 0 {
            out.push_str(language.symbol_name(self.symbol()));
        } else {
            out.push('(');
            out.push_str(language.symbol_name(self.symbol()));
            for child in self.children() {
                out.push(' ');
                child.write_sexp(language, out);
            }
            out.push(')');
        }
    }

    /// Render this subtree as an s-expression of symbol names
    pub fn to_sexp(&self, language: &Language) -> String {
        let mut out = String::new();
        self.write_sexp(language, &mut out);
        out
    }
}

impl fmt::Debug for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("symbol", &self.data.symbol)
            .field("chars", &self.total_chars())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Padding and size of a branch holding `children`
fn extent_of(children: &[Subtree]) -> (Length, Length) {
    match children.split_first() {
        None => (Length::ZERO, Length::ZERO),
        Some((first, rest)) => {
            let mut size = first.size();
            for child in rest {
                size += child.total_size();
            }
            (first.padding(), size)
        }
    }
}

// =============================================================================
// Finished trees
// =============================================================================

/// A description of a source edit, in characters and bytes. Positions
/// count from the start of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edit {
    pub start_char: usize,
    pub start_byte: usize,
    pub chars_removed: usize,
    pub bytes_removed: usize,
    pub chars_added: usize,
    pub bytes_added: usize,
}

/// A completed parse result. Holds the root subtree and offers the
/// operations a host needs between parses: cursor navigation, edits,
/// and debugging output.
#[derive(Clone)]
pub struct SyntaxTree {
    root: Subtree,
}

impl SyntaxTree {
    pub(crate) fn new(root: Subtree) -> SyntaxTree {
        SyntaxTree { root }
    }

    pub fn root(&self) -> &Subtree {
        &self.root
    }

    /// Full extent of the parsed text
    pub fn total_size(&self) -> Length {
        self.root.total_size()
    }

    /// Apply a source edit, producing a tree whose nodes along the edit
    /// path are marked changed and have their char/byte extents
    /// adjusted. Unaffected subtrees are shared with `self`. The result
    /// is what a subsequent incremental parse expects as its previous
    /// tree.
    pub fn edit(&self, edit: &Edit) -> SyntaxTree {
        SyntaxTree {
            root: edit_subtree(&self.root, edit),
        }
    }

    pub fn walk(&self) -> TreeCursor {
        TreeCursor::new(self.root.clone())
    }

    pub fn to_sexp(&self, language: &Language) -> String {
        self.root.to_sexp(language)
    }

    /// Assert the structural invariants of the tree: a branch's padding
    /// is its first child's padding, and padding plus size equals the
    /// sum of the children's extents. Panics on violation.
    pub fn check_invariants(&self) {
        check_node(&self.root);
    }
}

fn check_node(tree: &Subtree) {
    if let Some(first) = tree.child(0) {
        // Error branches may have absorbed skipped padding during
        // recovery, so only clean branches get the strict extent check
        if tree.symbol() != SYM_ERROR {
            assert_eq!(
                tree.padding(),
                first.padding(),
                "branch padding must equal its first child's padding"
            );
            let mut total = Length::ZERO;
            for child in tree.children() {
                total += child.total_size();
            }
            assert_eq!(
                tree.total_size(),
                total,
                "branch extent must equal the sum of its children's extents"
            );
        }
        for child in tree.children() {
            check_node(child);
        }
    }
}

fn edit_subtree(tree: &Subtree, edit: &Edit) -> Subtree {
    let old_end_char = edit.start_char + edit.chars_removed;
    let pad = tree.padding();

    let mut new = tree.clone();
    let data = new.make_mut();
    data.has_changes = true;

    if data.children.is_empty() {
        // Leaves absorb the delta in whichever region the edit starts
        if old_end_char <= pad.chars && (edit.start_char < pad.chars || edit.chars_removed > 0) {
            data.padding.chars = pad.chars - edit.chars_removed + edit.chars_added;
            data.padding.bytes =
                pad.bytes.saturating_sub(edit.bytes_removed) + edit.bytes_added;
        } else {
            data.size.chars =
                (data.size.chars + edit.chars_added).saturating_sub(edit.chars_removed);
            data.size.bytes =
                (data.size.bytes + edit.bytes_added).saturating_sub(edit.bytes_removed);
        }
        return new;
    }

    let mut off_char = 0usize;
    let mut off_byte = 0usize;
    for child in &mut data.children {
        let next_char = off_char + child.total_chars();
        let next_byte = off_byte + child.total_size().bytes;
        let overlaps = edit.start_char < next_char
            && (old_end_char > off_char || edit.start_char >= off_char);
        if overlaps {
            let rel = Edit {
                start_char: edit.start_char.saturating_sub(off_char),
                start_byte: edit.start_byte.saturating_sub(off_byte),
                chars_removed: old_end_char.min(next_char)
                    - edit.start_char.max(off_char).min(old_end_char.min(next_char)),
                bytes_removed: (edit.start_byte + edit.bytes_removed).min(next_byte)
                    - edit
                        .start_byte
                        .max(off_byte)
                        .min((edit.start_byte + edit.bytes_removed).min(next_byte)),
                chars_added: if edit.start_char >= off_char {
                    edit.chars_added
                } else {
                    0
                },
                bytes_added: if edit.start_char >= off_char {
                    edit.bytes_added
                } else {
                    0
                },
            };
            *child = edit_subtree(child, &rel);
        }
        off_char = next_char;
        off_byte = next_byte;
    }

    // Re-derive this branch's extents from the adjusted children so the
    // positions of reusable right siblings stay exact
    let (padding, size) = extent_of(&data.children);
    data.padding = padding;
    data.size = size;
    new
}

// =============================================================================
// Cursor
// =============================================================================

/// Walks a finished tree in source order without parent pointers: the
/// cursor remembers its ancestors explicitly.
pub struct TreeCursor {
    /// (node, index of node within its parent); last entry is current
    stack: Vec<(Subtree, usize)>,
    position: Length,
}

impl TreeCursor {
    fn new(root: Subtree) -> TreeCursor {
        TreeCursor {
            stack: vec![(root, 0)],
            position: Length::ZERO,
        }
    }

    /// The node the cursor is on, or `None` once the walk is finished
    pub fn node(&self) -> Option<&Subtree> {
        self.stack.last().map(|(node, _)| node)
    }

    /// Start of the current node's extent (including its padding)
    pub fn position(&self) -> Length {
        self.position
    }

    /// Move to the current node's first child
    pub fn descend(&mut self) -> bool {
        let Some((node, _)) = self.stack.last() else {
            return false;
        };
        match node.child(0) {
            Some(child) => {
                // A branch and its first child start at the same place
                let child = child.clone();
                self.stack.push((child, 0));
                true
            }
            None => false,
        }
    }

    /// Move to the next node in source order at the same or a higher
    /// level: the next sibling, or the closest ancestor's next sibling.
    pub fn advance(&mut self) -> bool {
        let Some((node, mut index)) = self.stack.pop() else {
            return false;
        };
        self.position += node.total_size();
        while let Some((parent, _)) = self.stack.last() {
            if let Some(sibling) = parent.child(index + 1) {
                let sibling = sibling.clone();
                self.stack.push((sibling, index + 1));
                return true;
            }
            let (_, parent_index) = self.stack.pop().expect("parent checked above");
            index = parent_index;
        }
        false
    }
}
