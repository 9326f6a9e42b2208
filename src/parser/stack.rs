//! The graph-structured stack.
//!
//! Each entry is a parse state at an absolute position. Entries form a
//! DAG through downward links, each link labelled with the subtree that
//! was shifted to create it. A head is a distinguished entry standing
//! for one concurrent parse branch; heads split when the tables offer
//! several actions and merge when two branches reach the same state at
//! the same position.
//!
//! Entries live in an arena of reference-counted slots. A slot's count
//! is the number of heads pointing at it plus the number of links
//! arriving from entries above; releasing the last reference frees the
//! slot and cascades downward.

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::base::Length;

use super::language::{Language, StateId};
use super::subtree::Subtree;

pub(crate) type EntryId = usize;

/// Picks between two subtrees labelling the same edge. Invoked exactly
/// when a merge would put a second subtree on an existing link.
pub(crate) type TreeSelection = fn(&Subtree, &Subtree) -> Ordering;

/// A downward edge: the entry underneath plus the subtree shifted on
/// the way up
struct Link {
    prev: EntryId,
    subtree: Subtree,
}

struct StackEntry {
    state: StateId,
    position: Length,
    links: Vec<Link>,
    ref_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushResult {
    /// The head was extended in place
    Continued,
    /// The pushed entry coincided with another head; the two merged and
    /// the caller's head index is no longer valid
    Merged,
}

/// One enumerated path out of a pop
pub(crate) struct PopResult {
    /// The head left standing underneath the removed entries. The first
    /// result of a pop keeps the original head index; later results get
    /// freshly added indices.
    pub head_index: usize,
    /// The removed subtrees in source order (deepest first)
    pub subtrees: Vec<Subtree>,
}

pub(crate) struct Stack {
    slots: Vec<Option<StackEntry>>,
    free: Vec<EntryId>,
    heads: Vec<EntryId>,
    selection: TreeSelection,
}

fn default_selection(left: &Subtree, right: &Subtree) -> Ordering {
    Subtree::compare(left, right)
}

impl Stack {
    pub(crate) fn new() -> Stack {
        let mut stack = Stack {
            slots: Vec::new(),
            free: Vec::new(),
            heads: Vec::new(),
            selection: default_selection,
        };
        stack.clear();
        stack
    }

    pub(crate) fn set_tree_selection(&mut self, selection: TreeSelection) {
        self.selection = selection;
    }

    /// Drop everything and start over with a single head at state 0
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.heads.clear();
        let root = self.alloc(StackEntry {
            state: 0,
            position: Length::ZERO,
            links: Vec::new(),
            ref_count: 1,
        });
        self.heads.push(root);
    }

    fn alloc(&mut self, entry: StackEntry) -> EntryId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(entry);
                id
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    fn entry(&self, id: EntryId) -> &StackEntry {
        self.slots[id]
            .as_ref()
            .expect("stack entry referenced after free")
    }

    fn retain(&mut self, id: EntryId) {
        if let Some(entry) = self.slots[id].as_mut() {
            entry.ref_count += 1;
        }
    }

    fn release(&mut self, id: EntryId) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let Some(entry) = self.slots[id].as_mut() else {
                continue;
            };
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                if let Some(entry) = self.slots[id].take() {
                    for link in entry.links {
                        work.push(link.prev);
                    }
                }
                self.free.push(id);
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub(crate) fn head_count(&self) -> usize {
        self.heads.len()
    }

    pub(crate) fn top_state(&self, head: usize) -> StateId {
        self.entry(self.heads[head]).state
    }

    pub(crate) fn top_position(&self, head: usize) -> Length {
        self.entry(self.heads[head]).position
    }

    /// Number of live entries, the root included. Removing the last
    /// head releases everything, the root included.
    pub(crate) fn entry_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Parse states along the first-link chain from the head down to
    /// and including the root
    pub(crate) fn states_on_first_path(&self, head: usize) -> Vec<StateId> {
        let mut states = Vec::new();
        let mut id = self.heads[head];
        loop {
            let entry = self.entry(id);
            states.push(entry.state);
            match entry.links.first() {
                Some(link) => id = link.prev,
                None => break,
            }
        }
        states
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Extend `head` by an entry holding `subtree` at `state`. If some
    /// other head already sits at the same state and position the two
    /// merge instead, and `head` stops existing.
    pub(crate) fn push(&mut self, head: usize, subtree: Subtree, state: StateId) -> PushResult {
        let current = self.heads[head];
        let position = self.entry(current).position + subtree.total_size();

        for other_index in 0..self.heads.len() {
            if other_index == head {
                continue;
            }
            let other = self.heads[other_index];
            let entry = self.entry(other);
            if entry.state == state && entry.position == position {
                self.add_link(other, current, subtree);
                let old = self.heads.remove(head);
                self.release(old);
                return PushResult::Merged;
            }
        }

        let id = self.alloc(StackEntry {
            state,
            position,
            links: vec![Link {
                prev: current,
                subtree,
            }],
            ref_count: 1,
        });
        self.heads[head] = id;
        PushResult::Continued
    }

    fn add_link(&mut self, target: EntryId, prev: EntryId, subtree: Subtree) {
        let selection = self.selection;
        let Some(entry) = self.slots[target].as_mut() else {
            return;
        };
        if let Some(link) = entry.links.iter_mut().find(|link| link.prev == prev) {
            // A second subtree for the same edge: genuine ambiguity
            if selection(&link.subtree, &subtree) == Ordering::Greater {
                link.subtree = subtree;
            }
        } else {
            entry.links.push(Link { prev, subtree });
            self.retain(prev);
        }
    }

    /// Duplicate `head` for speculative execution of one parse action
    pub(crate) fn split(&mut self, head: usize) -> usize {
        let id = self.heads[head];
        self.retain(id);
        self.heads.push(id);
        self.heads.len() - 1
    }

    pub(crate) fn remove_head(&mut self, head: usize) {
        let id = self.heads.remove(head);
        self.release(id);
    }

    /// Remove `count` subtrees from the head, or everything down to the
    /// root when `count` is `None`. Extra subtrees ride along without
    /// counting unless `count_extra` is set. Every distinct path through
    /// the DAG produces its own [`PopResult`]; an empty return means no
    /// path was long enough.
    pub(crate) fn pop(
        &mut self,
        head: usize,
        count: Option<usize>,
        count_extra: bool,
    ) -> Vec<PopResult> {
        let start = self.heads[head];
        let mut paths = Vec::new();
        let mut trail = Vec::new();
        self.collect_paths(start, count, count_extra, &mut trail, &mut paths);
        if paths.is_empty() {
            return Vec::new();
        }

        // Keep every landing entry alive before the popped region above
        // them is released
        for (entry, _) in &paths {
            self.retain(*entry);
        }
        let old = std::mem::replace(&mut self.heads[head], paths[0].0);
        self.release(old);

        let mut results = Vec::with_capacity(paths.len());
        for (index, (entry, mut subtrees)) in paths.into_iter().enumerate() {
            subtrees.reverse();
            let head_index = if index == 0 {
                head
            } else {
                self.heads.push(entry);
                self.heads.len() - 1
            };
            results.push(PopResult {
                head_index,
                subtrees,
            });
        }
        results
    }

    fn collect_paths(
        &self,
        id: EntryId,
        remaining: Option<usize>,
        count_extra: bool,
        trail: &mut Vec<Subtree>,
        out: &mut Vec<(EntryId, Vec<Subtree>)>,
    ) {
        let entry = self.entry(id);
        match remaining {
            Some(0) => {
                out.push((id, trail.clone()));
                return;
            }
            None if entry.links.is_empty() => {
                out.push((id, trail.clone()));
                return;
            }
            // Ran out of stack before collecting enough: dead path
            Some(_) if entry.links.is_empty() => return,
            _ => {}
        }
        for link in &entry.links {
            trail.push(link.subtree.clone());
            let next = match remaining {
                None => None,
                Some(r) if link.subtree.is_extra() && !count_extra => Some(r),
                Some(r) => Some(r - 1),
            };
            self.collect_paths(link.prev, next, count_extra, trail, out);
            trail.pop();
        }
    }

    /// Fold the padding that precedes a recovery lookahead into the
    /// error subtree on top of `head`, advancing the head's position
    /// past it.
    pub(crate) fn absorb_padding(&mut self, head: usize, padding: Length) {
        let id = self.heads[head];
        let Some(entry) = self.slots[id].as_mut() else {
            return;
        };
        entry.position += padding;
        if let Some(link) = entry.links.last_mut() {
            let mut subtree = link.subtree.clone();
            subtree.make_mut().size += padding;
            link.subtree = subtree;
        }
    }

    // =========================================================================
    // Debugging
    // =========================================================================

    /// Render the stack as a graphviz digraph
    pub(crate) fn dot_graph(&self, language: &Language) -> String {
        let mut out = String::from("digraph stack {\nrankdir=\"RL\";\n");
        for (id, slot) in self.slots.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let heads = self
                .heads
                .iter()
                .filter(|&&h| h == id)
                .count();
            let _ = writeln!(
                out,
                "node_{} [label=\"state: {}\\npos: {}{}\"];",
                id,
                entry.state,
                entry.position.chars,
                if heads > 0 { "\\n(head)" } else { "" }
            );
            for link in &entry.links {
                let _ = writeln!(
                    out,
                    "node_{} -> node_{} [label=\"{}\"];",
                    id,
                    link.prev,
                    language.symbol_name(link.subtree.symbol())
                );
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::language::{Symbol, SymbolMetadata};

    const SYM_A: Symbol = 2;
    const SYM_B: Symbol = 3;
    const SYM_X: Symbol = 4;

    fn meta() -> SymbolMetadata {
        SymbolMetadata {
            named: true,
            structural: true,
            extra: false,
        }
    }

    fn token(symbol: Symbol, len: usize) -> Subtree {
        Subtree::leaf(symbol, Length::ZERO, Length::new(len, len, 0, len), meta())
    }

    fn extra_token(symbol: Symbol, len: usize) -> Subtree {
        let mut t = token(symbol, len);
        t.make_mut().extra = true;
        t
    }

    #[test]
    fn test_push_advances_state_and_position() {
        let mut stack = Stack::new();
        assert_eq!(stack.top_state(0), 0);
        assert_eq!(stack.push(0, token(SYM_A, 3), 7), PushResult::Continued);
        assert_eq!(stack.top_state(0), 7);
        assert_eq!(stack.top_position(0).chars, 3);
    }

    #[test]
    fn test_identical_heads_merge() {
        let mut stack = Stack::new();
        let twin = stack.split(0);
        assert_eq!(stack.head_count(), 2);

        assert_eq!(stack.push(0, token(SYM_A, 2), 5), PushResult::Continued);
        // Same state, same position, from the other branch: merge
        assert_eq!(stack.push(twin, token(SYM_B, 2), 5), PushResult::Merged);
        assert_eq!(stack.head_count(), 1);
    }

    #[test]
    fn test_duplicate_edge_resolved_by_selection() {
        let mut stack = Stack::new();
        let twin = stack.split(0);
        stack.push(0, token(SYM_A, 2), 5);
        stack.push(twin, token(SYM_B, 2), 5);

        // Both subtrees labelled the same root-to-head edge; the default
        // selection keeps the smaller symbol
        let results = stack.pop(0, Some(1), false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subtrees.len(), 1);
        assert_eq!(results[0].subtrees[0].symbol(), SYM_A);
    }

    #[test]
    fn test_pop_to_root_returns_full_history() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 1), 1);
        stack.push(0, extra_token(SYM_X, 1), 1);
        stack.push(0, token(SYM_B, 2), 2);

        let results = stack.pop(0, None, true);
        assert_eq!(results.len(), 1);
        let symbols: Vec<Symbol> = results[0].subtrees.iter().map(|t| t.symbol()).collect();
        assert_eq!(symbols, vec![SYM_A, SYM_X, SYM_B]);
        assert_eq!(stack.top_state(0), 0);
        assert_eq!(stack.top_position(0).chars, 0);
    }

    #[test]
    fn test_pop_skips_extras_when_counting() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 1), 1);
        stack.push(0, extra_token(SYM_X, 1), 1);
        stack.push(0, token(SYM_B, 2), 2);

        // Two countable subtrees, one extra riding along
        let results = stack.pop(0, Some(2), false);
        assert_eq!(results.len(), 1);
        let symbols: Vec<Symbol> = results[0].subtrees.iter().map(|t| t.symbol()).collect();
        assert_eq!(symbols, vec![SYM_A, SYM_X, SYM_B]);
    }

    #[test]
    fn test_pop_longer_than_stack_fails() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 1), 1);
        assert!(stack.pop(0, Some(3), false).is_empty());
    }

    #[test]
    fn test_pop_enumerates_split_paths() {
        let mut stack = Stack::new();
        let twin = stack.split(0);
        stack.push(0, token(SYM_A, 1), 4);
        stack.push(twin, token(SYM_B, 1), 5);
        // Bring both branches to the same head
        stack.push(0, token(SYM_X, 1), 9);
        let merged = stack.push(1, token(SYM_X, 1), 9);
        assert_eq!(merged, PushResult::Merged);
        assert_eq!(stack.head_count(), 1);

        let results = stack.pop(0, Some(2), false);
        assert_eq!(results.len(), 2);
        // The first path keeps the original head
        assert_eq!(results[0].head_index, 0);
        assert_eq!(results[1].head_index, 1);
        let firsts: Vec<Symbol> = results.iter().map(|r| r.subtrees[0].symbol()).collect();
        assert!(firsts.contains(&SYM_A));
        assert!(firsts.contains(&SYM_B));
        assert_eq!(stack.head_count(), 2);
    }

    #[test]
    fn test_entries_released_with_heads() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 1), 1);
        stack.push(0, token(SYM_B, 1), 2);
        let twin = stack.split(0);
        stack.push(twin, token(SYM_X, 1), 3);
        assert!(stack.entry_count() > 1);

        stack.remove_head(twin);
        stack.remove_head(0);
        // Nothing holds the entries any more, the root included
        assert_eq!(stack.entry_count(), 0);
        assert_eq!(stack.head_count(), 0);
    }

    #[test]
    fn test_absorb_padding_extends_head() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 2), 1);
        stack.absorb_padding(0, Length::new(3, 3, 0, 3));
        assert_eq!(stack.top_position(0).chars, 5);
        let results = stack.pop(0, Some(1), false);
        assert_eq!(results[0].subtrees[0].size().chars, 5);
    }

    #[test]
    fn test_states_on_first_path() {
        let mut stack = Stack::new();
        stack.push(0, token(SYM_A, 1), 4);
        stack.push(0, token(SYM_B, 1), 6);
        assert_eq!(stack.states_on_first_path(0), vec![6, 4, 0]);
    }
}
