//! The parse-action interpreter.
//!
//! Drives every stack head through the compiled tables: fetch a
//! lookahead subtree (reused from the previous parse where possible,
//! lexed otherwise), look up the actions for the head's state, and
//! shift, reduce, accept or recover. Heads are serviced in source
//! order, splitting on conflicting actions and merging when branches
//! converge.

use std::cmp::Ordering;

use super::cursor::ReuseCursor;
use super::errors::RuntimeError;
use super::language::{Language, ParseAction, StateId, Symbol, STATE_ERROR, SYM_END, SYM_ERROR};
use super::lexer::{DebugFn, DebugKind, Input, Lexer};
use super::stack::{PushResult, Stack};
use super::subtree::{Subtree, SyntaxTree};

/// Incremental state carried per stack head
#[derive(Clone)]
struct LookaheadState {
    cursor: ReuseCursor,
    /// The last shift consumed a reused branch that the current state
    /// has not yet proven it can stand on
    is_verifying: bool,
}

/// What one action did to a stack head. Internal failures travel
/// separately as [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadStatus {
    Updated,
    Removed,
}

macro_rules! log {
    ($self:expr, $($arg:tt)*) => {
        if $self.lexer.debug_enabled() {
            let message = format!($($arg)*);
            $self.lexer.emit_debug(DebugKind::Parse, &message);
        }
    };
}

/// The runtime parser for one [`Language`]. Reusable across parses;
/// holds no input state between calls.
pub struct Parser<'l> {
    language: &'l Language,
    lexer: Lexer,
    stack: Stack,
    lookahead_states: Vec<LookaheadState>,
    finished_tree: Option<Subtree>,
    /// More than one head existed when the current pass began
    is_split: bool,
}

impl<'l> Parser<'l> {
    pub fn new(language: &'l Language) -> Parser<'l> {
        Parser {
            language,
            lexer: Lexer::new(),
            stack: Stack::new(),
            lookahead_states: Vec::new(),
            finished_tree: None,
            is_split: false,
        }
    }

    /// Install or clear the host's debug callback
    pub fn set_debugger(&mut self, debug: Option<DebugFn>) {
        self.lexer.set_debugger(debug);
    }

    /// Render the current stack as a graphviz digraph
    pub fn stack_dot_graph(&self) -> String {
        self.stack.dot_graph(self.language)
    }

    /// Parse `input`, reusing unchanged subtrees of `previous_tree`
    /// when one is given. Returns `None` on internal failure; lexical
    /// and syntactic problems surface as ERROR nodes inside the tree
    /// instead.
    pub fn parse(&mut self, input: Input, previous_tree: Option<&SyntaxTree>) -> Option<SyntaxTree> {
        self.start(input, previous_tree);
        match self.run() {
            Ok(root) => root.map(SyntaxTree::new),
            Err(error) => {
                tracing::debug!(target: "coppice::parse", "parse failed: {error}");
                self.stack.clear();
                self.lookahead_states.clear();
                self.finished_tree = None;
                None
            }
        }
    }

    fn start(&mut self, input: Input, previous_tree: Option<&SyntaxTree>) {
        if previous_tree.is_some() {
            log!(self, "parse_after_edit");
        } else {
            log!(self, "new_parse");
        }
        self.lexer.set_input(input);
        self.stack.clear();
        self.lookahead_states.clear();
        self.lookahead_states.push(LookaheadState {
            cursor: ReuseCursor::new(previous_tree),
            is_verifying: false,
        });
        self.finished_tree = None;
    }

    fn run(&mut self) -> Result<Option<Subtree>, RuntimeError> {
        let mut max_position = 0usize;
        loop {
            let mut lookahead: Option<Subtree> = None;
            let mut position = 0usize;
            self.is_split = self.stack.head_count() > 1;

            let mut head = 0;
            while head < self.stack.head_count() {
                let mut removed = false;
                while !removed {
                    let last_position = position;
                    let new_position = self.stack.top_position(head).chars;

                    // Always service the head furthest behind; a head at
                    // the frontier waits for the others to catch up
                    if new_position > max_position {
                        max_position = new_position;
                        head += 1;
                        break;
                    } else if new_position == max_position && head > 0 {
                        head += 1;
                        break;
                    }
                    position = new_position;

                    log!(
                        self,
                        "process head:{} head_count:{} state:{} pos:{}",
                        head,
                        self.stack.head_count(),
                        self.stack.top_state(head),
                        position
                    );

                    let tree = match &lookahead {
                        Some(tree) if position == last_position && self.can_reuse(head, tree) => {
                            tree.clone()
                        }
                        _ => {
                            let tree = self.next_lookahead(head)?;
                            lookahead = Some(tree.clone());
                            tree
                        }
                    };

                    log!(
                        self,
                        "lookahead sym:{} size:{}",
                        self.language.symbol_name(tree.symbol()),
                        tree.total_chars()
                    );

                    if self.consume_lookahead(head, &tree)? == HeadStatus::Removed {
                        removed = true;
                    }
                }
            }

            if self.stack.head_count() == 0 {
                self.stack.clear();
                return Ok(self.finished_tree.take());
            }
        }
    }

    // =========================================================================
    // Lookahead
    // =========================================================================

    /// A subtree can serve as the next lookahead for `head` only if the
    /// tables could act on it exactly as a fresh parse would.
    fn can_reuse(&self, head: usize, subtree: &Subtree) -> bool {
        if subtree.symbol() == SYM_ERROR {
            return false;
        }
        let state = self.stack.top_state(head);
        if subtree.is_fragile() && subtree.parse_state() != state {
            return false;
        }
        if let Some(lex_state) = subtree.lex_state() {
            if lex_state != self.language.lex_state_for(state) {
                return false;
            }
        }
        let action = self.language.last_action(state, subtree.symbol());
        if action.is_error() || action.can_hide_split() {
            return false;
        }
        if subtree.is_extra() && !action.is_extra() {
            return false;
        }
        true
    }

    /// Advance to the next lookahead for `head`: a reusable subtree from
    /// the previous tree when one lines up with the head's position, a
    /// freshly lexed token otherwise.
    fn next_lookahead(&mut self, head: usize) -> Result<Subtree, RuntimeError> {
        let position = self.stack.top_position(head);

        loop {
            let Some(node) = self.lookahead_states[head].cursor.node().cloned() else {
                break;
            };
            let cursor_position = self.lookahead_states[head].cursor.position();

            if cursor_position > position.chars {
                break;
            }
            if cursor_position < position.chars {
                log!(
                    self,
                    "past_reusable sym:{}",
                    self.language.symbol_name(node.symbol())
                );
                self.lookahead_states[head].cursor.pop();
                continue;
            }
            if node.has_changes() {
                if self.lookahead_states[head].is_verifying && node.child_count() == 0 {
                    self.breakdown_top_of_stack(head)?;
                    self.lookahead_states[head].is_verifying = false;
                }
                log!(
                    self,
                    "breakdown_changed sym:{}",
                    self.language.symbol_name(node.symbol())
                );
                self.lookahead_states[head].cursor.breakdown();
                continue;
            }
            if !self.can_reuse(head, &node) {
                log!(
                    self,
                    "breakdown_unreusable sym:{}",
                    self.language.symbol_name(node.symbol())
                );
                self.lookahead_states[head].cursor.breakdown();
                continue;
            }

            log!(
                self,
                "reuse sym:{} size:{} extra:{}",
                self.language.symbol_name(node.symbol()),
                node.total_chars(),
                node.is_extra()
            );
            self.lookahead_states[head].cursor.pop();
            return Ok(node);
        }

        self.lexer.reset(position);
        let lex_state = self.language.lex_state_for(self.stack.top_state(head));
        log!(self, "lex state:{}", lex_state);
        self.language
            .lex(&mut self.lexer, lex_state, false)
            .ok_or(RuntimeError::LexFailure)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Run parse actions for `head` until the lookahead is consumed,
    /// the head is removed, or recovery takes over.
    fn consume_lookahead(
        &mut self,
        head: usize,
        lookahead: &Subtree,
    ) -> Result<HeadStatus, RuntimeError> {
        loop {
            let state = self.stack.top_state(head);
            let actions: Vec<ParseAction> =
                self.language.actions(state, lookahead.symbol()).to_vec();

            for (index, &listed) in actions.iter().enumerate() {
                // Every action except the final one runs on its own
                // split of the head; a shift is always final
                let current_head = if index == actions.len() - 1 {
                    head
                } else {
                    let new_head = self.split_head(head);
                    log!(self, "split_action from_head:{} new_head:{}", head, new_head);
                    new_head
                };

                // Tokens the lexer rejected act as errors no matter
                // what the tables say
                let action = if lookahead.symbol() == SYM_ERROR {
                    ParseAction::Error
                } else {
                    listed
                };

                match action {
                    ParseAction::Error => {
                        log!(self, "error_sym");
                        if self.lookahead_states[current_head].is_verifying {
                            // Not a real error: a reused branch turned
                            // out stale; unwrap it and retry
                            self.breakdown_top_of_stack(current_head)?;
                            self.lookahead_states[current_head].is_verifying = false;
                            return Ok(HeadStatus::Removed);
                        }
                        if self.stack.head_count() == 1 {
                            return match self.handle_error(current_head, lookahead)? {
                                HeadStatus::Updated => Ok(HeadStatus::Updated),
                                HeadStatus::Removed => self.accept(current_head),
                            };
                        }
                        log!(self, "bail current_head:{}", current_head);
                        self.remove_head(current_head);
                        return Ok(HeadStatus::Removed);
                    }

                    ParseAction::Shift {
                        state: to_state,
                        extra,
                        ..
                    } => {
                        if extra {
                            log!(self, "shift_extra");
                            return self.shift_extra(current_head, state, lookahead);
                        }
                        log!(self, "shift state:{}", to_state);
                        self.lookahead_states[current_head].is_verifying =
                            lookahead.child_count() > 0;
                        return self.shift(current_head, to_state, lookahead.clone());
                    }

                    ParseAction::Reduce {
                        symbol,
                        child_count,
                        extra,
                        fragile,
                    } => {
                        self.lookahead_states[current_head].is_verifying = false;
                        if extra {
                            log!(
                                self,
                                "reduce_extra sym:{}",
                                self.language.symbol_name(symbol)
                            );
                            let status =
                                self.reduce(current_head, symbol, Some(1), true, false, false)?;
                            if status == HeadStatus::Removed && current_head == head {
                                return Ok(HeadStatus::Removed);
                            }
                        } else {
                            log!(
                                self,
                                "reduce sym:{} child_count:{} fragile:{}",
                                self.language.symbol_name(symbol),
                                child_count,
                                fragile
                            );
                            let status = self.reduce(
                                current_head,
                                symbol,
                                Some(child_count as usize),
                                false,
                                fragile,
                                false,
                            )?;
                            if status == HeadStatus::Removed && current_head == head {
                                return Ok(HeadStatus::Removed);
                            }
                        }
                    }

                    ParseAction::Accept => {
                        log!(self, "accept");
                        return self.accept(current_head);
                    }
                }
            }
        }
    }

    fn split_head(&mut self, head: usize) -> usize {
        let new_head = self.stack.split(head);
        let state = self.lookahead_states[head].clone();
        self.lookahead_states.push(state);
        debug_assert_eq!(new_head, self.lookahead_states.len() - 1);
        new_head
    }

    fn remove_head(&mut self, head: usize) {
        self.lookahead_states.remove(head);
        self.stack.remove_head(head);
    }

    fn shift(
        &mut self,
        head: usize,
        state: StateId,
        lookahead: Subtree,
    ) -> Result<HeadStatus, RuntimeError> {
        match self.stack.push(head, lookahead, state) {
            PushResult::Merged => {
                log!(self, "merge head:{}", head);
                self.lookahead_states.remove(head);
                Ok(HeadStatus::Removed)
            }
            PushResult::Continued => Ok(HeadStatus::Updated),
        }
    }

    /// Shift a token the grammar allows anywhere, leaving the state
    /// unchanged. The extra flag is set on a detached copy whenever the
    /// token is still shared with other heads.
    fn shift_extra(
        &mut self,
        head: usize,
        state: StateId,
        lookahead: &Subtree,
    ) -> Result<HeadStatus, RuntimeError> {
        let mut copy = lookahead.clone();
        copy.make_mut().extra = true;
        self.shift(head, state, copy)
    }

    /// Pop `child_count` non-extra subtrees (all of them when `None`)
    /// and wrap each popped path in a new branch, pushing the state the
    /// goto table dictates. Trailing extras are split off and
    /// reattached above the new branch.
    fn reduce(
        &mut self,
        head: usize,
        symbol: Symbol,
        child_count: Option<usize>,
        extra: bool,
        fragile: bool,
        count_extra: bool,
    ) -> Result<HeadStatus, RuntimeError> {
        let metadata = self.language.symbol_metadata(symbol);
        let pop_results = self.stack.pop(head, child_count, count_extra);
        if pop_results.is_empty() {
            return Err(RuntimeError::EmptyPop);
        }
        let result_count = pop_results.len();
        for _ in 1..result_count {
            // Paths split off by the pop need their own lookahead state
            let state = self.lookahead_states[head].clone();
            self.lookahead_states.push(state);
        }

        let mut removed_heads = 0usize;
        for (index, pop_result) in pop_results.into_iter().enumerate() {
            let mut trees = pop_result.subtrees;
            let new_head = pop_result.head_index - removed_heads;

            if index > 0 {
                if symbol == SYM_ERROR {
                    // One error branch is enough
                    removed_heads += 1;
                    self.remove_head(new_head);
                    continue;
                }
                log!(self, "split_during_reduce new_head:{}", new_head);
            }

            let trailing_extra_count = trees.iter().rev().take_while(|t| t.is_extra()).count();
            let trailing = trees.split_off(trees.len() - trailing_extra_count);

            let top_state = self.stack.top_state(new_head);
            let push_state = if extra {
                top_state
            } else if child_count.is_none() {
                0
            } else {
                match self.language.last_action(top_state, symbol) {
                    ParseAction::Shift { state, .. } => state,
                    _ => {
                        return Err(RuntimeError::BadAction {
                            state: top_state,
                            symbol,
                        })
                    }
                }
            };

            let mut parent = Subtree::node(symbol, trees, metadata);
            {
                let data = parent.make_mut();
                if data.parse_state != STATE_ERROR {
                    data.parse_state = top_state;
                }
                if extra {
                    data.extra = true;
                }
                // Anything reduced while the parse is ambiguous can
                // only be trusted from the exact state that built it
                if fragile || self.is_split || self.stack.head_count() > 1 || result_count > 1 {
                    data.fragile_left = true;
                    data.fragile_right = true;
                    data.parse_state = STATE_ERROR;
                }
            }

            match self.stack.push(new_head, parent, push_state) {
                PushResult::Merged => {
                    log!(self, "merge_during_reduce head:{}", new_head);
                    self.lookahead_states.remove(new_head);
                    removed_heads += 1;
                    continue;
                }
                PushResult::Continued => {}
            }

            for tree in trailing {
                match self.stack.push(new_head, tree, push_state) {
                    PushResult::Merged => {
                        self.lookahead_states.remove(new_head);
                        removed_heads += 1;
                        break;
                    }
                    PushResult::Continued => {}
                }
            }
        }

        if removed_heads < result_count {
            Ok(HeadStatus::Updated)
        } else {
            Ok(HeadStatus::Removed)
        }
    }

    /// Replace the subtree on top of `head` by its children, replayed
    /// as individual pushes. Repeats while the rightmost exposed child
    /// is itself a branch. Used when a reused branch proves stale.
    fn breakdown_top_of_stack(&mut self, head: usize) -> Result<(), RuntimeError> {
        loop {
            let pop_results = self.stack.pop(head, Some(1), false);
            if pop_results.is_empty() {
                return Err(RuntimeError::EmptyPop);
            }
            for _ in 1..pop_results.len() {
                let state = self.lookahead_states[head].clone();
                self.lookahead_states.push(state);
            }

            let mut last_child: Option<Subtree> = None;
            let mut removed_heads = 0usize;
            for pop_result in pop_results {
                let trees = pop_result.subtrees;
                let head_index = pop_result.head_index - removed_heads;
                let Some(parent) = trees.first().cloned() else {
                    return Err(RuntimeError::EmptyPop);
                };
                log!(
                    self,
                    "breakdown_pop sym:{} size:{}",
                    self.language.symbol_name(parent.symbol()),
                    parent.total_chars()
                );

                let mut state = self.stack.top_state(head_index);
                let mut merged = false;
                for child in parent.children() {
                    if !child.is_extra() {
                        state = match self.language.last_action(state, child.symbol()) {
                            ParseAction::Shift { state, .. } => state,
                            _ => {
                                return Err(RuntimeError::BadAction {
                                    state,
                                    symbol: child.symbol(),
                                })
                            }
                        };
                    }
                    log!(
                        self,
                        "breakdown_push sym:{} size:{}",
                        self.language.symbol_name(child.symbol()),
                        child.total_chars()
                    );
                    last_child = Some(child.clone());
                    if self.stack.push(head_index, child.clone(), state) == PushResult::Merged {
                        self.lookahead_states.remove(head_index);
                        removed_heads += 1;
                        merged = true;
                        break;
                    }
                }
                if merged {
                    continue;
                }
                // Extras that rode on top of the popped entry go back
                // unchanged
                for tree in trees.iter().skip(1) {
                    if self.stack.push(head_index, tree.clone(), state) == PushResult::Merged {
                        self.lookahead_states.remove(head_index);
                        removed_heads += 1;
                        break;
                    }
                }
            }

            match &last_child {
                Some(child) if child.child_count() > 0 => continue,
                _ => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Accept
    // =========================================================================

    /// Pop everything, fold the extras surrounding the single non-extra
    /// child into the root's own children, and keep the better of this
    /// tree and any previously finished one.
    fn accept(&mut self, head: usize) -> Result<HeadStatus, RuntimeError> {
        let mut pop_results = self.stack.pop(head, None, true);
        if pop_results.is_empty() {
            return Err(RuntimeError::EmptyPop);
        }
        for _ in 1..pop_results.len() {
            let state = self.lookahead_states[head].clone();
            self.lookahead_states.push(state);
        }
        // Remove higher indices first so the recorded ones stay valid
        pop_results.sort_by(|a, b| b.head_index.cmp(&a.head_index));

        for pop_result in pop_results {
            let trees = pop_result.subtrees;
            let Some(root_index) = trees.iter().position(|t| !t.is_extra()) else {
                self.remove_head(pop_result.head_index);
                continue;
            };
            let root = trees[root_index].clone();

            let rebuilt = if trees.len() == 1 && root.child_count() == 0 {
                root
            } else {
                let mut children =
                    Vec::with_capacity(trees.len() - 1 + root.child_count());
                children.extend_from_slice(&trees[..root_index]);
                children.extend_from_slice(root.children());
                children.extend_from_slice(&trees[root_index + 1..]);
                root.with_children(children)
            };

            self.remove_head(pop_result.head_index);

            let better = match &self.finished_tree {
                None => true,
                Some(current) => Subtree::compare(current, &rebuilt) == Ordering::Greater,
            };
            if better {
                log!(
                    self,
                    "select tree:{}",
                    self.language.symbol_name(rebuilt.symbol())
                );
                self.finished_tree = Some(rebuilt);
            }
        }

        Ok(HeadStatus::Removed)
    }

    // =========================================================================
    // Error recovery
    // =========================================================================

    /// Reduce everything above the recovery point into an error branch,
    /// folding the lookahead's padding into it so the head lands right
    /// at the next token's content.
    fn reduce_error(
        &mut self,
        head: usize,
        child_count: Option<usize>,
        lookahead: &Subtree,
    ) -> Result<HeadStatus, RuntimeError> {
        match self.reduce(head, SYM_ERROR, child_count, false, true, true)? {
            HeadStatus::Removed => Ok(HeadStatus::Removed),
            HeadStatus::Updated => {
                self.stack.absorb_padding(head, lookahead.padding());
                Ok(HeadStatus::Updated)
            }
        }
    }

    /// Last-head error recovery: walk down the stack looking for a
    /// state that expects an error token and can continue with the
    /// current lookahead afterwards. Failing that, skip tokens in
    /// recovery lexing mode until recovery works or the input ends.
    fn handle_error(
        &mut self,
        head: usize,
        lookahead: &Subtree,
    ) -> Result<HeadStatus, RuntimeError> {
        let mut error_token_count = 1usize;
        let mut lookahead = lookahead.clone();

        loop {
            let states = self.stack.states_on_first_path(head);
            for (depth, &stack_state) in states.iter().enumerate() {
                let ParseAction::Shift {
                    state: error_state, ..
                } = self.language.last_action(stack_state, SYM_ERROR)
                else {
                    continue;
                };
                if self
                    .language
                    .last_action(error_state, lookahead.symbol())
                    .is_error()
                {
                    continue;
                }
                let count = depth + error_token_count - 1;
                log!(self, "recover state:{} count:{}", error_state, count);
                self.reduce_error(head, Some(count), &lookahead)?;
                return Ok(HeadStatus::Updated);
            }

            // No recovery point for this token: absorb it and move on
            log!(
                self,
                "skip token:{}",
                self.language.symbol_name(lookahead.symbol())
            );
            let state = self.stack.top_state(head);
            if self.shift(head, state, lookahead.clone())? == HeadStatus::Removed {
                return Ok(HeadStatus::Removed);
            }
            let next = self
                .language
                .lex(&mut self.lexer, 0, true)
                .ok_or(RuntimeError::LexFailure)?;
            lookahead = next;
            error_token_count += 1;

            if lookahead.symbol() == SYM_END {
                log!(self, "fail_to_recover");
                self.reduce_error(head, None, &lookahead)?;
                return Ok(HeadStatus::Removed);
            }
        }
    }
}
