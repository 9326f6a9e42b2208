//! Compiled language tables.
//!
//! A [`Language`] bundles everything the runtime needs to know about one
//! grammar: the parse-action table, the lex-state table, the generated
//! lexing function and per-symbol metadata. The runtime only ever reads
//! these tables; producing them is the grammar compiler's job.

use std::collections::HashMap;

use crate::parser::lexer::Lexer;
use crate::parser::subtree::Subtree;

/// Identifier for a grammar symbol (terminal or nonterminal)
pub type Symbol = u16;

/// Identifier for a parse state
pub type StateId = u16;

/// Identifier for a lex state
pub type LexStateId = u16;

/// Reserved symbol: end of input
pub const SYM_END: Symbol = 0;

/// Reserved symbol: error
pub const SYM_ERROR: Symbol = 1;

/// First symbol id available to grammar symbols
pub const SYM_FIRST_GRAMMAR: Symbol = 2;

/// Sentinel parse state recorded on fragile branches so that no reuse
/// check can ever match them against a real state.
pub const STATE_ERROR: StateId = StateId::MAX;

/// The lexing function generated by the grammar compiler. Interprets the
/// lex DFA starting from `lex_state`, driving the lexer's callbacks, and
/// returns the recognized leaf. `recovery` selects the permissive mode
/// used while skipping tokens after a parse error. Returns `None` only
/// on internal failure.
pub type LexFn = fn(&mut Lexer, LexStateId, bool) -> Option<Subtree>;

/// Static facts about one grammar symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolMetadata {
    /// The symbol has a name in the grammar (appears in trees as itself)
    pub named: bool,
    /// The symbol takes part in grammar structure. Non-structural symbols
    /// (comments, other trivia) can be shared between stack heads without
    /// copying.
    pub structural: bool,
    /// The grammar permits this symbol anywhere
    pub extra: bool,
}

/// Display names for a symbol: the grammar-internal rule name and the
/// name shown to users, which may differ after rule inlining.
#[derive(Debug, Clone, Default)]
pub struct SymbolName {
    pub internal: Option<String>,
    pub external: String,
}

impl SymbolName {
    /// The preferred name for diagnostics
    pub fn label(&self) -> &str {
        self.internal.as_deref().unwrap_or(&self.external)
    }
}

/// One entry of the parse-action table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAction {
    Shift {
        state: StateId,
        extra: bool,
        fragile: bool,
        /// Shifting here can hide an ambiguity that a fresh parse would
        /// explore, so reuse must not take this shortcut.
        can_hide_split: bool,
    },
    Reduce {
        symbol: Symbol,
        child_count: u16,
        extra: bool,
        fragile: bool,
    },
    Accept,
    Error,
}

impl ParseAction {
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ParseAction::Error)
    }

    #[inline]
    pub fn is_extra(&self) -> bool {
        matches!(
            self,
            ParseAction::Shift { extra: true, .. } | ParseAction::Reduce { extra: true, .. }
        )
    }

    #[inline]
    pub fn can_hide_split(&self) -> bool {
        matches!(
            self,
            ParseAction::Shift {
                can_hide_split: true,
                ..
            }
        )
    }
}

/// No-entry cell of the action table
const ERROR_ACTIONS: &[ParseAction] = &[ParseAction::Error];

/// The compiled tables for one grammar.
///
/// Built by the grammar compiler (or by hand in tests). Parse states
/// index `lex_states`; `(state, symbol)` pairs index the action table.
/// When a cell holds several actions the shift, if any, comes last.
pub struct Language {
    state_count: usize,
    actions: Vec<HashMap<Symbol, Vec<ParseAction>>>,
    lex_states: Vec<LexStateId>,
    lex_fn: LexFn,
    metadata: Vec<SymbolMetadata>,
    names: Vec<SymbolName>,
}

impl Language {
    /// Create a language with `state_count` parse states, all starting in
    /// lex state 0 and with only the reserved symbols defined.
    pub fn new(state_count: usize, lex_fn: LexFn) -> Self {
        let mut lang = Language {
            state_count,
            actions: vec![HashMap::new(); state_count],
            lex_states: vec![0; state_count],
            lex_fn,
            metadata: Vec::new(),
            names: Vec::new(),
        };
        lang.define_symbol(
            SYM_END,
            "end",
            SymbolMetadata {
                named: false,
                structural: true,
                extra: false,
            },
        );
        lang.define_symbol(
            SYM_ERROR,
            "ERROR",
            SymbolMetadata {
                named: true,
                structural: true,
                extra: false,
            },
        );
        lang
    }

    /// Register a symbol's name and metadata. Symbols must be defined
    /// densely starting from the reserved range.
    pub fn define_symbol(&mut self, symbol: Symbol, name: &str, metadata: SymbolMetadata) {
        let index = symbol as usize;
        if index >= self.metadata.len() {
            self.metadata.resize(index + 1, SymbolMetadata::default());
            self.names.resize(index + 1, SymbolName::default());
        }
        self.metadata[index] = metadata;
        self.names[index] = SymbolName {
            internal: None,
            external: name.to_string(),
        };
    }

    /// Append an action to the `(state, symbol)` cell. A shift must stay
    /// the last entry of its cell.
    pub fn add_action(&mut self, state: StateId, symbol: Symbol, action: ParseAction) {
        let cell = self.actions[state as usize].entry(symbol).or_default();
        debug_assert!(
            !cell
                .last()
                .is_some_and(|a| matches!(a, ParseAction::Shift { .. })),
            "a shift action must be the last entry of a table cell"
        );
        cell.push(action);
    }

    /// Set the lex state the lexer starts in for a given parse state
    pub fn set_lex_state(&mut self, state: StateId, lex_state: LexStateId) {
        self.lex_states[state as usize] = lex_state;
    }

    pub fn state_count(&self) -> usize {
        self.state_count
    }

    /// All actions for `(state, symbol)`; a missing entry reads as a
    /// single error action.
    pub fn actions(&self, state: StateId, symbol: Symbol) -> &[ParseAction] {
        self.actions
            .get(state as usize)
            .and_then(|row| row.get(&symbol))
            .map(|cell| cell.as_slice())
            .filter(|cell| !cell.is_empty())
            .unwrap_or(ERROR_ACTIONS)
    }

    /// The final action for `(state, symbol)`: the shift if one exists,
    /// otherwise the sole remaining action.
    pub fn last_action(&self, state: StateId, symbol: Symbol) -> ParseAction {
        *self
            .actions(state, symbol)
            .last()
            .unwrap_or(&ParseAction::Error)
    }

    /// The lex state the DFA starts in when lexing at `state`
    pub fn lex_state_for(&self, state: StateId) -> LexStateId {
        self.lex_states.get(state as usize).copied().unwrap_or(0)
    }

    /// Run the generated lexing function
    pub fn lex(&self, lexer: &mut Lexer, lex_state: LexStateId, recovery: bool) -> Option<Subtree> {
        (self.lex_fn)(lexer, lex_state, recovery)
    }

    pub fn symbol_metadata(&self, symbol: Symbol) -> SymbolMetadata {
        self.metadata
            .get(symbol as usize)
            .copied()
            .unwrap_or_default()
    }

    /// The diagnostic name of a symbol
    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        self.names
            .get(symbol as usize)
            .map(|n| n.label())
            .unwrap_or("?")
    }
}
