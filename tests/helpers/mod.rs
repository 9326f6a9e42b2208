//! Fixture languages for the runtime tests.
//!
//! The grammar compiler is out of scope for this crate, so the tests
//! hand-build the tables it would emit for a few small grammars, along
//! with lexing functions written the way generated DFA interpreters
//! drive the lexer callbacks.

// Each suite pulls in the subset of fixtures it needs
#![allow(dead_code)]

use coppice::{
    Input, Language, LexStateId, Lexer, ParseAction, StateId, Subtree, Symbol, SymbolMetadata,
    SyntaxTree, SYM_END, SYM_ERROR,
};

// =============================================================================
// Shared table-building helpers
// =============================================================================

pub fn shift(state: StateId) -> ParseAction {
    ParseAction::Shift {
        state,
        extra: false,
        fragile: false,
        can_hide_split: false,
    }
}

pub fn shift_extra(state: StateId) -> ParseAction {
    ParseAction::Shift {
        state,
        extra: true,
        fragile: false,
        can_hide_split: false,
    }
}

pub fn reduce(symbol: Symbol, child_count: u16) -> ParseAction {
    ParseAction::Reduce {
        symbol,
        child_count,
        extra: false,
        fragile: false,
    }
}

pub fn named(structural: bool) -> SymbolMetadata {
    SymbolMetadata {
        named: true,
        structural,
        extra: false,
    }
}

pub fn anonymous() -> SymbolMetadata {
    SymbolMetadata {
        named: false,
        structural: true,
        extra: false,
    }
}

pub fn extra_meta() -> SymbolMetadata {
    SymbolMetadata {
        named: true,
        structural: false,
        extra: true,
    }
}

// =============================================================================
// Arithmetic grammar: E -> E '+' E | id | str | error
// =============================================================================
//
// The shift/reduce conflict on '+' is resolved toward reduce, giving
// left-associative sums. Comments are extra tokens; strings exist to
// provoke mid-token end of input.

pub const ID: Symbol = 2;
pub const PLUS: Symbol = 3;
pub const COMMENT: Symbol = 4;
pub const STR: Symbol = 5;
pub const E: Symbol = 6;

fn is_id_start(c: char) -> bool {
    unicode_ident::is_xid_start(c) || c.is_ascii_digit()
}

fn is_id_continue(c: char) -> bool {
    unicode_ident::is_xid_continue(c) || c.is_ascii_digit()
}

pub fn lex_arith(lexer: &mut Lexer, state: LexStateId, _recovery: bool) -> Option<Subtree> {
    lexer.start(state);
    while matches!(lexer.lookahead(), Some(c) if c == ' ' || c == '\t' || c == '\n') {
        lexer.advance(0);
    }
    lexer.start_token();

    let Some(c) = lexer.lookahead() else {
        return Some(lexer.accept(SYM_END, anonymous(), false));
    };
    match c {
        '+' => {
            lexer.advance(1);
            Some(lexer.accept(PLUS, anonymous(), false))
        }
        '"' => {
            lexer.advance(2);
            loop {
                match lexer.lookahead() {
                    Some('"') => {
                        lexer.advance(2);
                        return Some(lexer.accept(STR, named(true), false));
                    }
                    Some(_) => {
                        lexer.advance(2);
                    }
                    // End of input inside the string literal
                    None => return Some(lexer.accept(SYM_ERROR, anonymous(), true)),
                }
            }
        }
        '/' => {
            lexer.advance(3);
            if lexer.lookahead() != Some('*') {
                return Some(lexer.accept(SYM_ERROR, anonymous(), true));
            }
            lexer.advance(3);
            let mut saw_star = false;
            loop {
                match lexer.lookahead() {
                    Some('/') if saw_star => {
                        lexer.advance(3);
                        return Some(lexer.accept(COMMENT, extra_meta(), false));
                    }
                    Some(ch) => {
                        saw_star = ch == '*';
                        lexer.advance(3);
                    }
                    None => return Some(lexer.accept(SYM_ERROR, anonymous(), true)),
                }
            }
        }
        c if is_id_start(c) => {
            lexer.advance(4);
            while matches!(lexer.lookahead(), Some(ch) if is_id_continue(ch)) {
                lexer.advance(4);
            }
            Some(lexer.accept(ID, named(true), false))
        }
        _ => Some(lexer.accept(SYM_ERROR, anonymous(), true)),
    }
}

pub fn arith_language() -> Language {
    let mut lang = Language::new(7, lex_arith);
    lang.define_symbol(ID, "id", named(true));
    lang.define_symbol(PLUS, "+", anonymous());
    lang.define_symbol(COMMENT, "comment", extra_meta());
    lang.define_symbol(STR, "str", named(true));
    lang.define_symbol(E, "E", named(true));

    // State 0: before an expression
    lang.add_action(0, ID, shift(1));
    lang.add_action(0, STR, shift(5));
    lang.add_action(0, SYM_ERROR, shift(6));
    lang.add_action(0, E, shift(2));
    // State 1: E -> id .
    lang.add_action(1, PLUS, reduce(E, 1));
    lang.add_action(1, SYM_END, reduce(E, 1));
    // State 2: after a complete expression
    lang.add_action(2, PLUS, shift(3));
    lang.add_action(2, SYM_END, ParseAction::Accept);
    // State 3: after 'E +'
    lang.add_action(3, ID, shift(1));
    lang.add_action(3, STR, shift(5));
    lang.add_action(3, SYM_ERROR, shift(6));
    lang.add_action(3, E, shift(4));
    // State 4: E -> E + E .  (reduce on '+': left associative)
    lang.add_action(4, PLUS, reduce(E, 3));
    lang.add_action(4, SYM_END, reduce(E, 3));
    // State 5: E -> str .
    lang.add_action(5, PLUS, reduce(E, 1));
    lang.add_action(5, SYM_END, reduce(E, 1));
    // State 6: E -> error .
    lang.add_action(6, PLUS, reduce(E, 1));
    lang.add_action(6, SYM_END, reduce(E, 1));

    // Comments can appear anywhere
    for state in 0..7 {
        lang.add_action(state, COMMENT, shift_extra(state));
    }
    lang
}

// =============================================================================
// Nest grammar: S -> 'a' S 'a' | 'a'
// =============================================================================
//
// Keeps its shift/reduce conflict, so the runtime explores both
// branches in parallel and drops the ones that die.

pub const A: Symbol = 2;
pub const S: Symbol = 3;

pub fn lex_a(lexer: &mut Lexer, state: LexStateId, _recovery: bool) -> Option<Subtree> {
    lexer.start(state);
    while matches!(lexer.lookahead(), Some(c) if c.is_whitespace()) {
        lexer.advance(0);
    }
    lexer.start_token();
    match lexer.lookahead() {
        None => Some(lexer.accept(SYM_END, anonymous(), false)),
        Some('a') => {
            lexer.advance(1);
            Some(lexer.accept(A, named(true), false))
        }
        Some(_) => Some(lexer.accept(SYM_ERROR, anonymous(), true)),
    }
}

pub fn nest_language() -> Language {
    let mut lang = Language::new(5, lex_a);
    lang.define_symbol(A, "a", named(true));
    lang.define_symbol(S, "S", named(true));

    // State 0
    lang.add_action(0, A, shift(1));
    lang.add_action(0, S, shift(2));
    // State 1: S -> a .  |  S -> a . S a   (conflict on 'a')
    lang.add_action(1, A, reduce(S, 1));
    lang.add_action(1, A, shift(1));
    lang.add_action(1, SYM_END, reduce(S, 1));
    lang.add_action(1, S, shift(3));
    // State 2
    lang.add_action(2, SYM_END, ParseAction::Accept);
    // State 3: S -> a S . a
    lang.add_action(3, A, shift(4));
    // State 4: S -> a S a .
    lang.add_action(4, A, reduce(S, 3));
    lang.add_action(4, SYM_END, reduce(S, 3));
    lang
}

// =============================================================================
// Pair grammar: S -> S S | 'a'
// =============================================================================
//
// Genuinely ambiguous: "aaa" parses both left and right nested. Forces
// head merging and ambiguity resolution through tree selection.

pub fn pair_language() -> Language {
    let mut lang = Language::new(4, lex_a);
    lang.define_symbol(A, "a", named(true));
    lang.define_symbol(S, "S", named(true));

    // State 0
    lang.add_action(0, A, shift(1));
    lang.add_action(0, S, shift(2));
    // State 1: S -> a .
    lang.add_action(1, A, reduce(S, 1));
    lang.add_action(1, SYM_END, reduce(S, 1));
    // State 2: S -> S . S  |  accept
    lang.add_action(2, A, shift(1));
    lang.add_action(2, SYM_END, ParseAction::Accept);
    lang.add_action(2, S, shift(3));
    // State 3: S -> S S .  |  S -> S . S   (conflict on 'a')
    lang.add_action(3, A, reduce(S, 2));
    lang.add_action(3, A, shift(1));
    lang.add_action(3, SYM_END, reduce(S, 2));
    lang.add_action(3, S, shift(3));
    lang
}

// =============================================================================
// Tree inspection helpers
// =============================================================================

/// All leaves of the tree in source order
pub fn leaves(tree: &SyntaxTree) -> Vec<Subtree> {
    fn collect(node: &Subtree, out: &mut Vec<Subtree>) {
        if node.child_count() == 0 {
            out.push(node.clone());
        } else {
            for child in node.children() {
                collect(child, out);
            }
        }
    }
    let mut out = Vec::new();
    collect(tree.root(), &mut out);
    out
}

/// Number of nodes (branches or leaves) carrying the error symbol
pub fn error_node_count(tree: &SyntaxTree) -> usize {
    fn count(node: &Subtree) -> usize {
        let own = usize::from(node.symbol() == SYM_ERROR);
        own + node.children().iter().map(count).sum::<usize>()
    }
    count(tree.root())
}

/// Parse a string from scratch
pub fn parse_str(language: &Language, text: &str) -> SyntaxTree {
    let mut parser = coppice::Parser::new(language);
    parser
        .parse(Input::from_str(text), None)
        .expect("parse should produce a tree")
}
