//! Incremental GLR parsing runtime.
//!
//! This module family implements the runtime half of a table-driven
//! parser:
//! - **language** - the compiled parse/lex tables the runtime consumes
//! - **subtree** - immutable, shared syntax trees with cached extents
//! - **lexer** - chunked input reading and DFA callbacks
//! - **cursor** - source-order walk over a previous tree for reuse
//! - **stack** - the graph-structured stack
//! - **parser** - the parse-action interpreter driving all of the above
//!
//! ## Architecture
//!
//! ```text
//! Input bytes
//!     |
//! Lexer (DFA callbacks) --- or --- reuse cursor over the previous tree
//!     |
//! lookahead Subtree
//!     |
//! action lookup per stack head -> shift / reduce / accept / recover
//!     |
//! graph-structured stack mutation
//!     |
//! finished SyntaxTree
//! ```
//!
//! The grammar compiler that produces the tables is a separate concern;
//! everything here treats [`Language`] as given.

#[allow(clippy::module_inception)]
mod parser;

mod cursor;
mod errors;
mod language;
mod lexer;
mod stack;
mod subtree;

pub use errors::RuntimeError;
pub use language::{
    Language, LexFn, LexStateId, ParseAction, StateId, Symbol, SymbolMetadata, SymbolName,
    STATE_ERROR, SYM_END, SYM_ERROR, SYM_FIRST_GRAMMAR,
};
pub use lexer::{DebugFn, DebugKind, Input, InputEncoding, Lexer, SliceSource, TextSource};
pub use parser::Parser;
pub use subtree::{Edit, Subtree, SyntaxTree, TreeCursor};
