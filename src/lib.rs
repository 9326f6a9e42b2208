pub mod base;
pub mod parser;

// Re-export commonly needed items
pub use base::Length;
pub use parser::{
    DebugFn, DebugKind, Edit, Input, InputEncoding, Language, LexFn, LexStateId, Lexer,
    ParseAction, Parser, SliceSource, StateId, Subtree, Symbol, SymbolMetadata, SyntaxTree,
    TextSource, TreeCursor, SYM_END, SYM_ERROR, SYM_FIRST_GRAMMAR,
};
