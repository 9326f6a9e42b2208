//! Internal runtime failures.
//!
//! Lexical and parse errors never surface here; those become ERROR
//! subtrees in the output. A [`RuntimeError`] means the tables and the
//! stack disagreed in a way the runtime cannot repair. The parse loop
//! answers it by releasing all state and reporting no tree at all.

use thiserror::Error;

use super::language::{StateId, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A pop found no path of the requested length
    #[error("stack head has no path of the requested length")]
    EmptyPop,

    /// The tables promised a shift for `(state, symbol)` but delivered
    /// something else
    #[error("no shift action for symbol {symbol} in state {state}")]
    BadAction { state: StateId, symbol: Symbol },

    /// The generated lexing function failed outright
    #[error("lexing function returned no token")]
    LexFailure,
}
