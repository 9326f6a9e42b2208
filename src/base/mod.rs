//! Foundation types for the coppice runtime.
//!
//! This module provides the positional arithmetic used throughout the
//! parser:
//! - [`Length`] - byte/char/row/column extents and absolute positions
//!
//! This module has NO dependencies on other coppice modules.

mod length;

pub use length::Length;
