//! Built-in fix agents.

pub mod whitespace;

pub use whitespace::WhitespaceAgent;
