//! # Sylva
//!
//! An incremental GLR parse runtime: it consumes an LR(1) parse table
//! (conflict actions included), parses arbitrary input text into a concrete
//! syntax tree, recovers from syntax errors, and reuses unchanged subtrees
//! when re-parsing after edits.
//!
//! ## Overview
//!
//! - **Ambiguity**: multiple stack versions explore conflicting actions in
//!   parallel; equivalent versions merge, dominated ones are pruned, and
//!   dynamic precedence breaks remaining ties.
//! - **Error recovery**: every returned tree covers the whole input; error
//!   regions appear as `ERROR` subtrees the caller can walk.
//! - **Incremental parsing**: apply an [`InputEdit`] to a previous tree
//!   (marking changed regions), pass it back to [`Parser::parse`], and
//!   unchanged subtrees are reused without re-lexing.
//! - **External scanners**: user tokenizers run ahead of the generated lex
//!   function in states that permit their tokens, with their state
//!   serialized around every call.
//!
//! ## Quick start
//!
//! ```no_run
//! use sylva::{Parser, testing::grammar::c_like_language};
//!
//! let mut parser = Parser::new();
//! parser.set_language(c_like_language());
//! let tree = parser.parse(&"int x = 1;", None, false).unwrap();
//! let root = parser.pool().get(tree.root());
//! assert_eq!(root.total_bytes(), 10);
//! parser.release_tree(tree);
//! ```
//!
//! ## Modules
//!
//! - [`text`] — points, lengths, and input edits
//! - [`language`] — the parse-table interface and external-scanner hooks
//! - [`lexer`] — chunked input access and the character-level lexer
//! - [`tree`] — the refcounted subtree model and its slab pool
//! - [`stack`] — the graph-structured, versioned parse stack
//! - [`parser`] — the GLR driver
//! - [`testing`] — grammar fixtures and assertion helpers

pub mod language;
pub mod lexer;
pub mod parser;
pub mod stack;
pub mod testing;
pub mod text;
pub mod tree;

pub use language::{
    Language, LanguageData, LanguageError, LexMode, ParseAction, StateId, Symbol, TableEntry,
    ERROR_STATE, STATE_NONE, SYM_END, SYM_ERROR,
};
pub use lexer::{Input, Lexer};
pub use parser::{LogKind, Logger, Parser, Tree, MAX_VERSION_COUNT};
pub use text::{measure, InputEdit, Length, Point};
pub use tree::{SubtreeData, SubtreeId, SubtreePool};
