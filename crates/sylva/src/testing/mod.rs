//! Test support: grammar fixtures, table construction, and helpers for
//! asserting on parse results.
//!
//! Parse-table generation is not a product feature of this crate; the
//! builder here exists so tests and examples can construct realistic
//! [`crate::language::Language`] values, conflicts included, without
//! depending on an external generator.

pub mod grammar;

use std::sync::{Arc, Mutex};

use crate::language::Language;
use crate::parser::{LogKind, Logger};
use crate::tree::{SubtreeId, SubtreePool};

/// Render the named, visible nodes of a tree as an s-expression.
/// Invisible or unnamed nodes are spliced into their parent.
#[must_use]
pub fn tree_to_sexp(pool: &SubtreePool, language: &Language, root: SubtreeId) -> String {
    let mut out = String::new();
    write_node(&mut out, pool, language, root);
    out
}

fn write_node(out: &mut String, pool: &SubtreePool, language: &Language, id: SubtreeId) {
    let node = pool.get(id);
    if node.visible && node.named {
        if !out.is_empty() && !out.ends_with('(') {
            out.push(' ');
        }
        out.push('(');
        out.push_str(language.symbol_name(node.symbol));
        for &child in &node.children {
            write_node(out, pool, language, child);
        }
        out.push(')');
    } else {
        for &child in &node.children {
            write_node(out, pool, language, child);
        }
    }
}

/// A logger that records every message, shareable with the test body.
#[derive(Clone, Default)]
pub struct SharedLog {
    events: Arc<Mutex<Vec<(LogKind, String)>>>,
}

impl SharedLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded messages starting with `prefix`.
    #[must_use]
    pub fn count_matching(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(_, message)| message.starts_with(prefix))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Logger for SharedLog {
    fn log(&mut self, kind: LogKind, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((kind, message.to_string()));
        }
    }
}
