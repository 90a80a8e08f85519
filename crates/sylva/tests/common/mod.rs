//! Shared helpers for the integration tests.
#![allow(dead_code)]

use sylva::testing::tree_to_sexp;
use sylva::{Parser, Tree};

/// Parse `text` and return the tree, asserting full input coverage.
pub fn parse_covering(parser: &mut Parser, text: &str) -> Tree {
    let tree = parser
        .parse(&text.to_string(), None, false)
        .expect("language must be set");
    assert_coverage(parser, &tree, text);
    tree
}

pub fn assert_coverage(parser: &Parser, tree: &Tree, text: &str) {
    let root = parser.pool().get(tree.root());
    assert_eq!(
        root.total_bytes() as usize,
        text.len(),
        "tree must cover the entire input"
    );
}

pub fn sexp(parser: &Parser, tree: &Tree) -> String {
    let language = parser.language().expect("language must be set");
    tree_to_sexp(parser.pool(), language, tree.root())
}

/// Check the structural invariants on every interior node: child totals sum
/// to the node's extent, and visible/named counts match the children.
pub fn assert_structure(parser: &Parser, tree: &Tree) {
    let pool = parser.pool();
    let mut worklist = vec![tree.root()];
    while let Some(id) = worklist.pop() {
        let node = pool.get(id);
        if node.child_count() == 0 {
            continue;
        }
        let child_sum: u32 = node
            .children
            .iter()
            .map(|&child| pool.get(child).total_bytes())
            .sum();
        assert_eq!(
            node.total_bytes(),
            child_sum,
            "interior node extent must equal the sum of its children"
        );
        let visible: u32 = node
            .children
            .iter()
            .map(|&child| {
                let data = pool.get(child);
                if data.visible {
                    1
                } else if data.child_count() > 0 {
                    data.visible_child_count
                } else {
                    0
                }
            })
            .sum();
        assert_eq!(node.visible_child_count, visible);
        worklist.extend(node.children.iter().copied());
    }
}

/// Position of `needle` in `haystack`, for shape-order assertions.
pub fn index_of(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("expected {needle:?} in {haystack:?}"))
}
