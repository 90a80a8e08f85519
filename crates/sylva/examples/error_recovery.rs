//! Parse a program containing a syntax error and report the error regions.
//!
//! Run with: `cargo run --example error_recovery`

use sylva::testing::grammar::c_like_language;
use sylva::testing::tree_to_sexp;
use sylva::{Parser, SYM_ERROR};

fn main() {
    let mut parser = Parser::new();
    parser.set_language(c_like_language());

    let source = "int x = (1 2);\nint y;\n";
    let tree = parser.parse(&source, None, false).expect("language is set");

    let language = parser.language().expect("language is set");
    println!("source: {source:?}");
    println!("tree:   {}", tree_to_sexp(parser.pool(), language, tree.root()));

    let pool = parser.pool();
    let mut worklist = vec![(tree.root(), 0u32)];
    while let Some((id, offset)) = worklist.pop() {
        let node = pool.get(id);
        if node.symbol == SYM_ERROR {
            let start = offset + node.padding.bytes;
            println!("error region at bytes {}..{}", start, start + node.size.bytes);
        }
        let mut child_offset = offset;
        for &child in &node.children {
            worklist.push((child, child_offset));
            child_offset += pool.get(child).total_bytes();
        }
    }

    parser.release_tree(tree);
}
