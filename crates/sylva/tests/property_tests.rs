//! Property tests for the universal invariants: totality, coverage,
//! determinism, structural consistency, and pool hygiene.

mod common;

use common::assert_structure;
use proptest::prelude::*;
use sylva::testing::grammar::c_like_language;
use sylva::{InputEdit, Parser};

fn c_parser() -> Parser {
    let mut parser = Parser::new();
    parser.set_language(c_like_language());
    parser
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any byte soup parses to a tree covering the whole input, without
    /// looping or panicking.
    #[test]
    fn parse_is_total_over_ascii_noise(text in "[ -~\n]{0,60}") {
        let mut parser = c_parser();
        let tree = parser.parse(&text.clone(), None, false).expect("language set");
        let root = parser.pool().get(tree.root());
        prop_assert_eq!(root.total_bytes() as usize, text.len());
        assert_structure(&parser, &tree);
        parser.release_tree(tree);
        prop_assert_eq!(parser.pool().live_count(), 0);
    }

    #[test]
    fn parse_is_deterministic(text in "[ -~\n]{0,48}") {
        let mut parser = c_parser();
        let first = parser.parse(&text.clone(), None, false).expect("language set");
        let second = parser.parse(&text.clone(), None, false).expect("language set");
        prop_assert!(parser.pool().eq(first.root(), second.root()));
        parser.release_tree(first);
        parser.release_tree(second);
    }

    /// Re-parsing an edited tree gives the same structure as parsing the
    /// edited text from scratch.
    #[test]
    fn edited_reparse_round_trips(
        prefix in "[a-z;{}() \n]{0,24}",
        inserted in "[a-z;{}() ]{0,8}",
        suffix in "[a-z;{}() \n]{0,24}",
    ) {
        let old_text = format!("{prefix}{suffix}");
        let new_text = format!("{prefix}{inserted}{suffix}");

        let mut parser = c_parser();
        let tree = parser.parse(&old_text.clone(), None, false).expect("language set");

        let edit = InputEdit::from_texts(
            &old_text,
            &new_text,
            prefix.len(),
            prefix.len(),
            prefix.len() + inserted.len(),
        );
        parser.edit_tree(&tree, &edit);
        let reparsed = parser
            .parse(&new_text.clone(), Some(&tree), false)
            .expect("language set");
        parser.release_tree(tree);

        let mut fresh_parser = c_parser();
        let fresh = fresh_parser.parse(&new_text.clone(), None, false).expect("language set");

        prop_assert_eq!(
            parser.pool().get(reparsed.root()).total_bytes(),
            fresh_parser.pool().get(fresh.root()).total_bytes()
        );
        let reparsed_sexp = sylva::testing::tree_to_sexp(
            parser.pool(),
            parser.language().expect("language set"),
            reparsed.root(),
        );
        let fresh_sexp = sylva::testing::tree_to_sexp(
            fresh_parser.pool(),
            fresh_parser.language().expect("language set"),
            fresh.root(),
        );
        prop_assert_eq!(reparsed_sexp, fresh_sexp);

        parser.release_tree(reparsed);
        fresh_parser.release_tree(fresh);
        prop_assert_eq!(parser.pool().live_count(), 0);
    }

    /// Editing a tree keeps the padding/size bookkeeping consistent.
    #[test]
    fn edits_preserve_structural_sums(
        text in "[a-z;{}() \n]{1,40}",
        at in 0usize..40,
        inserted in "[a-z;() ]{0,6}",
    ) {
        let at = at.min(text.len());
        // Snap to a character boundary.
        let mut start = at;
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let new_text = format!("{}{}{}", &text[..start], inserted, &text[start..]);

        let mut parser = c_parser();
        let tree = parser.parse(&text.clone(), None, false).expect("language set");
        let edit = InputEdit::from_texts(
            &text,
            &new_text,
            start,
            start,
            start + inserted.len(),
        );
        parser.edit_tree(&tree, &edit);

        let root = parser.pool().get(tree.root());
        prop_assert_eq!(root.total_bytes() as usize, new_text.len());
        assert_structure(&parser, &tree);
        parser.release_tree(tree);
    }
}
