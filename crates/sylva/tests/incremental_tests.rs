//! Incremental re-parsing: idempotent reparse, subtree reuse, and edit
//! round-trips.

mod common;

use common::{assert_structure, parse_covering, sexp};
use sylva::testing::grammar::c_like_language;
use sylva::testing::SharedLog;
use sylva::{InputEdit, Parser};

fn c_parser_with_log() -> (Parser, SharedLog) {
    let mut parser = Parser::new();
    parser.set_language(c_like_language());
    let log = SharedLog::new();
    parser.set_logger(Some(Box::new(log.clone())));
    (parser, log)
}

#[test]
fn unedited_reparse_is_structurally_identical_and_lex_free() {
    let (mut parser, log) = c_parser_with_log();
    let text = "int x;\n{ y; }\nint z = 4;\n";
    let first = parse_covering(&mut parser, text);

    log.clear();
    let second = parser
        .parse(&text.to_string(), Some(&first), false)
        .expect("language set");
    assert!(parser.pool().eq(first.root(), second.root()));
    assert_eq!(
        log.count_matching("lex_internal"),
        0,
        "an unedited reparse must reuse every token without lexing"
    );

    parser.release_tree(first);
    parser.release_tree(second);
    assert_eq!(parser.pool().live_count(), 0);
}

#[test]
fn edited_reparse_matches_a_fresh_parse() {
    let (mut parser, _log) = c_parser_with_log();
    let old_text = "int x;\nint y = 5;\n";
    let new_text = "int xyz;\nint y = 5;\n";
    let tree = parse_covering(&mut parser, old_text);

    // Replace `x` with `xyz`.
    let edit = InputEdit::from_texts(old_text, new_text, 4, 5, 7);
    parser.edit_tree(&tree, &edit);
    let reparsed = parser
        .parse(&new_text.to_string(), Some(&tree), false)
        .expect("language set");
    parser.release_tree(tree);

    let mut fresh_parser = Parser::new();
    fresh_parser.set_language(c_like_language());
    let fresh = parse_covering(&mut fresh_parser, new_text);

    assert_eq!(sexp(&parser, &reparsed), sexp(&fresh_parser, &fresh));
    assert_eq!(
        parser.pool().get(reparsed.root()).total_bytes() as usize,
        new_text.len()
    );
    assert_structure(&parser, &reparsed);

    parser.release_tree(reparsed);
    fresh_parser.release_tree(fresh);
    assert_eq!(parser.pool().live_count(), 0);
}

#[test]
fn edit_that_introduces_an_error_is_reflected() {
    let (mut parser, _log) = c_parser_with_log();
    let old_text = "int x;\nint y;\n";
    let new_text = "int x;\nint %;\n";
    let tree = parse_covering(&mut parser, old_text);

    let edit = InputEdit::from_texts(old_text, new_text, 11, 12, 12);
    parser.edit_tree(&tree, &edit);
    let reparsed = parser
        .parse(&new_text.to_string(), Some(&tree), false)
        .expect("language set");
    parser.release_tree(tree);

    let text = sexp(&parser, &reparsed);
    assert!(text.contains("(ERROR"), "{text}");
    assert!(
        text.contains("(declaration (type) (identifier))"),
        "unedited declaration must survive: {text}"
    );
    parser.release_tree(reparsed);
}

#[test]
fn edit_that_fixes_an_error_is_reflected() {
    let (mut parser, _log) = c_parser_with_log();
    let old_text = "int ; y;\n";
    let new_text = "int q y;\n";
    let tree = parse_covering(&mut parser, old_text);

    let edit = InputEdit::from_texts(old_text, new_text, 4, 5, 5);
    parser.edit_tree(&tree, &edit);
    let reparsed = parser
        .parse(&new_text.to_string(), Some(&tree), false)
        .expect("language set");
    parser.release_tree(tree);

    let mut fresh_parser = Parser::new();
    fresh_parser.set_language(c_like_language());
    let fresh = parse_covering(&mut fresh_parser, new_text);
    assert_eq!(sexp(&parser, &reparsed), sexp(&fresh_parser, &fresh));

    parser.release_tree(reparsed);
    fresh_parser.release_tree(fresh);
}

#[test]
fn reuse_actually_happens_for_distant_subtrees() {
    let (mut parser, log) = c_parser_with_log();
    let old_text = "{ a; b; c; }\nint tail = 7;\n";
    let new_text = "{ a; b; c; }\nint tail = 9;\n";
    let tree = parse_covering(&mut parser, old_text);

    let edit = InputEdit::from_texts(old_text, new_text, 24, 25, 25);
    parser.edit_tree(&tree, &edit);
    log.clear();
    let reparsed = parser
        .parse(&new_text.to_string(), Some(&tree), false)
        .expect("language set");
    parser.release_tree(tree);

    assert!(
        log.count_matching("reuse_node") > 0,
        "subtrees before the edit must be reused"
    );
    assert_structure(&parser, &reparsed);
    parser.release_tree(reparsed);
}
