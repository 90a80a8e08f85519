//! Scenario tests for the GLR driver: clean parses, error recovery in
//! various positions, and ambiguity resolution.

mod common;

use common::{assert_coverage, assert_structure, index_of, parse_covering, sexp};
use sylva::testing::grammar::{ambiguous_language, c_like_language, paren_language};
use sylva::{Parser, SYM_ERROR};

fn c_parser() -> Parser {
    let mut parser = Parser::new();
    parser.set_language(c_like_language());
    parser
}

#[test]
fn parses_a_simple_declaration() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "int x;");
    assert_eq!(
        sexp(&parser, &tree),
        "(program (declaration (type) (identifier)))"
    );
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn parses_declarations_with_initializers_and_blocks() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "int x = 5;\n{ y; (42); }\n");
    let text = sexp(&parser, &tree);
    assert_eq!(
        text,
        "(program (declaration (type) (identifier) (number)) \
         (block (expression_statement (identifier)) \
         (expression_statement (parenthesized_expression (number)))))"
    );
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn nested_parens_build_nested_lists() {
    let mut parser = Parser::new();
    parser.set_language(paren_language());
    let tree = parse_covering(&mut parser, "( ( ) )");
    assert_eq!(sexp(&parser, &tree), "(list (list))");
    parser.release_tree(tree);
}

#[test]
fn error_inside_block_still_closes_the_block() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "{ int x; int %$ }");
    let text = sexp(&parser, &tree);
    // The garbage lands in an ERROR node inside the block; the block's
    // closing brace is still consumed and the first declaration survives.
    assert!(text.contains("(declaration (type) (identifier))"), "{text}");
    assert!(text.contains("(ERROR"), "{text}");
    assert!(index_of(&text, "(block") < index_of(&text, "(ERROR"), "{text}");
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn error_inside_parenthesized_expression() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "int x = (123 456);");
    let text = sexp(&parser, &tree);
    assert!(text.contains("(declaration"), "{text}");
    assert!(text.contains("(ERROR"), "{text}");
    assert!(
        index_of(&text, "(declaration") < index_of(&text, "(ERROR"),
        "{text}"
    );
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn error_in_declaration_leaves_next_statement_clean() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "float x WTF;\nint y = 5;");
    let text = sexp(&parser, &tree);
    assert!(text.contains("(ERROR"), "{text}");
    assert!(
        text.contains("(declaration (type) (identifier) (number))"),
        "second declaration must be well-formed: {text}"
    );
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn recovery_continues_across_statements() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "{ = 1; = 2; int ok; }");
    let text = sexp(&parser, &tree);
    // The parser must not stall on the first bad statement: the trailing
    // well-formed declaration still parses.
    assert!(text.contains("(declaration (type) (identifier))"), "{text}");
    assert!(text.contains("(ERROR"), "{text}");
    assert_structure(&parser, &tree);
    parser.release_tree(tree);
}

#[test]
fn pure_noise_yields_a_covering_error_tree() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "%$#@ %% $$");
    let root = parser.pool().get(tree.root());
    assert_eq!(root.symbol, SYM_ERROR);
    assert!(root.error_cost > 0);
    parser.release_tree(tree);
}

#[test]
fn empty_input_parses_to_an_error_wrapper() {
    let mut parser = c_parser();
    let tree = parse_covering(&mut parser, "");
    parser.release_tree(tree);
    assert_eq!(parser.pool().live_count(), 0);
}

#[test]
fn halt_on_error_wraps_the_whole_input() {
    let mut parser = c_parser();
    let text = "%%%% junk %%%%";
    let tree = parser.parse(&text.to_string(), None, true).expect("language set");
    assert_coverage(&parser, &tree, text);
    parser.release_tree(tree);
}

#[test]
fn parses_are_deterministic() {
    let mut parser = c_parser();
    let text = "{ int a; %$ int b; } int c = (9);";
    let first = parse_covering(&mut parser, text);
    let second = parse_covering(&mut parser, text);
    assert!(
        parser.pool().eq(first.root(), second.root()),
        "same input must produce structurally equal trees"
    );
    parser.release_tree(first);
    parser.release_tree(second);
    assert_eq!(parser.pool().live_count(), 0);
}

#[test]
fn dynamic_precedence_selects_the_higher_rule() {
    let mut parser = Parser::new();
    parser.set_language(ambiguous_language());
    let tree = parse_covering(&mut parser, "aa");
    let text = sexp(&parser, &tree);
    assert_eq!(text, "(s (high))");
    let root = parser.pool().get(tree.root());
    assert_eq!(root.dynamic_precedence, 10);
    parser.release_tree(tree);
}

#[test]
fn released_trees_empty_the_pool() {
    let mut parser = c_parser();
    for text in ["int x;", "{ %$ }", "", "((("] {
        let tree = parse_covering(&mut parser, text);
        parser.release_tree(tree);
    }
    assert_eq!(parser.pool().live_count(), 0);
}
