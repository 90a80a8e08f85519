//! Fixture grammars and a small conflict-preserving table constructor.
//!
//! The constructor builds LR(0) item sets with SLR-style follow-based
//! reductions and keeps every action it derives — shift/reduce and
//! reduce/reduce conflicts included — which is exactly what the GLR driver
//! needs to exercise forking, merging, and dynamic-precedence selection.

use hashbrown::HashMap;

use crate::language::{
    EntryData, Language, LanguageData, LexFn, LexMode, ParseAction, StateId, Symbol,
    SymbolMetadata, SYM_END,
};
use crate::lexer::Lexer;

/// One grammar production.
pub struct Production {
    pub lhs: Symbol,
    pub rhs: Vec<Symbol>,
    pub dynamic_precedence: i32,
}

/// Raw grammar description consumed by [`build_language`].
pub struct GrammarSpec {
    pub token_count: u16,
    pub symbol_count: u16,
    pub start_symbol: Symbol,
    pub productions: Vec<Production>,
    pub metadata: Vec<SymbolMetadata>,
    pub extras: Vec<Symbol>,
    pub lex_fn: LexFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Item {
    prod: u16,
    dot: u16,
}

/// Build a [`Language`] from a grammar, keeping conflicting actions.
///
/// # Panics
///
/// Panics if the constructed tables fail validation; fixture grammars are
/// expected to be well-formed.
#[must_use]
pub fn build_language(spec: GrammarSpec) -> Language {
    let token_count = spec.token_count;
    let symbol_count = spec.symbol_count;
    let augmented: Symbol = symbol_count;

    let mut productions: Vec<(Symbol, Vec<Symbol>, i32)> =
        vec![(augmented, vec![spec.start_symbol], 0)];
    for production in &spec.productions {
        productions.push((
            production.lhs,
            production.rhs.clone(),
            production.dynamic_precedence,
        ));
    }

    let is_terminal = |symbol: Symbol| symbol < token_count;

    // Nullability and FIRST sets, to a fixpoint.
    let mut nullable = vec![false; symbol_count as usize + 1];
    let mut first: Vec<Vec<bool>> = vec![vec![false; token_count as usize]; symbol_count as usize + 1];
    for t in 0..token_count {
        first[t as usize][t as usize] = true;
    }
    loop {
        let mut changed = false;
        for (lhs, rhs, _) in &productions {
            let lhs = *lhs as usize;
            let mut all_nullable = true;
            for &symbol in rhs {
                for t in 0..token_count as usize {
                    if first[symbol as usize][t] && !first[lhs][t] {
                        first[lhs][t] = true;
                        changed = true;
                    }
                }
                if !nullable[symbol as usize] {
                    all_nullable = false;
                    break;
                }
            }
            if all_nullable && !nullable[lhs] {
                nullable[lhs] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // FOLLOW sets.
    let mut follow: Vec<Vec<bool>> = vec![vec![false; token_count as usize]; symbol_count as usize + 1];
    follow[augmented as usize][SYM_END as usize] = true;
    loop {
        let mut changed = false;
        for (lhs, rhs, _) in &productions {
            for i in 0..rhs.len() {
                let symbol = rhs[i] as usize;
                if is_terminal(rhs[i]) {
                    continue;
                }
                let mut rest_nullable = true;
                for &next in &rhs[i + 1..] {
                    for t in 0..token_count as usize {
                        if first[next as usize][t] && !follow[symbol][t] {
                            follow[symbol][t] = true;
                            changed = true;
                        }
                    }
                    if !nullable[next as usize] {
                        rest_nullable = false;
                        break;
                    }
                }
                if rest_nullable {
                    for t in 0..token_count as usize {
                        if follow[*lhs as usize][t] && !follow[symbol][t] {
                            follow[symbol][t] = true;
                            changed = true;
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let closure = |seed: Vec<Item>| -> Vec<Item> {
        let mut items = seed;
        let mut index = 0;
        while index < items.len() {
            let item = items[index];
            index += 1;
            let (_, rhs, _) = &productions[item.prod as usize];
            if let Some(&next) = rhs.get(item.dot as usize) {
                if !is_terminal(next) {
                    for (p, (lhs, _, _)) in productions.iter().enumerate() {
                        if *lhs == next {
                            let candidate = Item {
                                prod: p as u16,
                                dot: 0,
                            };
                            if !items.contains(&candidate) {
                                items.push(candidate);
                            }
                        }
                    }
                }
            }
        }
        items.sort_unstable();
        items.dedup();
        items
    };

    // Canonical LR(0) collection.
    let mut states: Vec<Vec<Item>> = vec![closure(vec![Item { prod: 0, dot: 0 }])];
    let mut state_ids: HashMap<Vec<Item>, StateId> = HashMap::new();
    state_ids.insert(states[0].clone(), 0);
    let mut transitions: Vec<Vec<(Symbol, StateId)>> = vec![Vec::new()];
    let mut cursor = 0;
    while cursor < states.len() {
        let mut next_symbols: Vec<Symbol> = states[cursor]
            .iter()
            .filter_map(|item| {
                productions[item.prod as usize]
                    .1
                    .get(item.dot as usize)
                    .copied()
            })
            .collect();
        next_symbols.sort_unstable();
        next_symbols.dedup();

        for symbol in next_symbols {
            let seed: Vec<Item> = states[cursor]
                .iter()
                .filter(|item| {
                    productions[item.prod as usize].1.get(item.dot as usize) == Some(&symbol)
                })
                .map(|item| Item {
                    prod: item.prod,
                    dot: item.dot + 1,
                })
                .collect();
            let target_items = closure(seed);
            let target = match state_ids.get(&target_items) {
                Some(&id) => id,
                None => {
                    let id = states.len() as StateId;
                    state_ids.insert(target_items.clone(), id);
                    states.push(target_items);
                    transitions.push(Vec::new());
                    id
                }
            };
            transitions[cursor].push((symbol, target));
        }
        cursor += 1;
    }

    // Action and goto tables.
    let state_count = states.len();
    let mut table: Vec<Vec<EntryData>> =
        vec![vec![EntryData::default(); token_count as usize]; state_count];
    let mut goto_table: Vec<Vec<StateId>> = vec![vec![0; symbol_count as usize]; state_count];

    for (state, items) in states.iter().enumerate() {
        for item in items {
            let (lhs, rhs, dynamic_precedence) = &productions[item.prod as usize];
            if item.prod != 0 && item.dot as usize == rhs.len() {
                let action = ParseAction::Reduce {
                    symbol: *lhs,
                    child_count: rhs.len() as u32,
                    dynamic_precedence: *dynamic_precedence,
                    alias_sequence_id: 0,
                    fragile: false,
                    extra: false,
                };
                for t in 0..token_count as usize {
                    if follow[*lhs as usize][t] && !table[state][t].actions.contains(&action) {
                        table[state][t].actions.push(action);
                    }
                }
            }
        }
        for &(symbol, target) in &transitions[state] {
            if is_terminal(symbol) {
                table[state][symbol as usize].actions.push(ParseAction::Shift {
                    state: target,
                    extra: false,
                });
            }
            if (symbol as usize) < symbol_count as usize {
                goto_table[state][symbol as usize] = target;
            }
        }
        if items.contains(&Item { prod: 0, dot: 1 }) {
            table[state][SYM_END as usize].actions.push(ParseAction::Accept);
        }
        for &extra in &spec.extras {
            if table[state][extra as usize].actions.is_empty() {
                table[state][extra as usize].actions.push(ParseAction::Shift {
                    state: 0,
                    extra: true,
                });
            }
        }
    }

    let data = LanguageData {
        token_count,
        symbol_count,
        metadata: spec.metadata,
        table,
        goto_table,
        lex_modes: vec![LexMode::default(); state_count],
        error_lex_mode: LexMode::default(),
        lex_fn: spec.lex_fn,
        external: None,
        alias_sequences: vec![Vec::new()],
    };
    match Language::new(data) {
        Ok(language) => language,
        Err(error) => panic!("fixture grammar failed validation: {error}"),
    }
}

fn meta(name: &str, visible: bool, named: bool, extra: bool) -> SymbolMetadata {
    SymbolMetadata {
        name: name.into(),
        visible,
        named,
        extra,
    }
}

// ---------------------------------------------------------------------
// Balanced parentheses: the smallest useful fixture.
// ---------------------------------------------------------------------

pub mod paren {
    use super::Symbol;
    pub const LPAREN: Symbol = 1;
    pub const RPAREN: Symbol = 2;
    pub const TOKEN_COUNT: u16 = 3;
    pub const LIST: Symbol = 3;
    pub const SYMBOL_COUNT: u16 = 4;
}

fn paren_lex(lexer: &mut Lexer<'_>, _state: u16) -> bool {
    while lexer.lookahead().is_some_and(char::is_whitespace) {
        lexer.advance(true);
    }
    match lexer.lookahead() {
        None => {
            lexer.mark_end();
            lexer.set_result(SYM_END);
            true
        }
        Some('(') => {
            lexer.advance(false);
            lexer.mark_end();
            lexer.set_result(paren::LPAREN);
            true
        }
        Some(')') => {
            lexer.advance(false);
            lexer.mark_end();
            lexer.set_result(paren::RPAREN);
            true
        }
        Some(_) => false,
    }
}

/// `list -> '(' ')' | '(' list ')'`, whitespace skipped as padding.
#[must_use]
pub fn paren_language() -> Language {
    build_language(GrammarSpec {
        token_count: paren::TOKEN_COUNT,
        symbol_count: paren::SYMBOL_COUNT,
        start_symbol: paren::LIST,
        productions: vec![
            Production {
                lhs: paren::LIST,
                rhs: vec![paren::LPAREN, paren::RPAREN],
                dynamic_precedence: 0,
            },
            Production {
                lhs: paren::LIST,
                rhs: vec![paren::LPAREN, paren::LIST, paren::RPAREN],
                dynamic_precedence: 0,
            },
        ],
        metadata: vec![
            meta("end", false, false, false),
            meta("(", true, false, false),
            meta(")", true, false, false),
            meta("list", true, true, false),
        ],
        extras: Vec::new(),
        lex_fn: paren_lex,
    })
}

// ---------------------------------------------------------------------
// A C-flavored statement grammar for the recovery scenarios.
// ---------------------------------------------------------------------

pub mod c {
    use super::Symbol;
    pub const WS: Symbol = 1;
    pub const TYPE: Symbol = 2;
    pub const IDENT: Symbol = 3;
    pub const NUMBER: Symbol = 4;
    pub const SEMI: Symbol = 5;
    pub const EQ: Symbol = 6;
    pub const LBRACE: Symbol = 7;
    pub const RBRACE: Symbol = 8;
    pub const LPAREN: Symbol = 9;
    pub const RPAREN: Symbol = 10;
    pub const TOKEN_COUNT: u16 = 11;
    pub const PROGRAM: Symbol = 11;
    pub const STMT_LIST: Symbol = 12;
    pub const STMT: Symbol = 13;
    pub const DECL: Symbol = 14;
    pub const BLOCK: Symbol = 15;
    pub const EXPR_STMT: Symbol = 16;
    pub const EXPR: Symbol = 17;
    pub const PAREN_EXPR: Symbol = 18;
    pub const SYMBOL_COUNT: u16 = 19;
}

fn c_like_lex(lexer: &mut Lexer<'_>, _state: u16) -> bool {
    match lexer.lookahead() {
        None => {
            lexer.mark_end();
            lexer.set_result(SYM_END);
            true
        }
        Some(ch) if ch.is_whitespace() => {
            while lexer.lookahead().is_some_and(char::is_whitespace) {
                lexer.advance(false);
            }
            lexer.mark_end();
            lexer.set_result(c::WS);
            true
        }
        Some(ch) if ch.is_ascii_digit() => {
            while lexer.lookahead().is_some_and(|c| c.is_ascii_digit()) {
                lexer.advance(false);
            }
            lexer.mark_end();
            lexer.set_result(c::NUMBER);
            true
        }
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
            let mut word = String::new();
            while let Some(c) = lexer.lookahead() {
                if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                word.push(c);
                lexer.advance(false);
            }
            lexer.mark_end();
            let symbol = match word.as_str() {
                "int" | "float" | "char" => c::TYPE,
                _ => c::IDENT,
            };
            lexer.set_result(symbol);
            true
        }
        Some(ch) => {
            let symbol = match ch {
                ';' => c::SEMI,
                '=' => c::EQ,
                '{' => c::LBRACE,
                '}' => c::RBRACE,
                '(' => c::LPAREN,
                ')' => c::RPAREN,
                _ => return false,
            };
            lexer.advance(false);
            lexer.mark_end();
            lexer.set_result(symbol);
            true
        }
    }
}

/// Declarations, blocks and expressions with whitespace as an extra token.
#[must_use]
pub fn c_like_language() -> Language {
    use c::*;
    let rule = |lhs: Symbol, rhs: Vec<Symbol>| Production {
        lhs,
        rhs,
        dynamic_precedence: 0,
    };
    build_language(GrammarSpec {
        token_count: TOKEN_COUNT,
        symbol_count: SYMBOL_COUNT,
        start_symbol: PROGRAM,
        productions: vec![
            rule(PROGRAM, vec![STMT_LIST]),
            rule(STMT_LIST, vec![STMT_LIST, STMT]),
            rule(STMT_LIST, vec![STMT]),
            rule(STMT, vec![DECL]),
            rule(STMT, vec![BLOCK]),
            rule(STMT, vec![EXPR_STMT]),
            rule(DECL, vec![TYPE, IDENT, SEMI]),
            rule(DECL, vec![TYPE, IDENT, EQ, EXPR, SEMI]),
            rule(BLOCK, vec![LBRACE, STMT_LIST, RBRACE]),
            rule(BLOCK, vec![LBRACE, RBRACE]),
            rule(EXPR_STMT, vec![EXPR, SEMI]),
            rule(EXPR, vec![NUMBER]),
            rule(EXPR, vec![IDENT]),
            rule(EXPR, vec![PAREN_EXPR]),
            rule(PAREN_EXPR, vec![LPAREN, EXPR, RPAREN]),
        ],
        metadata: vec![
            meta("end", false, false, false),
            meta("whitespace", true, false, true),
            meta("type", true, true, false),
            meta("identifier", true, true, false),
            meta("number", true, true, false),
            meta(";", true, false, false),
            meta("=", true, false, false),
            meta("{", true, false, false),
            meta("}", true, false, false),
            meta("(", true, false, false),
            meta(")", true, false, false),
            meta("program", true, true, false),
            meta("statement_list", false, false, false),
            meta("statement", false, false, false),
            meta("declaration", true, true, false),
            meta("block", true, true, false),
            meta("expression_statement", true, true, false),
            meta("expression", false, false, false),
            meta("parenthesized_expression", true, true, false),
        ],
        extras: vec![WS],
        lex_fn: c_like_lex,
    })
}

// ---------------------------------------------------------------------
// Two rules over the same tokens, decided by dynamic precedence.
// ---------------------------------------------------------------------

pub mod amb {
    use super::Symbol;
    pub const A: Symbol = 1;
    pub const TOKEN_COUNT: u16 = 2;
    pub const S: Symbol = 2;
    pub const LOW: Symbol = 3;
    pub const HIGH: Symbol = 4;
    pub const SYMBOL_COUNT: u16 = 5;
}

fn amb_lex(lexer: &mut Lexer<'_>, _state: u16) -> bool {
    while lexer.lookahead().is_some_and(char::is_whitespace) {
        lexer.advance(true);
    }
    match lexer.lookahead() {
        None => {
            lexer.mark_end();
            lexer.set_result(SYM_END);
            true
        }
        Some('a') => {
            lexer.advance(false);
            lexer.mark_end();
            lexer.set_result(amb::A);
            true
        }
        Some(_) => false,
    }
}

/// `s -> low | high`, where both alternatives match `a a` and `high`
/// carries the larger dynamic precedence.
#[must_use]
pub fn ambiguous_language() -> Language {
    use amb::*;
    build_language(GrammarSpec {
        token_count: TOKEN_COUNT,
        symbol_count: SYMBOL_COUNT,
        start_symbol: S,
        productions: vec![
            Production {
                lhs: S,
                rhs: vec![LOW],
                dynamic_precedence: 0,
            },
            Production {
                lhs: S,
                rhs: vec![HIGH],
                dynamic_precedence: 0,
            },
            Production {
                lhs: LOW,
                rhs: vec![A, A],
                dynamic_precedence: 0,
            },
            Production {
                lhs: HIGH,
                rhs: vec![A, A],
                dynamic_precedence: 10,
            },
        ],
        metadata: vec![
            meta("end", false, false, false),
            meta("a", true, false, false),
            meta("s", true, true, false),
            meta("low", true, true, false),
            meta("high", true, true, false),
        ],
        extras: Vec::new(),
        lex_fn: amb_lex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{ParseAction, ERROR_STATE};

    #[test]
    fn paren_tables_have_shift_for_open() {
        let language = paren_language();
        let entry = language.table_entry(0, paren::LPAREN);
        assert!(entry
            .actions
            .iter()
            .any(|a| matches!(a, ParseAction::Shift { extra: false, .. })));
    }

    #[test]
    fn accept_is_reachable_from_start() {
        let language = paren_language();
        let after_list = language.next_state(0, paren::LIST);
        assert_ne!(after_list, 0);
        let entry = language.table_entry(after_list, SYM_END);
        assert!(entry.actions.iter().any(|a| matches!(a, ParseAction::Accept)));
    }

    #[test]
    fn recovery_row_shifts_extras_and_recovers_otherwise() {
        let language = c_like_language();
        let ws_entry = language.table_entry(ERROR_STATE, c::WS);
        assert!(matches!(
            ws_entry.actions,
            [ParseAction::Shift { extra: true, .. }]
        ));
        let ident_entry = language.table_entry(ERROR_STATE, c::IDENT);
        assert!(matches!(ident_entry.actions, [ParseAction::Recover]));
    }

    #[test]
    fn ambiguous_grammar_keeps_both_reduces() {
        let language = ambiguous_language();
        // State after shifting two `a` tokens holds both completed rules.
        let s1 = language.next_state(0, amb::A);
        let s2 = language.next_state(s1, amb::A);
        let entry = language.table_entry(s2, SYM_END);
        let reduce_count = entry
            .actions
            .iter()
            .filter(|a| matches!(a, ParseAction::Reduce { .. }))
            .count();
        assert_eq!(reduce_count, 2);
    }
}
