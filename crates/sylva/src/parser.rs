//! The GLR parser driver.
//!
//! One [`Parser`] bundles the subtree pool, the versioned stack, the token
//! cache and the reduction scratch space. `parse` runs the round-robin loop:
//! every live stack version gets a lookahead (reused, cached, or freshly
//! lexed), executes its table actions, and the per-round condense pass
//! merges equivalent versions and prunes dominated ones until one version
//! accepts.

use smallvec::SmallVec;
use std::cmp::Ordering;

use crate::language::{
    Language, ParseAction, StateId, Symbol, ERROR_STATE, START_STATE, SYM_END,
};
use crate::lexer::{Input, Lexer, TokenCache};
use crate::stack::{Stack, StackVersion};
use crate::text::{InputEdit, Length};
use crate::tree::reuse::ReuseCursor;
use crate::tree::{
    SubtreeId, SubtreePool, ERROR_COST_PER_SKIPPED_CHAR, ERROR_COST_PER_SKIPPED_LINE,
    ERROR_COST_PER_SKIPPED_TREE,
};

/// Upper bound on live stack versions at round boundaries.
pub const MAX_VERSION_COUNT: usize = 6;
const MAX_SUMMARY_DEPTH: u32 = 16;
const MAX_COST_DIFFERENCE: u32 = 16 * ERROR_COST_PER_SKIPPED_TREE;

/// Which subsystem produced a trace message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Parse,
    Lex,
}

/// Receives trace messages from the driver and the lexer.
pub trait Logger {
    fn log(&mut self, kind: LogKind, message: &str);
}

/// A finished parse result. Inspect it through [`Parser::pool`]; hand it
/// back to [`Parser::release_tree`] when done.
#[derive(Debug)]
pub struct Tree {
    pub(crate) root: SubtreeId,
}

impl Tree {
    #[must_use]
    pub const fn root(&self) -> SubtreeId {
        self.root
    }
}

#[derive(Debug, Clone, Copy)]
struct ErrorStatus {
    cost: u32,
    push_count: u32,
    is_in_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorComparison {
    TakeLeft,
    PreferLeft,
    None,
    PreferRight,
    TakeRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReduceActionEntry {
    symbol: Symbol,
    child_count: u32,
    dynamic_precedence: i32,
    alias_sequence_id: u16,
}

fn compare_versions(a: ErrorStatus, b: ErrorStatus) -> ErrorComparison {
    if !a.is_in_error && b.is_in_error {
        return if a.cost < b.cost {
            ErrorComparison::TakeLeft
        } else {
            ErrorComparison::PreferLeft
        };
    }
    if a.is_in_error && !b.is_in_error {
        return if b.cost < a.cost {
            ErrorComparison::TakeRight
        } else {
            ErrorComparison::PreferRight
        };
    }
    if a.cost < b.cost {
        return if (b.cost - a.cost) * (1 + a.push_count) > MAX_COST_DIFFERENCE {
            ErrorComparison::TakeLeft
        } else {
            ErrorComparison::PreferLeft
        };
    }
    if b.cost < a.cost {
        return if (a.cost - b.cost) * (1 + b.push_count) > MAX_COST_DIFFERENCE {
            ErrorComparison::TakeRight
        } else {
            ErrorComparison::PreferRight
        };
    }
    ErrorComparison::None
}

macro_rules! log_parse {
    ($self:expr, $($arg:tt)*) => {
        if $self.logger.is_some() {
            let message = format!($($arg)*);
            if let Some(logger) = &mut $self.logger {
                logger.log(LogKind::Parse, &message);
            }
        }
    };
}

macro_rules! log_lex {
    ($self:expr, $($arg:tt)*) => {
        if $self.logger.is_some() {
            let message = format!($($arg)*);
            if let Some(logger) = &mut $self.logger {
                logger.log(LogKind::Lex, &message);
            }
        }
    };
}

pub struct Parser {
    pool: SubtreePool,
    stack: Stack,
    language: Option<Language>,
    external_scanner: Option<Box<dyn crate::language::ExternalScanner>>,
    token_cache: TokenCache,
    reuse: ReuseCursor,
    finished_tree: Option<SubtreeId>,
    in_ambiguity: bool,
    logger: Option<Box<dyn Logger>>,
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: SubtreePool::new(),
            stack: Stack::new(),
            language: None,
            external_scanner: None,
            token_cache: TokenCache::default(),
            reuse: ReuseCursor::new(None),
            finished_tree: None,
            in_ambiguity: false,
            logger: None,
        }
    }

    /// Install a language. Creates the external scanner instance if the
    /// language has one; any previous scanner is dropped.
    pub fn set_language(&mut self, language: Language) {
        self.external_scanner = language.create_external_scanner();
        self.language = Some(language);
    }

    pub fn set_logger(&mut self, logger: Option<Box<dyn Logger>>) {
        self.logger = logger;
    }

    #[must_use]
    pub fn language(&self) -> Option<&Language> {
        self.language.as_ref()
    }

    #[must_use]
    pub fn pool(&self) -> &SubtreePool {
        &self.pool
    }

    /// Apply a source edit to a tree produced by this parser, preparing it
    /// for reuse in the next `parse` call.
    pub fn edit_tree(&mut self, tree: &Tree, edit: &InputEdit) {
        self.pool.edit(tree.root, edit);
    }

    /// Release a tree produced by this parser.
    pub fn release_tree(&mut self, tree: Tree) {
        self.pool.release(tree.root);
    }

    /// Parse `input`, reusing unchanged subtrees of `old_tree` when given.
    /// Returns `None` only when no language has been set. The returned tree
    /// covers the whole input even in the presence of syntax errors; with
    /// `halt_on_error`, an unrecoverable input yields a tree wrapping one
    /// ERROR node instead of continuing multi-version recovery.
    pub fn parse(
        &mut self,
        input: &dyn Input,
        old_tree: Option<&Tree>,
        halt_on_error: bool,
    ) -> Option<Tree> {
        let language = self.language.take()?;
        let mut lexer = Lexer::new(input);

        if old_tree.is_some() {
            log_parse!(self, "parse_after_edit");
        } else {
            log_parse!(self, "new_parse");
        }
        if let Some(scanner) = &mut self.external_scanner {
            scanner.deserialize(&[]);
        }
        self.stack.clear(&mut self.pool);
        self.reuse = ReuseCursor::new(old_tree.map(Tree::root));
        self.finished_tree = None;
        self.in_ambiguity = false;

        let mut last_position = 0u32;
        loop {
            let mut version = 0;
            let mut cursor = self.reuse;
            while version < self.stack.version_count() {
                cursor = self.reuse;
                while !self.stack.is_halted(version) {
                    let position = self.stack.top_position(version).bytes;
                    if position > last_position || (version > 0 && position == last_position) {
                        last_position = position;
                        break;
                    }
                    log_parse!(
                        self,
                        "process version:{}, version_count:{}, state:{}, row:{}, col:{}",
                        version,
                        self.stack.version_count(),
                        self.stack.top_state(version),
                        self.stack.top_position(version).extent.row,
                        self.stack.top_position(version).extent.column
                    );
                    self.advance(&language, &mut lexer, version, &mut cursor);
                }
                version += 1;
            }
            self.reuse = cursor;
            let round_version_count = version;

            let should_halt = self.condense_stack();
            if should_halt {
                if self.finished_tree.is_some() {
                    break;
                } else if halt_on_error {
                    self.halt_parse(&language, &mut lexer);
                    break;
                }
            }
            self.in_ambiguity = round_version_count > 1;
            if round_version_count == 0 {
                break;
            }
        }

        log_parse!(self, "done");
        self.stack.clear(&mut self.pool);
        self.set_cached_token(0, None, None);
        let root = self.finished_tree.take();
        if let Some(root) = root {
            self.pool.assign_parents(root);
        }
        self.language = Some(language);
        root.map(|root| Tree { root })
    }

    // ------------------------------------------------------------------
    // main per-version step
    // ------------------------------------------------------------------

    fn advance(
        &mut self,
        language: &Language,
        lexer: &mut Lexer<'_>,
        version: StackVersion,
        cursor: &mut ReuseCursor,
    ) {
        let mut state = self.stack.top_state(version);
        let mut lookahead = self.get_lookahead(language, lexer, version, &mut state, cursor);

        loop {
            let mut last_reduction_version: Option<StackVersion> = None;
            let first_leaf_symbol = self.pool.get(lookahead).first_leaf.symbol;
            let actions: SmallVec<[ParseAction; 4]> = language
                .table_entry(state, first_leaf_symbol)
                .actions
                .iter()
                .copied()
                .collect();

            for action in actions {
                match action {
                    ParseAction::Shift {
                        state: shift_state,
                        extra,
                    } => {
                        let mut next_state = if extra {
                            log_parse!(self, "shift_extra");
                            state
                        } else {
                            log_parse!(self, "shift state:{shift_state}");
                            shift_state
                        };

                        if self.pool.get(lookahead).child_count() > 0 {
                            self.breakdown_lookahead(&mut lookahead, state, cursor, false);
                            next_state =
                                language.next_state(state, self.pool.get(lookahead).symbol);
                        }

                        self.shift(version, next_state, lookahead, extra);
                        if Some(lookahead) == cursor.node() {
                            cursor.pop(&self.pool);
                        }
                        self.pool.release(lookahead);
                        return;
                    }

                    ParseAction::Reduce {
                        symbol,
                        child_count,
                        dynamic_precedence,
                        alias_sequence_id,
                        fragile,
                        ..
                    } => {
                        log_parse!(
                            self,
                            "reduce sym:{}, child_count:{}",
                            language.symbol_name(symbol),
                            child_count
                        );
                        if let Some(reduced) = self.reduce(
                            language,
                            version,
                            symbol,
                            child_count,
                            dynamic_precedence,
                            alias_sequence_id,
                            fragile,
                        ) {
                            last_reduction_version = Some(reduced);
                        }
                    }

                    ParseAction::Accept => {
                        log_parse!(self, "accept");
                        self.accept(language, version, lookahead);
                        self.pool.release(lookahead);
                        return;
                    }

                    ParseAction::Recover => {
                        while self.pool.get(lookahead).child_count() > 0 {
                            self.breakdown_lookahead(&mut lookahead, state, cursor, true);
                        }
                        self.recover(language, version, lookahead);
                        if Some(lookahead) == cursor.node() {
                            cursor.pop(&self.pool);
                        }
                        self.pool.release(lookahead);
                        return;
                    }
                }
            }

            if let Some(reduced) = last_reduction_version {
                self.stack.renumber_version(&mut self.pool, reduced, version);
                state = self.stack.top_state(version);
                continue;
            }

            if self.breakdown_top_of_stack(language, version) {
                state = self.stack.top_state(version);
                continue;
            }

            if state == ERROR_STATE {
                self.stack
                    .push(&mut self.pool, version, Some(lookahead), false, ERROR_STATE);
                self.pool.release(lookahead);
                return;
            }

            self.handle_error(language, version);
            if self.stack.is_halted(version) {
                self.pool.release(lookahead);
                return;
            }
            state = self.stack.top_state(version);
            if self.pool.get(lookahead).size.bytes == 0 {
                self.pool.release(lookahead);
                lookahead = self.get_lookahead(language, lexer, version, &mut state, cursor);
            }
        }
    }

    // ------------------------------------------------------------------
    // lookahead acquisition
    // ------------------------------------------------------------------

    fn get_lookahead(
        &mut self,
        language: &Language,
        lexer: &mut Lexer<'_>,
        version: StackVersion,
        state: &mut StateId,
        cursor: &mut ReuseCursor,
    ) -> SubtreeId {
        let position = self.stack.top_position(version);
        let last_external_token = self.stack.last_external_token(version);

        while let Some(result) = cursor.node() {
            if cursor.byte_index() > position.bytes {
                log_parse!(
                    self,
                    "before_reusable_node symbol:{}",
                    language.symbol_name(self.pool.get(result).symbol)
                );
                break;
            }

            if cursor.byte_index() < position.bytes {
                log_parse!(
                    self,
                    "past_reusable_node symbol:{}",
                    language.symbol_name(self.pool.get(result).symbol)
                );
                cursor.pop(&self.pool);
                continue;
            }

            if !self
                .pool
                .external_token_state_eq(cursor.last_external_token(), last_external_token)
            {
                log_parse!(
                    self,
                    "reusable_node_has_different_external_scanner_state symbol:{}",
                    language.symbol_name(self.pool.get(result).symbol)
                );
                cursor.pop(&self.pool);
                continue;
            }

            let tree = self.pool.get(result);
            let reason = if tree.has_changes {
                Some("has_changes")
            } else if tree.is_error() {
                Some("is_error")
            } else if tree.fragile_left || tree.fragile_right {
                Some("is_fragile")
            } else if self.in_ambiguity && tree.child_count() > 0 {
                Some("in_ambiguity")
            } else {
                None
            };

            if let Some(reason) = reason {
                log_parse!(
                    self,
                    "cant_reuse_node_{} tree:{}",
                    reason,
                    language.symbol_name(self.pool.get(result).symbol)
                );
                if !cursor.breakdown(&self.pool) {
                    cursor.pop(&self.pool);
                    self.breakdown_top_of_stack(language, version);
                    *state = self.stack.top_state(version);
                }
                continue;
            }

            if !self.can_reuse_first_leaf(language, *state, result) {
                log_parse!(
                    self,
                    "cant_reuse_node symbol:{}, first_leaf_symbol:{}",
                    language.symbol_name(self.pool.get(result).symbol),
                    language.symbol_name(self.pool.get(result).first_leaf.symbol)
                );
                cursor.pop_leaf(&self.pool);
                break;
            }

            log_parse!(
                self,
                "reuse_node symbol:{}",
                language.symbol_name(self.pool.get(result).symbol)
            );
            self.pool.retain(result);
            return result;
        }

        if let Some(result) = self.cached_token(position.bytes, last_external_token) {
            if self.can_reuse_first_leaf(language, *state, result) {
                self.pool.retain(result);
                return result;
            }
        }

        let result = self.lex(language, lexer, version, *state);
        self.set_cached_token(position.bytes, last_external_token, Some(result));
        result
    }

    fn can_reuse_first_leaf(&self, language: &Language, state: StateId, tree: SubtreeId) -> bool {
        let current_lex_mode = language.lex_mode_for(state);
        let data = self.pool.get(tree);
        let entry = language.table_entry(state, data.first_leaf.symbol);
        data.first_leaf.lex_mode == current_lex_mode
            || (current_lex_mode.external_lex_state == 0
                && data.size.bytes > 0
                && entry.is_reusable
                && (!entry.depends_on_lookahead
                    || (data.child_count() > 1 && data.error_cost == 0)))
    }

    fn cached_token(
        &self,
        byte_index: u32,
        last_external_token: Option<SubtreeId>,
    ) -> Option<SubtreeId> {
        let cache = &self.token_cache;
        let token = cache.token?;
        if cache.byte_index == byte_index
            && self
                .pool
                .external_token_state_eq(cache.last_external_token, last_external_token)
        {
            Some(token)
        } else {
            None
        }
    }

    fn set_cached_token(
        &mut self,
        byte_index: u32,
        last_external_token: Option<SubtreeId>,
        token: Option<SubtreeId>,
    ) {
        if let Some(token) = token {
            self.pool.retain(token);
        }
        if let Some(token) = last_external_token {
            self.pool.retain(token);
        }
        if let Some(previous) = self.token_cache.token.take() {
            self.pool.release(previous);
        }
        if let Some(previous) = self.token_cache.last_external_token.take() {
            self.pool.release(previous);
        }
        self.token_cache.byte_index = byte_index;
        self.token_cache.token = token;
        self.token_cache.last_external_token = last_external_token;
    }

    // ------------------------------------------------------------------
    // lexing
    // ------------------------------------------------------------------

    fn restore_external_scanner(&mut self, external_token: Option<SubtreeId>) {
        let state: &[u8] = external_token
            .and_then(|token| self.pool.get(token).external_token_state.as_deref())
            .unwrap_or(&[]);
        if let Some(scanner) = &mut self.external_scanner {
            scanner.deserialize(state);
        }
    }

    fn lex(
        &mut self,
        language: &Language,
        lexer: &mut Lexer<'_>,
        version: StackVersion,
        parse_state: StateId,
    ) -> SubtreeId {
        let start_position = self.stack.top_position(version);
        let external_token = self.stack.last_external_token(version);
        let mut lex_mode = language.lex_mode_for(parse_state);
        let mut valid_external_tokens = language.enabled_external_tokens(lex_mode.external_lex_state);

        let mut found_external_token = false;
        let mut skipped_error = false;
        let mut error_mode = parse_state == ERROR_STATE;
        let mut first_error_character: Option<char> = None;
        let mut error_start_position = Length::zero();
        let mut error_end_position = Length::zero();
        let mut last_byte_scanned = start_position.bytes;
        lexer.reset(start_position);

        loop {
            let current_position = lexer.current_position();

            if let Some(valid_tokens) = valid_external_tokens {
                log_lex!(
                    self,
                    "lex_external state:{}, row:{}, column:{}",
                    lex_mode.external_lex_state,
                    current_position.extent.row,
                    current_position.extent.column
                );
                lexer.start_token();
                self.restore_external_scanner(external_token);
                let scanned = match &mut self.external_scanner {
                    Some(scanner) => scanner.scan(lexer, valid_tokens),
                    None => false,
                };
                if scanned {
                    lexer.finish_token();
                    if error_mode && lexer.token_end_position().bytes <= current_position.bytes {
                        log_lex!(self, "disregard_empty_token");
                    } else {
                        found_external_token = true;
                        break;
                    }
                }
                last_byte_scanned = last_byte_scanned.max(lexer.current_position().bytes);
                lexer.reset(current_position);
            }

            log_lex!(
                self,
                "lex_internal state:{}, row:{}, column:{}",
                lex_mode.lex_state,
                current_position.extent.row,
                current_position.extent.column
            );
            lexer.start_token();
            if (language.lex_fn())(lexer, lex_mode.lex_state) {
                lexer.finish_token();
                break;
            }

            if !error_mode {
                log_lex!(self, "retry_in_error_mode");
                error_mode = true;
                lex_mode = language.lex_mode_for(ERROR_STATE);
                valid_external_tokens = language.enabled_external_tokens(lex_mode.external_lex_state);
                last_byte_scanned = last_byte_scanned.max(lexer.current_position().bytes);
                lexer.reset(start_position);
                continue;
            }

            if !skipped_error {
                log_lex!(self, "skip_unrecognized_character");
                skipped_error = true;
                error_start_position = lexer.token_start_position();
                error_end_position = lexer.token_start_position();
                first_error_character = lexer.lookahead();
            }

            if lexer.current_position().bytes == error_end_position.bytes {
                if lexer.eof() {
                    break;
                }
                lexer.advance(false);
            }
            error_end_position = lexer.current_position();
        }

        let result = if skipped_error {
            let padding = error_start_position.sub(start_position);
            let size = error_end_position.sub(error_start_position);
            self.pool
                .make_error_leaf(padding, size, first_error_character, language)
        } else {
            let raw_symbol = lexer.result_symbol().unwrap_or(SYM_END);
            let symbol = if found_external_token {
                language.external_symbol(raw_symbol)
            } else {
                raw_symbol
            };
            let padding = lexer.token_start_position().sub(start_position);
            let size = lexer
                .token_end_position()
                .sub(lexer.token_start_position());
            let leaf = self.pool.make_leaf(symbol, padding, size, language);
            if found_external_token {
                let state = match &mut self.external_scanner {
                    Some(scanner) => scanner.serialize(),
                    None => Vec::new(),
                };
                let node = self.pool.get_mut(leaf);
                node.has_external_tokens = true;
                node.external_token_state = Some(state.into_boxed_slice());
            }
            leaf
        };

        last_byte_scanned = last_byte_scanned.max(lexer.current_position().bytes);
        {
            let node = self.pool.get_mut(result);
            node.bytes_scanned = last_byte_scanned - start_position.bytes + 1;
            if !node.is_error() {
                node.parse_state = parse_state;
            }
            node.first_leaf.lex_mode = lex_mode;
        }

        log_lex!(
            self,
            "lexed_lookahead sym:{}, size:{}",
            language.symbol_name(self.pool.get(result).symbol),
            self.pool.get(result).size.bytes
        );
        result
    }

    // ------------------------------------------------------------------
    // shifting
    // ------------------------------------------------------------------

    fn shift(&mut self, version: StackVersion, state: StateId, lookahead: SubtreeId, extra: bool) {
        let target = if extra != self.pool.get(lookahead).extra {
            // Copy-on-write: other versions may still share this subtree.
            let target = if self.stack.version_count() > 1 {
                self.pool.make_copy(lookahead)
            } else {
                self.pool.retain(lookahead);
                lookahead
            };
            self.pool.get_mut(target).extra = extra;
            target
        } else {
            self.pool.retain(lookahead);
            lookahead
        };

        let is_pending = self.pool.get(target).child_count() > 0;
        self.stack
            .push(&mut self.pool, version, Some(target), is_pending, state);
        if self.pool.get(target).has_external_tokens {
            let last = self.pool.last_external_token(target);
            self.stack
                .set_last_external_token(&mut self.pool, version, last);
        }
        self.pool.release(target);
    }

    /// Descend a reused interior lookahead until its recorded parse state
    /// matches the current one (or always, with `force`, down to a leaf).
    fn breakdown_lookahead(
        &mut self,
        lookahead: &mut SubtreeId,
        state: StateId,
        cursor: &mut ReuseCursor,
        force: bool,
    ) {
        let mut did_break_down = false;
        while let Some(node) = cursor.node() {
            let (child_count, parse_state, symbol) = {
                let data = self.pool.get(node);
                (data.child_count(), data.parse_state, data.symbol)
            };
            if child_count == 0 || (!force && parse_state == state) {
                break;
            }
            log_parse!(self, "state_mismatch sym:{symbol}");
            cursor.breakdown(&self.pool);
            did_break_down = true;
        }
        if did_break_down {
            if let Some(node) = cursor.node() {
                self.pool.release(*lookahead);
                self.pool.retain(node);
                *lookahead = node;
            }
        }
    }

    /// Pop pending links (coarse reused subtrees) and re-push their
    /// children, converting opportunistic reuse into finer-grained parsing.
    fn breakdown_top_of_stack(&mut self, language: &Language, version: StackVersion) -> bool {
        let mut did_break_down = false;
        loop {
            let mut pending = false;
            let slices = self.stack.pop_pending(&mut self.pool, version);
            if slices.is_empty() {
                break;
            }
            did_break_down = true;
            for slice in slices {
                let mut state = self.stack.top_state(slice.version);
                let parent = slice.trees[0];
                let children = self.pool.get(parent).children.clone();
                for child in children {
                    let child_data = self.pool.get(child);
                    pending = child_data.child_count() > 0;
                    if child_data.is_error() {
                        state = ERROR_STATE;
                    } else if !child_data.extra {
                        state = language.next_state(state, child_data.symbol);
                    }
                    self.stack
                        .push(&mut self.pool, slice.version, Some(child), pending, state);
                }

                for &tree in &slice.trees[1..] {
                    self.stack
                        .push(&mut self.pool, slice.version, Some(tree), false, state);
                    self.pool.release(tree);
                }

                log_parse!(
                    self,
                    "breakdown_top_of_stack tree:{}",
                    language.symbol_name(self.pool.get(parent).symbol)
                );
                self.stack
                    .decrease_push_count(slice.version, self.pool.get(parent).child_count() + 1);
                self.pool.release(parent);
            }
            if !pending {
                break;
            }
        }
        did_break_down
    }

    // ------------------------------------------------------------------
    // reducing and accepting
    // ------------------------------------------------------------------

    /// Deterministic choice among alternative parses of one range. Returns
    /// true when `right` should replace `left`.
    fn select_tree(&mut self, language: &Language, left: Option<SubtreeId>, right: SubtreeId) -> bool {
        let Some(left) = left else { return true };
        let left_data = self.pool.get(left);
        let right_data = self.pool.get(right);
        let (left_symbol, right_symbol) = (left_data.symbol, right_data.symbol);

        if right_data.error_cost < left_data.error_cost {
            log_parse!(
                self,
                "select_smaller_error symbol:{}, over_symbol:{}",
                language.symbol_name(right_symbol),
                language.symbol_name(left_symbol)
            );
            return true;
        }
        if left_data.error_cost < right_data.error_cost {
            log_parse!(
                self,
                "select_smaller_error symbol:{}, over_symbol:{}",
                language.symbol_name(left_symbol),
                language.symbol_name(right_symbol)
            );
            return false;
        }
        if right_data.dynamic_precedence > left_data.dynamic_precedence {
            log_parse!(
                self,
                "select_higher_precedence symbol:{}, over_symbol:{}",
                language.symbol_name(right_symbol),
                language.symbol_name(left_symbol)
            );
            return true;
        }
        if left_data.dynamic_precedence > right_data.dynamic_precedence {
            log_parse!(
                self,
                "select_higher_precedence symbol:{}, over_symbol:{}",
                language.symbol_name(left_symbol),
                language.symbol_name(right_symbol)
            );
            return false;
        }
        if left_data.error_cost > 0 {
            return true;
        }
        match self.pool.compare(left, right) {
            Ordering::Less => {
                log_parse!(
                    self,
                    "select_earlier symbol:{}, over_symbol:{}",
                    language.symbol_name(left_symbol),
                    language.symbol_name(right_symbol)
                );
                false
            }
            Ordering::Greater => {
                log_parse!(
                    self,
                    "select_earlier symbol:{}, over_symbol:{}",
                    language.symbol_name(right_symbol),
                    language.symbol_name(left_symbol)
                );
                true
            }
            Ordering::Equal => {
                log_parse!(
                    self,
                    "select_existing symbol:{}, over_symbol:{}",
                    language.symbol_name(left_symbol),
                    language.symbol_name(right_symbol)
                );
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reduce(
        &mut self,
        language: &Language,
        version: StackVersion,
        symbol: Symbol,
        count: u32,
        dynamic_precedence: i32,
        alias_sequence_id: u16,
        fragile: bool,
    ) -> Option<StackVersion> {
        let initial_version_count = self.stack.version_count();
        let slices = self.stack.pop_count(&mut self.pool, version, count);
        let first_version = slices.first().map(|slice| slice.version);
        let slice_count = slices.len();

        let mut iter = slices.into_iter().peekable();
        while let Some(slice) = iter.next() {
            let slice_version = slice.version;
            let mut trees = slice.trees;

            // Trailing extras are re-pushed after the parent, not included
            // in it.
            let mut extras = self.pool.remove_trailing_extras(&mut trees);
            let mut parent = self.pool.make_node(symbol, trees, alias_sequence_id, language);

            // A pop may collapse several old versions into one revealed
            // version; pick one child array through select_tree.
            while let Some(next_slice) = iter.next_if(|s| s.version == slice_version) {
                let mut next_trees = next_slice.trees;
                let next_extras = self.pool.remove_trailing_extras(&mut next_trees);
                let candidate = self
                    .pool
                    .make_node(symbol, next_trees, alias_sequence_id, language);
                if self.select_tree(language, Some(parent), candidate) {
                    self.pool.release(parent);
                    for extra in extras.drain(..) {
                        self.pool.release(extra);
                    }
                    parent = candidate;
                    extras = next_extras;
                } else {
                    self.pool.release(candidate);
                    for extra in next_extras {
                        self.pool.release(extra);
                    }
                }
            }

            let state = self.stack.top_state(slice_version);
            let next_state = language.next_state(state, symbol);
            {
                let node = self.pool.get_mut(parent);
                node.dynamic_precedence += dynamic_precedence;
                node.alias_sequence_id = alias_sequence_id;
            }
            if fragile || self.in_ambiguity || slice_count > 1 || initial_version_count > 1 {
                let node = self.pool.get_mut(parent);
                node.fragile_left = true;
                node.fragile_right = true;
                node.parse_state = crate::language::STATE_NONE;
            } else {
                self.pool.get_mut(parent).parse_state = state;
            }

            self.stack
                .push(&mut self.pool, slice_version, Some(parent), false, next_state);
            self.pool.release(parent);
            for extra in extras {
                self.stack
                    .push(&mut self.pool, slice_version, Some(extra), false, next_state);
                self.pool.release(extra);
            }
        }

        // Only versions created by this reduction are merged here; older
        // eligible pairs wait for the next condense pass.
        let mut i = initial_version_count;
        while i < self.stack.version_count() {
            let mut merged = false;
            for j in initial_version_count..i {
                if self.stack.merge(&mut self.pool, j, i) {
                    merged = true;
                    break;
                }
            }
            if !merged {
                i += 1;
            }
        }

        first_version
    }

    fn accept(&mut self, language: &Language, version: StackVersion, lookahead: SubtreeId) {
        debug_assert_eq!(self.pool.get(lookahead).symbol, SYM_END);
        self.pool.get_mut(lookahead).extra = true;
        self.stack
            .push(&mut self.pool, version, Some(lookahead), false, START_STATE);

        let slices = self.stack.pop_all(&mut self.pool, version);
        let first_slice_version = slices.first().map(|slice| slice.version);
        for slice in slices {
            let trees = slice.trees;
            let root = if trees.len() == 1 {
                Some(trees[0])
            } else {
                // Promote the last non-extra tree to root, splicing the
                // surrounding extras around its children.
                match trees
                    .iter()
                    .rposition(|&tree| !self.pool.get(tree).extra)
                {
                    Some(index) => {
                        let child = trees[index];
                        let child_symbol = self.pool.get(child).symbol;
                        let child_aliases = self.pool.get(child).alias_sequence_id;
                        let grandchildren = self.pool.get(child).children.clone();
                        let mut spliced =
                            Vec::with_capacity(trees.len() - 1 + grandchildren.len());
                        spliced.extend_from_slice(&trees[..index]);
                        for grandchild in grandchildren {
                            self.pool.retain(grandchild);
                            spliced.push(grandchild);
                        }
                        spliced.extend_from_slice(&trees[index + 1..]);
                        let root =
                            self.pool
                                .make_node(child_symbol, spliced, child_aliases, language);
                        self.pool.release(child);
                        Some(root)
                    }
                    None => {
                        for tree in trees {
                            self.pool.release(tree);
                        }
                        None
                    }
                }
            };

            let Some(root) = root else { continue };
            match self.finished_tree {
                Some(finished) => {
                    if self.select_tree(language, Some(finished), root) {
                        self.pool.release(finished);
                        self.finished_tree = Some(root);
                    } else {
                        self.pool.release(root);
                    }
                }
                None => self.finished_tree = Some(root),
            }
        }

        if let Some(slice_version) = first_slice_version {
            self.stack.remove_version(&mut self.pool, slice_version);
        }
        self.stack.halt(version);
    }

    // ------------------------------------------------------------------
    // error handling and recovery
    // ------------------------------------------------------------------

    fn error_status(&self, version: StackVersion) -> ErrorStatus {
        ErrorStatus {
            cost: self.stack.error_cost(version),
            push_count: self.stack.push_count(version),
            is_in_error: self.stack.top_state(version) == ERROR_STATE,
        }
    }

    fn better_version_exists(&self, version: StackVersion, is_in_error: bool, cost: u32) -> bool {
        if let Some(finished) = self.finished_tree {
            if self.pool.get(finished).error_cost <= cost {
                return true;
            }
        }
        let status = ErrorStatus {
            cost,
            is_in_error,
            push_count: 0,
        };
        for i in 0..self.stack.version_count() {
            if i == version || self.stack.is_halted(i) {
                continue;
            }
            match compare_versions(status, self.error_status(i)) {
                ErrorComparison::TakeRight => return true,
                ErrorComparison::PreferRight => {
                    if self.stack.can_merge(&self.pool, i, version) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn do_potential_reductions(&mut self, language: &Language, version: StackVersion) -> bool {
        let mut has_shift_action = false;
        let state = self.stack.top_state(version);
        let previous_version_count = self.stack.version_count();

        let mut reduce_actions: SmallVec<[ReduceActionEntry; 4]> = SmallVec::new();
        for symbol in 0..language.token_count() {
            let entry = language.table_entry(state, symbol);
            for action in entry.actions {
                match *action {
                    ParseAction::Shift { extra, .. } => {
                        if !extra {
                            has_shift_action = true;
                        }
                    }
                    ParseAction::Recover => has_shift_action = true,
                    ParseAction::Reduce {
                        symbol,
                        child_count,
                        dynamic_precedence,
                        alias_sequence_id,
                        extra,
                        ..
                    } => {
                        if !extra && child_count > 0 {
                            let candidate = ReduceActionEntry {
                                symbol,
                                child_count,
                                dynamic_precedence,
                                alias_sequence_id,
                            };
                            if !reduce_actions.contains(&candidate) {
                                reduce_actions.push(candidate);
                            }
                        }
                    }
                    ParseAction::Accept => {}
                }
            }
        }

        let mut did_reduce = false;
        for action in reduce_actions {
            self.reduce(
                language,
                version,
                action.symbol,
                action.child_count,
                action.dynamic_precedence,
                action.alias_sequence_id,
                true,
            );
            did_reduce = true;
        }

        if did_reduce {
            if has_shift_action {
                true
            } else if self.stack.version_count() > previous_version_count {
                self.stack
                    .renumber_version(&mut self.pool, previous_version_count, version);
                false
            } else {
                true
            }
        } else {
            true
        }
    }

    fn handle_error(&mut self, language: &Language, version: StackVersion) {
        let new_cost = self.stack.error_cost(version) + ERROR_COST_PER_SKIPPED_TREE;
        if self.better_version_exists(version, true, new_cost) {
            self.stack.halt(version);
            log_parse!(self, "bail_on_error");
            return;
        }
        log_parse!(self, "handle_error");

        // Perform every reduction this state allows regardless of the
        // lookahead, each on its own fork.
        let previous_version_count = self.stack.version_count();
        let mut v = version;
        while v < self.stack.version_count() {
            if self.do_potential_reductions(language, v) {
                if v == version {
                    v = previous_version_count;
                } else {
                    v += 1;
                }
            }
        }

        // Push the discontinuity and collapse the forks into it.
        self.stack
            .push(&mut self.pool, version, None, false, ERROR_STATE);
        while self.stack.version_count() > previous_version_count {
            self.stack
                .push(&mut self.pool, previous_version_count, None, false, ERROR_STATE);
            self.stack
                .force_merge(&mut self.pool, version, previous_version_count);
        }

        self.stack
            .record_summary(&mut self.pool, version, MAX_SUMMARY_DEPTH);
    }

    fn recover(&mut self, language: &Language, version: StackVersion, lookahead: SubtreeId) {
        let mut did_recover = false;
        let previous_version_count = self.stack.version_count();
        let position = self.stack.top_position(version);
        let summary: Vec<crate::stack::SummaryEntry> = self
            .stack
            .get_summary(version)
            .map(<[crate::stack::SummaryEntry]>::to_vec)
            .unwrap_or_default();

        for entry in summary {
            if entry.state == ERROR_STATE {
                continue;
            }
            let depth = entry.depth + self.stack.depth_since_error(&self.pool, version);

            let new_cost = depth * ERROR_COST_PER_SKIPPED_TREE
                + position.chars.saturating_sub(entry.position.chars) * ERROR_COST_PER_SKIPPED_CHAR
                + position.extent.row.saturating_sub(entry.position.extent.row)
                    * ERROR_COST_PER_SKIPPED_LINE;
            if self.better_version_exists(version, false, new_cost) {
                break;
            }

            let lookahead_symbol = self.pool.get(lookahead).symbol;
            if language
                .table_entry(entry.state, lookahead_symbol)
                .actions
                .is_empty()
            {
                continue;
            }

            log_parse!(self, "recover state:{}, depth:{}", entry.state, depth);
            let slices = self.stack.pop_count(&mut self.pool, version, depth);
            let mut previous_version: Option<StackVersion> = None;
            for slice in slices {
                let slice_version = slice.version;
                let trees = slice.trees;

                if Some(slice_version) == previous_version {
                    for tree in trees {
                        self.pool.release(tree);
                    }
                    continue;
                }

                if self.stack.top_state(slice_version) != entry.state {
                    for tree in trees {
                        self.pool.release(tree);
                    }
                    self.stack.halt(slice_version);
                    continue;
                }

                // Merge with an immediately preceding error, if any.
                let mut combined = self.stack.pop_error(&mut self.pool, slice_version);
                combined.extend(trees);

                let trailing_extras = self.pool.remove_trailing_extras(&mut combined);
                if combined.is_empty() {
                    // Nothing to wrap; the discontinuity alone was popped.
                } else {
                    let error = self.pool.make_error_node(combined, language);
                    self.pool.get_mut(error).extra = true;
                    self.stack
                        .push(&mut self.pool, slice_version, Some(error), false, entry.state);
                    self.pool.release(error);
                }
                previous_version = Some(slice_version);

                for tree in trailing_extras {
                    self.stack
                        .push(&mut self.pool, slice_version, Some(tree), false, entry.state);
                    self.pool.release(tree);
                }
                did_recover = true;
            }
            break;
        }

        // Drop fresh versions that halted or duplicate existing ones.
        let mut i = previous_version_count;
        while i < self.stack.version_count() {
            if self.stack.is_halted(i) {
                self.stack.remove_version(&mut self.pool, i);
                continue;
            }
            let mut removed = false;
            for j in 0..i {
                if self.stack.can_merge(&self.pool, j, i) {
                    self.stack.remove_version(&mut self.pool, i);
                    removed = true;
                    break;
                }
            }
            if !removed {
                i += 1;
            }
        }

        if did_recover && self.stack.version_count() > MAX_VERSION_COUNT {
            self.stack.halt(version);
            return;
        }

        if self.pool.get(lookahead).symbol == SYM_END {
            log_parse!(self, "recover_eof");
            let parent = self.pool.make_error_node(Vec::new(), language);
            self.stack
                .push(&mut self.pool, version, Some(parent), false, START_STATE);
            self.pool.release(parent);
            self.accept(language, version, lookahead);
            return;
        }

        log_parse!(
            self,
            "skip_token symbol:{}",
            language.symbol_name(self.pool.get(lookahead).symbol)
        );
        let entry = language.table_entry(ERROR_STATE, self.pool.get(lookahead).symbol);
        let extra = matches!(
            entry.actions.last(),
            Some(ParseAction::Shift { extra: true, .. })
        );
        self.shift(version, ERROR_STATE, lookahead, extra);

        if self.better_version_exists(version, true, self.stack.error_cost(version)) {
            self.stack.halt(version);
        }
    }

    fn halt_parse(&mut self, language: &Language, lexer: &mut Lexer<'_>) {
        log_parse!(self, "halting_parse");

        lexer.advance_to_end();
        let remaining_length = lexer
            .current_position()
            .sub(self.stack.top_position(0));

        let filler = self
            .pool
            .make_error_leaf(Length::zero(), remaining_length, None, language);
        self.pool.get_mut(filler).visible = false;
        self.stack
            .push(&mut self.pool, 0, Some(filler), false, START_STATE);
        self.pool.release(filler);

        let root_error = self.pool.make_error_node(Vec::new(), language);
        self.stack
            .push(&mut self.pool, 0, Some(root_error), false, START_STATE);
        self.pool.release(root_error);

        let eof = self
            .pool
            .make_leaf(SYM_END, Length::zero(), Length::zero(), language);
        self.accept(language, 0, eof);
        self.pool.release(eof);
    }

    // ------------------------------------------------------------------
    // version condensation
    // ------------------------------------------------------------------

    /// Per-round cleanup: drop halted versions, resolve dominated pairs,
    /// merge equivalent ones, and enforce the version bound. Returns
    /// whether the whole parse should stop.
    fn condense_stack(&mut self) -> bool {
        let mut made_changes = false;
        let mut min_error_cost = u32::MAX;
        let mut all_versions_have_error = true;

        let mut i: i64 = 0;
        while (i as usize) < self.stack.version_count() {
            if self.stack.is_halted(i as usize) {
                self.stack.remove_version(&mut self.pool, i as usize);
                continue;
            }

            let status_i = self.error_status(i as usize);
            if !status_i.is_in_error {
                all_versions_have_error = false;
            }
            if status_i.cost < min_error_cost {
                min_error_cost = status_i.cost;
            }

            let mut j: i64 = 0;
            while j < i {
                let status_j = self.error_status(j as usize);
                let can_merge = self.stack.can_merge(&self.pool, j as usize, i as usize);
                match compare_versions(status_j, status_i) {
                    ErrorComparison::TakeLeft => {
                        made_changes = true;
                        self.stack.remove_version(&mut self.pool, i as usize);
                        i -= 1;
                        j = i;
                    }
                    ErrorComparison::PreferLeft => {
                        if can_merge {
                            made_changes = true;
                            self.stack.remove_version(&mut self.pool, i as usize);
                            i -= 1;
                            j = i;
                        }
                    }
                    ErrorComparison::None => {
                        if can_merge {
                            made_changes = true;
                            self.stack
                                .force_merge(&mut self.pool, j as usize, i as usize);
                            i -= 1;
                            j = i;
                        }
                    }
                    ErrorComparison::PreferRight => {
                        made_changes = true;
                        if can_merge {
                            self.stack.remove_version(&mut self.pool, j as usize);
                            i -= 1;
                            j -= 1;
                        } else {
                            self.stack.swap_versions(i as usize, j as usize);
                            j = i;
                        }
                    }
                    ErrorComparison::TakeRight => {
                        made_changes = true;
                        self.stack.remove_version(&mut self.pool, j as usize);
                        i -= 1;
                        j -= 1;
                    }
                }
                j += 1;
            }
            i += 1;
        }

        while self.stack.version_count() > MAX_VERSION_COUNT {
            self.stack.remove_version(&mut self.pool, MAX_VERSION_COUNT);
            made_changes = true;
        }

        if made_changes {
            log_parse!(self, "condense");
        }

        (all_versions_have_error && self.stack.version_count() > 0)
            || self
                .finished_tree
                .is_some_and(|finished| self.pool.get(finished).error_cost < min_error_cost)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_versions_prefers_error_free() {
        let clean = ErrorStatus {
            cost: 100,
            push_count: 2,
            is_in_error: false,
        };
        let errored = ErrorStatus {
            cost: 50,
            push_count: 0,
            is_in_error: true,
        };
        assert_eq!(compare_versions(clean, errored), ErrorComparison::PreferLeft);
        assert_eq!(compare_versions(errored, clean), ErrorComparison::PreferRight);
    }

    #[test]
    fn compare_versions_takes_on_large_cost_gap() {
        let cheap = ErrorStatus {
            cost: 0,
            push_count: 100,
            is_in_error: false,
        };
        let expensive = ErrorStatus {
            cost: 5000,
            push_count: 0,
            is_in_error: false,
        };
        assert_eq!(compare_versions(cheap, expensive), ErrorComparison::TakeLeft);
        assert_eq!(
            compare_versions(expensive, cheap),
            ErrorComparison::TakeRight
        );
    }

    #[test]
    fn compare_versions_ties_are_none() {
        let a = ErrorStatus {
            cost: 10,
            push_count: 1,
            is_in_error: false,
        };
        assert_eq!(compare_versions(a, a), ErrorComparison::None);
    }

    #[test]
    fn parse_without_language_returns_none() {
        let mut parser = Parser::new();
        assert!(parser.parse(&"input", None, false).is_none());
    }
}
