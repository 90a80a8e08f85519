//! The language table interface.
//!
//! A [`Language`] is the read-only description the parser consults while it
//! runs: parse actions per (state, token), goto transitions, lex modes, the
//! generated lex function, optional external-scanner hooks, and per-symbol
//! metadata. The parser treats the tables as trusted; construction validates
//! cross-references once so the hot path can index without checking.

use compact_str::CompactString;
use smallvec::SmallVec;
use thiserror::Error;

use crate::lexer::Lexer;

/// A grammar symbol. Symbol `0` is the end-of-input builtin; values below
/// [`Language::token_count`] are terminals, the rest are non-terminals.
pub type Symbol = u16;

/// An LR automaton state.
pub type StateId = u16;

/// The end-of-input builtin symbol.
pub const SYM_END: Symbol = 0;

/// The error builtin symbol. Error leaves and ERROR nodes carry it.
pub const SYM_ERROR: Symbol = u16::MAX;

/// The designated recovery state. Not a table row: the accessors synthesize
/// its action entries from symbol metadata.
pub const ERROR_STATE: StateId = u16::MAX;

/// Marker for subtrees built under ambiguity; never a valid automaton state.
pub const STATE_NONE: StateId = u16::MAX - 1;

/// The state a parse starts in.
pub const START_STATE: StateId = 0;

/// Lexing mode for one parse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexMode {
    pub lex_state: u16,
    /// `0` means no external tokens are valid in this state.
    pub external_lex_state: u16,
}

/// One parse action. Entries for a `(state, token)` pair are executed in
/// order; a shift ends the sequence, so tables place reduces first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseAction {
    Shift {
        state: StateId,
        extra: bool,
    },
    Reduce {
        symbol: Symbol,
        child_count: u32,
        dynamic_precedence: i32,
        alias_sequence_id: u16,
        fragile: bool,
        extra: bool,
    },
    Accept,
    Recover,
}

/// Per-symbol grammar metadata.
#[derive(Debug, Clone)]
pub struct SymbolMetadata {
    pub name: CompactString,
    pub visible: bool,
    pub named: bool,
    /// Extras (whitespace, comments) may appear between any two tokens.
    pub extra: bool,
}

/// The actions and reuse hints for one `(state, token)` pair.
#[derive(Debug, Clone)]
pub struct EntryData {
    pub actions: SmallVec<[ParseAction; 2]>,
    pub is_reusable: bool,
    pub depends_on_lookahead: bool,
}

impl Default for EntryData {
    fn default() -> Self {
        Self {
            actions: SmallVec::new(),
            is_reusable: true,
            depends_on_lookahead: false,
        }
    }
}

/// Borrowed view of an [`EntryData`], handed to the driver.
#[derive(Debug, Clone, Copy)]
pub struct TableEntry<'a> {
    pub actions: &'a [ParseAction],
    pub is_reusable: bool,
    pub depends_on_lookahead: bool,
}

/// The generated internal tokenizer. Reads characters through the [`Lexer`]
/// and reports the recognized symbol via [`Lexer::set_result`].
pub type LexFn = fn(&mut Lexer<'_>, u16) -> bool;

/// A user-supplied tokenizer for context-sensitive tokens.
///
/// The parser owns one instance per language and serializes/deserializes its
/// state around every call, so implementations must round-trip all state
/// through `serialize`/`deserialize` and keep nothing hidden across rewinds.
pub trait ExternalScanner {
    /// Attempt to scan one token. `valid_tokens[i]` is true when external
    /// token `i` is acceptable in the current parse state.
    fn scan(&mut self, lexer: &mut Lexer<'_>, valid_tokens: &[bool]) -> bool;

    /// Capture the scanner state reached after the last successful scan.
    fn serialize(&mut self) -> Vec<u8>;

    /// Restore a state previously captured by `serialize`. An empty slice
    /// restores the initial state.
    fn deserialize(&mut self, data: &[u8]);
}

/// External-token configuration: a scanner factory, the mapping from scanner
/// result indices to grammar symbols, and the per-external-lex-state
/// validity sets.
pub struct ExternalTokens {
    pub create: Box<dyn Fn() -> Box<dyn ExternalScanner>>,
    pub symbol_map: Vec<Symbol>,
    /// Indexed by `external_lex_state`; entry 0 is unused (state 0 = none).
    pub enabled: Vec<Vec<bool>>,
}

impl std::fmt::Debug for ExternalTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalTokens")
            .field("symbol_map", &self.symbol_map)
            .field("enabled", &self.enabled.len())
            .finish_non_exhaustive()
    }
}

/// Raw language description, validated into a [`Language`].
pub struct LanguageData {
    pub token_count: u16,
    pub symbol_count: u16,
    pub metadata: Vec<SymbolMetadata>,
    /// `table[state][token]`.
    pub table: Vec<Vec<EntryData>>,
    /// `goto_table[state][symbol]`; `0` where no transition exists.
    pub goto_table: Vec<Vec<StateId>>,
    /// One lex mode per state.
    pub lex_modes: Vec<LexMode>,
    /// The mode used while recovering from errors.
    pub error_lex_mode: LexMode,
    pub lex_fn: LexFn,
    pub external: Option<ExternalTokens>,
    /// `alias_sequences[id][structural_child_index]`; id 0 must be empty.
    pub alias_sequences: Vec<Vec<Symbol>>,
}

#[derive(Debug, Error)]
pub enum LanguageError {
    #[error("metadata length {found} does not match symbol count {expected}")]
    MetadataLength { expected: usize, found: usize },
    #[error("action table row {state} has {found} entries, expected {expected}")]
    TableWidth {
        state: usize,
        expected: usize,
        found: usize,
    },
    #[error("goto table shape does not match state/symbol counts")]
    GotoShape,
    #[error("lex mode count {found} does not match state count {expected}")]
    LexModeCount { expected: usize, found: usize },
    #[error("action in state {state} references out-of-range state {target}")]
    BadTargetState { state: usize, target: StateId },
    #[error("alias sequence 0 must be empty")]
    NonEmptyDefaultAliases,
    #[error("external symbol map references out-of-range symbol {0}")]
    BadExternalSymbol(Symbol),
}

/// A validated language description.
pub struct Language {
    token_count: u16,
    symbol_count: u16,
    metadata: Vec<SymbolMetadata>,
    table: Vec<Vec<EntryData>>,
    goto_table: Vec<Vec<StateId>>,
    lex_modes: Vec<LexMode>,
    error_lex_mode: LexMode,
    lex_fn: LexFn,
    external: Option<ExternalTokens>,
    alias_sequences: Vec<Vec<Symbol>>,
    recovery_row: Vec<EntryData>,
    empty_entry: EntryData,
    error_metadata: SymbolMetadata,
}

impl Language {
    /// Validate a raw description.
    ///
    /// # Errors
    ///
    /// Returns a [`LanguageError`] naming the first inconsistency found.
    pub fn new(data: LanguageData) -> Result<Self, LanguageError> {
        let state_count = data.table.len();
        if data.metadata.len() != data.symbol_count as usize {
            return Err(LanguageError::MetadataLength {
                expected: data.symbol_count as usize,
                found: data.metadata.len(),
            });
        }
        for (state, row) in data.table.iter().enumerate() {
            if row.len() != data.token_count as usize {
                return Err(LanguageError::TableWidth {
                    state,
                    expected: data.token_count as usize,
                    found: row.len(),
                });
            }
            for entry in row {
                for action in &entry.actions {
                    if let ParseAction::Shift { state: target, extra } = *action {
                        if !extra && target as usize >= state_count {
                            return Err(LanguageError::BadTargetState { state, target });
                        }
                    }
                }
            }
        }
        if data.goto_table.len() != state_count
            || data
                .goto_table
                .iter()
                .any(|row| row.len() != data.symbol_count as usize)
        {
            return Err(LanguageError::GotoShape);
        }
        if data.lex_modes.len() != state_count {
            return Err(LanguageError::LexModeCount {
                expected: state_count,
                found: data.lex_modes.len(),
            });
        }
        if data.alias_sequences.first().is_some_and(|s| !s.is_empty()) {
            return Err(LanguageError::NonEmptyDefaultAliases);
        }
        if let Some(external) = &data.external {
            for &symbol in &external.symbol_map {
                if symbol >= data.symbol_count {
                    return Err(LanguageError::BadExternalSymbol(symbol));
                }
            }
        }

        // The recovery state's row is synthesized once: extras keep being
        // shifted, everything else triggers recovery.
        let recovery_row = data
            .metadata
            .iter()
            .take(data.token_count as usize)
            .map(|meta| {
                let mut entry = EntryData::default();
                if meta.extra {
                    entry.actions.push(ParseAction::Shift {
                        state: ERROR_STATE,
                        extra: true,
                    });
                } else {
                    entry.actions.push(ParseAction::Recover);
                }
                entry
            })
            .collect();

        Ok(Self {
            token_count: data.token_count,
            symbol_count: data.symbol_count,
            metadata: data.metadata,
            table: data.table,
            goto_table: data.goto_table,
            lex_modes: data.lex_modes,
            error_lex_mode: data.error_lex_mode,
            lex_fn: data.lex_fn,
            external: data.external,
            alias_sequences: data.alias_sequences,
            recovery_row,
            empty_entry: EntryData {
                actions: SmallVec::new(),
                is_reusable: false,
                depends_on_lookahead: false,
            },
            error_metadata: SymbolMetadata {
                name: CompactString::const_new("ERROR"),
                visible: true,
                named: true,
                extra: false,
            },
        })
    }

    #[must_use]
    pub fn state_count(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub const fn token_count(&self) -> u16 {
        self.token_count
    }

    #[must_use]
    pub const fn symbol_count(&self) -> u16 {
        self.symbol_count
    }

    /// Actions and reuse hints for a `(state, token)` pair.
    #[must_use]
    pub fn table_entry(&self, state: StateId, symbol: Symbol) -> TableEntry<'_> {
        let data = if symbol == SYM_ERROR || symbol >= self.token_count {
            &self.empty_entry
        } else if state == ERROR_STATE {
            &self.recovery_row[symbol as usize]
        } else {
            &self.table[state as usize][symbol as usize]
        };
        TableEntry {
            actions: &data.actions,
            is_reusable: data.is_reusable,
            depends_on_lookahead: data.depends_on_lookahead,
        }
    }

    /// The goto/shift transition, or `0` where none exists.
    #[must_use]
    pub fn next_state(&self, state: StateId, symbol: Symbol) -> StateId {
        if state == ERROR_STATE || symbol == SYM_ERROR {
            return START_STATE;
        }
        self.goto_table[state as usize][symbol as usize]
    }

    #[must_use]
    pub fn lex_mode_for(&self, state: StateId) -> LexMode {
        if state == ERROR_STATE {
            self.error_lex_mode
        } else {
            self.lex_modes[state as usize]
        }
    }

    #[must_use]
    pub const fn lex_fn(&self) -> LexFn {
        self.lex_fn
    }

    /// The validity set for one external lex state; `None` when no external
    /// tokens may appear.
    #[must_use]
    pub fn enabled_external_tokens(&self, external_lex_state: u16) -> Option<&[bool]> {
        if external_lex_state == 0 {
            return None;
        }
        self.external
            .as_ref()
            .map(|external| external.enabled[external_lex_state as usize].as_slice())
    }

    #[must_use]
    pub fn external_symbol(&self, scanner_index: Symbol) -> Symbol {
        match &self.external {
            Some(external) => external.symbol_map[scanner_index as usize],
            None => scanner_index,
        }
    }

    #[must_use]
    pub fn create_external_scanner(&self) -> Option<Box<dyn ExternalScanner>> {
        self.external.as_ref().map(|external| (external.create)())
    }

    #[must_use]
    pub fn metadata(&self, symbol: Symbol) -> &SymbolMetadata {
        if symbol == SYM_ERROR {
            &self.error_metadata
        } else {
            &self.metadata[symbol as usize]
        }
    }

    #[must_use]
    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        &self.metadata(symbol).name
    }

    #[must_use]
    pub fn alias_sequence(&self, id: u16) -> &[Symbol] {
        self.alias_sequences
            .get(id as usize)
            .map_or(&[], Vec::as_slice)
    }
}

impl std::fmt::Debug for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Language")
            .field("token_count", &self.token_count)
            .field("symbol_count", &self.symbol_count)
            .field("state_count", &self.table.len())
            .finish_non_exhaustive()
    }
}
