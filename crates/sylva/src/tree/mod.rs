//! The subtree model: refcounted tree nodes allocated from a slab pool.
//!
//! Subtrees are built bottom-up during parsing, shared freely between stack
//! versions, and immutable once the parse finishes (except for the one-shot
//! `assign_parents` pass and `edit`, which prepares a tree for re-parsing).
//! All operations live on [`SubtreePool`]: the pool is the arena, and a
//! [`SubtreeId`] is only meaningful together with the pool that issued it.

mod pool;
pub mod reuse;

pub use pool::{SubtreeId, SubtreePool};

use smallvec::SmallVec;
use std::cmp::Ordering;

use crate::language::{Language, LexMode, StateId, Symbol, STATE_NONE, SYM_ERROR};
use crate::text::{InputEdit, Length};

/// Flat penalty for every completed recovery (each ERROR node).
pub const ERROR_COST_PER_RECOVERY: u32 = 500;
/// Penalty per well-formed tree consumed into an ERROR node.
pub const ERROR_COST_PER_SKIPPED_TREE: u32 = 100;
/// Penalty per source line covered by an error region.
pub const ERROR_COST_PER_SKIPPED_LINE: u32 = 30;
/// Penalty per character covered by an error region.
pub const ERROR_COST_PER_SKIPPED_CHAR: u32 = 1;

/// The symbol and lex mode of a subtree's first leaf, kept for deciding
/// whether the subtree can be reused as a lookahead token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstLeaf {
    pub symbol: Symbol,
    pub lex_mode: LexMode,
}

/// Back-pointer data filled in by `assign_parents` after a parse completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeContext {
    pub parent: Option<SubtreeId>,
    pub index: u32,
    pub offset: Length,
}

/// One tree node. Fields are public for inspection; mutation goes through
/// the pool so the refcount discipline stays in one place.
#[derive(Debug, Clone)]
pub struct SubtreeData {
    pub ref_count: u32,
    pub symbol: Symbol,
    /// The automaton state this node was created in, or [`STATE_NONE`] when
    /// the node is fragile and must not anchor reuse.
    pub parse_state: StateId,
    pub padding: Length,
    pub size: Length,
    /// How far past its own start the lexer looked while producing this
    /// subtree. An edit inside this envelope invalidates the node.
    pub bytes_scanned: u32,
    pub error_cost: u32,
    pub dynamic_precedence: i32,
    pub children: SmallVec<[SubtreeId; 8]>,
    pub visible_child_count: u32,
    pub named_child_count: u32,
    pub alias_sequence_id: u16,
    pub alias_symbol: Symbol,
    pub alias_is_named: bool,
    /// Serialized scanner state, present on leaves produced externally.
    pub external_token_state: Option<Box<[u8]>>,
    /// The first unrecognized character, present on error leaves.
    pub lookahead_char: Option<char>,
    pub first_leaf: FirstLeaf,
    pub visible: bool,
    pub named: bool,
    pub extra: bool,
    pub fragile_left: bool,
    pub fragile_right: bool,
    pub has_changes: bool,
    pub has_external_tokens: bool,
    pub context: NodeContext,
}

impl Default for SubtreeData {
    fn default() -> Self {
        Self {
            ref_count: 0,
            symbol: 0,
            parse_state: STATE_NONE,
            padding: Length::zero(),
            size: Length::zero(),
            bytes_scanned: 0,
            error_cost: 0,
            dynamic_precedence: 0,
            children: SmallVec::new(),
            visible_child_count: 0,
            named_child_count: 0,
            alias_sequence_id: 0,
            alias_symbol: 0,
            alias_is_named: false,
            external_token_state: None,
            lookahead_char: None,
            first_leaf: FirstLeaf::default(),
            visible: false,
            named: false,
            extra: false,
            fragile_left: false,
            fragile_right: false,
            has_changes: false,
            has_external_tokens: false,
            context: NodeContext::default(),
        }
    }
}

impl SubtreeData {
    #[must_use]
    pub fn child_count(&self) -> u32 {
        self.children.len() as u32
    }

    #[must_use]
    pub const fn total_size(&self) -> Length {
        self.padding.add(self.size)
    }

    #[must_use]
    pub const fn total_bytes(&self) -> u32 {
        self.padding.bytes + self.size.bytes
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.symbol == SYM_ERROR
    }

    #[must_use]
    pub fn is_fragile(&self) -> bool {
        self.fragile_left || self.fragile_right || self.total_bytes() == 0
    }
}

impl SubtreePool {
    pub fn retain(&mut self, id: SubtreeId) {
        let node = self.get_mut(id);
        debug_assert!(node.ref_count > 0);
        node.ref_count += 1;
    }

    /// Drop one reference; slots whose count reaches zero release their
    /// children and return to the slab. Iterative so that arbitrarily deep
    /// error trees cannot overflow the call stack.
    pub fn release(&mut self, id: SubtreeId) {
        let mut worklist: SmallVec<[SubtreeId; 16]> = SmallVec::new();
        worklist.push(id);
        while let Some(id) = worklist.pop() {
            let node = self.get_mut(id);
            debug_assert!(node.ref_count > 0);
            node.ref_count -= 1;
            if node.ref_count == 0 {
                worklist.extend(std::mem::take(&mut node.children));
                self.free_slot(id);
            }
        }
    }

    /// Create a terminal node. Visibility and naming come from the
    /// language's symbol metadata; the caller fills lexing details.
    pub fn make_leaf(
        &mut self,
        symbol: Symbol,
        padding: Length,
        size: Length,
        language: &Language,
    ) -> SubtreeId {
        let metadata = language.metadata(symbol);
        let visible = metadata.visible;
        let named = metadata.named;
        let id = self.allocate();
        let node = self.get_mut(id);
        node.symbol = symbol;
        node.padding = padding;
        node.size = size;
        node.visible = visible;
        node.named = named;
        node.first_leaf = FirstLeaf {
            symbol,
            lex_mode: LexMode::default(),
        };
        if symbol == SYM_ERROR {
            node.fragile_left = true;
            node.fragile_right = true;
            node.error_cost = size.chars * ERROR_COST_PER_SKIPPED_CHAR
                + size.extent.row * ERROR_COST_PER_SKIPPED_LINE;
        }
        id
    }

    /// Create an error leaf covering a run of skipped characters.
    pub fn make_error_leaf(
        &mut self,
        padding: Length,
        size: Length,
        first_character: Option<char>,
        language: &Language,
    ) -> SubtreeId {
        let id = self.make_leaf(SYM_ERROR, padding, size, language);
        self.get_mut(id).lookahead_char = first_character;
        id
    }

    /// Create an interior node over `children`, taking over one reference
    /// per child.
    pub fn make_node(
        &mut self,
        symbol: Symbol,
        children: Vec<SubtreeId>,
        alias_sequence_id: u16,
        language: &Language,
    ) -> SubtreeId {
        let metadata = language.metadata(symbol);
        let visible = metadata.visible;
        let named = metadata.named;
        let id = self.allocate();
        {
            let node = self.get_mut(id);
            node.symbol = symbol;
            node.visible = visible;
            node.named = named;
            node.alias_sequence_id = alias_sequence_id;
        }
        self.set_children(id, children, language);
        id
    }

    /// Create an ERROR node wrapping the trees skipped during recovery.
    pub fn make_error_node(&mut self, children: Vec<SubtreeId>, language: &Language) -> SubtreeId {
        let id = self.make_node(SYM_ERROR, children, 0, language);
        let node = self.get_mut(id);
        node.fragile_left = true;
        node.fragile_right = true;
        node.parse_state = STATE_NONE;
        id
    }

    /// Shallow copy; the copy holds fresh references to the same children.
    pub fn make_copy(&mut self, id: SubtreeId) -> SubtreeId {
        let mut data = self.get(id).clone();
        data.ref_count = 1;
        let children: SmallVec<[SubtreeId; 8]> = data.children.clone();
        let copy = self.allocate();
        *self.get_mut(copy) = data;
        for child in children {
            self.retain(child);
        }
        copy
    }

    /// Attach `children` to a node that has none yet, computing every
    /// aggregate the parser relies on: sizes, the lookahead envelope, error
    /// cost, dynamic precedence, visible/named counts (through the alias
    /// sequence), fragility, and `first_leaf`.
    fn set_children(&mut self, id: SubtreeId, children: Vec<SubtreeId>, language: &Language) {
        debug_assert!(self.get(id).children.is_empty());
        let symbol = self.get(id).symbol;
        let alias_sequence_id = self.get(id).alias_sequence_id;
        let alias_sequence: SmallVec<[Symbol; 8]> =
            language.alias_sequence(alias_sequence_id).iter().copied().collect();

        let mut padding = Length::zero();
        let mut size = Length::zero();
        let mut bytes_scanned = 0u32;
        let mut error_cost = 0u32;
        let mut dynamic_precedence = 0i32;
        let mut visible_child_count = 0u32;
        let mut named_child_count = 0u32;
        let mut has_external_tokens = false;
        let mut fragile_left = false;
        let mut fragile_right = false;
        let mut contains_error = false;
        let mut first_leaf: Option<FirstLeaf> = None;
        let mut structural_index = 0usize;
        let mut offset_bytes = 0u32;

        for (i, &child_id) in children.iter().enumerate() {
            let child = self.get(child_id);
            if i == 0 {
                padding = child.padding;
                size = child.size;
            } else {
                size = size.add(child.total_size());
            }
            bytes_scanned = bytes_scanned.max(offset_bytes + child.bytes_scanned);
            offset_bytes += child.total_bytes();
            error_cost += child.error_cost;
            dynamic_precedence += child.dynamic_precedence;
            if child.has_external_tokens {
                has_external_tokens = true;
            }
            if child.is_error() {
                contains_error = true;
            }

            let alias = if child.extra {
                None
            } else {
                alias_sequence.get(structural_index).copied().filter(|&s| s != 0)
            };
            if let Some(alias_symbol) = alias {
                visible_child_count += 1;
                if language.metadata(alias_symbol).named {
                    named_child_count += 1;
                }
            } else if child.visible {
                visible_child_count += 1;
                if child.named {
                    named_child_count += 1;
                }
            } else if child.child_count() > 0 {
                visible_child_count += child.visible_child_count;
                named_child_count += child.named_child_count;
            }

            if !child.extra {
                if first_leaf.is_none() {
                    first_leaf = Some(child.first_leaf);
                }
                structural_index += 1;
            }
        }

        if let Some(&first) = children.first() {
            if self.get(first).fragile_left {
                fragile_left = true;
            }
        }
        if let Some(&last) = children.last() {
            if self.get(last).fragile_right {
                fragile_right = true;
            }
        }

        if symbol == SYM_ERROR {
            error_cost += ERROR_COST_PER_RECOVERY
                + size.chars * ERROR_COST_PER_SKIPPED_CHAR
                + size.extent.row * ERROR_COST_PER_SKIPPED_LINE
                + visible_child_count * ERROR_COST_PER_SKIPPED_TREE;
        }

        let node = self.get_mut(id);
        node.children = SmallVec::from_vec(children);
        node.padding = padding;
        node.size = size;
        node.bytes_scanned = bytes_scanned;
        node.error_cost = error_cost;
        node.dynamic_precedence = dynamic_precedence;
        node.visible_child_count = visible_child_count;
        node.named_child_count = named_child_count;
        node.has_external_tokens = has_external_tokens;
        node.first_leaf = first_leaf.unwrap_or(FirstLeaf {
            symbol: node.symbol,
            lex_mode: LexMode::default(),
        });
        if fragile_left {
            node.fragile_left = true;
        }
        if fragile_right {
            node.fragile_right = true;
        }
        if contains_error {
            node.fragile_left = true;
            node.fragile_right = true;
            node.parse_state = STATE_NONE;
        }
    }

    /// Structural equality, ignoring identity and parse bookkeeping.
    #[must_use]
    pub fn eq(&self, a: SubtreeId, b: SubtreeId) -> bool {
        if a == b {
            return true;
        }
        let left = self.get(a);
        let right = self.get(b);
        if left.symbol != right.symbol
            || left.padding != right.padding
            || left.size != right.size
            || left.visible != right.visible
            || left.named != right.named
            || left.child_count() != right.child_count()
            || left.visible_child_count != right.visible_child_count
            || left.named_child_count != right.named_child_count
        {
            return false;
        }
        left.children
            .iter()
            .zip(right.children.iter())
            .all(|(&l, &r)| self.eq(l, r))
    }

    /// Total order used to break ties between otherwise equivalent parses.
    #[must_use]
    pub fn compare(&self, a: SubtreeId, b: SubtreeId) -> Ordering {
        let left = self.get(a);
        let right = self.get(b);
        match left.symbol.cmp(&right.symbol) {
            Ordering::Equal => {}
            other => return other,
        }
        match left.child_count().cmp(&right.child_count()) {
            Ordering::Equal => {}
            other => return other,
        }
        for (&l, &r) in left.children.iter().zip(right.children.iter()) {
            match self.compare(l, r) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Compare the serialized external-scanner states of two tokens.
    /// Absent tokens and empty states are interchangeable.
    #[must_use]
    pub fn external_token_state_eq(&self, a: Option<SubtreeId>, b: Option<SubtreeId>) -> bool {
        let state_of = |id: Option<SubtreeId>| -> &[u8] {
            id.and_then(|id| self.get(id).external_token_state.as_deref())
                .unwrap_or(&[])
        };
        state_of(a) == state_of(b)
    }

    /// The rightmost descendant that carries external-scanner state.
    #[must_use]
    pub fn last_external_token(&self, id: SubtreeId) -> Option<SubtreeId> {
        let mut current = id;
        if !self.get(current).has_external_tokens {
            return None;
        }
        while self.get(current).child_count() > 0 {
            let next = self
                .get(current)
                .children
                .iter()
                .rev()
                .copied()
                .find(|&child| self.get(child).has_external_tokens);
            match next {
                Some(child) => current = child,
                None => break,
            }
        }
        Some(current)
    }

    /// Split trailing extras off a popped tree list, preserving order.
    #[must_use]
    pub fn remove_trailing_extras(&self, trees: &mut Vec<SubtreeId>) -> Vec<SubtreeId> {
        let mut split = trees.len();
        while split > 0 && self.get(trees[split - 1]).extra {
            split -= 1;
        }
        trees.split_off(split)
    }

    /// Fill in `(parent, index, offset)` on every node reachable from
    /// `root`. Called once after acceptance; the reuse cursor depends on it.
    pub fn assign_parents(&mut self, root: SubtreeId) {
        let mut worklist: Vec<(SubtreeId, NodeContext)> =
            vec![(root, NodeContext::default())];
        while let Some((id, context)) = worklist.pop() {
            self.get_mut(id).context = context;
            let children = self.get(id).children.clone();
            let mut offset = context.offset;
            for (index, child) in children.into_iter().enumerate() {
                worklist.push((
                    child,
                    NodeContext {
                        parent: Some(id),
                        index: index as u32,
                        offset,
                    },
                ));
                offset = offset.add(self.get(child).total_size());
            }
        }
    }

    /// Apply a source edit to a finished tree, marking `has_changes` on
    /// every node whose lookahead envelope intersects the edit and
    /// rewriting padding/size along the path. The tree must not be shared
    /// with another live tree when edited.
    pub fn edit(&mut self, root: SubtreeId, edit: &InputEdit) {
        self.edit_at(root, edit);
    }

    fn edit_at(&mut self, id: SubtreeId, edit: &InputEdit) {
        let (total, padding, bytes_scanned) = {
            let node = self.get(id);
            (node.total_size(), node.padding, node.bytes_scanned)
        };
        if edit.start.bytes >= total.bytes.max(bytes_scanned) {
            return;
        }

        let new_padding = adjust_position(padding, edit);
        let new_total = adjust_position(total, edit);
        {
            let node = self.get_mut(id);
            node.has_changes = true;
            node.padding = new_padding;
            node.size = new_total.sub(new_padding);
        }

        let children: SmallVec<[(SubtreeId, Length, u32); 8]> = self
            .get(id)
            .children
            .iter()
            .map(|&child| {
                let data = self.get(child);
                (child, data.total_size(), data.bytes_scanned)
            })
            .collect();

        let mut child_start = Length::zero();
        let mut found_absorber = false;
        for (child, child_total, child_scanned) in children {
            if child_start.bytes > edit.old_end.bytes {
                break;
            }
            let reach = child_total.bytes.max(child_scanned);
            let child_end = child_start.bytes + child_total.bytes;
            if edit.start.bytes < child_start.bytes + reach {
                let rel_start = edit.start.sub(child_start);
                let rel_old_end = edit.old_end.sub(child_start).min(child_total);
                // Exactly one child absorbs the inserted text: the first one
                // whose extent reaches the edit start. The rest only shrink.
                let rel_new_end = if !found_absorber && edit.start.bytes <= child_end {
                    found_absorber = true;
                    edit.new_end.sub(child_start)
                } else {
                    rel_start
                };
                self.edit_at(
                    child,
                    &InputEdit {
                        start: rel_start,
                        old_end: rel_old_end,
                        new_end: rel_new_end,
                    },
                );
            }
            child_start = child_start.add(child_total);
        }
    }
}

/// Shift a position through an edit: positions past the removed range move
/// by the edit delta, positions inside it collapse to the insertion end.
fn adjust_position(position: Length, edit: &InputEdit) -> Length {
    if position.bytes >= edit.old_end.bytes {
        edit.new_end.add(position.sub(edit.old_end))
    } else if position.bytes > edit.start.bytes {
        edit.new_end
    } else {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::grammar::paren_language;
    use crate::text::measure;

    fn leaf(
        pool: &mut SubtreePool,
        language: &Language,
        symbol: Symbol,
        pad: &str,
        text: &str,
    ) -> SubtreeId {
        let id = pool.make_leaf(symbol, measure(pad), measure(text), language);
        pool.get_mut(id).bytes_scanned = (pad.len() + text.len()) as u32 + 1;
        id
    }

    #[test]
    fn leaf_aggregates_into_node() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let open = leaf(&mut pool, &language, 1, "", "(");
        let close = leaf(&mut pool, &language, 2, " ", ")");
        let node = pool.make_node(3, vec![open, close], 0, &language);

        let data = pool.get(node);
        assert_eq!(data.total_bytes(), 3);
        assert_eq!(data.size.bytes, 3);
        assert_eq!(data.padding.bytes, 0);
        assert_eq!(data.error_cost, 0);
        assert_eq!(data.first_leaf.symbol, 1);
        assert!(data.bytes_scanned >= data.total_bytes());

        pool.release(node);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn error_node_is_fragile_and_costed() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let skipped = leaf(&mut pool, &language, 1, "", "(");
        let error = pool.make_error_node(vec![skipped], &language);
        let data = pool.get(error);
        assert!(data.fragile_left && data.fragile_right);
        assert_eq!(data.parse_state, STATE_NONE);
        assert!(data.error_cost >= ERROR_COST_PER_RECOVERY);
        pool.release(error);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn make_copy_shares_children() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let open = leaf(&mut pool, &language, 1, "", "(");
        let node = pool.make_node(3, vec![open], 0, &language);
        let copy = pool.make_copy(node);
        assert!(pool.eq(node, copy));
        assert_eq!(pool.get(open).ref_count, 2);
        pool.release(node);
        pool.release(copy);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn edit_marks_changes_and_rewrites_sizes() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let open = leaf(&mut pool, &language, 1, "", "(");
        let close = leaf(&mut pool, &language, 2, "", ")");
        let node = pool.make_node(3, vec![open, close], 0, &language);
        pool.assign_parents(node);

        // Insert two characters between the parentheses.
        let edit = InputEdit {
            start: measure("("),
            old_end: measure("("),
            new_end: measure("(ab"),
        };
        pool.edit(node, &edit);

        let data = pool.get(node);
        assert!(data.has_changes);
        assert_eq!(data.total_bytes(), 4);
        let children_total: u32 = data
            .children
            .iter()
            .map(|&c| pool.get(c).total_bytes())
            .sum();
        assert_eq!(children_total, 4);

        pool.release(node);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn compare_orders_by_symbol_then_structure() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let a = leaf(&mut pool, &language, 1, "", "(");
        let b = leaf(&mut pool, &language, 2, "", ")");
        assert_eq!(pool.compare(a, b), Ordering::Less);
        assert_eq!(pool.compare(a, a), Ordering::Equal);
        pool.release(a);
        pool.release(b);
    }
}
