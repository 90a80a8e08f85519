//! The graph-structured parse stack.
//!
//! The stack is a DAG of refcounted nodes; a *version* is a head pointer
//! into it. Versions fork when a pop re-reveals a shared prefix and collapse
//! again through merging, so memory stays proportional to the divergent
//! suffixes. Popping walks the DAG breadth-first and reports one *slice*
//! per revealed prefix.

use smallvec::SmallVec;

use crate::language::{StateId, ERROR_STATE, START_STATE};
use crate::text::Length;
use crate::tree::{SubtreeId, SubtreePool, ERROR_COST_PER_RECOVERY};

const MAX_LINK_COUNT: usize = 8;
const MAX_ITERATOR_COUNT: usize = 64;

/// Index of a live stack version. Versions are renumbered as they are
/// removed, exactly like the head array they index.
pub type StackVersion = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackNodeId(u32);

#[derive(Debug, Clone, Copy)]
struct StackLink {
    prev: StackNodeId,
    /// `None` marks the error-recovery discontinuity.
    subtree: Option<SubtreeId>,
    is_pending: bool,
}

#[derive(Debug)]
struct StackNodeData {
    state: StateId,
    position: Length,
    error_cost: u32,
    ref_count: u32,
    links: SmallVec<[StackLink; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionStatus {
    Active,
    Halted,
}

/// One `(position, depth, state)` sample recorded while a version moves
/// through non-error states; recovery scans these for a resume state.
#[derive(Debug, Clone, Copy)]
pub struct SummaryEntry {
    pub position: Length,
    pub depth: u32,
    pub state: StateId,
}

#[derive(Debug)]
struct StackHead {
    node: StackNodeId,
    status: VersionStatus,
    last_external_token: Option<SubtreeId>,
    summary: Option<Vec<SummaryEntry>>,
    push_count: u32,
}

/// A `(version, trees)` pair produced by popping. The trees are ordered
/// bottom-up and the caller owns one reference to each.
#[derive(Debug)]
pub struct StackSlice {
    pub version: StackVersion,
    pub trees: Vec<SubtreeId>,
}

/// What the iteration callback wants done at the current node.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackAction {
    pub stop: bool,
    pub pop: bool,
}

/// The callback's view of one point along a spine walk.
pub struct StackIteration<'a> {
    pub state: StateId,
    pub position: Length,
    /// Trees collected so far, top-down.
    pub trees: &'a [SubtreeId],
    /// Non-extra trees (and discontinuities) crossed so far.
    pub depth: u32,
    pub is_pending: bool,
    pub link_count: usize,
}

struct StackIter {
    node: StackNodeId,
    trees: Vec<SubtreeId>,
    depth: u32,
    is_pending: bool,
}

pub struct Stack {
    nodes: Vec<StackNodeData>,
    free_nodes: Vec<StackNodeId>,
    heads: Vec<StackHead>,
    base_node: StackNodeId,
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        let mut stack = Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            heads: Vec::new(),
            base_node: StackNodeId(0),
        };
        stack.base_node = stack.alloc_node(StackNodeData {
            state: START_STATE,
            position: Length::zero(),
            error_cost: 0,
            ref_count: 1,
            links: SmallVec::new(),
        });
        stack.heads.push(StackHead {
            node: stack.base_node,
            status: VersionStatus::Active,
            last_external_token: None,
            summary: None,
            push_count: 0,
        });
        // The base node's initial reference belongs to the stack itself so
        // clearing can always rebuild version 0.
        stack.retain_node(stack.base_node);
        stack
    }

    // ------------------------------------------------------------------
    // node arena
    // ------------------------------------------------------------------

    fn alloc_node(&mut self, data: StackNodeData) -> StackNodeId {
        if let Some(id) = self.free_nodes.pop() {
            self.nodes[id.0 as usize] = data;
            id
        } else {
            self.nodes.push(data);
            StackNodeId((self.nodes.len() - 1) as u32)
        }
    }

    fn node(&self, id: StackNodeId) -> &StackNodeData {
        &self.nodes[id.0 as usize]
    }

    fn retain_node(&mut self, id: StackNodeId) {
        let node = &mut self.nodes[id.0 as usize];
        debug_assert!(node.ref_count > 0);
        node.ref_count += 1;
    }

    fn release_node(&mut self, pool: &mut SubtreePool, id: StackNodeId) {
        let mut worklist: SmallVec<[StackNodeId; 8]> = SmallVec::new();
        worklist.push(id);
        while let Some(id) = worklist.pop() {
            let node = &mut self.nodes[id.0 as usize];
            debug_assert!(node.ref_count > 0);
            node.ref_count -= 1;
            if node.ref_count == 0 {
                let links = std::mem::take(&mut node.links);
                for link in links {
                    if let Some(subtree) = link.subtree {
                        pool.release(subtree);
                    }
                    worklist.push(link.prev);
                }
                self.free_nodes.push(id);
            }
        }
    }

    /// Create a successor node. Takes over the caller's reference on
    /// `prev` and adds its own reference to `subtree`.
    fn new_node(
        &mut self,
        pool: &mut SubtreePool,
        prev: StackNodeId,
        subtree: Option<SubtreeId>,
        is_pending: bool,
        state: StateId,
    ) -> StackNodeId {
        let prev_data = self.node(prev);
        let mut position = prev_data.position;
        let mut error_cost = prev_data.error_cost;
        if let Some(subtree) = subtree {
            pool.retain(subtree);
            let tree = pool.get(subtree);
            position = position.add(tree.total_size());
            error_cost += tree.error_cost;
        }
        self.alloc_node(StackNodeData {
            state,
            position,
            error_cost,
            ref_count: 1,
            links: SmallVec::from_elem(
                StackLink {
                    prev,
                    subtree,
                    is_pending,
                },
                1,
            ),
        })
    }

    // ------------------------------------------------------------------
    // version accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn version_count(&self) -> usize {
        self.heads.len()
    }

    #[must_use]
    pub fn top_state(&self, version: StackVersion) -> StateId {
        self.node(self.heads[version].node).state
    }

    #[must_use]
    pub fn top_position(&self, version: StackVersion) -> Length {
        self.node(self.heads[version].node).position
    }

    /// Error cost along the spine plus the open-recovery penalty.
    #[must_use]
    pub fn error_cost(&self, version: StackVersion) -> u32 {
        let node = self.node(self.heads[version].node);
        let mut cost = node.error_cost;
        if node.state == ERROR_STATE {
            cost += ERROR_COST_PER_RECOVERY;
        }
        cost
    }

    #[must_use]
    pub fn push_count(&self, version: StackVersion) -> u32 {
        self.heads[version].push_count
    }

    pub fn decrease_push_count(&mut self, version: StackVersion, count: u32) {
        let head = &mut self.heads[version];
        head.push_count = head.push_count.saturating_sub(count);
    }

    #[must_use]
    pub fn last_external_token(&self, version: StackVersion) -> Option<SubtreeId> {
        self.heads[version].last_external_token
    }

    pub fn set_last_external_token(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        token: Option<SubtreeId>,
    ) {
        if let Some(token) = token {
            pool.retain(token);
        }
        if let Some(previous) = self.heads[version].last_external_token.take() {
            pool.release(previous);
        }
        self.heads[version].last_external_token = token;
    }

    /// Number of non-extra links above the most recent discontinuity.
    #[must_use]
    pub fn depth_since_error(&self, pool: &SubtreePool, version: StackVersion) -> u32 {
        let mut node = self.node(self.heads[version].node);
        let mut depth = 0;
        while let Some(link) = node.links.first() {
            match link.subtree {
                Some(subtree) => {
                    if !pool.get(subtree).extra {
                        depth += 1;
                    }
                }
                None => break,
            }
            node = self.node(link.prev);
        }
        depth
    }

    pub fn halt(&mut self, version: StackVersion) {
        self.heads[version].status = VersionStatus::Halted;
    }

    #[must_use]
    pub fn is_halted(&self, version: StackVersion) -> bool {
        self.heads[version].status == VersionStatus::Halted
    }

    #[must_use]
    pub fn is_active(&self, version: StackVersion) -> bool {
        self.heads[version].status == VersionStatus::Active
    }

    // ------------------------------------------------------------------
    // pushing and popping
    // ------------------------------------------------------------------

    /// Append one link to a version. `None` pushes the error-recovery
    /// discontinuity, which also resets the version's push count.
    pub fn push(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        subtree: Option<SubtreeId>,
        is_pending: bool,
        state: StateId,
    ) {
        let prev = self.heads[version].node;
        let node = self.new_node(pool, prev, subtree, is_pending, state);
        let head = &mut self.heads[version];
        head.node = node;
        if subtree.is_none() {
            head.push_count = 0;
        } else {
            head.push_count += 1;
        }
    }

    /// Remove `count` non-extra trees, revealing one slice per distinct
    /// shared prefix. The original head is left in place; the caller
    /// renumbers a slice version over it once it picks a survivor.
    pub fn pop_count(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        count: u32,
    ) -> Vec<StackSlice> {
        self.iterate_internal(pool, version, true, &mut |_, iteration| StackAction {
            stop: iteration.depth == count,
            pop: iteration.depth == count,
        })
    }

    /// Pop the top link while it is pending (carries a breakable interior
    /// tree). The revealed slice is renumbered onto `version`.
    pub fn pop_pending(&mut self, pool: &mut SubtreePool, version: StackVersion) -> Vec<StackSlice> {
        let mut slices = self.iterate_internal(pool, version, true, &mut |_, iteration| {
            if iteration.depth >= 1 {
                StackAction {
                    stop: true,
                    pop: iteration.is_pending,
                }
            } else {
                StackAction::default()
            }
        });
        if let Some(first) = slices.first_mut() {
            let slice_version = first.version;
            self.renumber_version(pool, slice_version, version);
            first.version = version;
        }
        slices
    }

    /// Pop one link if it carries a finished error subtree. Returns the
    /// popped trees; the revealed version replaces `version`.
    pub fn pop_error(&mut self, pool: &mut SubtreePool, version: StackVersion) -> Vec<SubtreeId> {
        let head_node = self.heads[version].node;
        let has_error_link = self
            .node(head_node)
            .links
            .iter()
            .any(|link| link.subtree.is_some_and(|s| pool.get(s).is_error()));
        if !has_error_link {
            return Vec::new();
        }

        let mut found_error = false;
        let mut slices = self.iterate_internal(pool, version, true, &mut |pool, iteration| {
            if iteration.trees.is_empty() {
                return StackAction::default();
            }
            if !found_error && pool.get(iteration.trees[0]).is_error() {
                found_error = true;
                StackAction { stop: true, pop: true }
            } else {
                StackAction { stop: true, pop: false }
            }
        });
        if slices.is_empty() {
            return Vec::new();
        }
        debug_assert_eq!(slices.len(), 1);
        let slice = slices.swap_remove(0);
        self.renumber_version(pool, slice.version, version);
        slice.trees
    }

    /// Pop every link; used at acceptance.
    pub fn pop_all(&mut self, pool: &mut SubtreePool, version: StackVersion) -> Vec<StackSlice> {
        self.iterate_internal(pool, version, true, &mut |_, iteration| StackAction {
            stop: false,
            pop: iteration.link_count == 0,
        })
    }

    /// Walk backwards from a version without collecting trees.
    pub fn iterate(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        callback: &mut dyn FnMut(&SubtreePool, &StackIteration) -> StackAction,
    ) -> Vec<StackSlice> {
        self.iterate_internal(pool, version, true, callback)
    }

    /// Capture a bounded trail of `(position, depth, state)` entries.
    pub fn record_summary(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        max_depth: u32,
    ) {
        let mut summary: Vec<SummaryEntry> = Vec::new();
        self.iterate_internal(pool, version, false, &mut |_, iteration| {
            if iteration.depth > max_depth {
                return StackAction { stop: true, pop: false };
            }
            for entry in summary.iter().rev() {
                if entry.depth < iteration.depth {
                    break;
                }
                if entry.depth == iteration.depth && entry.state == iteration.state {
                    return StackAction::default();
                }
            }
            summary.push(SummaryEntry {
                position: iteration.position,
                depth: iteration.depth,
                state: iteration.state,
            });
            StackAction::default()
        });
        self.heads[version].summary = Some(summary);
    }

    #[must_use]
    pub fn get_summary(&self, version: StackVersion) -> Option<&[SummaryEntry]> {
        self.heads[version].summary.as_deref()
    }

    // ------------------------------------------------------------------
    // version management
    // ------------------------------------------------------------------

    #[must_use]
    pub fn can_merge(&self, pool: &SubtreePool, v1: StackVersion, v2: StackVersion) -> bool {
        let head1 = &self.heads[v1];
        let head2 = &self.heads[v2];
        let node1 = self.node(head1.node);
        let node2 = self.node(head2.node);
        head1.status == VersionStatus::Active
            && head2.status == VersionStatus::Active
            && node1.state == node2.state
            && node1.position.bytes == node2.position.bytes
            && node1.error_cost == node2.error_cost
            && pool.external_token_state_eq(head1.last_external_token, head2.last_external_token)
    }

    pub fn merge(&mut self, pool: &mut SubtreePool, v1: StackVersion, v2: StackVersion) -> bool {
        if !self.can_merge(pool, v1, v2) {
            return false;
        }
        self.force_merge(pool, v1, v2);
        true
    }

    /// Merge `v2` into `v1` by grafting its head's incoming links, whether
    /// or not the heads are equivalent.
    pub fn force_merge(&mut self, pool: &mut SubtreePool, v1: StackVersion, v2: StackVersion) {
        let target = self.heads[v1].node;
        let links: SmallVec<[StackLink; 2]> = self.node(self.heads[v2].node).links.clone();
        for link in links {
            self.add_link(pool, target, link);
        }
        self.remove_version(pool, v2);
    }

    pub fn remove_version(&mut self, pool: &mut SubtreePool, version: StackVersion) {
        let head = self.heads.remove(version);
        self.release_head(pool, head);
    }

    /// Move version `v1` into slot `v2` (which must be lower), discarding
    /// what `v2` held.
    pub fn renumber_version(&mut self, pool: &mut SubtreePool, v1: StackVersion, v2: StackVersion) {
        if v1 == v2 {
            return;
        }
        debug_assert!(v2 < v1);
        let mut source = self.heads.remove(v1);
        if source.summary.is_none() {
            source.summary = self.heads[v2].summary.take();
        }
        let target = std::mem::replace(&mut self.heads[v2], source);
        self.release_head(pool, target);
    }

    pub fn swap_versions(&mut self, v1: StackVersion, v2: StackVersion) {
        self.heads.swap(v1, v2);
    }

    pub fn copy_version(&mut self, pool: &mut SubtreePool, version: StackVersion) -> StackVersion {
        let node = self.heads[version].node;
        let last_external_token = self.heads[version].last_external_token;
        let push_count = self.heads[version].push_count;
        self.retain_node(node);
        if let Some(token) = last_external_token {
            pool.retain(token);
        }
        self.heads.push(StackHead {
            node,
            status: VersionStatus::Active,
            last_external_token,
            summary: None,
            push_count,
        });
        self.heads.len() - 1
    }

    /// Reset to a single version at the initial state.
    pub fn clear(&mut self, pool: &mut SubtreePool) {
        self.retain_node(self.base_node);
        let heads = std::mem::take(&mut self.heads);
        for head in heads {
            self.release_head(pool, head);
        }
        self.heads.push(StackHead {
            node: self.base_node,
            status: VersionStatus::Active,
            last_external_token: None,
            summary: None,
            push_count: 0,
        });
    }

    fn release_head(&mut self, pool: &mut SubtreePool, head: StackHead) {
        if let Some(token) = head.last_external_token {
            pool.release(token);
        }
        self.release_node(pool, head.node);
    }

    // ------------------------------------------------------------------
    // link merging
    // ------------------------------------------------------------------

    fn add_link(&mut self, pool: &mut SubtreePool, node_id: StackNodeId, link: StackLink) {
        if link.prev == node_id {
            return;
        }

        let existing_links: SmallVec<[StackLink; 2]> = self.node(node_id).links.clone();
        for (i, existing) in existing_links.iter().enumerate() {
            if !subtree_equivalent(pool, existing.subtree, link.subtree) {
                continue;
            }
            if existing.prev == link.prev {
                // Same edge; keep whichever subtree carries more dynamic
                // precedence.
                if let (Some(new_tree), Some(old_tree)) = (link.subtree, existing.subtree) {
                    if pool.get(new_tree).dynamic_precedence > pool.get(old_tree).dynamic_precedence
                    {
                        pool.retain(new_tree);
                        pool.release(old_tree);
                        self.nodes[node_id.0 as usize].links[i].subtree = Some(new_tree);
                    }
                }
                return;
            }
            let existing_prev = self.node(existing.prev);
            let link_prev = self.node(link.prev);
            if existing_prev.state == link_prev.state
                && existing_prev.position.bytes == link_prev.position.bytes
                && existing_prev.error_cost == link_prev.error_cost
            {
                // Equivalent predecessors; merge their histories instead of
                // growing the fan-in.
                let nested: SmallVec<[StackLink; 2]> = link_prev.links.clone();
                let target = existing.prev;
                for nested_link in nested {
                    self.add_link(pool, target, nested_link);
                }
                return;
            }
        }

        if self.node(node_id).links.len() >= MAX_LINK_COUNT {
            return;
        }
        self.retain_node(link.prev);
        if let Some(subtree) = link.subtree {
            pool.retain(subtree);
        }
        self.nodes[node_id.0 as usize].links.push(link);
    }

    // ------------------------------------------------------------------
    // spine iteration
    // ------------------------------------------------------------------

    fn iterate_internal(
        &mut self,
        pool: &mut SubtreePool,
        version: StackVersion,
        include_trees: bool,
        callback: &mut dyn FnMut(&SubtreePool, &StackIteration) -> StackAction,
    ) -> Vec<StackSlice> {
        let mut slices: Vec<StackSlice> = Vec::new();
        let mut iterators = vec![StackIter {
            node: self.heads[version].node,
            trees: Vec::new(),
            depth: 0,
            is_pending: true,
        }];

        while !iterators.is_empty() {
            let mut next_round = Vec::with_capacity(iterators.len());
            for mut iterator in iterators {
                let (state, position, links) = {
                    let node = self.node(iterator.node);
                    (node.state, node.position, node.links.clone())
                };
                let action = callback(
                    pool,
                    &StackIteration {
                        state,
                        position,
                        trees: &iterator.trees,
                        depth: iterator.depth,
                        is_pending: iterator.is_pending,
                        link_count: links.len(),
                    },
                );
                let should_stop = action.stop || links.is_empty();

                if action.pop {
                    let mut trees = if should_stop {
                        std::mem::take(&mut iterator.trees)
                    } else {
                        for &tree in &iterator.trees {
                            pool.retain(tree);
                        }
                        iterator.trees.clone()
                    };
                    trees.reverse();
                    self.add_slice(pool, version, iterator.node, trees, &mut slices);
                }

                if should_stop {
                    for tree in iterator.trees.drain(..) {
                        pool.release(tree);
                    }
                    continue;
                }

                for (j, link) in links.iter().enumerate() {
                    let mut next = if j + 1 == links.len() {
                        std::mem::replace(
                            &mut iterator,
                            StackIter {
                                node: link.prev,
                                trees: Vec::new(),
                                depth: 0,
                                is_pending: false,
                            },
                        )
                    } else {
                        if next_round.len() >= MAX_ITERATOR_COUNT {
                            continue;
                        }
                        for &tree in &iterator.trees {
                            pool.retain(tree);
                        }
                        StackIter {
                            node: iterator.node,
                            trees: iterator.trees.clone(),
                            depth: iterator.depth,
                            is_pending: iterator.is_pending,
                        }
                    };

                    next.node = link.prev;
                    match link.subtree {
                        Some(subtree) => {
                            if include_trees {
                                pool.retain(subtree);
                                next.trees.push(subtree);
                            }
                            if !pool.get(subtree).extra {
                                next.depth += 1;
                                if !link.is_pending {
                                    next.is_pending = false;
                                }
                            }
                        }
                        None => {
                            next.depth += 1;
                            next.is_pending = false;
                        }
                    }
                    next_round.push(next);
                }
            }
            iterators = next_round;
        }

        slices
    }

    fn add_slice(
        &mut self,
        pool: &mut SubtreePool,
        original_version: StackVersion,
        node: StackNodeId,
        trees: Vec<SubtreeId>,
        slices: &mut Vec<StackSlice>,
    ) {
        for i in (0..slices.len()).rev() {
            let version = slices[i].version;
            if self.heads[version].node == node {
                slices.insert(i + 1, StackSlice { version, trees });
                return;
            }
        }
        let version = self.add_version(pool, original_version, node);
        slices.push(StackSlice { version, trees });
    }

    fn add_version(
        &mut self,
        pool: &mut SubtreePool,
        original_version: StackVersion,
        node: StackNodeId,
    ) -> StackVersion {
        let last_external_token = self.heads[original_version].last_external_token;
        let push_count = self.heads[original_version].push_count;
        self.retain_node(node);
        if let Some(token) = last_external_token {
            pool.retain(token);
        }
        self.heads.push(StackHead {
            node,
            status: VersionStatus::Active,
            last_external_token,
            summary: None,
            push_count,
        });
        self.heads.len() - 1
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// Two link subtrees are interchangeable when they cover the same range
/// with the same symbol (error trees compare loosely so that competing
/// recoveries can merge).
fn subtree_equivalent(pool: &SubtreePool, a: Option<SubtreeId>, b: Option<SubtreeId>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            if a == b {
                return true;
            }
            let left = pool.get(a);
            let right = pool.get(b);
            if left.symbol != right.symbol {
                return false;
            }
            if left.error_cost > 0 && right.error_cost > 0 {
                return true;
            }
            left.padding.bytes == right.padding.bytes
                && left.size.bytes == right.size.bytes
                && left.child_count() == right.child_count()
                && left.extra == right.extra
                && left.external_token_state == right.external_token_state
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::grammar::paren_language;
    use crate::text::measure;
    use crate::tree::SubtreePool;

    fn make_leaf(pool: &mut SubtreePool, text: &str) -> SubtreeId {
        let language = paren_language();
        pool.make_leaf(1, measure(""), measure(text), &language)
    }

    #[test]
    fn push_and_pop_round_trip() {
        let mut pool = SubtreePool::new();
        let mut stack = Stack::new();
        let a = make_leaf(&mut pool, "(");
        let b = make_leaf(&mut pool, "(");
        stack.push(&mut pool, 0, Some(a), false, 2);
        stack.push(&mut pool, 0, Some(b), false, 3);
        assert_eq!(stack.top_state(0), 3);
        assert_eq!(stack.top_position(0).bytes, 2);

        let slices = stack.pop_count(&mut pool, 0, 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].trees, vec![a, b]);
        assert_eq!(stack.top_state(slices[0].version), 0);

        for slice in slices {
            for tree in slice.trees {
                pool.release(tree);
            }
            stack.renumber_version(&mut pool, slice.version, 0);
        }
        pool.release(a);
        pool.release(b);
        stack.clear(&mut pool);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn merged_versions_fork_again_on_pop() {
        let mut pool = SubtreePool::new();
        let mut stack = Stack::new();
        let a = make_leaf(&mut pool, "(");
        let b = make_leaf(&mut pool, ")");

        let v1 = stack.copy_version(&mut pool, 0);
        stack.push(&mut pool, 0, Some(a), false, 5);
        stack.push(&mut pool, v1, Some(b), false, 5);
        assert!(stack.can_merge(&pool, 0, v1));
        assert!(stack.merge(&mut pool, 0, v1));
        assert_eq!(stack.version_count(), 1);

        // Popping through the merged head reveals both prefixes; they share
        // one revealed version because both end at the base node.
        let slices = stack.pop_count(&mut pool, 0, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].version, slices[1].version);
        let popped: Vec<_> = slices.iter().map(|s| s.trees[0]).collect();
        assert!(popped.contains(&a) && popped.contains(&b));

        let revealed = slices[0].version;
        for slice in slices {
            for tree in slice.trees {
                pool.release(tree);
            }
        }
        stack.remove_version(&mut pool, revealed);
        pool.release(a);
        pool.release(b);
        stack.clear(&mut pool);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn discontinuity_resets_push_count_and_costs_recovery() {
        let mut pool = SubtreePool::new();
        let mut stack = Stack::new();
        let a = make_leaf(&mut pool, "(");
        stack.push(&mut pool, 0, Some(a), false, 2);
        pool.release(a);
        assert_eq!(stack.push_count(0), 1);

        stack.push(&mut pool, 0, None, false, ERROR_STATE);
        assert_eq!(stack.push_count(0), 0);
        assert_eq!(stack.error_cost(0), ERROR_COST_PER_RECOVERY);
        assert_eq!(stack.depth_since_error(&pool, 0), 0);

        let b = make_leaf(&mut pool, "(");
        stack.push(&mut pool, 0, Some(b), false, ERROR_STATE);
        pool.release(b);
        assert_eq!(stack.depth_since_error(&pool, 0), 1);

        stack.clear(&mut pool);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn summary_records_states_up_to_depth() {
        let mut pool = SubtreePool::new();
        let mut stack = Stack::new();
        let a = make_leaf(&mut pool, "(");
        let b = make_leaf(&mut pool, "(");
        stack.push(&mut pool, 0, Some(a), false, 2);
        stack.push(&mut pool, 0, Some(b), false, 3);
        pool.release(a);
        pool.release(b);

        stack.record_summary(&mut pool, 0, 16);
        let summary = stack.get_summary(0).unwrap();
        let states: Vec<_> = summary.iter().map(|e| (e.depth, e.state)).collect();
        assert!(states.contains(&(0, 3)));
        assert!(states.contains(&(1, 2)));
        assert!(states.contains(&(2, 0)));

        stack.clear(&mut pool);
        assert_eq!(pool.live_count(), 0);
    }
}
