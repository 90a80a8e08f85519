//! Cursor over a previous tree, walked in byte order during incremental
//! parsing. Non-owning: the previous tree outlives the cursor.

use super::{SubtreeId, SubtreePool};

/// Tracks a position in the old tree, the byte offset of that position, and
/// the external-scanner state in effect just before it.
#[derive(Debug, Clone, Copy)]
pub struct ReuseCursor {
    node: Option<SubtreeId>,
    byte_index: u32,
    last_external_token: Option<SubtreeId>,
}

impl ReuseCursor {
    #[must_use]
    pub fn new(root: Option<SubtreeId>) -> Self {
        Self {
            node: root,
            byte_index: 0,
            last_external_token: None,
        }
    }

    #[must_use]
    pub const fn node(&self) -> Option<SubtreeId> {
        self.node
    }

    #[must_use]
    pub const fn byte_index(&self) -> u32 {
        self.byte_index
    }

    #[must_use]
    pub const fn last_external_token(&self) -> Option<SubtreeId> {
        self.last_external_token
    }

    /// Skip the current subtree entirely, advancing to the next sibling or
    /// unwinding to the next aunt.
    pub fn pop(&mut self, pool: &SubtreePool) {
        let Some(mut current) = self.node else { return };
        self.byte_index += pool.get(current).total_bytes();
        if pool.get(current).has_external_tokens {
            self.last_external_token = pool.last_external_token(current);
        }

        loop {
            let context = pool.get(current).context;
            let Some(parent) = context.parent else {
                self.node = None;
                return;
            };
            let siblings = &pool.get(parent).children;
            if let Some(&next) = siblings.get(context.index as usize + 1) {
                self.node = Some(next);
                return;
            }
            current = parent;
        }
    }

    /// Descend one level to the current node's first child. Fails on leaves.
    pub fn breakdown(&mut self, pool: &SubtreePool) -> bool {
        match self.node.and_then(|id| pool.get(id).children.first().copied()) {
            Some(child) => {
                self.node = Some(child);
                true
            }
            None => false,
        }
    }

    /// Skip only the first leaf of the current subtree.
    pub fn pop_leaf(&mut self, pool: &SubtreePool) {
        while self.breakdown(pool) {}
        self.pop(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::grammar::paren_language;
    use crate::text::measure;

    #[test]
    fn cursor_walks_leaves_in_byte_order() {
        let language = paren_language();
        let mut pool = SubtreePool::new();
        let open = pool.make_leaf(1, measure(""), measure("("), &language);
        let inner_open = pool.make_leaf(1, measure(""), measure("("), &language);
        let inner_close = pool.make_leaf(2, measure(""), measure(")"), &language);
        let inner = pool.make_node(3, vec![inner_open, inner_close], 0, &language);
        let close = pool.make_leaf(2, measure(""), measure(")"), &language);
        let root = pool.make_node(3, vec![open, inner, close], 0, &language);
        pool.assign_parents(root);

        let mut cursor = ReuseCursor::new(Some(root));
        assert!(cursor.breakdown(&pool));
        assert_eq!(cursor.node(), Some(open));
        cursor.pop(&pool);
        assert_eq!(cursor.node(), Some(inner));
        assert_eq!(cursor.byte_index(), 1);
        cursor.pop_leaf(&pool);
        assert_eq!(cursor.node(), Some(inner_close));
        assert_eq!(cursor.byte_index(), 2);
        cursor.pop(&pool);
        assert_eq!(cursor.node(), Some(close));
        cursor.pop(&pool);
        assert_eq!(cursor.node(), None);
        assert_eq!(cursor.byte_index(), 4);

        pool.release(root);
        assert_eq!(pool.live_count(), 0);
    }
}
