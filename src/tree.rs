//! Flattens a comment tree held in flat keyed storage into a depth-annotated
//! list, and navigates that list by depth alone.
//!
//! Descendant counts: an expanded node counts every child id beneath it
//! (`CountScope::Subtree`); a collapsed node only counts its direct child ids
//! (`CountScope::ImmediateChildren`) and its subtree is never visited. An
//! expanded ancestor of a collapsed node therefore includes only that node's
//! direct replies in its own total and is marked `CountScope::Partial`.

use std::collections::{HashMap, HashSet};

use crate::cache::Cache;
use crate::models::{CountScope, FlatComment, Item, ItemId, ItemKind};

/// Where the flattener reads items from. Must not touch the network.
pub trait ItemLookup {
    fn lookup(&self, id: ItemId) -> Option<Item>;
}

impl ItemLookup for Cache {
    // Stale entries are still worth showing
    fn lookup(&self, id: ItemId) -> Option<Item> {
        self.get_item(id).map(|hit| hit.value)
    }
}

impl ItemLookup for HashMap<ItemId, Item> {
    fn lookup(&self, id: ItemId) -> Option<Item> {
        self.get(&id).cloned()
    }
}

/// Ids of folded comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseState {
    collapsed: HashSet<ItemId>,
}

impl CollapseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_collapsed(&self, id: ItemId) -> bool {
        self.collapsed.contains(&id)
    }

    /// Returns the new state of `id`.
    pub fn toggle(&mut self, id: ItemId) -> bool {
        if !self.collapsed.remove(&id) {
            self.collapsed.insert(id);
            return true;
        }
        false
    }

    pub fn collapse(&mut self, id: ItemId) {
        self.collapsed.insert(id);
    }

    pub fn expand(&mut self, id: ItemId) {
        self.collapsed.remove(&id);
    }

    /// Folds every top-level entry of a flattened list.
    pub fn collapse_top_level(&mut self, comments: &[FlatComment]) {
        let top = comments.iter().map(|c| c.depth).min().unwrap_or(0);
        for comment in comments.iter().filter(|c| c.depth == top) {
            self.collapsed.insert(comment.item.id);
        }
    }

    pub fn clear(&mut self) {
        self.collapsed.clear();
    }
}

impl FromIterator<ItemId> for CollapseState {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        Self {
            collapsed: iter.into_iter().collect(),
        }
    }
}

struct Flattener<'a, L: ItemLookup + ?Sized> {
    lookup: &'a L,
    collapse: &'a CollapseState,
    original_poster: &'a str,
    visited: HashSet<ItemId>,
    out: Vec<FlatComment>,
}

impl<L: ItemLookup + ?Sized> Flattener<'_, L> {
    // Emits `id` and its expanded subtree in pre-order; returns its descendant count
    fn visit(&mut self, id: ItemId, depth: usize) -> Option<(usize, CountScope)> {
        // Guards against an id showing up twice, including cycles in bad data
        if !self.visited.insert(id) {
            return None;
        }
        let item = self.lookup.lookup(id)?;

        let is_collapsed = self.collapse.is_collapsed(id);
        let is_original_poster =
            !self.original_poster.is_empty() && item.author == self.original_poster;
        let children = item.children.clone();

        let slot = self.out.len();
        self.out.push(FlatComment {
            item,
            depth,
            is_collapsed,
            descendant_count: 0,
            count_scope: CountScope::ImmediateChildren,
            is_original_poster,
        });

        let (count, scope) = if is_collapsed {
            (children.len(), CountScope::ImmediateChildren)
        } else {
            self.visit_children(&children, depth + 1)
        };
        self.out[slot].descendant_count = count;
        self.out[slot].count_scope = scope;
        Some((count, scope))
    }

    // Each child id counts once, plus whatever it reports below itself
    fn visit_children(&mut self, children: &[ItemId], depth: usize) -> (usize, CountScope) {
        let mut count = 0;
        let mut scope = CountScope::Subtree;
        for &child in children {
            count += 1;
            if let Some((below, child_scope)) = self.visit(child, depth) {
                count += below;
                if child_scope != CountScope::Subtree {
                    scope = CountScope::Partial;
                }
            }
        }
        (count, scope)
    }
}

/// Depth-first pre-order over `root_children`, roots at depth 0. Items the
/// lookup cannot find are left out along with their subtrees.
pub fn flatten<L: ItemLookup + ?Sized>(
    lookup: &L,
    root_children: &[ItemId],
    original_poster: &str,
    collapse: &CollapseState,
) -> Vec<FlatComment> {
    let mut flattener = Flattener {
        lookup,
        collapse,
        original_poster,
        visited: HashSet::new(),
        out: Vec::new(),
    };
    for &id in root_children {
        flattener.visit(id, 0);
    }
    flattener.out
}

/// Flattens the discussion under `root`. A comment root is itself the first
/// entry at depth 0 with its replies from depth 1; a story's replies start at 0.
pub fn flatten_thread<L: ItemLookup + ?Sized>(
    lookup: &L,
    root: &Item,
    collapse: &CollapseState,
) -> Vec<FlatComment> {
    if root.kind != ItemKind::Comment {
        return flatten(lookup, &root.children, &root.author, collapse);
    }

    let mut flattener = Flattener {
        lookup,
        collapse,
        original_poster: &root.author,
        visited: HashSet::new(),
        out: Vec::new(),
    };
    flattener.visited.insert(root.id);

    let is_collapsed = collapse.is_collapsed(root.id);
    flattener.out.push(FlatComment {
        item: root.clone(),
        depth: 0,
        is_collapsed,
        descendant_count: 0,
        count_scope: CountScope::ImmediateChildren,
        is_original_poster: false,
    });
    let (count, scope) = if is_collapsed {
        (root.children.len(), CountScope::ImmediateChildren)
    } else {
        flattener.visit_children(&root.children, 1)
    };
    flattener.out[0].descendant_count = count;
    flattener.out[0].count_scope = scope;
    flattener.out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLookup {
    Found(usize),
    /// The entry has no parent at all.
    IsRoot,
    /// The parent exists but is outside the flattened list.
    NotLoaded(ItemId),
}

/// `None` when `index` is out of range.
pub fn find_parent(comments: &[FlatComment], index: usize) -> Option<ParentLookup> {
    let current = comments.get(index)?;
    let parent_id = current.item.parent_id;
    if parent_id == 0 {
        return Some(ParentLookup::IsRoot);
    }
    let found = comments[..index]
        .iter()
        .rposition(|c| c.item.id == parent_id)
        .map(ParentLookup::Found)
        .unwrap_or(ParentLookup::NotLoaded(parent_id));
    Some(found)
}

pub fn find_next_sibling(comments: &[FlatComment], index: usize) -> Option<usize> {
    let depth = comments.get(index)?.depth;
    for (offset, comment) in comments[index + 1..].iter().enumerate() {
        if comment.depth < depth {
            return None;
        }
        if comment.depth == depth {
            return Some(index + 1 + offset);
        }
    }
    None
}
