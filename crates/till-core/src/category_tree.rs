//! # Category Tree
//!
//! Categories are stored flat with a nullable `parent_id`. The tree is built
//! at read time from a single scan.
//!
//! ```text
//!   rows (any order)                     forest
//!   ─────────────────                    ──────────────────
//!   Drinks      parent=∅        ──►      Drinks
//!   Soda        parent=Drinks              ├── Soda
//!   Juice       parent=Drinks              └── Juice
//!   Snacks      parent=∅                 Snacks
//!   A parent=B, B parent=A      ──►      detached: [A, B]
//! ```
//!
//! Writes never check for cycles, so rows can form a loop. Such rows are
//! unreachable from any root; they are reported as `detached` instead of
//! being recursed into.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use ts_rs::TS;

use crate::types::Category;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CategoryForest {
    pub roots: Vec<CategoryNode>,
    /// Ids caught in a parent cycle (or hanging below one).
    pub detached: Vec<String>,
}

/// Builds the forest. Sibling order follows input order.
///
/// A category whose parent id is absent from `categories` is treated as a
/// root.
pub fn build_forest(categories: Vec<Category>) -> CategoryForest {
    let index: HashMap<&str, usize> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();

    for (i, category) in categories.iter().enumerate() {
        match category.parent_id.as_deref().and_then(|p| index.get(p)) {
            Some(&parent) => children.entry(parent).or_default().push(i),
            None => roots.push(i),
        }
    }

    let mut visited = HashSet::new();
    let root_nodes = roots
        .iter()
        .map(|&i| nest(i, &categories, &children, &mut visited))
        .collect();

    let detached = categories
        .iter()
        .enumerate()
        .filter(|(i, _)| !visited.contains(i))
        .map(|(_, c)| c.id.clone())
        .collect();

    CategoryForest {
        roots: root_nodes,
        detached,
    }
}

fn nest(
    at: usize,
    categories: &[Category],
    children: &HashMap<usize, Vec<usize>>,
    visited: &mut HashSet<usize>,
) -> CategoryNode {
    visited.insert(at);

    let kids = children
        .get(&at)
        .map(|kids| {
            kids.iter()
                .filter(|&&k| !visited.contains(&k))
                .copied()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    CategoryNode {
        category: categories[at].clone(),
        children: kids
            .into_iter()
            .map(|k| nest(k, categories, children, visited))
            .collect(),
    }
}

/// Whether re-parenting `id` under `new_parent` would close a loop.
///
/// Opt-in check for callers; the write path itself stays unchecked.
pub fn would_create_cycle(categories: &[Category], id: &str, new_parent: Option<&str>) -> bool {
    let parents: HashMap<&str, Option<&str>> = categories
        .iter()
        .map(|c| (c.id.as_str(), c.parent_id.as_deref()))
        .collect();

    let mut seen = HashSet::new();
    let mut cursor = new_parent;
    while let Some(current) = cursor {
        if current == id {
            return true;
        }
        if !seen.insert(current) {
            // Pre-existing loop that does not pass through `id`.
            return false;
        }
        cursor = parents.get(current).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, parent: Option<&str>) -> Category {
        Category {
            id: id.to_string(),
            company_id: crate::COMPANY_ID.to_string(),
            name: id.to_string(),
            description: None,
            parent_id: parent.map(str::to_string),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_builds_nested_forest() {
        let forest = build_forest(vec![
            category("soda", Some("drinks")),
            category("drinks", None),
            category("juice", Some("drinks")),
            category("snacks", None),
            category("cola", Some("soda")),
        ]);

        assert!(forest.detached.is_empty());
        assert_eq!(forest.roots.len(), 2);
        let drinks = &forest.roots[0];
        assert_eq!(drinks.category.id, "drinks");
        let kids: Vec<_> = drinks.children.iter().map(|n| n.category.id.as_str()).collect();
        assert_eq!(kids, vec!["soda", "juice"]);
        assert_eq!(drinks.children[0].children[0].category.id, "cola");
    }

    #[test]
    fn test_cycle_is_detached_not_recursed() {
        let forest = build_forest(vec![
            category("a", Some("b")),
            category("b", Some("a")),
            category("c", Some("a")),
            category("root", None),
        ]);

        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.detached, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let forest = build_forest(vec![category("orphan", Some("gone"))]);
        assert_eq!(forest.roots.len(), 1);
        assert!(forest.detached.is_empty());
    }

    #[test]
    fn test_would_create_cycle() {
        let rows = vec![
            category("drinks", None),
            category("soda", Some("drinks")),
            category("cola", Some("soda")),
        ];

        assert!(would_create_cycle(&rows, "drinks", Some("cola")));
        assert!(would_create_cycle(&rows, "soda", Some("soda")));
        assert!(!would_create_cycle(&rows, "cola", Some("drinks")));
        assert!(!would_create_cycle(&rows, "drinks", None));
    }
}
