//! # Composite Expansion
//!
//! Configurable, bundle and grouped products are containers. The remote
//! catalog only lists sellable leaves, so a mutation on a parent must fan
//! out to its children and the parent itself must drop out.
//!
//! ```text
//! input ids:  [ 5 (configurable), 9 (simple) ]
//! links:      5 → 6, 5 → 7
//!
//! leaf_ids:   [ 9 ]        (parents removed)
//! child_ids:  [ 6, 7 ]     (enqueued separately)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// A parent → child row from the host's product relation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductLink {
    pub parent_id: i64,
    pub child_id: i64,
}

/// Result of [`expand_composites`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeExpansion {
    /// Input ids that are not parents of any link, in input order.
    pub leaf_ids: Vec<i64>,
    /// Children of the parents in the input, ascending and de-duplicated.
    pub child_ids: Vec<i64>,
}

impl CompositeExpansion {
    /// Returns true if nothing is left to enqueue.
    pub fn is_empty(&self) -> bool {
        self.leaf_ids.is_empty() && self.child_ids.is_empty()
    }
}

/// Splits `ids` into sellable leaves and the children of composite parents.
///
/// A product counts as a parent when at least one link names it as
/// `parent_id`. Links whose parent is not in `ids` are ignored. A child that
/// is also in `ids` stays in `leaf_ids` and is not repeated in `child_ids`.
///
/// ## Example
/// ```rust
/// use shopfeed_core::composite::{expand_composites, ProductLink};
///
/// let links = [
///     ProductLink { parent_id: 5, child_id: 6 },
///     ProductLink { parent_id: 5, child_id: 7 },
/// ];
/// let expansion = expand_composites(&[5, 9], &links);
/// assert_eq!(expansion.leaf_ids, vec![9]);
/// assert_eq!(expansion.child_ids, vec![6, 7]);
/// ```
pub fn expand_composites(ids: &[i64], links: &[ProductLink]) -> CompositeExpansion {
    let requested: HashSet<i64> = ids.iter().copied().collect();
    let parents: HashSet<i64> = links
        .iter()
        .filter(|l| requested.contains(&l.parent_id))
        .map(|l| l.parent_id)
        .collect();

    let mut seen = HashSet::new();
    let leaf_ids: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| !parents.contains(id) && seen.insert(*id))
        .collect();

    let child_ids: BTreeSet<i64> = links
        .iter()
        .filter(|l| parents.contains(&l.parent_id))
        .map(|l| l.child_id)
        .filter(|child| !seen.contains(child))
        .collect();

    CompositeExpansion {
        leaf_ids,
        child_ids: child_ids.into_iter().collect(),
    }
}
