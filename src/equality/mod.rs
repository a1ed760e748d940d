//! Equivalence classes of resources
//!
//! A union-find over resource ids where every class keeps a singly linked
//! list of its members starting at the representative. Each resource has an
//! entry `(parent, next)`: `parent` is `0` for representatives, and `next` links
//! the member list. Merging never compresses paths, so a class can be
//! restored member by member from another manager with
//! `copy_equivalence_class`.

use parking_lot::RwLock;

use crate::term::{Dictionary, ResourceId, ResourceKind, Triple, INVALID_RESOURCE_ID};

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    parent: ResourceId,
    next: ResourceId,
}

/// Union-find with per-class member lists
#[derive(Debug, Default)]
pub struct EqualityManager {
    entries: RwLock<Vec<Entry>>,
}

impl Clone for EqualityManager {
    fn clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.entries.read().clone()),
        }
    }
}

fn entry(entries: &[Entry], id: ResourceId) -> Entry {
    entries.get(id as usize).copied().unwrap_or_default()
}

fn find(entries: &[Entry], mut id: ResourceId) -> ResourceId {
    loop {
        let parent = entry(entries, id).parent;
        if parent == INVALID_RESOURCE_ID {
            return id;
        }
        id = parent;
    }
}

impl EqualityManager {
    /// Create a manager in which every resource is its own class
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all merges
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Representative of the class of `id`
    pub fn normalize(&self, id: ResourceId) -> ResourceId {
        find(&self.entries.read(), id)
    }

    /// Normalize every position of a triple; the flag reports any change
    pub fn normalize_triple(&self, triple: &Triple) -> (Triple, bool) {
        let entries = self.entries.read();
        let normal = [
            find(&entries, triple[0]),
            find(&entries, triple[1]),
            find(&entries, triple[2]),
        ];
        (normal, normal != *triple)
    }

    pub fn is_normal(&self, id: ResourceId) -> bool {
        entry(&self.entries.read(), id).parent == INVALID_RESOURCE_ID
    }

    pub fn is_normal_triple(&self, triple: &Triple) -> bool {
        let entries = self.entries.read();
        triple
            .iter()
            .all(|&id| entry(&entries, id).parent == INVALID_RESOURCE_ID)
    }

    /// Successor of `id` in its class member list, `0` at the end
    pub fn next_equal(&self, id: ResourceId) -> ResourceId {
        entry(&self.entries.read(), id).next
    }

    /// Whether `id` is a representative with no other members
    pub fn is_singleton(&self, id: ResourceId) -> bool {
        let e = entry(&self.entries.read(), id);
        e.parent == INVALID_RESOURCE_ID && e.next == INVALID_RESOURCE_ID
    }

    /// Members of the class represented by `representative`, representative first
    pub fn class_members(&self, representative: ResourceId) -> Vec<ResourceId> {
        let entries = self.entries.read();
        let mut members = vec![representative];
        let mut current = entry(&entries, representative).next;
        while current != INVALID_RESOURCE_ID {
            members.push(current);
            current = entry(&entries, current).next;
        }
        members
    }

    /// Merge the class of `source` into the class of `target`.
    ///
    /// Both arguments are normalized first. Returns false if they were already
    /// equal. The representative of `target`'s class stays the representative.
    pub fn merge(&self, source: ResourceId, target: ResourceId) -> bool {
        let mut entries = self.entries.write();
        let source = find(&entries, source);
        let target = find(&entries, target);
        if source == target {
            return false;
        }

        let needed = source.max(target) as usize + 1;
        if entries.len() < needed {
            entries.resize(needed, Entry::default());
        }

        let mut last = target;
        while entries[last as usize].next != INVALID_RESOURCE_ID {
            last = entries[last as usize].next;
        }
        entries[last as usize].next = source;
        entries[source as usize].parent = target;
        true
    }

    /// Reset every member of `resource`'s class here to its entry in `other`.
    ///
    /// `resource` must be normal in this manager. Used to shrink a class after
    /// equalities supporting it were retracted.
    pub fn copy_equivalence_class(&self, resource: ResourceId, other: &EqualityManager) {
        let members = self.class_members(resource);
        let source = other.entries.read();
        let mut entries = self.entries.write();
        for member in members {
            if (member as usize) < entries.len() {
                entries[member as usize] = entry(&source, member);
            }
        }
    }

    /// Number of resources with an entry
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which of two resources proved equal is absorbed into the other.
///
/// Returns `(source, target, clash)`. A blank node is absorbed into a
/// non-blank resource; otherwise the larger id is absorbed. Equating a
/// literal with anything but a blank node clashes, and so does equating two
/// IRIs under the unique name assumption.
pub fn merge_direction(
    dictionary: &Dictionary,
    unique_names: bool,
    first: ResourceId,
    second: ResourceId,
) -> (ResourceId, ResourceId, bool) {
    let kind = |id| dictionary.kind(id).unwrap_or(ResourceKind::Iri);
    let (first_kind, second_kind) = (kind(first), kind(second));
    match (first_kind, second_kind) {
        (ResourceKind::BlankNode, other) if other != ResourceKind::BlankNode => (first, second, false),
        (other, ResourceKind::BlankNode) if other != ResourceKind::BlankNode => (second, first, false),
        _ => {
            let clash = first_kind == ResourceKind::Literal
                || second_kind == ResourceKind::Literal
                || (unique_names && first_kind == ResourceKind::Iri && second_kind == ResourceKind::Iri);
            if first < second {
                (second, first, clash)
            } else {
                (first, second, clash)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_merge_and_normalize() {
        let em = EqualityManager::new();
        assert!(em.is_singleton(5));
        assert!(em.merge(7, 5));
        assert_eq!(em.normalize(7), 5);
        assert!(!em.is_normal(7));
        assert!(!em.is_singleton(5));
        assert_eq!(em.class_members(5), vec![5, 7]);
        assert!(!em.merge(5, 7));
    }

    #[test]
    fn test_merge_classes_appends_members() {
        let em = EqualityManager::new();
        em.merge(3, 2);
        em.merge(5, 4);
        em.merge(4, 2);
        assert_eq!(em.class_members(2), vec![2, 3, 4, 5]);
        assert_eq!(em.normalize(5), 2);
        assert_eq!(em.normalize_triple(&[5, 9, 3]), ([2, 9, 2], true));
        assert!(em.is_normal_triple(&[2, 9, 1]));
    }

    #[test]
    fn test_copy_equivalence_class() {
        let main = EqualityManager::new();
        main.merge(3, 2);
        main.merge(4, 2);

        let proving = EqualityManager::new();
        proving.merge(4, 2);

        main.copy_equivalence_class(2, &proving);
        assert_eq!(main.class_members(2), vec![2, 4]);
        assert!(main.is_singleton(3));
        assert_eq!(main.normalize(4), 2);
    }

    #[test]
    fn test_merge_direction() {
        let mut dict = Dictionary::new();
        let blank = dict.intern_str("_:x");
        let iri = dict.intern_str("ex:a");
        let other = dict.intern_str("ex:b");
        let literal = dict.intern_str("\"1\"");

        assert_eq!(merge_direction(&dict, false, blank, iri), (blank, iri, false));
        assert_eq!(merge_direction(&dict, true, iri, blank), (blank, iri, false));
        assert_eq!(merge_direction(&dict, false, iri, other), (other, iri, false));
        assert_eq!(merge_direction(&dict, true, iri, other), (other, iri, true));
        assert!(merge_direction(&dict, false, literal, iri).2);
    }

    proptest! {
        #[test]
        fn prop_merged_resources_share_representative(pairs in proptest::collection::vec((1u64..40, 1u64..40), 0..60)) {
            let em = EqualityManager::new();
            for &(a, b) in &pairs {
                em.merge(a, b);
                prop_assert_eq!(em.normalize(a), em.normalize(b));
            }
            for &(a, b) in &pairs {
                prop_assert_eq!(em.normalize(a), em.normalize(b));
                let rep = em.normalize(a);
                prop_assert!(em.class_members(rep).contains(&a));
            }
        }
    }
}
