//! Fetched base list plus ordered optimistic deltas.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// An item with a stable identity inside a view.
pub trait Keyed {
    /// Identity used for de-duplication and targeted updates.
    fn key(&self) -> &str;
}

/// A pending optimistic change.
///
/// Deltas are re-applied to every fresh base, so `apply` must be idempotent
/// with respect to data that already reflects the change.
pub trait Delta<T>: Send + Sync + fmt::Debug {
    /// Apply the change in place.
    fn apply(&self, items: &mut Vec<T>);
}

/// Identifies a pending delta until it is committed or rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

/// Sequence number of an issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    /// Raw sequence number.
    #[must_use]
    pub const fn seq(self) -> u64 {
        self.0
    }
}

/// A delta and, once its write is confirmed, the last fetch issued before that.
struct Layer<T> {
    delta: Arc<dyn Delta<T>>,
    settled_at: Option<u64>,
}

/// Local state of one view: the last fetched list and the deltas pending on top of it.
///
/// A confirmed delta stays layered until a fetch issued after its
/// confirmation is applied. Fetches already in flight may carry data from
/// before the write.
pub struct SyncedView<T> {
    base: Vec<T>,
    pending: BTreeMap<MutationId, Layer<T>>,
    next_mutation: u64,
    issued: u64,
    applied: u64,
}

impl<T> Default for SyncedView<T> {
    fn default() -> Self {
        Self {
            base: Vec::new(),
            pending: BTreeMap::new(),
            next_mutation: 0,
            issued: 0,
            applied: 0,
        }
    }
}

impl<T> fmt::Debug for SyncedView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedView")
            .field("base_len", &self.base.len())
            .field("pending", &self.pending.len())
            .field("issued", &self.issued)
            .field("applied", &self.applied)
            .finish()
    }
}

impl<T: Keyed + Clone> SyncedView<T> {
    /// Empty view, nothing fetched yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next fetch sequence number.
    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.issued += 1;
        FetchTicket(self.issued)
    }

    /// Replace the base with a fetch result.
    ///
    /// Returns `false` and leaves the view untouched when a newer fetch has
    /// already been applied.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, items: Vec<T>) -> bool {
        if ticket.0 <= self.applied {
            tracing::debug!(
                seq = ticket.0,
                applied = self.applied,
                "Discarding stale fetch"
            );
            return false;
        }
        self.applied = ticket.0;
        self.base = dedupe(items);
        self.pending
            .retain(|_, layer| layer.settled_at.is_none_or(|issued| ticket.0 <= issued));
        true
    }

    /// Whether any fetch has been applied.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.applied > 0
    }

    /// Layer a delta over the base.
    pub fn apply_delta(&mut self, delta: Arc<dyn Delta<T>>) -> MutationId {
        self.next_mutation += 1;
        let id = MutationId(self.next_mutation);
        self.pending.insert(
            id,
            Layer {
                delta,
                settled_at: None,
            },
        );
        id
    }

    /// Mark a delta as confirmed by the store.
    ///
    /// With no fetch in flight it is folded into the base right away.
    /// Otherwise it keeps being layered over fetches issued before now.
    pub fn commit(&mut self, id: MutationId) -> bool {
        match self.pending.get(&id) {
            Some(layer) if layer.settled_at.is_none() => {
                let delta = Arc::clone(&layer.delta);
                self.settle(id, delta);
                true
            }
            _ => false,
        }
    }

    /// Commit with `confirmed` in place of the optimistic delta.
    pub fn commit_with(&mut self, id: MutationId, confirmed: Arc<dyn Delta<T>>) -> bool {
        match self.pending.get(&id) {
            Some(layer) if layer.settled_at.is_none() => {
                self.settle(id, confirmed);
                true
            }
            _ => false,
        }
    }

    fn settle(&mut self, id: MutationId, delta: Arc<dyn Delta<T>>) {
        if self.issued == self.applied {
            self.pending.remove(&id);
            delta.apply(&mut self.base);
        } else {
            self.pending.insert(
                id,
                Layer {
                    delta,
                    settled_at: Some(self.issued),
                },
            );
        }
    }

    /// Discard a delta whose write failed.
    pub fn rollback(&mut self, id: MutationId) -> bool {
        match self.pending.get(&id) {
            Some(layer) if layer.settled_at.is_none() => self.pending.remove(&id).is_some(),
            _ => false,
        }
    }

    /// Number of deltas awaiting their round trip.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .values()
            .filter(|layer| layer.settled_at.is_none())
            .count()
    }

    /// The last fetched list, without pending deltas.
    #[must_use]
    pub fn base(&self) -> &[T] {
        &self.base
    }

    /// Base with every pending delta applied in mutation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        let mut items = self.base.clone();
        for layer in self.pending.values() {
            layer.delta.apply(&mut items);
        }
        items
    }
}

/// Drop repeated keys, keeping the first position and the last value.
fn dedupe<T: Keyed>(items: Vec<T>) -> Vec<T> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if let Some(&position) = index.get(item.key()) {
            unique[position] = item;
        } else {
            index.insert(item.key().to_string(), unique.len());
            unique.push(item);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: &'static str,
        value: u32,
    }

    impl Keyed for Item {
        fn key(&self) -> &str {
            self.id
        }
    }

    #[derive(Debug)]
    struct Bump(&'static str);

    impl Delta<Item> for Bump {
        fn apply(&self, items: &mut Vec<Item>) {
            if let Some(item) = items.iter_mut().find(|item| item.id == self.0) {
                item.value += 1;
            }
        }
    }

    fn item(id: &'static str, value: u32) -> Item {
        Item { id, value }
    }

    #[test]
    fn test_stale_fetch_is_discarded() {
        let mut view = SyncedView::new();
        let older = view.begin_fetch();
        let newer = view.begin_fetch();

        assert!(view.apply_fetch(newer, vec![item("a", 2)]));
        assert!(!view.apply_fetch(older, vec![item("a", 1)]));
        assert_eq!(view.snapshot(), vec![item("a", 2)]);
    }

    #[test]
    fn test_in_order_fetches_both_apply() {
        let mut view = SyncedView::new();
        let first = view.begin_fetch();
        let second = view.begin_fetch();

        assert!(view.apply_fetch(first, vec![item("a", 1)]));
        assert!(view.apply_fetch(second, vec![item("a", 2)]));
        assert_eq!(view.base(), &[item("a", 2)]);
    }

    #[test]
    fn test_dedupe_keeps_last_value() {
        let mut view = SyncedView::new();
        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 1), item("b", 1), item("a", 7)]);

        assert_eq!(view.snapshot(), vec![item("a", 7), item("b", 1)]);
    }

    #[test]
    fn test_delta_survives_refetch_until_commit() {
        let mut view = SyncedView::new();
        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 1)]);

        let id = view.apply_delta(Arc::new(Bump("a")));
        assert_eq!(view.snapshot(), vec![item("a", 2)]);

        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 5)]);
        assert_eq!(view.snapshot(), vec![item("a", 6)]);

        assert!(view.commit(id));
        assert_eq!(view.pending_count(), 0);
        assert_eq!(view.snapshot(), vec![item("a", 6)]);
        assert!(!view.commit(id));
    }

    #[test]
    fn test_confirmed_delta_outlives_fetch_issued_before_commit() {
        let mut view = SyncedView::new();
        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 1)]);

        let in_flight = view.begin_fetch();
        let id = view.apply_delta(Arc::new(Bump("a")));
        assert!(view.commit(id));
        assert_eq!(view.pending_count(), 0);

        // Loaded before the write landed.
        assert!(view.apply_fetch(in_flight, vec![item("a", 1)]));
        assert_eq!(view.snapshot(), vec![item("a", 2)]);

        // Loaded after: the base already has the change.
        let fresh = view.begin_fetch();
        assert!(view.apply_fetch(fresh, vec![item("a", 2)]));
        assert_eq!(view.base(), &[item("a", 2)]);
        assert_eq!(view.snapshot(), vec![item("a", 2)]);
    }

    #[test]
    fn test_confirmed_delta_cannot_be_rolled_back() {
        let mut view = SyncedView::new();
        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 1)]);
        let _in_flight = view.begin_fetch();

        let id = view.apply_delta(Arc::new(Bump("a")));
        assert!(view.commit(id));
        assert!(!view.rollback(id));
        assert!(!view.commit(id));
        assert_eq!(view.snapshot(), vec![item("a", 2)]);
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let mut view = SyncedView::new();
        let ticket = view.begin_fetch();
        view.apply_fetch(ticket, vec![item("a", 1), item("b", 4)]);
        let before = view.snapshot();

        let id = view.apply_delta(Arc::new(Bump("b")));
        assert_ne!(view.snapshot(), before);

        assert!(view.rollback(id));
        assert_eq!(view.snapshot(), before);
    }
}
