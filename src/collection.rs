use crate::models::OrderableEntity;
use std::collections::HashMap;
use std::ops::Range;

/// In-memory entities of one container, with a view sorted by `order`.
///
/// The sorted view is rebuilt on every mutation so positional reads stay
/// index-stable between mutations.
#[derive(Debug, Clone, Default)]
pub struct LocalOrderedCollection {
    container_id: String,
    entities: HashMap<String, OrderableEntity>,
    sorted_ids: Vec<String>,
}

impl LocalOrderedCollection {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            entities: HashMap::new(),
            sorted_ids: Vec::new(),
        }
    }

    pub fn from_entities(container_id: impl Into<String>, entities: impl IntoIterator<Item = OrderableEntity>) -> Self {
        let mut collection = Self::new(container_id);
        for entity in entities {
            collection.entities.insert(entity.id.clone(), entity);
        }
        collection.rebuild_view();
        collection
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&OrderableEntity> {
        self.entities.get(id)
    }

    pub fn get_at(&self, index: usize) -> Option<&OrderableEntity> {
        self.sorted_ids.get(index).and_then(|id| self.entities.get(id))
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.sorted_ids.iter().position(|current| current == id)
    }

    pub fn sorted_ids(&self) -> &[String] {
        &self.sorted_ids
    }

    pub fn sorted(&self) -> Vec<&OrderableEntity> {
        self.sorted_ids.iter().filter_map(|id| self.entities.get(id)).collect()
    }

    /// Entities in the visible range of a virtualized list, clamped to the
    /// collection bounds.
    pub fn window(&self, range: Range<usize>) -> Vec<&OrderableEntity> {
        let end = range.end.min(self.sorted_ids.len());
        let start = range.start.min(end);
        self.sorted_ids[start..end]
            .iter()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }

    /// `(id, order)` pairs in display order.
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        self.sorted()
            .into_iter()
            .map(|entity| (entity.id.clone(), entity.order))
            .collect()
    }

    /// Inserts or replaces an entity. Without an explicit order the entity is
    /// appended after the current last one.
    pub fn insert(&mut self, id: impl Into<String>, order: Option<u32>) -> &OrderableEntity {
        let id = id.into();
        let order = order.unwrap_or_else(|| self.next_order());
        self.entities
            .insert(id.clone(), OrderableEntity::new(id.clone(), self.container_id.clone(), order));
        self.rebuild_view();
        &self.entities[&id]
    }

    pub fn remove(&mut self, id: &str) -> Option<OrderableEntity> {
        let removed = self.entities.remove(id);
        if removed.is_some() {
            self.rebuild_view();
        }
        removed
    }

    /// Overwrites the order of one entity. Returns false for unknown ids.
    pub fn set_order(&mut self, id: &str, order: u32) -> bool {
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        entity.order = order;
        self.rebuild_view();
        true
    }

    /// Overwrites several orders with a single view rebuild. Unknown ids are
    /// skipped; the number of applied entries is returned.
    pub fn set_orders<'a>(&mut self, orders: impl IntoIterator<Item = (&'a str, u32)>) -> usize {
        let mut applied = 0usize;
        for (id, order) in orders {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.order = order;
                applied += 1;
            }
        }
        if applied > 0 {
            self.rebuild_view();
        }
        applied
    }

    pub fn next_order(&self) -> u32 {
        self.entities
            .values()
            .map(|entity| entity.order)
            .max()
            .map(|max| max.saturating_add(1))
            .unwrap_or(0)
    }

    /// True when every order value is distinct.
    pub fn has_unique_orders(&self) -> bool {
        let mut orders = self.entities.values().map(|entity| entity.order).collect::<Vec<_>>();
        orders.sort_unstable();
        orders.windows(2).all(|pair| pair[0] != pair[1])
    }

    fn rebuild_view(&mut self) {
        let mut ids = self
            .entities
            .values()
            .map(|entity| (entity.order, entity.id.clone()))
            .collect::<Vec<_>>();
        ids.sort();
        self.sorted_ids = ids.into_iter().map(|(_, id)| id).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::LocalOrderedCollection;
    use crate::models::OrderableEntity;

    fn sample() -> LocalOrderedCollection {
        LocalOrderedCollection::from_entities(
            "col-1",
            vec![
                OrderableEntity::new("c", "col-1", 2),
                OrderableEntity::new("a", "col-1", 0),
                OrderableEntity::new("b", "col-1", 1),
            ],
        )
    }

    #[test]
    fn view_is_sorted_by_order() {
        let collection = sample();
        assert_eq!(collection.sorted_ids(), ["a", "b", "c"]);
        assert_eq!(collection.get_at(1).map(|e| e.id.as_str()), Some("b"));
        assert_eq!(collection.index_of("c"), Some(2));
    }

    #[test]
    fn insert_without_order_appends() {
        let mut collection = sample();
        let order = collection.insert("d", None).order;
        assert_eq!(order, 3);
        assert_eq!(collection.sorted_ids().last().map(String::as_str), Some("d"));
    }

    #[test]
    fn ties_are_broken_by_id() {
        let mut collection = sample();
        collection.set_order("c", 0);
        assert_eq!(collection.sorted_ids(), ["a", "c", "b"]);
        assert!(!collection.has_unique_orders());
    }

    #[test]
    fn window_clamps_to_bounds() {
        let collection = sample();
        let ids = collection.window(1..10).iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(collection.window(5..9).is_empty());
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut collection = sample();
        assert!(!collection.set_order("zzz", 9));
        assert_eq!(collection.set_orders([("zzz", 1), ("a", 5)]), 1);
        assert_eq!(collection.sorted_ids(), ["b", "c", "a"]);
        assert!(collection.remove("zzz").is_none());
    }
}
