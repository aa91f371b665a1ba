//! Kind queries with ancestor scoping, an equality filter and a single sort.

use std::cmp::Ordering;

use crate::entity::{Entity, Value};
use crate::key::Key;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Equality filter on an indexed property.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Property name.
    pub property: String,
    /// Value the property must equal.
    pub value: Value,
}

/// Sort order on an indexed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// Property name.
    pub property: String,
    /// Sort direction.
    pub direction: Direction,
}

/// A query over one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Entity kind to match.
    pub kind: String,
    /// Restrict results to descendants of this key.
    pub ancestor: Option<Key>,
    /// Equality filter.
    pub filter: Option<Filter>,
    /// Result ordering.
    pub sort: Option<Sort>,
}

impl Query {
    /// Create a query matching every entity of `kind`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            filter: None,
            sort: None,
        }
    }

    /// Restrict to descendants of `ancestor`.
    #[must_use]
    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    /// Require `property == value`.
    #[must_use]
    pub fn with_filter(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter {
            property: property.into(),
            value: value.into(),
        });
        self
    }

    /// Order results by `property`.
    #[must_use]
    pub fn with_sort(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.sort = Some(Sort {
            property: property.into(),
            direction,
        });
        self
    }

    /// Whether an entity satisfies the kind, ancestor and filter clauses.
    ///
    /// Entities without an indexed value for the sort property are excluded,
    /// as an index-backed store would never see them.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.key.kind() != self.kind {
            return false;
        }
        if let Some(ancestor) = &self.ancestor {
            if !ancestor.is_ancestor_of(&entity.key) {
                return false;
            }
        }
        if let Some(filter) = &self.filter {
            match entity.properties.get(&filter.property) {
                Some(value) if value.is_indexed() && *value == filter.value => {}
                _ => return false,
            }
        }
        if let Some(sort) = &self.sort {
            if !entity
                .properties
                .get(&sort.property)
                .is_some_and(Value::is_indexed)
            {
                return false;
            }
        }
        true
    }

    /// Filter and order a candidate set according to this query.
    #[must_use]
    pub fn apply(&self, candidates: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
        let mut results: Vec<Entity> = candidates
            .into_iter()
            .filter(|entity| self.matches(entity))
            .collect();

        if let Some(sort) = &self.sort {
            results.sort_by(|a, b| {
                let ordering = match (
                    a.properties.get(&sort.property),
                    b.properties.get(&sort.property),
                ) {
                    (Some(x), Some(y)) => x.compare(y),
                    _ => Ordering::Equal,
                };
                match sort.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn demo(user: &str, id: i64, status: &str, offset_secs: i64) -> Entity {
        let mut entity = Entity::new(Key::named("User", user).child_numbered("Demo", id));
        entity.properties.set("status", status);
        entity
            .properties
            .set("creationTime", Utc::now() + Duration::seconds(offset_secs));
        entity
    }

    #[test]
    fn ancestor_filter_and_sort() {
        let query = Query::new("Demo")
            .with_ancestor(Key::named("User", "alice"))
            .with_filter("status", "CREATED")
            .with_sort("creationTime", Direction::Descending);

        let results = query.apply(vec![
            demo("alice", 1, "CREATED", 0),
            demo("alice", 2, "CREATED", 10),
            demo("alice", 3, "DELETING", 20),
            demo("bob", 4, "CREATED", 30),
        ]);

        let ids: Vec<_> = results.iter().filter_map(|e| e.key.numeric_id()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn text_values_never_match_filters() {
        let mut entity = Entity::new(Key::numbered("Demo", 1));
        entity
            .properties
            .set("description", Value::Text("hello".to_owned()));

        let query = Query::new("Demo").with_filter("description", Value::Text("hello".to_owned()));
        assert!(!query.matches(&entity));
    }

    #[test]
    fn entities_missing_the_sort_property_are_excluded() {
        let entity = Entity::new(Key::numbered("Demo", 1));
        let query = Query::new("Demo").with_sort("creationTime", Direction::Ascending);
        assert!(query.apply(vec![entity]).is_empty());
    }

    #[test]
    fn kind_must_match() {
        let entity = Entity::new(Key::named("User", "alice"));
        assert!(!Query::new("Demo").matches(&entity));
        assert!(Query::new("User").matches(&entity));
    }
}
