//! Queries and query signatures.

use regie_types::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::{compare_values, Filters, Predicate, Record};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

/// Ordering on one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A collection query as sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub predicates: Vec<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Cursor: only return records that sort after this id.
    pub start_after: Option<RecordId>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching every active filter in `filters`.
    pub fn from_filters(filters: &Filters) -> Self {
        Self {
            predicates: filters.to_predicates(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn start_after(mut self, id: RecordId) -> Self {
        self.start_after = Some(id);
        self
    }
}

/// Evaluates a query against an in-memory slice of records.
///
/// Filters first, then a stable sort (missing values first when ascending),
/// then the cursor, offset and limit.
pub fn apply_list_query(records: &[Record], query: &ListQuery) -> Vec<Record> {
    let mut matched: Vec<Record> = records
        .iter()
        .filter(|r| query.predicates.iter().all(|p| p.matches(r)))
        .cloned()
        .collect();

    if let Some(order) = &query.order_by {
        matched.sort_by(|a, b| {
            let left = a.get_path(&order.field).unwrap_or(&Value::Null);
            let right = b.get_path(&order.field).unwrap_or(&Value::Null);
            let ord = sort_key_cmp(left, right);
            match order.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    let mut iter: Box<dyn Iterator<Item = Record>> = Box::new(matched.into_iter());
    if let Some(cursor) = &query.start_after {
        let cursor = cursor.clone();
        let mut seen = false;
        iter = Box::new(iter.filter(move |r| {
            if seen {
                return true;
            }
            if r.id == cursor {
                seen = true;
            }
            false
        }));
    }
    if let Some(offset) = query.offset {
        iter = Box::new(iter.skip(offset));
    }
    if let Some(limit) = query.limit {
        iter = Box::new(iter.take(limit));
    }
    iter.collect()
}

fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Whether a fetch targets one document or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Single,
    Collection,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Single => f.write_str("single"),
            QueryMode::Collection => f.write_str("collection"),
        }
    }
}

/// Deterministic identity of a query, used to address cache entries.
///
/// Two queries with equal signatures are the same cached resource. A
/// caller-supplied key overrides the derived one entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySignature {
    pub collection: String,
    pub mode: QueryMode,
    pub id: Option<RecordId>,
    pub filters: Filters,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Cursor for cursor-paginated collection reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<RecordId>,
    pub explicit_key: Option<String>,
}

impl QuerySignature {
    /// Signature for a single-document read.
    pub fn single(collection: impl Into<String>, id: Option<RecordId>) -> Self {
        Self {
            collection: collection.into(),
            mode: QueryMode::Single,
            id,
            filters: Filters::new(),
            order_by: None,
            limit: None,
            offset: None,
            start_after: None,
            explicit_key: None,
        }
    }

    /// Signature for a collection read.
    pub fn collection(collection: impl Into<String>, filters: Filters) -> Self {
        Self {
            collection: collection.into(),
            mode: QueryMode::Collection,
            id: None,
            filters,
            order_by: None,
            limit: None,
            offset: None,
            start_after: None,
            explicit_key: None,
        }
    }

    pub fn with_order(mut self, order_by: Option<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: Option<usize>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_start_after(mut self, cursor: Option<RecordId>) -> Self {
        self.start_after = cursor;
        self
    }

    pub fn with_explicit_key(mut self, key: Option<String>) -> Self {
        self.explicit_key = key;
        self
    }

    /// The store query this signature describes (collection mode).
    pub fn to_list_query(&self) -> ListQuery {
        ListQuery {
            predicates: self.filters.to_predicates(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            start_after: self.start_after.clone(),
        }
    }

    /// Renders the cache key.
    pub fn key(&self) -> String {
        if let Some(key) = &self.explicit_key {
            return key.clone();
        }
        let id = self.id.as_ref().map(RecordId::as_str).unwrap_or("-");
        let filters = serde_json::to_string(&self.filters).unwrap_or_default();
        let order = self
            .order_by
            .as_ref()
            .map(|o| format!("{}:{}", o.field, o.direction))
            .unwrap_or_else(|| "-".into());
        let limit = self.limit.map(|l| l.to_string()).unwrap_or_else(|| "-".into());
        let offset = self.offset.map(|o| o.to_string()).unwrap_or_else(|| "-".into());
        let mut key = format!(
            "{}:{}:{}:{}:{}:{}:{}",
            self.collection, self.mode, id, filters, order, limit, offset
        );
        if let Some(cursor) = &self.start_after {
            key.push_str(":after=");
            key.push_str(cursor.as_str());
        }
        key
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
