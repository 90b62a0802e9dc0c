//! Query filters and ordering.
//!
//! Filters always carry an owner key; the backend enforces row-level access
//! on its side, and every client-built filter includes the owner again
//! defensively. Conditions address payload fields by JSON pointer so the
//! filter model stays domain-agnostic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use vita_types::{OwnerKey, Record};

/// Comparison operator for a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Gte,
    Lte,
}

/// A single payload-field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// JSON pointer into the record payload (e.g. "/log_date").
    pub pointer: String,
    pub op: Op,
    pub value: serde_json::Value,
}

impl Condition {
    /// Returns true if the record's payload satisfies this condition.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.payload.pointer(&self.pointer) else {
            return false;
        };
        match self.op {
            Op::Eq => actual == &self.value,
            Op::Gte => compare_values(actual, &self.value)
                .is_some_and(|ord| ord != Ordering::Less),
            Op::Lte => compare_values(actual, &self.value)
                .is_some_and(|ord| ord != Ordering::Greater),
        }
    }
}

/// An owner-scoped query filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// The owner scope. Always present; a filter cannot address another
    /// owner's rows.
    pub owner: OwnerKey,
    /// Additional payload conditions, all of which must hold.
    pub conditions: Vec<Condition>,
}

impl Filter {
    /// Creates a filter matching all rows of an owner.
    #[must_use]
    pub fn owner(owner: OwnerKey) -> Self {
        Self {
            owner,
            conditions: Vec::new(),
        }
    }

    /// Adds an equality condition on a payload field.
    #[must_use]
    pub fn and_eq(mut self, pointer: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push(Condition {
            pointer: pointer.into(),
            op: Op::Eq,
            value: value.into(),
        });
        self
    }

    /// Adds a greater-or-equal condition (dates compare lexically in ISO form).
    #[must_use]
    pub fn and_gte(mut self, pointer: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push(Condition {
            pointer: pointer.into(),
            op: Op::Gte,
            value: value.into(),
        });
        self
    }

    /// Adds a less-or-equal condition.
    #[must_use]
    pub fn and_lte(mut self, pointer: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push(Condition {
            pointer: pointer.into(),
            op: Op::Lte,
            value: value.into(),
        });
        self
    }

    /// Returns true if the record belongs to the filter's owner and satisfies
    /// every condition.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record.owner == self.owner && self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One sort key addressing a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub pointer: String,
    pub direction: Direction,
}

/// The natural order of a collection: payload sort keys applied in sequence,
/// with `created_at` then `id` as final tie-breakers so the order is total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub keys: Vec<SortKey>,
}

impl OrderBy {
    /// Orders by a single ascending payload field.
    #[must_use]
    pub fn asc(pointer: impl Into<String>) -> Self {
        Self {
            keys: vec![SortKey {
                pointer: pointer.into(),
                direction: Direction::Ascending,
            }],
        }
    }

    /// Orders by a single descending payload field.
    #[must_use]
    pub fn desc(pointer: impl Into<String>) -> Self {
        Self {
            keys: vec![SortKey {
                pointer: pointer.into(),
                direction: Direction::Descending,
            }],
        }
    }

    /// Appends a secondary ascending key.
    #[must_use]
    pub fn then_asc(mut self, pointer: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            pointer: pointer.into(),
            direction: Direction::Ascending,
        });
        self
    }

    /// Appends a secondary descending key.
    #[must_use]
    pub fn then_desc(mut self, pointer: impl Into<String>) -> Self {
        self.keys.push(SortKey {
            pointer: pointer.into(),
            direction: Direction::Descending,
        });
        self
    }

    /// Compares two records under this order.
    #[must_use]
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.keys {
            let va = a.payload.pointer(&key.pointer);
            let vb = b.payload.pointer(&key.pointer);
            let ord = match (va, vb) {
                (Some(va), Some(vb)) => compare_values(va, vb).unwrap_or(Ordering::Equal),
                // Rows missing the key sort last.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ord = match key.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Sorts records in place under this order. Stable.
    pub fn sort(&self, records: &mut [Record]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

/// Total-enough comparison of JSON scalar values: numbers numerically,
/// strings lexically (ISO dates and times compare correctly this way),
/// booleans false-before-true. Mixed types are incomparable.
fn compare_values(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
