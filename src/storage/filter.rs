//! Label filters
//!
//! Exact-match filters for the catalog endpoints, translated into SQL
//! predicates over the aliased catalog joins used by the store
//! (`s` = source, `m` = measure, `c` = channel, `k` = chunk).

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::Deserialize;

use crate::storage::types::to_micros;

/// A conjunction of equality clauses with positional parameters
#[derive(Debug, Default, Clone)]
pub struct Predicate {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column = value` when a value is present
    pub fn eq<V: Into<Value>>(mut self, column: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.params.push(v.into());
            self.clauses.push(format!("{} = ?{}", column, self.params.len()));
        }
        self
    }

    /// Add `column IN (...)` for a non-empty list
    pub fn any_of<V: Into<Value> + Clone>(mut self, column: &str, values: &[V]) -> Self {
        if values.is_empty() {
            return self;
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for v in values {
            self.params.push(v.clone().into());
            placeholders.push(format!("?{}", self.params.len()));
        }
        self.clauses
            .push(format!("{} IN ({})", column, placeholders.join(", ")));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Render as a WHERE clause (empty when there is nothing to filter)
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Index the next positional parameter would take
    pub fn next_param(&self) -> usize {
        self.params.len() + 1
    }
}

/// A filter that can be turned into a storage predicate
pub trait Filter {
    fn predicate(&self) -> Predicate;

    /// True when no field is set
    fn is_empty(&self) -> bool {
        self.predicate().is_empty()
    }
}

/// Offset/limit window applied to list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: i64,
    pub limit: i64,
}

impl Window {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Window for a 1-based page number; `None` when the offset does not fit
    pub fn page(page: u64, page_size: u64) -> Option<Self> {
        let offset = (page.max(1) - 1).checked_mul(page_size)?;
        Some(Self {
            offset: i64::try_from(offset).ok()?,
            limit: i64::try_from(page_size).ok()?,
        })
    }

    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: -1,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SourceFilter {
    pub label: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub device: Option<String>,
    pub protocol: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl Filter for SourceFilter {
    fn predicate(&self) -> Predicate {
        Predicate::new()
            .eq("s.label", self.label.clone())
            .eq("s.name", self.name.clone())
            .eq("s.location", self.location.clone())
            .eq("s.device", self.device.clone())
            .eq("s.protocol", self.protocol.clone())
            .eq("s.version", self.version.clone())
            .eq("s.description", self.description.clone())
            .eq("s.created", self.created.as_ref().map(to_micros))
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MeasureFilter {
    pub label: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
}

impl Filter for MeasureFilter {
    fn predicate(&self) -> Predicate {
        Predicate::new()
            .eq("m.label", self.label.clone())
            .eq("m.name", self.name.clone())
            .eq("m.description", self.description.clone())
            .eq("m.source_label", self.source.clone())
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChannelFilter {
    pub label: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub measure: Option<String>,
    pub source: Option<String>,
}

impl Filter for ChannelFilter {
    fn predicate(&self) -> Predicate {
        Predicate::new()
            .eq("c.label", self.label.clone())
            .eq("c.name", self.name.clone())
            .eq("c.unit", self.unit.clone())
            .eq("m.label", self.measure.clone())
            .eq("m.source_label", self.source.clone())
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ChunkFilter {
    pub label: Option<String>,
    pub measure: Option<String>,
    pub source: Option<String>,
}

impl Filter for ChunkFilter {
    fn predicate(&self) -> Predicate {
        Predicate::new()
            .eq("k.label", self.label.clone())
            .eq("m.label", self.measure.clone())
            .eq("m.source_label", self.source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_predicate() {
        let p = ChannelFilter::default().predicate();
        assert!(p.is_empty());
        assert_eq!(p.where_sql(), "");
        assert_eq!(p.next_param(), 1);
    }

    #[test]
    fn test_predicate_numbers_parameters() {
        let filter = ChannelFilter {
            label: Some("c3".to_string()),
            source: Some("openbci".to_string()),
            ..Default::default()
        };
        let p = filter.predicate();
        assert_eq!(p.where_sql(), " WHERE c.label = ?1 AND m.source_label = ?2");
        assert_eq!(p.params().len(), 2);
        assert_eq!(p.next_param(), 3);
    }

    #[test]
    fn test_any_of() {
        let p = Predicate::new()
            .eq("m.id", Some(4_i64))
            .any_of("c.label", &["c3".to_string(), "c4".to_string()]);
        assert_eq!(p.where_sql(), " WHERE m.id = ?1 AND c.label IN (?2, ?3)");

        let untouched = Predicate::new().any_of::<String>("c.label", &[]);
        assert!(untouched.is_empty());
    }

    #[test]
    fn test_window_page() {
        assert_eq!(Window::page(1, 16), Some(Window::new(0, 16)));
        assert_eq!(Window::page(3, 10), Some(Window::new(20, 10)));
        assert_eq!(Window::page(0, 10), Some(Window::new(0, 10)));
        assert_eq!(Window::page(u64::MAX, 2), None);
        assert_eq!(Window::page(u64::MAX / 2, 4), None);
    }
}
