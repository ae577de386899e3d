//! Collection envelope assembly.
//!
//! Builds a paged, optionally property-filtered envelope from a query
//! result. Paging is applied exactly once, the total comes from the result
//! set's own count when it can report one cheaply, and projection paths are
//! resolved fail-fast against each object's body.

use hermes_core::{Envelope, HermesError, HermesResult, QueryResult, Resource};
use serde_json::{Map, Value};

/// Assembles response envelopes from query results.
pub struct BundleBuilder;

impl BundleBuilder {
    /// Builds an envelope, applying paging and optional projections.
    ///
    /// `include` keeps only the named dotted paths; `exclude` drops them.
    /// A path segment that does not exist on an object fails fast with a
    /// descriptive validation error.
    pub fn build(
        result: QueryResult,
        offset: usize,
        page_size: Option<usize>,
        include: &[String],
        exclude: &[String],
    ) -> HermesResult<Envelope> {
        let total = result.total.unwrap_or(result.items.len());

        // Single enumeration of the source sequence.
        let paged = result.items.into_iter().skip(offset);
        let items: Vec<Resource> = match page_size {
            Some(size) => paged.take(size).collect(),
            None => paged.collect(),
        };

        let items = if include.is_empty() && exclude.is_empty() {
            items
        } else {
            items
                .into_iter()
                .map(|item| Self::project(item, include, exclude))
                .collect::<HermesResult<Vec<_>>>()?
        };

        Ok(Envelope {
            items,
            offset,
            total,
            correlation_key: None,
        })
    }

    /// Clones an object, retaining or dropping the named property paths.
    fn project(mut resource: Resource, include: &[String], exclude: &[String]) -> HermesResult<Resource> {
        if !include.is_empty() {
            let mut kept = Value::Object(Map::new());
            for path in include {
                let value = Self::extract(&resource, path)?;
                Self::insert_at(&mut kept, path, value);
            }
            resource.body = kept;
        }
        for path in exclude {
            Self::remove(&mut resource, path)?;
        }
        Ok(resource)
    }

    fn extract(resource: &Resource, path: &str) -> HermesResult<Value> {
        let mut current = &resource.body;
        for segment in path.split('.') {
            current = current.get(segment).ok_or_else(|| {
                HermesError::validation(format!(
                    "property path '{path}' does not exist on {}: unknown segment '{segment}'",
                    resource.resource_type
                ))
            })?;
        }
        Ok(current.clone())
    }

    fn insert_at(target: &mut Value, path: &str, value: Value) {
        let mut current = target;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let map = match current {
                Value::Object(map) => map,
                other => {
                    *other = Value::Object(Map::new());
                    match other {
                        Value::Object(map) => map,
                        _ => unreachable!(),
                    }
                }
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    fn remove(resource: &mut Resource, path: &str) -> HermesResult<()> {
        let type_name = resource.resource_type.clone();
        let missing = |segment: &str| {
            HermesError::validation(format!(
                "property path '{path}' does not exist on {type_name}: unknown segment '{segment}'"
            ))
        };

        let mut current = &mut resource.body;
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            current = current.get_mut(*segment).ok_or_else(|| missing(segment))?;
        }
        let last = segments[segments.len() - 1];
        match current {
            Value::Object(map) => {
                map.remove(last).ok_or_else(|| missing(last))?;
                Ok(())
            }
            _ => Err(missing(last)),
        }
    }
}
