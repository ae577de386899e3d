//! The multi-object response envelope.

use serde::{Deserialize, Serialize};

use crate::types::Resource;

/// A paged collection response wrapping zero or more objects.
///
/// Partial pages are legal: `items.len()` may be smaller than
/// `total - offset`. `correlation_key` links the envelope's contents to the
/// single logical operation that produced them (graph copies set it to the
/// root object id).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// The objects in this page, in result order.
    pub items: Vec<Resource>,
    /// Number of matching objects skipped before this page.
    pub offset: usize,
    /// Full match count.
    pub total: usize,
    /// Identifier attributing the contents to one logical operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
}

impl Envelope {
    /// Creates an unpaged envelope holding all given items.
    #[must_use]
    pub fn new(items: Vec<Resource>) -> Self {
        let total = items.len();
        Self {
            items,
            offset: 0,
            total,
            correlation_key: None,
        }
    }

    /// Sets paging metadata.
    #[must_use]
    pub fn with_paging(mut self, offset: usize, total: usize) -> Self {
        self.offset = offset;
        self.total = total;
        self
    }

    /// Sets the correlation key.
    #[must_use]
    pub fn with_correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    /// Number of items in this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the page holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
