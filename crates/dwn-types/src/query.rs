use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Direction of a sorted scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn is_descending(self) -> bool {
        self == Self::Descending
    }

    /// SQL keyword for this direction.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Properties a message query may be sorted by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortProperty {
    DateCreated,
    DatePublished,
    #[default]
    MessageTimestamp,
}

impl SortProperty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DateCreated => "dateCreated",
            Self::DatePublished => "datePublished",
            Self::MessageTimestamp => "messageTimestamp",
        }
    }
}

impl fmt::Display for SortProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortProperty {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dateCreated" => Ok(Self::DateCreated),
            "datePublished" => Ok(Self::DatePublished),
            "messageTimestamp" => Ok(Self::MessageTimestamp),
            other => Err(StoreError::InvalidQuery(format!("unknown sort property: {other}"))),
        }
    }
}

/// Requested ordering of a message query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSort {
    pub property: SortProperty,
    pub direction: SortDirection,
}

impl MessageSort {
    pub fn new(property: SortProperty, direction: SortDirection) -> Self {
        Self { property, direction }
    }
}

/// Page size and continuation token of a message query.
///
/// A `limit` of `None` or `Some(0)` means unlimited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Pagination {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit), cursor: None }
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// The effective page size, if bounded.
    pub fn page_size(&self) -> Option<usize> {
        self.limit.filter(|l| *l > 0)
    }
}

/// Options handed to an index query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    pub sort_property: String,
    pub sort_direction: SortDirection,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sort_property: SortProperty::default().as_str().to_string(),
            sort_direction: SortDirection::Ascending,
            limit: None,
            cursor: None,
        }
    }
}

/// Translate a message sort and pagination into index query options.
///
/// The limit is raised by one so the caller can tell whether another page
/// exists without a second round trip.
pub fn build_query_options(sort: Option<&MessageSort>, pagination: Option<&Pagination>) -> QueryOptions {
    let sort = sort.copied().unwrap_or_default();
    QueryOptions {
        sort_property: sort.property.as_str().to_string(),
        sort_direction: sort.direction,
        limit: pagination.and_then(Pagination::page_size).map(|l| l.saturating_add(1)),
        cursor: pagination.and_then(|p| p.cursor.clone()),
    }
}
