use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::value::{IndexValue, KeyValues};

/// Bounds of a range filter. Any combination may be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<IndexValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<IndexValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<IndexValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<IndexValue>,
}

impl RangeFilter {
    pub fn gt(v: impl Into<IndexValue>) -> Self {
        Self { gt: Some(v.into()), ..Self::default() }
    }

    pub fn gte(v: impl Into<IndexValue>) -> Self {
        Self { gte: Some(v.into()), ..Self::default() }
    }

    pub fn lt(v: impl Into<IndexValue>) -> Self {
        Self { lt: Some(v.into()), ..Self::default() }
    }

    pub fn lte(v: impl Into<IndexValue>) -> Self {
        Self { lte: Some(v.into()), ..Self::default() }
    }

    pub fn and_lt(mut self, v: impl Into<IndexValue>) -> Self {
        self.lt = Some(v.into());
        self
    }

    pub fn and_lte(mut self, v: impl Into<IndexValue>) -> Self {
        self.lte = Some(v.into());
        self
    }

    /// Lower bound and whether it is inclusive. `gt` wins over `gte`.
    pub fn lower(&self) -> Option<(&IndexValue, bool)> {
        match (&self.gt, &self.gte) {
            (Some(v), _) => Some((v, false)),
            (None, Some(v)) => Some((v, true)),
            (None, None) => None,
        }
    }

    /// Upper bound and whether it is inclusive. `lt` wins over `lte`.
    pub fn upper(&self) -> Option<(&IndexValue, bool)> {
        match (&self.lt, &self.lte) {
            (Some(v), _) => Some((v, false)),
            (None, Some(v)) => Some((v, true)),
            (None, None) => None,
        }
    }

    fn contains(&self, value: &IndexValue) -> bool {
        let above = |bound: &IndexValue, strict: bool| match value.partial_cmp(bound) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !strict,
            _ => false,
        };
        let below = |bound: &IndexValue, strict: bool| match value.partial_cmp(bound) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => !strict,
            _ => false,
        };
        self.gt.as_ref().map_or(true, |b| above(b, true))
            && self.gte.as_ref().map_or(true, |b| above(b, false))
            && self.lt.as_ref().map_or(true, |b| below(b, true))
            && self.lte.as_ref().map_or(true, |b| below(b, false))
    }
}

/// Constraint on one property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Equal(IndexValue),
    OneOf(Vec<IndexValue>),
    Range(RangeFilter),
}

impl FilterValue {
    pub fn matches(&self, value: &IndexValue) -> bool {
        match self {
            Self::Equal(v) => v == value,
            Self::OneOf(vs) => vs.contains(value),
            Self::Range(r) => r.contains(value),
        }
    }

    /// Reject constraints that can never be evaluated.
    pub fn validate(&self, property: &str) -> StoreResult<()> {
        match self {
            Self::OneOf(vs) if vs.is_empty() => Err(StoreError::InvalidQuery(format!(
                "one-of filter on {property} has no values"
            ))),
            Self::Range(r) if r.lower().is_none() && r.upper().is_none() => Err(
                StoreError::InvalidQuery(format!("range filter on {property} has no bounds")),
            ),
            _ => Ok(()),
        }
    }
}

impl From<IndexValue> for FilterValue {
    fn from(v: IndexValue) -> Self {
        Self::Equal(v)
    }
}

impl From<RangeFilter> for FilterValue {
    fn from(r: RangeFilter) -> Self {
        Self::Range(r)
    }
}

/// Property constraints that must all hold.
pub type Filter = BTreeMap<String, FilterValue>;

/// Validate every constraint of every filter.
pub fn validate_filters(filters: &[Filter]) -> StoreResult<()> {
    for filter in filters {
        for (property, value) in filter {
            value.validate(property)?;
        }
    }
    Ok(())
}

/// `true` when every constraint in `filter` holds for `indexes`.
pub fn matches_filter(filter: &Filter, indexes: &KeyValues) -> bool {
    filter.iter().all(|(property, constraint)| {
        indexes
            .get(property)
            .is_some_and(|value| constraint.matches(value))
    })
}

/// `true` when any filter matches. An empty list matches everything.
pub fn matches_any(filters: &[Filter], indexes: &KeyValues) -> bool {
    filters.is_empty() || filters.iter().any(|f| matches_filter(f, indexes))
}
