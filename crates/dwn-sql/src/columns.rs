//! Mapping of indexed properties onto `message_store` columns.
//!
//! Column values hold the same order-preserving encoding as the embedded
//! index, so SQLite's binary text collation orders rows exactly as a key scan
//! would.

use dwn_index::encode_value;
use dwn_types::{Filter, FilterValue, IndexValue, KeyValues, StoreError, StoreResult};

/// Indexed properties and their columns.
pub const INDEXED_COLUMNS: &[(&str, &str)] = &[
    ("interface", "interface"),
    ("method", "method"),
    ("schema", "schema"),
    ("dataCid", "data_cid"),
    ("dataSize", "data_size"),
    ("dateCreated", "date_created"),
    ("messageTimestamp", "message_timestamp"),
    ("dataFormat", "data_format"),
    ("isLatestBaseState", "is_latest_base_state"),
    ("published", "published"),
    ("author", "author"),
    ("recordId", "record_id"),
    ("entryId", "entry_id"),
    ("datePublished", "date_published"),
    ("latest", "latest"),
    ("protocol", "protocol"),
    ("dateExpires", "date_expires"),
    ("description", "description"),
    ("grantedTo", "granted_to"),
    ("grantedBy", "granted_by"),
    ("grantedFor", "granted_for"),
    ("permissionsRequestId", "permissions_request_id"),
    ("attester", "attester"),
    ("protocolPath", "protocol_path"),
    ("recipient", "recipient"),
    ("contextId", "context_id"),
    ("parentId", "parent_id"),
    ("permissionsGrantId", "permissions_grant_id"),
];

/// Column of `property`, or `UnsupportedProperty`.
pub fn column(property: &str) -> StoreResult<&'static str> {
    INDEXED_COLUMNS
        .iter()
        .find(|(name, _)| *name == property)
        .map(|(_, column)| *column)
        .ok_or_else(|| StoreError::UnsupportedProperty(property.to_string()))
}

/// `(column, encoded value)` for every property of `indexes`.
pub fn encode_row(indexes: &KeyValues) -> StoreResult<Vec<(&'static str, String)>> {
    indexes
        .iter()
        .map(|(property, value)| Ok((column(property)?, encode_value(value))))
        .collect()
}

/// SQL condition and its parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Condition {
    pub sql: String,
    pub params: Vec<String>,
}

// Range comparisons only hold between values of the same kind.
fn kind_guard(column: &str, value: &IndexValue) -> String {
    match value {
        IndexValue::String(_) => format!("substr({column}, 1, 1) = '\"'"),
        IndexValue::Bool(_) => format!("{column} IN ('true', 'false')"),
        IndexValue::Number(_) => format!("({column} GLOB '[0-9]*' OR {column} GLOB '!*')"),
    }
}

fn constraint(column: &str, value: &FilterValue, params: &mut Vec<String>) -> String {
    match value {
        FilterValue::Equal(v) => {
            params.push(encode_value(v));
            format!("{column} = ?")
        }
        FilterValue::OneOf(vs) => {
            params.extend(vs.iter().map(encode_value));
            let marks = vec!["?"; vs.len()].join(", ");
            format!("{column} IN ({marks})")
        }
        FilterValue::Range(range) => {
            let mut parts = Vec::new();
            for (bound, op) in [
                (&range.gt, ">"),
                (&range.gte, ">="),
                (&range.lt, "<"),
                (&range.lte, "<="),
            ] {
                if let Some(v) = bound {
                    parts.push(kind_guard(column, v));
                    parts.push(format!("{column} {op} ?"));
                    params.push(encode_value(v));
                }
            }
            parts.join(" AND ")
        }
    }
}

/// Condition matching rows that satisfy any of `filters`.
///
/// Returns `None` when every row matches.
pub fn filters_condition(filters: &[Filter]) -> StoreResult<Option<Condition>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut params = Vec::new();
    let mut alternatives = Vec::with_capacity(filters.len());
    for filter in filters {
        if filter.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(filter.len());
        for (property, value) in filter {
            parts.push(constraint(column(property)?, value, &mut params));
        }
        alternatives.push(format!("({})", parts.join(" AND ")));
    }
    Ok(Some(Condition {
        sql: alternatives.join(" OR "),
        params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwn_types::RangeFilter;

    fn filter(property: &str, value: impl Into<FilterValue>) -> Filter {
        Filter::from([(property.to_string(), value.into())])
    }

    #[test]
    fn whitelist_lookup() {
        assert_eq!(column("dateCreated").unwrap(), "date_created");
        assert!(matches!(column("nope"), Err(StoreError::UnsupportedProperty(_))));
    }

    #[test]
    fn encoded_rows() {
        let indexes = KeyValues::from([
            ("published".to_string(), IndexValue::from(true)),
            ("dataSize".to_string(), IndexValue::from(12)),
        ]);
        assert_eq!(
            encode_row(&indexes).unwrap(),
            vec![
                ("data_size", "0000000000000000012".to_string()),
                ("published", "true".to_string()),
            ]
        );
    }

    #[test]
    fn no_filters_means_no_condition() {
        assert_eq!(filters_condition(&[]).unwrap(), None);
        assert_eq!(filters_condition(&[Filter::new()]).unwrap(), None);
    }

    #[test]
    fn filters_translate_to_or_of_ands() {
        let mut first = filter("interface", IndexValue::from("Records"));
        first.insert("method".into(), FilterValue::OneOf(vec!["Write".into(), "Delete".into()]));
        let second = filter("dataSize", RangeFilter::gte(10));

        let condition = filters_condition(&[first, second]).unwrap().unwrap();
        assert_eq!(
            condition.sql,
            "(interface = ? AND method IN (?, ?)) OR \
             ((data_size GLOB '[0-9]*' OR data_size GLOB '!*') AND data_size >= ?)"
        );
        assert_eq!(
            condition.params,
            vec!["\"Records", "\"Write", "\"Delete", "0000000000000000010"]
        );
    }

    #[test]
    fn unknown_filter_property_is_rejected() {
        let err = filters_condition(&[filter("n", IndexValue::from(1))]).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedProperty(_)));
    }
}
