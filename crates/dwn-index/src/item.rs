use serde::{Deserialize, Serialize};

use dwn_types::{IndexValue, KeyValues, StoreError, StoreResult};

/// One indexed item as stored in every forward entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedItem {
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub indexes: KeyValues,
}

impl IndexedItem {
    pub fn new(item_id: impl Into<String>, indexes: KeyValues) -> Self {
        Self {
            item_id: item_id.into(),
            indexes,
        }
    }
}

/// Position in a sort partition, handed out as an opaque continuation token.
///
/// The token is the hex encoding of `{"itemId": .., "value": ..}`. It names
/// the last item a caller has seen; the next page starts strictly after it,
/// so a token stays valid even if that item is deleted in between.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub value: IndexValue,
}

impl Cursor {
    /// Cursor pointing at `item` within the partition of `sort_property`.
    pub fn for_item(item: &IndexedItem, sort_property: &str) -> StoreResult<Self> {
        let value = item.indexes.get(sort_property).cloned().ok_or_else(|| {
            StoreError::InvalidQuery(format!(
                "item {} has no value for sort property {sort_property}",
                item.item_id
            ))
        })?;
        Ok(Self {
            item_id: item.item_id.clone(),
            value,
        })
    }

    pub fn encode(&self) -> StoreResult<String> {
        serde_json::to_vec(self)
            .map(hex::encode)
            .map_err(StoreError::serialization)
    }

    pub fn decode(token: &str) -> StoreResult<Self> {
        let bytes = hex::decode(token).map_err(|e| StoreError::InvalidCursor(format!("{token}: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidCursor(format!("{token}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_json_shape() {
        let item = IndexedItem::new("bafy1", KeyValues::from([("n".to_string(), IndexValue::from(5))]));
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"itemId":"bafy1","indexes":{"n":5}}"#);
        assert_eq!(serde_json::from_str::<IndexedItem>(&json).unwrap(), item);
    }

    #[test]
    fn cursor_token_is_hex() {
        let item = IndexedItem::new("m1", KeyValues::from([("ts".to_string(), IndexValue::from("2024"))]));
        let token = Cursor::for_item(&item, "ts").unwrap().encode().unwrap();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        let cursor = Cursor::decode(&token).unwrap();
        assert_eq!(cursor.item_id, "m1");
        assert_eq!(cursor.value, IndexValue::from("2024"));
    }

    #[test]
    fn missing_sort_property() {
        let item = IndexedItem::new("m1", KeyValues::new());
        assert!(matches!(Cursor::for_item(&item, "ts"), Err(StoreError::InvalidQuery(_))));
    }

    #[test]
    fn garbage_tokens_are_invalid_cursors() {
        for token in ["zz", "", "7b7d"] {
            assert!(matches!(Cursor::decode(token), Err(StoreError::InvalidCursor(_))), "{token}");
        }
    }
}
