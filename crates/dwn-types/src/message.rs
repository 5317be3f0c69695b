//! Content-addressable message encoding.
//!
//! Messages are opaque JSON documents to the storage layer. They are stored as
//! DAG-CBOR blocks under a CIDv1 (`dag-cbor`, SHA2-256). A top-level
//! `encodedData` string carries an inline payload; it is stored next to the
//! block rather than inside it so the message CID depends only on the message
//! itself.

use serde_json::Value;

use crate::content_id::ContentId;
use crate::error::{StoreError, StoreResult};

/// A DWN message as seen by the storage layer.
pub type GenericMessage = Value;

/// Name of the detached inline payload property.
pub const ENCODED_DATA: &str = "encodedData";

/// A message ready to be written to a block store.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedMessage {
    pub cid: ContentId,
    pub bytes: Vec<u8>,
    pub encoded_data: Option<String>,
}

/// Encode `message` as DAG-CBOR, detaching any top-level `encodedData`.
pub fn encode_message(message: &GenericMessage) -> StoreResult<EncodedMessage> {
    let mut message = message.clone();
    let encoded_data = message
        .as_object_mut()
        .filter(|obj| obj.get(ENCODED_DATA).is_some_and(Value::is_string))
        .and_then(|obj| obj.remove(ENCODED_DATA))
        .and_then(|v| v.as_str().map(str::to_string));
    let bytes = serde_ipld_dagcbor::to_vec(&message).map_err(StoreError::serialization)?;
    Ok(EncodedMessage {
        cid: ContentId::dag_cbor(&bytes),
        bytes,
        encoded_data,
    })
}

/// Decode a stored block and re-attach its detached `encodedData`.
pub fn decode_message(bytes: &[u8], encoded_data: Option<&str>) -> StoreResult<GenericMessage> {
    let mut message: Value = serde_ipld_dagcbor::from_slice(bytes).map_err(StoreError::serialization)?;
    if let (Some(data), Some(obj)) = (encoded_data, message.as_object_mut()) {
        obj.insert(ENCODED_DATA.to_string(), Value::String(data.to_string()));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::DAG_CBOR;
    use serde_json::json;

    fn sample() -> GenericMessage {
        json!({
            "descriptor": {
                "interface": "Records",
                "method": "Write",
                "messageTimestamp": "2024-05-01T10:00:00.000000Z",
                "dataSize": 11
            },
            "recordId": "bafyrecord"
        })
    }

    #[test]
    fn encode_decode() {
        let encoded = encode_message(&sample()).unwrap();
        assert_eq!(encoded.cid.codec(), DAG_CBOR);
        assert!(encoded.encoded_data.is_none());
        encoded.cid.verify(&encoded.bytes).unwrap();
        assert_eq!(decode_message(&encoded.bytes, None).unwrap(), sample());
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_message(&sample()).unwrap();
        let b = encode_message(&sample()).unwrap();
        assert_eq!(a.cid, b.cid);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn encoded_data_is_detached() {
        let mut with_data = sample();
        with_data["encodedData"] = json!("aGVsbG8gd29ybGQ");
        let encoded = encode_message(&with_data).unwrap();
        assert_eq!(encoded.encoded_data.as_deref(), Some("aGVsbG8gd29ybGQ"));
        assert_eq!(encoded.cid, encode_message(&sample()).unwrap().cid);

        let decoded = decode_message(&encoded.bytes, encoded.encoded_data.as_deref()).unwrap();
        assert_eq!(decoded, with_data);
    }

    #[test]
    fn non_string_encoded_data_stays_inline() {
        let mut msg = sample();
        msg["encodedData"] = json!(42);
        let encoded = encode_message(&msg).unwrap();
        assert!(encoded.encoded_data.is_none());
        assert_eq!(decode_message(&encoded.bytes, None).unwrap(), msg);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_message(&[0xff, 0x00, 0x13], None),
            Err(StoreError::Serialization(_))
        ));
    }
}
