//! Opaque continuation tokens.
//!
//! A cursor is the last key of a page (a flat map of key attribute to
//! string value), serialized as JSON and then base64 URL-safe encoded
//! without padding. Tokens carry no server state, so they stay valid
//! across restarts.

use base64::prelude::*;

use crate::error::{LogStackError, Result};
use crate::storage::{Index, LastKey};

/// Encodes and decodes continuation tokens.
pub struct CursorCodec;

impl CursorCodec {
    pub fn encode(last_key: &LastKey) -> String {
        // A map of strings always serializes.
        let json = serde_json::to_vec(last_key).unwrap_or_default();
        BASE64_URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<LastKey> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| LogStackError::InvalidCursor(format!("not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LogStackError::InvalidCursor(format!("not a key map: {e}")))
    }

    /// Decode an optional token for a scan of `partition` on `index`.
    ///
    /// The key must carry every key attribute of the index and point into
    /// the partition being scanned.
    pub fn decode_for(
        token: Option<&str>,
        index: &Index,
        partition: &str,
    ) -> Result<Option<LastKey>> {
        let Some(token) = token else {
            return Ok(None);
        };
        let last_key = Self::decode(token)?;

        for attribute in index.key_attributes() {
            if !last_key.contains_key(attribute) {
                return Err(LogStackError::InvalidCursor(format!(
                    "missing key attribute {attribute}"
                )));
            }
        }
        if last_key.get(index.partition_key).map(String::as_str) != Some(partition) {
            return Err(LogStackError::InvalidCursor(
                "cursor belongs to a different scan".to_string(),
            ));
        }

        Ok(Some(last_key))
    }
}
