use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KiraError;
use crate::sort::SortValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCursor {
    pub query: String,
    pub after: Vec<SortValue>,
}

impl PageCursor {
    pub fn encode(&self) -> Result<String, KiraError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|err| KiraError::InvalidPageToken(format!("encode: {err}")))?;
        Ok(hex::encode(bytes))
    }

    pub fn decode(token: &str) -> Result<Self, KiraError> {
        let bytes = hex::decode(token.trim())
            .map_err(|_| KiraError::InvalidPageToken("token is not valid hex".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| KiraError::InvalidPageToken("token payload is malformed".to_string()))
    }
}

pub fn query_fingerprint(collection: &str, filter: &str, sort: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0]);
    hasher.update(filter.as_bytes());
    hasher.update([0]);
    hasher.update(sort.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..12])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn token_decodes_to_same_cursor() {
        let cursor = PageCursor {
            query: query_fingerprint("study_set", "", "id:asc"),
            after: vec![SortValue::Missing, SortValue::Present(json!("nmdc:sty-1"))],
        };
        let token = cursor.encode().unwrap();
        assert!(token.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_eq!(PageCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert_matches!(PageCursor::decode("zz"), Err(KiraError::InvalidPageToken(_)));
        assert_matches!(
            PageCursor::decode(&hex::encode(b"not json")),
            Err(KiraError::InvalidPageToken(_))
        );
    }

    #[test]
    fn fingerprint_separates_fields() {
        assert_ne!(
            query_fingerprint("a", "bc", ""),
            query_fingerprint("a", "b", "c")
        );
    }
}
