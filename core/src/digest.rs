//! SHA-256 fingerprints over canonical JSON.
//!
//! All hashed structures use `BTreeMap`/`BTreeSet` and fixed field order, so the
//! serialized form (and therefore the digest) is stable for identical values.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::AuditRecord;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&serde_json::to_vec(value)?))
}

/// Serialized form of a record as stored and hashed.
///
/// Fails when the text would not read back as the same record. JSON has no
/// encoding for NaN or infinities, so such values would turn into `null` and
/// leave the stored record unreadable.
pub fn canonical_json(record: &AuditRecord) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(record)?;
    let parsed: AuditRecord = serde_json::from_str(&body)?;
    if parsed != *record {
        return Err(serde::ser::Error::custom(
            "record does not survive serialization (non-finite number?)",
        ));
    }
    Ok(body)
}

/// Links a stored record body to the previous chain head: `sha256(prev | body)`.
///
/// Hashing the stored text rather than a re-serialization keeps verification
/// independent of float formatting round-trips.
pub fn chain_digest(prev: Option<&str>, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of a prompt/response exchange kept as the transcript reference.
pub fn transcript_digest(prompt: &str, response: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b"\n---\n");
    hasher.update(response.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn fingerprint_is_stable_for_equal_maps() {
        let mut a = BTreeMap::new();
        a.insert("SOL", 1.0);
        a.insert("ETH", 2.0);
        let mut b = BTreeMap::new();
        b.insert("ETH", 2.0);
        b.insert("SOL", 1.0);
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn chain_digest_depends_on_predecessor() {
        let body = r#"{"cycle_id":1}"#;
        let genesis = chain_digest(None, body);
        assert_eq!(genesis, chain_digest(None, body));
        assert_ne!(genesis, chain_digest(Some(&genesis), body));
        assert_eq!(genesis.len(), 64);
    }

    #[test]
    fn transcript_digest_separates_prompt_and_response() {
        assert_ne!(transcript_digest("ab", "c"), transcript_digest("a", "bc"));
    }
}
