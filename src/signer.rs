use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request signer keyed with the pre-shared secret.
///
/// The signed message is `body || timestamp || device_id` with no separators. The server
/// verifies exactly that layout, so it must not change.
#[derive(Clone)]
pub struct Signer {
    keyed: HmacSha256,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret.as_ref())?,
        })
    }

    /// Lowercase hex HMAC-SHA256. `body` must be the exact bytes that will be transmitted.
    pub fn sign(&self, body: &[u8], timestamp: &str, device_id: &str) -> String {
        let mut mac = self.keyed.clone();
        mac.update(body);
        mac.update(timestamp.as_bytes());
        mac.update(device_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"readings":[]}"#;
    const TS: &str = "2024-01-01T00:00:00Z";

    #[test]
    fn matches_pinned_signature() {
        let signer = Signer::new("s3cr3t").unwrap();
        assert_eq!(
            signer.sign(BODY, TS, "d1"),
            "8300e796801cf346624a103c5695bf7819cd281e462f9e798e6b283fef819add"
        );
        assert_eq!(
            signer.sign(BODY, TS, "d2"),
            "333513787bc081f0d15ead17d8378ba1d5e190de851637e736008065b713f875"
        );
    }

    #[test]
    fn is_deterministic() {
        let signer = Signer::new("s3cr3t").unwrap();
        assert_eq!(signer.sign(BODY, TS, "d1"), signer.sign(BODY, TS, "d1"));
    }

    #[test]
    fn every_input_changes_the_signature() {
        let signer = Signer::new("s3cr3t").unwrap();
        let base = signer.sign(BODY, TS, "d1");

        assert_ne!(base, signer.sign(br#"{"readings":[ ]}"#, TS, "d1"));
        assert_ne!(base, signer.sign(BODY, "2024-01-01T00:00:01Z", "d1"));
        assert_ne!(base, signer.sign(BODY, TS, "d3"));
        assert_ne!(base, Signer::new("other").unwrap().sign(BODY, TS, "d1"));
    }

    #[test]
    fn fields_are_concatenated_without_separators() {
        let signer = Signer::new("s3cr3t").unwrap();
        assert_eq!(
            signer.sign(b"ab", "c", "d"),
            signer.sign(b"a", "bc", "d")
        );
    }

    #[test]
    fn signing_twice_reuses_the_key_without_leaking_state() {
        let signer = Signer::new("s3cr3t").unwrap();
        let first = signer.sign(b"first", TS, "d1");
        let second = signer.sign(BODY, TS, "d1");
        assert_ne!(first, second);
        assert_eq!(
            second,
            "8300e796801cf346624a103c5695bf7819cd281e462f9e798e6b283fef819add"
        );
    }

    #[test]
    fn empty_and_long_secrets_are_accepted() {
        assert!(Signer::new("").is_ok());
        assert!(Signer::new(vec![7u8; 512]).is_ok());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let rendered = format!("{:?}", Signer::new("s3cr3t").unwrap());
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn renders_lowercase_hex() {
        let signature = Signer::new("s3cr3t").unwrap().sign(BODY, TS, "d1");
        assert_eq!(signature.len(), 64);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
