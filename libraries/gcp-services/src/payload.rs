//! The canonical Binary Authorization signing payload.
//!
//! This is the container signature JSON format; the admission service
//! reconstructs the same bytes for a deployed digest and checks the detached
//! signature against the attestor's registered keys, so the serialized form
//! must stay byte-stable: keys in the order below, pretty-printed, with a
//! trailing newline.

use serde::{Deserialize, Serialize};

/// Fixed `critical.type` marker of a Binary Authorization payload.
pub const PAYLOAD_TYPE: &str = "Google cloud binauthz container signature";

#[derive(Debug, Serialize, Deserialize)]
pub struct SigningPayload {
    pub critical: Critical,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Critical {
    pub identity: Identity,
    pub image: Image,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    pub docker_reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Image {
    pub docker_manifest_digest: String,
}

impl SigningPayload {
    /// Payload for `image@digest`.
    pub fn new(image: &str, digest: &str) -> Self {
        Self {
            critical: Critical {
                identity: Identity {
                    docker_reference: format!("{}@{}", image, digest),
                },
                image: Image {
                    docker_manifest_digest: digest.to_string(),
                },
                type_name: PAYLOAD_TYPE.to_string(),
            },
        }
    }

    /// The exact bytes that get signed.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_references_the_digest() {
        let payload = SigningPayload::new("gcr.io/demo/nginx", "sha256:abcd1234");
        assert_eq!(
            payload.critical.identity.docker_reference,
            "gcr.io/demo/nginx@sha256:abcd1234"
        );
        assert_eq!(
            payload.critical.image.docker_manifest_digest,
            "sha256:abcd1234"
        );
        assert_eq!(payload.critical.type_name, PAYLOAD_TYPE);
    }

    #[test]
    fn test_serialized_form_is_stable() {
        let bytes = SigningPayload::new("gcr.io/demo/nginx", "sha256:abcd1234")
            .to_bytes()
            .expect("Failed to serialize");
        let text = String::from_utf8(bytes).expect("payload is not UTF-8");

        assert!(text.ends_with('\n'));
        // Key order is part of the signed bytes.
        let identity = text.find("identity").expect("missing identity");
        let image = text.find("image").expect("missing image");
        let type_key = text.find("\"type\"").expect("missing type");
        assert!(identity < image && image < type_key);

        let parsed: SigningPayload = serde_json::from_str(&text).expect("Failed to deserialize");
        assert_eq!(
            parsed.critical.identity.docker_reference,
            "gcr.io/demo/nginx@sha256:abcd1234"
        );
    }
}
