//! Signature verification for inbound webhooks.
//!
//! The signed message is `METHOD.path.timestamp.body`, where `path` is the
//! path component of the URL the provider was told to call and `body` is
//! the raw request body, byte for byte.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{PluginError, PluginResult};
use crate::plugin::VerifyWebhookRequest;

type HmacSha256 = Hmac<Sha256>;

/// Config metadata key holding the shared HMAC secret.
pub const SECRET_METADATA_KEY: &str = "secret";
/// Config metadata key holding the provider's hex Ed25519 public key.
pub const PUBLIC_KEY_METADATA_KEY: &str = "public_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestEncoding {
    Base64,
    Hex,
}

impl DigestEncoding {
    fn encode(&self, bytes: &[u8]) -> String {
        match self {
            DigestEncoding::Base64 => STANDARD.encode(bytes),
            DigestEncoding::Hex => hex::encode(bytes),
        }
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        match self {
            DigestEncoding::Base64 => STANDARD.decode(text.trim()).ok(),
            DigestEncoding::Hex => hex::decode(text.trim()).ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256(DigestEncoding),
    /// Hex signature checked against the hex public key in the config.
    Ed25519,
}

/// Where a provider puts its signature and how it computes it.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    scheme: SignatureScheme,
    signature_header: String,
    timestamp_header: String,
    method: String,
}

impl WebhookVerifier {
    pub fn new(scheme: SignatureScheme, signature_header: &str, timestamp_header: &str) -> Self {
        Self {
            scheme,
            signature_header: signature_header.to_string(),
            timestamp_header: timestamp_header.to_string(),
            method: "POST".to_string(),
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Check the envelope's signature. Every failure is terminal.
    pub fn verify(&self, req: &VerifyWebhookRequest) -> PluginResult<()> {
        let result = self.check(req);
        if let Err(err) = &result {
            warn!(webhook = %req.config.name, error = %err, "Webhook signature rejected");
        }
        result
    }

    fn check(&self, req: &VerifyWebhookRequest) -> PluginResult<()> {
        let signature = req
            .webhook
            .header(&self.signature_header)
            .ok_or_else(|| rejected(format!("missing {} header", self.signature_header)))?;
        let timestamp = req
            .webhook
            .header(&self.timestamp_header)
            .ok_or_else(|| rejected(format!("missing {} header", self.timestamp_header)))?;
        let path = signed_path(&req.full_url, &req.config.url_path)?;
        let message = signing_message(&self.method, &path, timestamp, &req.webhook.body);

        match self.scheme {
            SignatureScheme::HmacSha256(encoding) => {
                let secret = req
                    .config
                    .metadata
                    .get(SECRET_METADATA_KEY)
                    .ok_or_else(|| rejected("missing webhook secret"))?;
                let provided = encoding
                    .decode(signature)
                    .ok_or_else(|| rejected("invalid signature encoding"))?;
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|_| rejected("invalid webhook secret"))?;
                mac.update(&message);
                mac.verify_slice(&provided)
                    .map_err(|_| rejected("signature mismatch"))
            }
            SignatureScheme::Ed25519 => {
                let public_key = req
                    .config
                    .metadata
                    .get(PUBLIC_KEY_METADATA_KEY)
                    .and_then(|k| hex::decode(k).ok())
                    .ok_or_else(|| rejected("missing or invalid public key"))?;
                let provided =
                    hex::decode(signature.trim()).map_err(|_| rejected("invalid signature encoding"))?;
                if verify_ed25519(&public_key, &message, &provided) {
                    Ok(())
                } else {
                    Err(rejected("signature mismatch"))
                }
            }
        }
    }
}

fn rejected(reason: impl Into<String>) -> PluginError {
    PluginError::WebhookVerificationFailed(reason.into())
}

fn signed_path(full_url: &str, url_path: &str) -> PluginResult<String> {
    if full_url.is_empty() {
        return Ok(url_path.to_string());
    }
    reqwest::Url::parse(full_url)
        .map(|url| url.path().to_string())
        .map_err(|_| rejected(format!("invalid webhook url {}", full_url)))
}

/// `METHOD.path.timestamp.body`
pub fn signing_message(method: &str, path: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut message = format!("{}.{}.{}.", method, path, timestamp).into_bytes();
    message.extend_from_slice(body);
    message
}

/// Compute an HMAC-SHA256 signature the way a provider would.
pub fn sign_hmac_sha256(
    secret: &str,
    message: &[u8],
    encoding: DigestEncoding,
) -> PluginResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PluginError::InvalidConfig(format!("webhook secret: {}", e)))?;
    mac.update(message);
    Ok(encoding.encode(&mac.finalize().into_bytes()))
}

/// Verify an Ed25519 signature. Wrong key or signature lengths are a
/// failed verification, not an error.
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let pk_bytes: [u8; 32] = match public_key.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig_bytes: [u8; 64] = match signature.try_into() {
        Ok(b) => b,
        Err(_) => return false,
    };
    let verifying_key = match VerifyingKey::from_bytes(&pk_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };
    verifying_key
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Stable key for a delivery: SHA-256 of the config name and raw body.
pub fn idempotency_key(config_name: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) mod test_keys {
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    /// Returns (private_key_bytes, public_key_bytes).
    pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
        let signing_key = SigningKey::generate(&mut OsRng);
        (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
    }

    pub fn sign_message(private_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(private_key).sign(message).to_bytes()
    }
}
