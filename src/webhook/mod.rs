//! Inbound webhook pipeline: verify → trim → translate.
//!
//! Plugins use these pieces inside their `verify_webhook`, `trim_webhook`
//! and `translate_webhook`; [`Connector::handle_webhook`] runs the stages
//! in order and applies the resulting events.
//!
//! [`Connector::handle_webhook`]: crate::connector::Connector::handle_webhook

mod health;
mod translate;
mod trim;
mod verify;

pub use health::HealthMap;
#[cfg(test)]
pub(crate) use translate::fixtures;
pub use translate::{AccountSync, ConnectionSync, check_ordering, keep_valid};
pub use trim::{DEFAULT_CHUNK_SIZE, trim_json_array, trim_nested};
#[cfg(test)]
pub(crate) use verify::test_keys;
pub use verify::{
    DigestEncoding, PUBLIC_KEY_METADATA_KEY, SECRET_METADATA_KEY, SignatureScheme,
    WebhookVerifier, idempotency_key, sign_hmac_sha256, signing_message, verify_ed25519,
};

/// `base_url + url_path` without doubling the slash.
pub fn full_url(base_url: &str, url_path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url_path.trim_start_matches('/')
    )
}
