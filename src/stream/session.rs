use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::StreamError;

/// Server-side session backing a push stream (a listen key, usually).
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Create a session and return its token.
    async fn open(&self) -> Result<String, StreamError>;

    /// Extend the session's lifetime.
    async fn keepalive(&self, token: &str) -> Result<(), StreamError>;

    async fn close(&self, token: &str) -> Result<(), StreamError>;
}

const USER_DATA_STREAM_PATH: &str = "/api/v3/userDataStream";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

/// Exchange user-data-stream listen key over REST.
#[derive(Clone)]
pub struct ListenKeySession {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ListenKeySession {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, USER_DATA_STREAM_PATH)
    }
}

#[async_trait]
impl SessionProvider for ListenKeySession {
    async fn open(&self) -> Result<String, StreamError> {
        let resp = self
            .http
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        let body: ListenKeyResponse = resp.json().await?;
        debug!("Listen key created");
        Ok(body.listen_key)
    }

    async fn keepalive(&self, token: &str) -> Result<(), StreamError> {
        self.http
            .put(self.url())
            .query(&[("listenKey", token)])
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn close(&self, token: &str) -> Result<(), StreamError> {
        self.http
            .delete(self.url())
            .query(&[("listenKey", token)])
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;
        debug!("Listen key closed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Hands out `key-1`, `key-2`, ... and records every call.
    #[derive(Default)]
    pub struct MockSession {
        opened: AtomicUsize,
        pub keepalives: AtomicUsize,
        pub closed: Mutex<Vec<String>>,
    }

    impl MockSession {
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> Vec<String> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionProvider for MockSession {
        async fn open(&self) -> Result<String, StreamError> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("key-{}", n))
        }

        async fn keepalive(&self, _token: &str) -> Result<(), StreamError> {
            self.keepalives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self, token: &str) -> Result<(), StreamError> {
            self.closed.lock().unwrap().push(token.to_string());
            Ok(())
        }
    }
}
