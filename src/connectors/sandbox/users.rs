use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::SandboxPlugin;
use super::client::RawConnection;
use crate::error::{PluginError, PluginResult};
use crate::models::{
    CallbackState, ConnectionStatus, Metadata, OpenBankingConnection, PaymentServiceUser, Token,
};
use crate::plugin::{
    CompleteUserLinkRequest, CompleteUserLinkResponse, CreateUserRequest, CreateUserResponse,
    DeleteUserConnectionRequest, DeleteUserRequest, UserLinkRequest, UserLinkResponse,
};

/// User metadata key holding the sandbox-side user id.
pub const USER_ID_METADATA_KEY: &str = "sandbox_user_id";

fn sandbox_user_id(user: &PaymentServiceUser) -> PluginResult<&str> {
    user.metadata
        .get(USER_ID_METADATA_KEY)
        .map(String::as_str)
        .ok_or_else(|| PluginError::InvalidRequest(format!("user {} is not registered with sandbox", user.id)))
}

fn connection_id(connection: &OpenBankingConnection) -> PluginResult<u64> {
    connection.connection_id.parse().map_err(|_| {
        PluginError::InvalidRequest(format!("not a sandbox connection: {}", connection.connection_id))
    })
}

fn to_connection(raw: RawConnection) -> OpenBankingConnection {
    let mut metadata = Metadata::new();
    metadata.insert(USER_ID_METADATA_KEY.to_string(), raw.user_id);
    OpenBankingConnection {
        connection_id: raw.id.to_string(),
        created_at: raw.created_at,
        data_updated_at: None,
        status: ConnectionStatus::Active,
        error: None,
        access_token: None,
        metadata,
    }
}

impl SandboxPlugin {
    pub(super) fn register_user(&self, req: CreateUserRequest) -> PluginResult<CreateUserResponse> {
        let psp_user_id = self.client.create_user(&req.user.id.to_string())?;
        info!(user = %req.user.id, psp_user_id = %psp_user_id, "Created sandbox user");

        let mut metadata = Metadata::new();
        metadata.insert(USER_ID_METADATA_KEY.to_string(), psp_user_id.clone());
        Ok(CreateUserResponse {
            permanent_token: Some(Token {
                token: format!("perm_{}", Uuid::new_v4().simple()),
                expires_at: Utc::now() + Duration::days(365),
            }),
            psp_user_id: Some(psp_user_id),
            metadata,
        })
    }

    /// Shared by create and update: an update passes the connection to
    /// re-authorise.
    pub(super) fn start_link(&self, req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        let user_id = sandbox_user_id(&req.user)?;
        let existing = req.connection.as_ref().map(connection_id).transpose()?;
        let code = self.client.start_link(user_id, existing)?;

        let base = format!("{}/connect", self.config.link_base_url.trim_end_matches('/'));
        let mut link = reqwest::Url::parse(&base)
            .map_err(|e| PluginError::InvalidConfig(format!("linkBaseUrl: {}", e)))?;
        link.query_pairs_mut()
            .append_pair("code", &code)
            .append_pair("state", &req.callback_state)
            .append_pair("redirect_uri", &req.redirect_url)
            .append_pair("app", &req.application_name);

        Ok(UserLinkResponse {
            link: link.to_string(),
            temporary_link_token: Some(Token {
                token: format!("tmp_{}", Uuid::new_v4().simple()),
                expires_at: Utc::now() + self.client.link_token_ttl(),
            }),
        })
    }

    /// The redirect must carry the state minted for this attempt before
    /// anything else in it is trusted.
    pub(super) fn complete_link(
        &self,
        req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        let call = &req.http_call;
        let state = call
            .query("state")
            .ok_or_else(|| PluginError::InvalidRequest("missing state".into()))?;
        let state = CallbackState::decode(state)?;
        if state.attempt_id != req.attempt_id {
            return Err(PluginError::InvalidRequest(format!(
                "callback state belongs to attempt {}",
                state.attempt_id
            )));
        }

        if let Some(error) = call.query("error") {
            let detail = call.query("error_description").unwrap_or(error);
            return Ok(CompleteUserLinkResponse::Error {
                error: detail.to_string(),
            });
        }

        let code = call
            .query("code")
            .ok_or_else(|| PluginError::InvalidRequest("missing code".into()))?;
        let connection = to_connection(self.client.exchange_code(code)?);
        info!(attempt = %req.attempt_id, connection = %connection.connection_id, "Sandbox link completed");
        Ok(CompleteUserLinkResponse::Success {
            connections: vec![connection],
        })
    }

    pub(super) fn remove_connection(&self, req: DeleteUserConnectionRequest) -> PluginResult<()> {
        sandbox_user_id(&req.user)?;
        self.client.delete_connection(connection_id(&req.connection)?)
    }

    pub(super) fn remove_user(&self, req: DeleteUserRequest) -> PluginResult<()> {
        self.client.delete_user(sandbox_user_id(&req.user)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::models::HttpCallInformation;
    use crate::plugin::Plugin;

    fn user() -> PaymentServiceUser {
        PaymentServiceUser {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            created_at: Utc::now(),
            email: Some("ada@example.com".into()),
            phone_number: None,
            locale: Some("fr".into()),
            metadata: Metadata::new(),
        }
    }

    fn link_request(user: PaymentServiceUser, attempt_id: Uuid) -> UserLinkRequest {
        UserLinkRequest {
            attempt_id,
            user,
            connection: None,
            application_name: "Ledger".into(),
            client_redirect_url: None,
            redirect_url: "https://app.example.com/callback".into(),
            callback_state: CallbackState::new(attempt_id).encode().unwrap(),
            webhook_base_url: "https://app.example.com/webhooks/sandbox-test".into(),
        }
    }

    fn redirect(link: &str, extra: &[(&str, &str)]) -> HttpCallInformation {
        let url = reqwest::Url::parse(link).unwrap();
        let mut call = HttpCallInformation::default();
        for (key, value) in url.query_pairs() {
            if key == "code" || key == "state" {
                call.query_values.insert(key.to_string(), vec![value.to_string()]);
            }
        }
        for (key, value) in extra {
            call.query_values.insert(key.to_string(), vec![value.to_string()]);
        }
        call
    }

    async fn registered(plugin: &SandboxPlugin) -> PaymentServiceUser {
        let mut user = user();
        let resp = plugin.create_user(CreateUserRequest { user: user.clone() }).await.unwrap();
        assert!(resp.permanent_token.is_some());
        user.metadata = resp.metadata;
        user
    }

    #[tokio::test]
    async fn test_link_flow() {
        let (plugin, client) = testing::plugin();
        let user = registered(&plugin).await;
        let attempt = Uuid::new_v4();

        let resp = plugin.create_user_link(link_request(user.clone(), attempt)).await.unwrap();
        assert!(resp.link.starts_with("https://sandbox.example.com/connect?code=code_"));
        assert!(resp.link.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback"));
        let token = resp.temporary_link_token.unwrap();
        assert!(!token.is_expired(Utc::now()));

        let done = plugin
            .complete_user_link(CompleteUserLinkRequest {
                http_call: redirect(&resp.link, &[]),
                attempt_id: attempt,
            })
            .await
            .unwrap();
        let CompleteUserLinkResponse::Success { connections } = done else {
            panic!("link should succeed");
        };
        assert_eq!(connections.len(), 1);
        let psp_user = user.metadata[USER_ID_METADATA_KEY].clone();
        assert_eq!(client.connections(&psp_user).len(), 1);

        plugin.delete_user(DeleteUserRequest { user }).await.unwrap();
        assert!(client.connections(&psp_user).is_empty());
    }

    #[tokio::test]
    async fn test_complete_rejects_foreign_attempt() {
        let (plugin, _) = testing::plugin();
        let user = registered(&plugin).await;
        let resp = plugin
            .create_user_link(link_request(user, Uuid::new_v4()))
            .await
            .unwrap();
        let err = plugin
            .complete_user_link(CompleteUserLinkRequest {
                http_call: redirect(&resp.link, &[]),
                attempt_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_complete_reports_provider_error() {
        let (plugin, _) = testing::plugin();
        let user = registered(&plugin).await;
        let attempt = Uuid::new_v4();
        let resp = plugin.create_user_link(link_request(user, attempt)).await.unwrap();
        let done = plugin
            .complete_user_link(CompleteUserLinkRequest {
                http_call: redirect(&resp.link, &[("error", "access_denied")]),
                attempt_id: attempt,
            })
            .await
            .unwrap();
        assert_eq!(
            done,
            CompleteUserLinkResponse::Error {
                error: "access_denied".into()
            }
        );
    }

    #[tokio::test]
    async fn test_update_link_reuses_connection() {
        let (plugin, client) = testing::plugin();
        let user = registered(&plugin).await;
        let attempt = Uuid::new_v4();
        let first = plugin.create_user_link(link_request(user.clone(), attempt)).await.unwrap();
        let CompleteUserLinkResponse::Success { connections } = plugin
            .complete_user_link(CompleteUserLinkRequest {
                http_call: redirect(&first.link, &[]),
                attempt_id: attempt,
            })
            .await
            .unwrap()
        else {
            panic!("link should succeed");
        };
        let connection = connections[0].clone();

        let err = plugin
            .update_user_link(link_request(user.clone(), Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let attempt = Uuid::new_v4();
        let mut req = link_request(user.clone(), attempt);
        req.connection = Some(connection.clone());
        let update = plugin.update_user_link(req).await.unwrap();
        let CompleteUserLinkResponse::Success { connections } = plugin
            .complete_update_user_link(CompleteUserLinkRequest {
                http_call: redirect(&update.link, &[]),
                attempt_id: attempt,
            })
            .await
            .unwrap()
        else {
            panic!("update should succeed");
        };
        assert_eq!(connections[0].connection_id, connection.connection_id);
        assert_eq!(client.connections(&user.metadata[USER_ID_METADATA_KEY]).len(), 1);

        plugin
            .delete_user_connection(DeleteUserConnectionRequest { user: user.clone(), connection })
            .await
            .unwrap();
        assert!(client.connections(&user.metadata[USER_ID_METADATA_KEY]).is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_user() {
        let (plugin, _) = testing::plugin();
        let err = plugin
            .create_user_link(link_request(user(), Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }
}
