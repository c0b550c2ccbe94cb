//! REST collaborator: authenticate, send messages, list rooms via the chat server's HTTP API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound for one REST request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Authenticated REST session for one bot identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Request/response calls the bridge needs from the chat server.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, ApiError>;

    /// Post a message to a room, optionally inside a thread. Returns the new message id.
    async fn send_message(
        &self,
        session: &Session,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError>;

    /// Direct-message rooms the identity already belongs to.
    async fn list_existing_rooms(&self, session: &Session) -> Result<Vec<String>, ApiError>;

    /// Resolve a group (private room) name to its room id.
    async fn lookup_group(&self, session: &Session, name: &str) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    user_id: String,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    message: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct ImListResponse {
    #[serde(default)]
    ims: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct GroupInfoResponse {
    #[serde(default)]
    group: Option<IdOnly>,
}

/// `ChatApi` over the server's `/api/v1` endpoints.
pub struct RestClient {
    base_url: String,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            base_url: format!("{}/api/v1", server_url.trim_end_matches('/')),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder, session: &Session) -> reqwest::RequestBuilder {
        req.header("X-Auth-Token", &session.token)
            .header("X-User-Id", &session.user_id)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
        what: &str,
    ) -> Result<T, ApiError> {
        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::NotAuthenticated);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("{} failed: {} {}", what, status, body)));
        }
        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl ChatApi for RestClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let res = self
            .client
            .post(self.url("login"))
            .json(&json!({ "user": username, "password": password }))
            .send()
            .await?;
        let data: LoginResponse = Self::read_json(res, "login").await?;
        match data {
            LoginResponse {
                data: Some(d),
                status,
                ..
            } if status.as_deref().unwrap_or("success") == "success" => Ok(Session {
                user_id: d.user_id,
                token: d.auth_token,
            }),
            LoginResponse { message, .. } => Err(ApiError::Api(
                message.unwrap_or_else(|| "login rejected".to_string()),
            )),
        }
    }

    async fn send_message(
        &self,
        session: &Session,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut message = json!({ "rid": room_id, "msg": text });
        if let (Some(tmid), Value::Object(map)) = (thread_id, &mut message) {
            map.insert("tmid".to_string(), Value::String(tmid.to_string()));
        }
        let res = self
            .authed(self.client.post(self.url("chat.sendMessage")), session)
            .json(&json!({ "message": message }))
            .send()
            .await?;
        let data: SendMessageResponse = Self::read_json(res, "chat.sendMessage").await?;
        data.message
            .map(|m| m.id)
            .ok_or_else(|| ApiError::Api("chat.sendMessage returned no message".to_string()))
    }

    async fn list_existing_rooms(&self, session: &Session) -> Result<Vec<String>, ApiError> {
        let res = self
            .authed(self.client.get(self.url("im.list")), session)
            .send()
            .await?;
        let data: ImListResponse = Self::read_json(res, "im.list").await?;
        Ok(data.ims.into_iter().map(|r| r.id).collect())
    }

    async fn lookup_group(&self, session: &Session, name: &str) -> Result<String, ApiError> {
        let res = self
            .authed(self.client.get(self.url("groups.info")), session)
            .query(&[("roomName", name)])
            .send()
            .await?;
        let data: GroupInfoResponse = Self::read_json(res, "groups.info").await?;
        data.group
            .map(|g| g.id)
            .ok_or_else(|| ApiError::Api(format!("group {} not found", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let c = RestClient::new("http://chat.local:3000/");
        assert_eq!(c.url("im.list"), "http://chat.local:3000/api/v1/im.list");
    }

    #[test]
    fn session_debug_hides_token() {
        let s = Session {
            user_id: "u1".to_string(),
            token: "secret".to_string(),
        };
        assert!(!format!("{:?}", s).contains("secret"));
    }

    #[test]
    fn login_response_parses() {
        let r: LoginResponse = serde_json::from_value(json!({
            "status": "success",
            "data": { "userId": "u1", "authToken": "t1", "me": {} }
        }))
        .unwrap();
        let d = r.data.unwrap();
        assert_eq!(d.user_id, "u1");
        assert_eq!(d.auth_token, "t1");
    }
}
