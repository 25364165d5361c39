use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::Config;
use crate::error::{ChatError, CoreResult};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{MessageRecord, Session, UserIdentity};
use crate::store::HistoryStore;

const SESSIONS: &str = "chat_sessions";
const MESSAGES: &str = "chat_messages";

/// History kept in the backend's PostgREST tables `chat_sessions` and
/// `chat_messages`. Row-level security on the backend scopes rows to the
/// bearer token, so requests carry the user's access token when present.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: HttpClient,
    base: String, // .../rest/v1
    public_key: SecretString,
}

#[derive(Serialize)]
struct NewSession<'a> {
    user_id: &'a str,
}

impl RestStore {
    pub fn new(http: HttpClient, base: String, public_key: SecretString) -> Self {
        Self {
            http,
            base,
            public_key,
        }
    }

    pub fn from_config(cfg: &Config, http: HttpClient) -> CoreResult<Self> {
        Ok(Self::new(http, cfg.rest_url(), cfg.public_key()?))
    }

    fn headers(&self, user: &UserIdentity) -> Vec<(String, String)> {
        let bearer = user
            .access_token
            .as_ref()
            .map(|t| t.expose_secret())
            .unwrap_or_else(|| self.public_key.expose_secret());
        vec![
            ("apikey".to_string(), self.public_key.expose_secret().to_string()),
            ("Authorization".to_string(), format!("Bearer {bearer}")),
            ("Prefer".to_string(), "return=representation".to_string()),
        ]
    }

    fn table_url(&self, table: &str, query: &[(&str, String)]) -> CoreResult<String> {
        let raw = format!("{}/{}", self.base.trim_end_matches('/'), table);
        let url = reqwest::Url::parse_with_params(&raw, query)
            .map_err(|e| ChatError::Validation(format!("bad store url '{raw}': {e}")))?;
        Ok(url.into())
    }

    async fn get_rows<R: serde::de::DeserializeOwned>(
        &self,
        user: &UserIdentity,
        table: &str,
        query: &[(&str, String)],
    ) -> CoreResult<Vec<R>> {
        let url = self.table_url(table, query)?;
        let owned = self.headers(user);
        let hdrs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.http
            .get_json::<Vec<R>>(&url, &hdrs, &RequestCtx::default())
            .await
            .map_err(store_err)
    }

    async fn insert_rows<T: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        user: &UserIdentity,
        table: &str,
        body: &T,
    ) -> CoreResult<Vec<R>> {
        let url = self.table_url(table, &[])?;
        let owned = self.headers(user);
        let hdrs: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        self.http
            .post_json::<_, Vec<R>>(&url, body, &hdrs, &RequestCtx::default())
            .await
            .map_err(store_err)
    }
}

/// Store failures never count as "assistant unreachable".
fn store_err(e: ChatError) -> ChatError {
    match e {
        ChatError::Store(_) => e,
        other => ChatError::Store(other.to_string()),
    }
}

#[async_trait]
impl HistoryStore for RestStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn ensure_session(&self, user: &UserIdentity) -> CoreResult<Session> {
        let existing: Vec<Session> = self
            .get_rows(
                user,
                SESSIONS,
                &[
                    ("user_id", format!("eq.{}", user.user_id)),
                    ("select", "id,user_id,created_at".to_string()),
                    ("order", "created_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        if let Some(s) = existing.into_iter().next() {
            return Ok(s);
        }
        let created: Vec<Session> = self
            .insert_rows(user, SESSIONS, &NewSession { user_id: &user.user_id })
            .await?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Store("session insert returned no row".into()))
    }

    async fn append_message(&self, user: &UserIdentity, record: &MessageRecord) -> CoreResult<()> {
        let _: Vec<serde_json::Value> = self.insert_rows(user, MESSAGES, record).await?;
        Ok(())
    }

    async fn list_messages(&self, user: &UserIdentity, session_id: &str) -> CoreResult<Vec<MessageRecord>> {
        self.get_rows(
            user,
            MESSAGES,
            &[
                ("session_id", format!("eq.{session_id}")),
                ("select", "*".to_string()),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }
}
