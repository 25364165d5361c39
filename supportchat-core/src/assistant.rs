use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::CoreResult;
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{ChatMessage, StreamRequest};
use crate::source::ReplySource;
use crate::stream::OpenedReply;

/// Streaming chat endpoint hosted as an edge function.
#[derive(Debug, Clone)]
pub struct AssistantEndpoint {
    http: HttpClient,
    url: String,
    public_key: SecretString,
}

impl AssistantEndpoint {
    pub fn new(http: HttpClient, url: String, public_key: SecretString) -> Self {
        Self {
            http,
            url,
            public_key,
        }
    }

    pub fn from_config(cfg: &Config, http: HttpClient) -> CoreResult<Self> {
        Ok(Self::new(http, cfg.chat_url(), cfg.public_key()?))
    }

    #[cfg(test)]
    pub fn new_for_tests(url: &str) -> Self {
        Self::new(
            HttpClient::new_default().unwrap(),
            url.to_string(),
            SecretString::from("test-key"),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.public_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

#[async_trait]
impl ReplySource for AssistantEndpoint {
    fn name(&self) -> &str {
        "assistant"
    }

    async fn open(&self, messages: &[ChatMessage], exchange_id: &str) -> CoreResult<OpenedReply> {
        let payload = StreamRequest { messages };
        let ctx = RequestCtx {
            request_id: Some(exchange_id),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http.post_stream(&self.url, &payload, &hdrs, &ctx).await
    }
}
