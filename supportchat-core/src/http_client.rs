use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{ChatError, CoreResult};
use crate::stream::OpenedReply;

/// Request context carries the correlation id of the current exchange.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(ms) = cfg.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| ChatError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "supportchat/0.1".to_string(),
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .inner
            .request(method, url)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self.request(reqwest::Method::POST, url, headers, ctx).json(body);
        decode_json(url, send(url, req).await?).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self.request(reqwest::Method::GET, url, headers, ctx);
        decode_json(url, send(url, req).await?).await
    }

    /// POST JSON and hand back the raw response body as a chunk stream.
    /// Fails before any streaming when the status is not 2xx or the response
    /// carries no body.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<OpenedReply> {
        let req = self
            .request(reqwest::Method::POST, url, headers, ctx)
            .header("Accept", "text/event-stream")
            .json(body);
        let resp = send(url, req).await?;

        if resp.status() == StatusCode::NO_CONTENT || resp.content_length() == Some(0) {
            return Err(ChatError::MissingBody { endpoint: url.to_string() });
        }
        let upstream_request_id = extract_request_id(resp.headers());

        let mut received = 0usize;
        let body = resp.bytes_stream().map(move |item| match item {
            Ok(chunk) => {
                received += chunk.len();
                Ok(chunk)
            }
            Err(e) => {
                tracing::debug!(error = %e, received, "reply stream read failed");
                Err(ChatError::StreamInterrupted { received })
            }
        });
        Ok(OpenedReply {
            body: Box::pin(body),
            upstream_request_id,
        })
    }
}

/// Send and map transport failures / non-2xx statuses to `ChatError`.
async fn send(url: &str, req: reqwest::RequestBuilder) -> CoreResult<reqwest::Response> {
    let resp = req.send().await.map_err(|e| {
        tracing::debug!(error = %e, url, "request failed");
        ChatError::Unreachable { endpoint: url.to_string() }
    })?;

    let status = resp.status();
    if !status.is_success() {
        let ra = parse_retry_after(resp.headers());
        let text = resp.text().await.unwrap_or_default();
        return Err(map_http_error(url, status, ra, &text));
    }
    Ok(resp)
}

async fn decode_json<R: DeserializeOwned>(url: &str, resp: reqwest::Response) -> CoreResult<R> {
    let status = resp.status();
    resp.json::<R>().await.map_err(|e| ChatError::UpstreamStatus {
        endpoint: url.to_string(),
        code: status.as_u16(),
        message: format!("json decode error: {e}"),
    })
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "sb-request-id", "x-deno-execution-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(endpoint: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after,
        },
        s => ChatError::UpstreamStatus {
            endpoint: endpoint.to_string(),
            code: s.as_u16(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn post_json_success() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/rest").header("x-request-id", "rid");
            then.status(200).json_body(json!({"ok": true}));
        });

        #[derive(serde::Deserialize)]
        struct Resp {
            ok: bool,
        }

        let client = HttpClient::new_default().unwrap();
        let ctx = RequestCtx { request_id: Some("rid") };
        let resp: Resp = client
            .post_json(&format!("{}/rest", server.base_url()), &json!({"msg":"hi"}), &[], &ctx)
            .await
            .unwrap();
        assert!(resp.ok);
        m.assert();
    }

    #[tokio::test]
    async fn get_json_429_maps_to_rate_limited() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/rest");
            then.status(429).header("Retry-After", "3").body("slow down");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .get_json::<serde_json::Value>(&format!("{}/rest", server.base_url()), &[], &RequestCtx::default())
            .await
            .unwrap_err();
        match err {
            ChatError::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(3)),
            other => panic!("expected RateLimited, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_json_200_bad_json_maps_to_upstream_status() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/rest");
            then.status(200).body("not-json");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_json::<_, serde_json::Value>(
                &format!("{}/rest", server.base_url()),
                &json!({}),
                &[],
                &RequestCtx::default(),
            )
            .await
            .unwrap_err();
        match err {
            ChatError::UpstreamStatus { code, message, .. } => {
                assert_eq!(code, 200);
                assert!(message.starts_with("json decode error"));
            }
            other => panic!("expected UpstreamStatus, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn post_stream_400_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(400).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let res = client
            .post_stream(&format!("{}/chat", server.base_url()), &json!({}), &[], &RequestCtx::default())
            .await;
        match res {
            Err(ChatError::UpstreamStatus { code, message, .. }) => {
                assert_eq!(code, 400);
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            Err(other) => panic!("expected UpstreamStatus, got: {:?}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn post_stream_204_is_missing_body() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(204);
        });
        let client = HttpClient::new_default().expect("client");
        let res = client
            .post_stream(&format!("{}/chat", server.base_url()), &json!({}), &[], &RequestCtx::default())
            .await;
        assert!(matches!(res, Err(ChatError::MissingBody { .. })));
    }

    #[tokio::test]
    async fn post_stream_yields_body_bytes() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat").header("accept", "text/event-stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .header("sb-request-id", "sb-42")
                .body("data: [DONE]\n");
        });
        let client = HttpClient::new_default().expect("client");
        let open = client
            .post_stream(&format!("{}/chat", server.base_url()), &json!({}), &[], &RequestCtx::default())
            .await
            .expect("stream opens");
        assert_eq!(open.upstream_request_id.as_deref(), Some("sb-42"));
        let chunks: Vec<_> = open.body.collect().await;
        let body: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(body, b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn network_error_maps_to_unreachable() {
        let client = HttpClient::new_default().expect("client");
        let url = "http://127.0.0.1:9/chat"; // port 9 (discard) is typically closed
        let err = client
            .post_json::<_, serde_json::Value>(url, &json!({}), &[], &RequestCtx::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unreachable { .. }));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ñ".repeat(200); // 400 bytes
        let t = truncate(&s, 301);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), 300 + 3);
    }
}
