use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{ChatError, CoreResult};

pub const DEFAULT_GREETING: &str = "¡Hola! Estoy aquí para apoyarte. Todo lo que compartas es \
completamente anónimo y confidencial. ¿Cómo te sientes hoy?";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendCfg {
    /// Base URL of the hosted backend, e.g. https://xyz.supabase.co
    pub url: String,
    /// Name of the environment variable that contains the public (anon) key.
    pub anon_key_env: String,
    /// Edge function serving the streaming chat endpoint.
    #[serde(default = "default_chat_function")]
    pub chat_function: String,
}

fn default_chat_function() -> String {
    "chat".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local history, lost on exit.
    #[default]
    Memory,
    /// PostgREST tables on the backend.
    Rest,
    /// No history at all.
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StoreCfg {
    #[serde(default)]
    pub kind: StoreKind,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatCfg {
    /// First assistant line shown locally; empty string disables it.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ChatCfg {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
        }
    }
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds. Unset by default: a reply
    /// stream stays open as long as the endpoint keeps it open.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub chat: ChatCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ChatError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ChatError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ChatError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| ChatError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ChatError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| ChatError::Other(e.into())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> CoreResult<()> {
        let url = self.backend.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ChatError::Validation(format!(
                "backend.url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.backend.anon_key_env.trim().is_empty() {
            return Err(ChatError::Validation("backend.anon_key_env is empty".into()));
        }
        Ok(())
    }

    /// Public API credential, read from the configured environment variable.
    pub fn public_key(&self) -> CoreResult<SecretString> {
        let name = &self.backend.anon_key_env;
        match std::env::var(name) {
            Ok(v) if !v.trim().is_empty() => Ok(SecretString::from(v)),
            _ => Err(ChatError::Validation(format!(
                "environment variable {name} is not set"
            ))),
        }
    }

    fn base(&self) -> &str {
        self.backend.url.trim().trim_end_matches('/')
    }

    pub fn chat_url(&self) -> String {
        format!("{}/functions/v1/{}", self.base(), self.backend.chat_function)
    }

    /// Root of the REST tables, e.g. `https://xyz.supabase.co/rest/v1`.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.json");
        let json = r#"{
          "backend": {"url":"https://xyz.supabase.co/","anon_key_env":"SUPPORTCHAT_ANON_KEY"},
          "store": {"kind":"rest"}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.store.kind, StoreKind::Rest);
        assert_eq!(cfg.backend.chat_function, "chat");
        assert_eq!(cfg.chat.greeting, DEFAULT_GREETING);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, None);
        assert_eq!(cfg.chat_url(), "https://xyz.supabase.co/functions/v1/chat");
        assert_eq!(cfg.rest_url(), "https://xyz.supabase.co/rest/v1");
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.toml");
        let toml = r#"
[backend]
url = "http://localhost:54321"
anon_key_env = "LOCAL_ANON"
chat_function = "support-chat"

[chat]
greeting = ""

[http]
request_timeout_ms = 120000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.store.kind, StoreKind::Memory);
        assert_eq!(cfg.chat.greeting, "");
        assert_eq!(cfg.http.request_timeout_ms, Some(120_000));
        assert_eq!(cfg.chat_url(), "http://localhost:54321/functions/v1/support-chat");
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/supportchat-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            ChatError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            ChatError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn non_http_url_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.json");
        fs::write(&file, r#"{"backend":{"url":"ftp://x","anon_key_env":"K"}}"#).unwrap();
        match Config::from_path(&file).unwrap_err() {
            ChatError::Validation(msg) => assert!(msg.contains("backend.url")),
            other => panic!("expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("app.conf");
        fs::write(&json_path, r#"{"backend":{"url":"https://a","anon_key_env":"K"}}"#).unwrap();
        assert_eq!(Config::from_path(&json_path).unwrap().backend.url, "https://a");

        let toml_path = dir.path().join("app2.conf");
        fs::write(&toml_path, "[backend]\nurl = \"https://b\"\nanon_key_env = \"K\"\n").unwrap();
        assert_eq!(Config::from_path(&toml_path).unwrap().backend.url, "https://b");
    }

    #[test]
    fn public_key_reads_named_env_var() {
        let cfg = Config {
            backend: BackendCfg {
                url: "https://a".into(),
                anon_key_env: "SUPPORTCHAT_TEST_KEY_PRESENT".into(),
                chat_function: default_chat_function(),
            },
            store: StoreCfg::default(),
            chat: ChatCfg::default(),
            http: HttpCfg::default(),
        };
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("SUPPORTCHAT_TEST_KEY_PRESENT", "anon-123") };
        assert_eq!(cfg.public_key().unwrap().expose_secret(), "anon-123");

        let mut missing = cfg.clone();
        missing.backend.anon_key_env = "SUPPORTCHAT_TEST_KEY_ABSENT".into();
        assert!(matches!(missing.public_key(), Err(ChatError::Validation(_))));
    }
}
