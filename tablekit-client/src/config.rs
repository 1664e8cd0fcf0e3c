//! Backend connection configuration.

use serde::{Deserialize, Serialize};

/// Configuration for reaching the remote backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// REST endpoint including the version prefix (e.g., "https://cloud.example.io/v1").
    pub endpoint: String,

    /// Project the database lives in.
    pub project_id: String,

    /// Database holding every managed table.
    pub database_id: String,

    /// Server API key. Schema and permission management requires one.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost/v1".to_string(),
            project_id: String::new(),
            database_id: "main".to_string(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Realtime endpoint derived from the REST endpoint (`http` → `ws`).
    pub fn realtime_endpoint(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/realtime?project={}", self.project_id)
    }

    /// Push-channel name carrying every document event of a table.
    pub fn documents_channel(&self, table_id: &str) -> String {
        format!(
            "databases.{}.collections.{table_id}.documents",
            self.database_id
        )
    }
}
