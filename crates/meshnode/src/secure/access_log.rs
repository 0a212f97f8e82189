//! Unauthorized access log.
//!
//! Failed key checks are written to a text file and/or the datastore,
//! depending on configuration. Logging failures never affect the request.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use mesh_common::AccessErrorEntry;
use mesh_common::constants::fields;

use crate::envelope::WireFields;
use crate::storage::Backend;

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub remote_ip: String,
    pub remote_host: String,
    pub request_uri: String,
}

/// Sinks for unauthorized access entries
#[derive(Clone, Default)]
pub struct AccessLog {
    file: Option<PathBuf>,
    backend: Option<Arc<dyn Backend>>,
}

impl AccessLog {
    pub fn new(file: Option<PathBuf>, backend: Option<Arc<dyn Backend>>) -> Self {
        Self { file, backend }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some() || self.backend.is_some()
    }

    /// Build the entry for a rejected request
    pub fn entry(wire: &WireFields, meta: &RequestMeta, now: i64) -> AccessErrorEntry {
        let request = wire
            .iter()
            .map(|(k, v)| format!("{}={};", k, urlencoding::encode(v)))
            .collect::<String>();

        AccessErrorEntry {
            created_at: now,
            request,
            remote_cluster: wire.get(fields::CLUSTER_URL).unwrap_or_default().to_string(),
            request_uri: meta.request_uri.clone(),
            remote_host: meta.remote_host.clone(),
            remote_ip: meta.remote_ip.clone(),
        }
    }

    /// Write one entry to every configured sink
    pub async fn record(&self, wire: &WireFields, meta: &RequestMeta) {
        let now = chrono::Utc::now();
        let entry = Self::entry(wire, meta, now.timestamp());

        tracing::warn!(
            remote_ip = %entry.remote_ip,
            remote_cluster = %entry.remote_cluster,
            uri = %entry.request_uri,
            "Unauthorized access"
        );

        if let Some(path) = &self.file {
            let text = render_file_entry(&entry, wire, &now.format("%H:%M:%S %d.%m.%Y").to_string());
            if let Err(e) = append(path, &text).await {
                tracing::error!(path = %path.display(), error = %e, "Failed to write access log");
            }
        }

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.log_access_error(&entry).await {
                tracing::error!(error = %e, "Failed to store access error");
            }
        }
    }
}

fn render_file_entry(entry: &AccessErrorEntry, wire: &WireFields, stamp: &str) -> String {
    let mut out = format!("@{} [{}]:  {{\n", stamp, entry.created_at);
    out.push_str(&format!("@REMOTE_CLUSTER_URL: {}\n", entry.remote_cluster));
    out.push_str(&format!("@REQUEST URI: {}\n", entry.request_uri));
    out.push_str(&format!("@REMOTE_CLUSTER_HOST: {}\n", entry.remote_host));
    out.push_str(&format!("@REMOTE_CLUSTER_IP: {}\n", entry.remote_ip));
    out.push_str("#RAW REQUEST:\n");
    for (k, v) in wire.iter() {
        out.push_str(&format!(" {k}: {v}\n"));
    }
    out.push_str("}\n\n");
    out
}

async fn append(path: &PathBuf, text: &str) -> std::io::Result<()> {
    let is_new = tokio::fs::metadata(path).await.is_err();
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    if is_new {
        file.write_all(b"#UNAUTHORIZED ACCESS ERRORS:\n\n").await?;
    }
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn wire() -> WireFields {
        [("_skynet_id", "bogus"), ("_skynet_cluster_url", "evil.org/x"), ("note", "a b")]
            .into_iter()
            .collect()
    }

    fn meta() -> RequestMeta {
        RequestMeta {
            remote_ip: "203.0.113.9".into(),
            remote_host: String::new(),
            request_uri: "/?_skynet_id=bogus".into(),
        }
    }

    #[test]
    fn test_entry_dumps_request() {
        let entry = AccessLog::entry(&wire(), &meta(), 42);
        assert_eq!(
            entry.request,
            "_skynet_id=bogus;_skynet_cluster_url=evil.org%2Fx;note=a%20b;"
        );
        assert_eq!(entry.remote_cluster, "evil.org/x");
        assert_eq!(entry.created_at, 42);
    }

    #[tokio::test]
    async fn test_record_writes_file_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let backend = Arc::new(MemoryBackend::new());
        let log = AccessLog::new(Some(path.clone()), Some(backend.clone() as Arc<dyn Backend>));

        log.record(&wire(), &meta()).await;
        log.record(&wire(), &meta()).await;

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#UNAUTHORIZED ACCESS ERRORS:"));
        assert_eq!(text.matches("@REMOTE_CLUSTER_URL: evil.org/x").count(), 2);

        let stored = backend.access_errors(10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].remote_ip, "203.0.113.9");
    }
}
