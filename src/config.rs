use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `loom.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoomConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// TTL on dedup claim keys. Must exceed any plausible in-flight retry
    /// window; a claim orphaned by a crash frees itself at expiry.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Retry ceiling for failed telemetry events.
    #[serde(default = "default_max_retries")]
    pub max_event_retries: u32,
    /// Span input/output payloads larger than this are offloaded to the
    /// object store and replaced by a blob reference plus a preview.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Length of the truncated preview kept inline for offloaded payloads.
    #[serde(default = "default_preview_bytes")]
    pub payload_preview_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl_secs(),
            max_event_retries: default_max_retries(),
            max_payload_bytes: default_max_payload_bytes(),
            payload_preview_bytes: default_preview_bytes(),
        }
    }
}

fn default_dedup_ttl_secs() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_payload_bytes() -> usize {
    1_048_576
}

fn default_preview_bytes() -> usize {
    4_096
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Page size applied when a listing request does not specify one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    /// Hard ceiling on any page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> u64 {
    100
}

fn default_max_page_size() -> u64 {
    1_000
}

impl LoomConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: LoomConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Clamp a requested page size to `[1, max]`, defaulting when absent.
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.query.default_page_size)
            .clamp(1, self.query.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LoomConfig::default();
        assert_eq!(cfg.ingest.dedup_ttl_secs, 86_400);
        assert_eq!(cfg.ingest.max_event_retries, 3);
        assert_eq!(cfg.query.default_page_size, 100);
        assert_eq!(cfg.query.max_page_size, 1_000);
    }

    #[test]
    fn test_partial_toml() {
        let cfg: LoomConfig = toml::from_str(
            r#"
            [ingest]
            dedup_ttl_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ingest.dedup_ttl_secs, 120);
        assert_eq!(cfg.ingest.max_event_retries, 3);
    }

    #[test]
    fn test_page_size_clamping() {
        let cfg = LoomConfig::default();
        assert_eq!(cfg.page_size(None), 100);
        assert_eq!(cfg.page_size(Some(50)), 50);
        assert_eq!(cfg.page_size(Some(10_000)), 1_000);
        assert_eq!(cfg.page_size(Some(0)), 1);
    }
}
