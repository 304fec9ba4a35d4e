//! Configuration validation.
//!
//! Serde handles the syntax; this pass checks values that would only fail
//! later at runtime. Every problem is reported, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyConfig, StoreKind};

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream.base_url '{url}' is invalid: {reason}")]
    UpstreamUrl { url: String, reason: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("store.path must be set for the jsonl store")]
    MissingStorePath,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match Url::parse(&config.upstream.base_url) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => {
            errors.push(ValidationError::UpstreamUrl {
                url: config.upstream.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url) if url.host_str().is_none() => {
            errors.push(ValidationError::UpstreamUrl {
                url: config.upstream.base_url.clone(),
                reason: "missing host".to_string(),
            });
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::UpstreamUrl {
            url: config.upstream.base_url.clone(),
            reason: e.to_string(),
        }),
    }

    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "upstream.connect_timeout_secs" });
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "upstream.request_timeout_secs" });
    }
    if config.upstream.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "upstream.max_body_bytes" });
    }

    if config.store.kind == StoreKind::Jsonl && config.store.path.as_os_str().is_empty() {
        errors.push(ValidationError::MissingStorePath);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
