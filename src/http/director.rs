//! Request rewriting toward the upstream origin.
//!
//! # Responsibilities
//! - Point the request at the upstream scheme and authority
//! - Join the upstream base path and query onto the inbound ones
//! - Record the original host in `X-Forwarded-Host`, the upstream in `X-Origin-Host`
//! - Strip hop-by-hop headers and force `Connection: close` toward upstream

use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    request::Parts,
    uri::{Authority, PathAndQuery, Scheme},
    Uri, Version,
};
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");

/// Headers that describe a single connection and must not be forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Errors building a director. All of them are startup errors.
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("invalid upstream URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported upstream scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("upstream URL '{0}' has no host")]
    MissingHost(String),

    #[error("upstream authority '{0}' is not valid")]
    InvalidAuthority(String),
}

/// Rewrites inbound requests for the single upstream.
#[derive(Debug, Clone)]
pub struct Director {
    scheme: Scheme,
    authority: Authority,
    origin_host: HeaderValue,
    base_path: String,
    base_query: Option<String>,
}

impl Director {
    /// Parse the upstream base URL once. A bad URL is fatal at startup.
    pub fn new(base_url: &str) -> Result<Self, DirectorError> {
        let url = Url::parse(base_url).map_err(|source| DirectorError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(DirectorError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| DirectorError::MissingHost(base_url.to_string()))?;
        // `Url` drops the port when it is the scheme default.
        let authority_str = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&authority_str)
            .map_err(|_| DirectorError::InvalidAuthority(authority_str.clone()))?;
        let origin_host = HeaderValue::from_str(authority.as_str())
            .map_err(|_| DirectorError::InvalidAuthority(authority_str))?;

        Ok(Self {
            scheme,
            authority,
            origin_host,
            base_path: url.path().to_string(),
            base_query: url.query().filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    /// The upstream authority (`host[:port]`).
    pub fn upstream_authority(&self) -> &Authority {
        &self.authority
    }

    /// Rewrite `parts` in place for forwarding.
    pub fn direct(&self, parts: &mut Parts, client: Option<SocketAddr>) {
        let original_host = parts
            .headers
            .get(header::HOST)
            .cloned()
            .or_else(|| {
                parts
                    .uri
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });

        strip_hop_by_hop(&mut parts.headers);

        let headers = &mut parts.headers;
        if let Some(host) = original_host {
            headers.append(X_FORWARDED_HOST, host);
        }
        headers.append(X_ORIGIN_HOST, self.origin_host.clone());
        if let Some(addr) = client {
            append_forwarded_for(headers, addr);
        }
        headers.insert(header::HOST, self.origin_host.clone());
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

        parts.uri = self.rewrite_uri(&parts.uri);
        parts.version = Version::HTTP_11;

        tracing::debug!(url = %parts.uri, "Proxying request");
    }

    fn rewrite_uri(&self, inbound: &Uri) -> Uri {
        let path = join_paths(&self.base_path, inbound.path());
        let path_and_query = match (self.base_query.as_deref(), inbound.query()) {
            (Some(base), Some(q)) if !q.is_empty() => format!("{path}?{base}&{q}"),
            (Some(base), _) => format!("{path}?{base}"),
            (None, Some(q)) => format!("{path}?{q}"),
            (None, None) => path,
        };

        // Only a base path with invalid characters can fail here.
        let path_and_query = PathAndQuery::from_str(&path_and_query).unwrap_or_else(|_| {
            inbound
                .path_and_query()
                .cloned()
                .unwrap_or_else(|| PathAndQuery::from_static("/"))
        });

        let mut parts = axum::http::uri::Parts::default();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        parts.path_and_query = Some(path_and_query);
        Uri::from_parts(parts).unwrap_or_else(|_| inbound.clone())
    }
}

/// Join two paths with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_str(name.trim()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
