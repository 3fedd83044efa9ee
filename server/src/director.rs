//! Rewrites inbound client requests into upstream-bound ones: target URL,
//! path joining, query merging, backend credentials, and hop-by-hop header
//! stripping.

use anyhow::Result;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, HOST};
use reqwest::Url;

use crate::auth::BasicCredentials;

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    // HeaderName is already lowercase.
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// The upstream-bound form of a client request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

pub struct Director {
    backend: Url,
    backend_auth: Option<HeaderValue>,
}

impl Director {
    pub fn new(backend: Url, backend_auth: Option<&BasicCredentials>) -> Result<Self> {
        let backend_auth = backend_auth
            .map(BasicCredentials::header_value)
            .transpose()?;
        Ok(Self {
            backend,
            backend_auth,
        })
    }

    /// Builds the upstream request for a client path, query, and header
    /// set. Idempotent: feeding the result's path back in yields the same
    /// URL, since an already-prefixed path is left alone.
    pub fn rewrite(&self, path: &str, query: Option<&str>, headers: &HeaderMap) -> UpstreamRequest {
        let mut url = self.backend.clone();
        url.set_path(&join_backend_path(self.backend.path(), path));
        url.set_query(merge_query(self.backend.query(), query).as_deref());

        let mut upstream_headers = HeaderMap::new();
        for (name, value) in headers {
            if name == HOST || is_hop_by_hop(name) {
                continue;
            }
            upstream_headers.append(name.clone(), value.clone());
        }
        // Backend credentials replace whatever the client sent.
        if let Some(auth) = &self.backend_auth {
            upstream_headers.insert(AUTHORIZATION, auth.clone());
        }

        UpstreamRequest {
            url,
            headers: upstream_headers,
        }
    }
}

/// Joins the backend base path and the request path with exactly one
/// slash, unless the request path already carries the base prefix.
fn join_backend_path(backend_path: &str, request_path: &str) -> String {
    if request_path.starts_with(backend_path) {
        request_path.to_string()
    } else {
        single_joining_slash(backend_path, request_path)
    }
}

fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

fn merge_query(backend: Option<&str>, request: Option<&str>) -> Option<String> {
    match (backend, request) {
        (None, None) => None,
        (Some(query), None) | (None, Some(query)) => Some(query.to_string()),
        (Some(backend), Some(request)) => Some(format!("{backend}&{request}")),
    }
}
