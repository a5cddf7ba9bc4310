//! Hub connection configs and target URL resolution.
//!
//! A hub is described either by an eventing base URL plus a hub name that is
//! appended to its path, or by a direct URL. Both shapes resolve to a
//! [`ConnectTarget`] that tells the transport where to connect and how to
//! present the access token.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::http::uri::InvalidUri;

use crate::error::{HubError, HubResult};

/// Query parameter carrying the token for hubs that cannot take headers.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Where a hub lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubEndpoint {
    /// Base eventing URL; the hub name is appended to its path.
    Eventing { base_url: String, hub_name: String },
    /// Fully-formed hub URL.
    Direct { url: String },
}

/// Everything needed to (re)establish a connection to one hub.
///
/// Stored by the manager after the first successful connect and reused for
/// every reconnection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConnectionConfig {
    /// Unique key of the hub inside the manager.
    pub name: String,
    pub endpoint: HubEndpoint,
    /// Server-to-client methods forwarded to the event dispatcher, in
    /// registration order and without duplicates.
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Resolved connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: String,
    /// Token to send as `Authorization: Bearer`, `None` when the token is
    /// already in the query string.
    pub bearer_token: Option<String>,
}

impl ConnectTarget {
    /// URL safe to log.
    pub fn redacted_url(&self) -> String {
        sanitize_url(&self.url)
    }
}

impl HubConnectionConfig {
    /// Config for the eventing form.
    pub fn eventing(
        name: impl Into<String>,
        base_url: impl Into<String>,
        hub_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: HubEndpoint::Eventing {
                base_url: base_url.into(),
                hub_name: hub_name.into(),
            },
            methods: Vec::new(),
        }
    }

    /// Config for the direct-URL form.
    pub fn direct(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: HubEndpoint::Direct { url: url.into() },
            methods: Vec::new(),
        }
    }

    /// Set the subscribed methods, dropping duplicates but keeping order.
    #[must_use]
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.clear();
        for method in methods {
            let method = method.into();
            if !self.methods.contains(&method) {
                self.methods.push(method);
            }
        }
        self
    }

    /// Resolve the URL and token placement for a connect attempt.
    ///
    /// The hub named `geolocation_hub` receives the percent-encoded token as
    /// an `access_token` query parameter; every other hub gets a bearer
    /// header.
    ///
    /// # Errors
    /// [`HubError::MissingEndpoint`] when the URL is empty and
    /// [`HubError::InvalidEndpoint`] when it cannot be parsed.
    pub fn resolve_target(&self, token: &str, geolocation_hub: &str) -> HubResult<ConnectTarget> {
        match &self.endpoint {
            HubEndpoint::Eventing { base_url, hub_name } => {
                if base_url.trim().is_empty() {
                    return Err(HubError::MissingEndpoint {
                        hub: self.name.clone(),
                    });
                }
                let query_token = hub_name == geolocation_hub;
                let url = eventing_url(base_url, hub_name, query_token.then_some(token))?;
                Ok(ConnectTarget {
                    url,
                    bearer_token: (!query_token).then(|| token.to_string()),
                })
            }
            HubEndpoint::Direct { url } => {
                if url.trim().is_empty() {
                    return Err(HubError::MissingEndpoint {
                        hub: self.name.clone(),
                    });
                }
                Ok(ConnectTarget {
                    url: url.clone(),
                    bearer_token: Some(token.to_string()),
                })
            }
        }
    }
}

/// Append `hub_name` to the path of `base_url`, keeping its query string and
/// optionally setting `access_token`.
fn eventing_url(base_url: &str, hub_name: &str, query_token: Option<&str>) -> HubResult<String> {
    let uri: Uri = base_url
        .parse()
        .map_err(|e: InvalidUri| HubError::InvalidEndpoint {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

    let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
        return Err(HubError::InvalidEndpoint {
            url: base_url.to_string(),
            reason: "absolute URL with scheme and host required".into(),
        });
    };

    let path = uri.path();
    let path_with_hub = if path.ends_with('/') {
        format!("{path}{hub_name}")
    } else {
        format!("{path}/{hub_name}")
    };

    let mut params: Vec<String> = uri
        .query()
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(token) = query_token {
        let encoded = format!(
            "{ACCESS_TOKEN_PARAM}={}",
            utf8_percent_encode(token, NON_ALPHANUMERIC)
        );
        let mut replaced = false;
        params.retain_mut(|pair| {
            if param_key(pair) != ACCESS_TOKEN_PARAM {
                return true;
            }
            if replaced {
                return false;
            }
            pair.clone_from(&encoded);
            replaced = true;
            true
        });
        if !replaced {
            params.push(encoded);
        }
    }

    let mut url = format!("{scheme}://{authority}{path_with_hub}");
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }
    Ok(url)
}

fn param_key(pair: &str) -> &str {
    pair.split_once('=').map_or(pair, |(key, _)| key)
}

/// Replace the value of any `access_token` query parameter with `***`.
pub fn sanitize_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let query = query
        .split('&')
        .map(|pair| {
            if param_key(pair) == ACCESS_TOKEN_PARAM {
                format!("{ACCESS_TOKEN_PARAM}=***")
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}
