//! Origin and project resolution for project-addressed URLs.
//!
//! Builder deployments address a project through the host name: the first
//! label of a builder URL is `p-<uuid>` (for example
//! `https://p-5b19….apps.pordego.dev`). The authorization server lives on the
//! same deployment minus that label, so both origins are recomputed from the
//! request URL on every flow initiation instead of being static
//! configuration.

use axum::http::{HeaderMap, Uri, header::HOST};
use url::Url;
use uuid::Uuid;

use crate::auth::error::Error;

/// Project addressing parsed out of a request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderUrl {
    pub project_id: Option<Uuid>,
}

/// Request origin and authorization-server origin derived from one URL.
///
/// The two being equal is a deployment mistake; [`crate::auth::flow`] refuses
/// to start a flow when they coincide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPair {
    pub request_origin: String,
    pub authorization_server_origin: String,
}

/// `scheme://host[:port]` of the request URL.
pub fn request_origin(url: &Url) -> Result<String, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::configuration(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

/// Extract the project id from a `p-<uuid>` host label, if present.
pub fn parse_builder_url(url: &Url) -> BuilderUrl {
    let project_id = url
        .host_str()
        .and_then(|host| host.split('.').next())
        .and_then(|label| label.strip_prefix("p-"))
        .and_then(|raw| raw.parse::<Uuid>().ok());
    BuilderUrl { project_id }
}

/// Origin of the authorization server implied by the request URL.
///
/// Strips the `p-<uuid>` label when present; for non-project URLs this is the
/// request origin itself.
pub fn authorization_server_origin(url: &Url) -> Result<String, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::configuration(format!("URL has no host: {url}")))?;

    let apex = match host.split_once('.') {
        Some((label, rest))
            if label
                .strip_prefix("p-")
                .is_some_and(|raw| raw.parse::<Uuid>().is_ok()) =>
        {
            rest
        }
        _ => host,
    };

    Ok(match url.port() {
        Some(port) => format!("{}://{apex}:{port}", url.scheme()),
        None => format!("{}://{apex}", url.scheme()),
    })
}

/// Compute both origins for one request URL.
pub fn origin_pair(url: &Url) -> Result<OriginPair, Error> {
    Ok(OriginPair {
        request_origin: request_origin(url)?,
        authorization_server_origin: authorization_server_origin(url)?,
    })
}

/// Rebuild the absolute request URL from the `Host` header and the request
/// URI. Axum hands out relative URIs; cookie scoping and origin resolution
/// need the full form.
pub fn absolute_request_url(headers: &HeaderMap, uri: &Uri, secure: bool) -> Result<Url, Error> {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .ok_or_else(|| Error::configuration("request has no Host header"))?;

    let scheme = if secure { "https" } else { "http" };
    let path_and_query = uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());

    Url::parse(&format!("{scheme}://{host}{path_and_query}"))
        .map_err(|err| Error::configuration(format!("failed to rebuild request URL: {err}")))
}
