//! Fetching override payloads.
//!
//! [`Transport`] performs a single conditional GET. [`fetch_overrides`]
//! drives it: it sends the stored validator on the first page, follows
//! continuation links, and merges every page into one [`OverridePayload`].

pub mod http;

use crate::auth::CredentialHeaders;
use crate::changes::OverridePayload;
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use tracing::debug;

pub use http::HttpTransport;

/// Result of one page request that reached the origin.
///
/// Failures (network, non-2xx/304 status, undecodable body) are returned as
/// [`WatchError::Transport`] or [`WatchError::MalformedPayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResponse {
    /// The origin confirmed the validator is still current.
    NotModified,
    /// A page of data.
    Ok {
        payload: OverridePayload,
        validator: Option<String>,
        continuation: Option<String>,
    },
}

/// One conditional GET against the overrides endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` with `headers`, sending `validator` as `If-None-Match`
    /// when present.
    async fn fetch(
        &self,
        url: &str,
        headers: &CredentialHeaders,
        validator: Option<&str>,
    ) -> Result<FetchResponse>;
}

/// Outcome of fetching every page for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    NotModified,
    Data {
        payload: OverridePayload,
        validator: Option<String>,
    },
}

/// Fetch the first page conditionally, then follow continuation links.
///
/// Continuation pages are requested without a validator. A continuation
/// page answering "not modified" is treated as a transport error, since the
/// merged payload would be incomplete. Continuations must stay on the
/// endpoint's origin (scheme, host, port); credentials are never sent
/// elsewhere.
///
/// # Errors
///
/// Propagates transport and payload errors, and fails when more than
/// `max_pages` pages are offered or a continuation points off-origin.
pub async fn fetch_overrides(
    transport: &dyn Transport,
    url: &str,
    headers: &CredentialHeaders,
    validator: Option<&str>,
    max_pages: usize,
) -> Result<FetchOutcome> {
    let (mut payload, new_validator, mut next) = match transport.fetch(url, headers, validator).await? {
        FetchResponse::NotModified => return Ok(FetchOutcome::NotModified),
        FetchResponse::Ok {
            payload,
            validator,
            continuation,
        } => (payload, validator, continuation),
    };

    let mut pages = 1usize;
    while let Some(link) = next.take() {
        if pages >= max_pages {
            return Err(WatchError::Transport(format!(
                "gave up after {max_pages} pages; continuation still offered"
            )));
        }
        if !same_origin(url, &link) {
            return Err(WatchError::Transport(format!(
                "refusing continuation outside the endpoint origin: {link}"
            )));
        }
        debug!(page = pages + 1, "following continuation link");
        match transport.fetch(&link, headers, None).await? {
            FetchResponse::NotModified => {
                return Err(WatchError::Transport(
                    "continuation page answered not modified".into(),
                ));
            }
            FetchResponse::Ok {
                payload: more,
                continuation,
                ..
            } => {
                payload.extend(more);
                next = continuation;
            }
        }
        pages += 1;
    }

    Ok(FetchOutcome::Data {
        payload,
        validator: new_validator,
    })
}

fn same_origin(endpoint: &str, link: &str) -> bool {
    match (url::Url::parse(endpoint), url::Url::parse(link)) {
        (Ok(endpoint), Ok(link)) => endpoint.origin() == link.origin(),
        _ => false,
    }
}
