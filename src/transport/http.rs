//! Canvas transport over [`reqwest`].

use crate::auth::CredentialHeaders;
use crate::changes::OverridePayload;
use crate::config::CanvasConfig;
use crate::error::{Result, WatchError};
use crate::transport::{FetchResponse, Transport};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH, LINK};
use tracing::{debug, trace};

/// HTTP transport for the Canvas REST API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the timeout and User-Agent from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Transport`] if the client cannot be constructed.
    pub fn new(config: &CanvasConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| WatchError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        headers: &CredentialHeaders,
        validator: Option<&str>,
    ) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }

        trace!(url, conditional = validator.is_some(), "GET overrides");
        let response = request
            .send()
            .await
            .map_err(|e| WatchError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("origin answered 304 not modified");
            return Ok(FetchResponse::NotModified);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Transport(format!(
                "unexpected status {status}: {}",
                crate::changes::render::truncate(body.trim(), 200)
            )));
        }

        let new_validator = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let continuation = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(next_link)
            .map(|link| resolve_link(response.url(), &link));

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WatchError::Transport(format!("failed to read body: {e}")))?;
        let payload = OverridePayload::from_slice(&bytes)?;

        Ok(FetchResponse::Ok {
            payload,
            validator: new_validator,
            continuation,
        })
    }
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header value.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|param| {
            let param = param.trim();
            param
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"'))
                .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        (!target.is_empty()).then(|| target.to_owned())
    })
}

fn resolve_link(base: &reqwest::Url, link: &str) -> String {
    base.join(link)
        .map(String::from)
        .unwrap_or_else(|_| link.to_owned())
}
