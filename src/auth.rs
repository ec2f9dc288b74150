//! Canvas credentials and the header set built from them.
//!
//! A bearer token is preferred; a raw browser cookie string (`k=v; a=b`) is
//! the fallback. Debug output is redacted so secrets never reach logs.

use std::fmt;
use std::sync::{Arc, RwLock};

/// Credentials used to authenticate against the Canvas API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// API access token sent as `Authorization: Bearer …`.
    Token(String),
    /// Raw cookie string copied from a browser session.
    Cookie(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token([REDACTED])"),
            Self::Cookie(_) => f.write_str("Cookie([REDACTED])"),
        }
    }
}

impl Credentials {
    /// Pick credentials from optional token and cookie values, preferring the
    /// token. Blank values count as absent.
    pub fn from_parts(token: Option<&str>, cookie: Option<&str>) -> Option<Self> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let cookie = cookie.map(str::trim).filter(|c| !c.is_empty());
        match (token, cookie) {
            (Some(t), _) => Some(Self::Token(t.to_owned())),
            (None, Some(c)) => Some(Self::Cookie(c.to_owned())),
            (None, None) => None,
        }
    }

    /// Request headers carrying these credentials.
    pub fn headers(&self) -> CredentialHeaders {
        match self {
            Self::Token(token) => {
                CredentialHeaders(vec![("Authorization".to_owned(), format!("Bearer {token}"))])
            }
            Self::Cookie(raw) => {
                let joined = parse_cookie_string(raw)
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                if joined.is_empty() {
                    CredentialHeaders::default()
                } else {
                    CredentialHeaders(vec![("Cookie".to_owned(), joined)])
                }
            }
        }
    }

    /// Short, masked description for status output (e.g. `token abcd…wxyz`).
    pub fn masked_preview(&self) -> String {
        match self {
            Self::Token(token) => format!("token {}", mask_secret(token)),
            Self::Cookie(raw) => {
                let count = parse_cookie_string(raw).len();
                format!("cookie ({count} values) {}", mask_secret(raw))
            }
        }
    }
}

/// Show the first and last four characters of long secrets, nothing of short ones.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "****".to_owned();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

/// Split `k=v; a=b` into pairs, trimming whitespace and skipping fragments
/// without `=`.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_owned(), v.trim().to_owned()))
        })
        .collect()
}

/// Opaque header set handed to the transport.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialHeaders(Vec<(String, String)>);

impl CredentialHeaders {
    /// Header name/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `true` when no header would be sent.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CredentialHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(k, _)| format!("{k}: [REDACTED]")))
            .finish()
    }
}

/// Source of credentials for a poll cycle. `None` means "skip this cycle".
pub trait CredentialProvider: Send + Sync {
    /// Headers to attach to the next request.
    fn headers(&self) -> Option<CredentialHeaders>;

    /// Masked description of the current credentials.
    fn preview(&self) -> Option<String>;
}

/// Replaceable in-memory credentials shared between the control surface and
/// the running watcher.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    inner: Arc<RwLock<Option<Credentials>>>,
}

impl SharedCredentials {
    /// Start with the given credentials (or none).
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credentials)),
        }
    }

    /// Replace the stored credentials.
    pub fn set(&self, credentials: Option<Credentials>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = credentials,
            Err(poisoned) => *poisoned.into_inner() = credentials,
        }
    }

    /// Current credentials, if any.
    pub fn get(&self) -> Option<Credentials> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether credentials are configured.
    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }
}

impl CredentialProvider for SharedCredentials {
    fn headers(&self) -> Option<CredentialHeaders> {
        self.get()
            .map(|c| c.headers())
            .filter(|headers| !headers.is_empty())
    }

    fn preview(&self) -> Option<String> {
        self.get().map(|c| c.masked_preview())
    }
}
