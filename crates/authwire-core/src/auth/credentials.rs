use serde::{Deserialize, Serialize};

/// Access + refresh token pair handed to observers and used as default credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

/// Header carrying the access token on an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHeader {
    pub name: String,
    pub value: String,
}

impl CredentialHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Turns an access token into the header attached to requests.
///
/// Closures `Fn(&str) -> CredentialHeader` implement this trait.
pub trait CredentialAttacher: Send + Sync {
    fn credential_header(&self, access_token: &str) -> CredentialHeader;
}

impl<F> CredentialAttacher for F
where
    F: Fn(&str) -> CredentialHeader + Send + Sync,
{
    fn credential_header(&self, access_token: &str) -> CredentialHeader {
        self(access_token)
    }
}

/// `Authorization: Bearer <token>`
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerAttacher;

impl CredentialAttacher for BearerAttacher {
    fn credential_header(&self, access_token: &str) -> CredentialHeader {
        CredentialHeader::new("authorization", format!("Bearer {}", access_token))
    }
}

/// Sends the token verbatim (optionally prefixed) in a custom header, e.g. `X-Api-Token`.
#[derive(Debug, Clone)]
pub struct HeaderAttacher {
    name: String,
    prefix: Option<String>,
}

impl HeaderAttacher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl CredentialAttacher for HeaderAttacher {
    fn credential_header(&self, access_token: &str) -> CredentialHeader {
        let value = match self.prefix {
            Some(ref prefix) => format!("{} {}", prefix, access_token),
            None => access_token.to_string(),
        };
        CredentialHeader::new(self.name.clone(), value)
    }
}
