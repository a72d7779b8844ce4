use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Object store access keys.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
  pub access_key_id: String,
  pub secret_access_key: String,
  pub session_token: Option<String>,
}

impl Credentials {
  pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
    Self {
      access_key_id: access_key_id.into(),
      secret_access_key: secret_access_key.into(),
      session_token: None,
    }
  }

  pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
    self.session_token = Some(token.into());
    self
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("access_key_id", &self.access_key_id)
      .field("secret_access_key", &"<redacted>")
      .field(
        "session_token",
        &self.session_token.as_ref().map(|_| "<redacted>"),
      )
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
  #[error("credentials '{credentials_id}' not found")]
  NotFound { credentials_id: String },

  #[error("credentials '{credentials_id}' are incomplete: missing {missing}")]
  Incomplete {
    credentials_id: String,
    missing: String,
  },
}

/// Resolves an opaque credentials id into access keys.
pub trait CredentialProvider: Send + Sync {
  fn resolve(&self, credentials_id: &str) -> Result<Credentials, CredentialError>;
}

/// Credentials known up front, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
  credentials: HashMap<String, Credentials>,
}

impl StaticCredentialProvider {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, credentials_id: impl Into<String>, credentials: Credentials) -> Self {
    self.credentials.insert(credentials_id.into(), credentials);
    self
  }
}

impl CredentialProvider for StaticCredentialProvider {
  fn resolve(&self, credentials_id: &str) -> Result<Credentials, CredentialError> {
    self
      .credentials
      .get(credentials_id)
      .cloned()
      .ok_or_else(|| CredentialError::NotFound {
        credentials_id: credentials_id.to_string(),
      })
  }
}

/// Reads credentials from environment variables.
///
/// For id `aws_credentials` the variables are
/// `STARDAG_CREDENTIALS_AWS_CREDENTIALS_ACCESS_KEY_ID`,
/// `..._SECRET_ACCESS_KEY` and the optional `..._SESSION_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider {
  vars: HashMap<String, String>,
}

impl EnvCredentialProvider {
  const PREFIX: &'static str = "STARDAG_CREDENTIALS";

  /// Snapshot the process environment.
  pub fn from_env() -> Self {
    Self::from_vars(std::env::vars())
  }

  pub fn from_vars<I, K, V>(vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    Self {
      vars: vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(k, _)| k.starts_with(Self::PREFIX))
        .collect(),
    }
  }

  fn var_name(credentials_id: &str, suffix: &str) -> String {
    let id: String = credentials_id
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() {
          c.to_ascii_uppercase()
        } else {
          '_'
        }
      })
      .collect();
    format!("{}_{}_{}", Self::PREFIX, id, suffix)
  }
}

impl CredentialProvider for EnvCredentialProvider {
  fn resolve(&self, credentials_id: &str) -> Result<Credentials, CredentialError> {
    let key_var = Self::var_name(credentials_id, "ACCESS_KEY_ID");
    let secret_var = Self::var_name(credentials_id, "SECRET_ACCESS_KEY");
    let token_var = Self::var_name(credentials_id, "SESSION_TOKEN");

    let key = self.vars.get(&key_var);
    let secret = self.vars.get(&secret_var);

    match (key, secret) {
      (None, None) => Err(CredentialError::NotFound {
        credentials_id: credentials_id.to_string(),
      }),
      (None, Some(_)) => Err(CredentialError::Incomplete {
        credentials_id: credentials_id.to_string(),
        missing: key_var,
      }),
      (Some(_), None) => Err(CredentialError::Incomplete {
        credentials_id: credentials_id.to_string(),
        missing: secret_var,
      }),
      (Some(key), Some(secret)) => {
        let mut credentials = Credentials::new(key.clone(), secret.clone());
        if let Some(token) = self.vars.get(&token_var) {
          credentials = credentials.with_session_token(token.clone());
        }
        Ok(credentials)
      }
    }
  }
}
