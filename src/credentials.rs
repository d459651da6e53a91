use std::env;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("environment variable {0} is not set")]
    Missing(String),
    #[error("environment variable {0} is empty")]
    Empty(String),
}

/// Login credentials for the dashboard.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env(email_var: &str, password_var: &str) -> Result<Self, CredentialsError> {
        Ok(Self {
            email: read_var(email_var)?,
            password: read_var(password_var)?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn read_var(name: &str) -> Result<String, CredentialsError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(CredentialsError::Empty(name.to_string())),
        Ok(value) => Ok(value),
        Err(_) => Err(CredentialsError::Missing(name.to_string())),
    }
}
