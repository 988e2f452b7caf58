use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

/// A secret read from a configuration file or environment variable.
///
/// Surrounding whitespace is dropped, since keys are often pasted with a trailing newline.
/// `Debug` output is redacted.
#[derive(Clone, Debug)]
pub struct ConfigSecret(SecretString);

impl ConfigSecret {
    pub fn new(value: &str) -> Self {
        Self(SecretString::from(value.trim().to_owned()))
    }

    /// Whether the secret is empty, as when a placeholder in a template was never filled in.
    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl ExposeSecret<str> for ConfigSecret {
    fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl<'de> Deserialize<'de> for ConfigSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;

        Ok(Self::new(&value))
    }
}
