use std::{fmt, fs, io, str::FromStr};

use serde::Deserialize;
use veil::Redact;

/// Contents of the secrets file.
#[derive(Deserialize)]
struct Secrets {
    password: String,
}

/// Password for the remote's httpQ endpoint.
///
/// Wraps the raw string so it cannot leak through `Debug` output; the
/// redacted form is what ends up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Redact)]
#[redact(all)]
pub struct Password(String);

impl Password {
    /// Validates and wraps a raw password.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the password is empty or contains control
    /// characters, which the query string cannot carry faithfully.
    pub fn new(password: &str) -> io::Result<Self> {
        if password.is_empty() || password.chars().any(char::is_control) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "password is empty or contains control characters",
            ));
        }

        Ok(Self(password.to_owned()))
    }

    /// Loads the password from a TOML secrets file with a `password` key.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file could not be read, is suspiciously
    /// large, or does not contain a valid `password` entry.
    pub fn from_file(secrets_file: &str) -> io::Result<Self> {
        // Prevent out-of-memory condition: secrets file should be small.
        let attributes = fs::metadata(secrets_file)?;
        if attributes.len() > 1024 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{secrets_file} is too large"),
            ));
        }

        let contents = fs::read_to_string(secrets_file)?;
        let secrets: Secrets = toml::from_str(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{secrets_file} format is invalid: {e}"),
            )
        })?;

        Self::new(&secrets.password)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Password {
    type Err = io::Error;

    fn from_str(s: &str) -> io::Result<Self> {
        Self::new(s)
    }
}

/// Connection parameters for one httpQ endpoint.
///
/// This is the unit that [`reconfigure`](crate::store::Store::reconfigure)
/// swaps out at runtime.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Connection {
    pub host: String,
    pub port: u16,
    pub password: Password,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    pub connection: Connection,

    pub user_agent: String,
}

impl Config {
    #[must_use]
    pub fn with_connection(connection: Connection) -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            panic!("application name and/or version invalid (\"{app_name}\"; \"{app_version}\")");
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            connection,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rejects_empty_and_control_chars() {
        assert!(Password::new("").is_err());
        assert!(Password::new("tab\there").is_err());
        assert!(Password::new("hunter2").is_ok());
    }

    #[test]
    fn password_debug_is_redacted() {
        let password = Password::new("hunter2").unwrap();
        let debug = format!("{password:?}");
        assert!(!debug.contains("hunter2"));
    }
}
