//! Parsing of the OAuth client descriptor downloaded from the Google Cloud console.
//!
//! The file looks like this (either `installed` or `web` is present):
//!
//! ```json
//! {
//!   "installed": {
//!     "client_id": "1234.apps.googleusercontent.com",
//!     "client_secret": "GOCSPX-...",
//!     "auth_uri": "https://accounts.google.com/o/oauth2/auth",
//!     "token_uri": "https://oauth2.googleapis.com/token",
//!     "redirect_uris": ["http://localhost"]
//!   }
//! }
//! ```

use crate::error::AuthError;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The parts of an OAuth client descriptor needed to run the authorization flow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    /// Installed applications using PKCE may omit the secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecret {
    /// Parses the contents of a client descriptor file.
    ///
    /// `path` is only used to give errors some context.
    pub fn from_json(path: &Path, json: &str) -> Result<Self, AuthError> {
        let file: ClientSecretFile =
            serde_json::from_str(json).map_err(|source| AuthError::ParseSecret {
                path: path.to_path_buf(),
                source,
            })?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AuthError::MissingClientSection {
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_installed_descriptor() {
        let json = r#"{
            "installed": {
                "client_id": "42.apps.googleusercontent.com",
                "project_id": "buup",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "auth_provider_x509_cert_url": "https://www.googleapis.com/oauth2/v1/certs",
                "client_secret": "GOCSPX-secret",
                "redirect_uris": ["http://localhost"]
            }
        }"#;
        let secret = ClientSecret::from_json(Path::new("client_secret.json"), json).unwrap();
        assert_eq!(
            secret,
            ClientSecret {
                client_id: "42.apps.googleusercontent.com".to_string(),
                client_secret: Some("GOCSPX-secret".to_string()),
                auth_uri: DEFAULT_AUTH_URI.to_string(),
                token_uri: DEFAULT_TOKEN_URI.to_string(),
                redirect_uris: vec!["http://localhost".to_string()],
            }
        );
    }

    #[test]
    fn web_descriptor_falls_back_to_default_endpoints() {
        let json = r#"{"web": {"client_id": "7", "client_secret": "s"}}"#;
        let secret = ClientSecret::from_json(Path::new("client_secret.json"), json).unwrap();
        assert_eq!(secret.client_id, "7");
        assert_eq!(secret.auth_uri, DEFAULT_AUTH_URI);
        assert_eq!(secret.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        let path = Path::new("client_secret.json");

        let err = ClientSecret::from_json(path, "{ not json").unwrap_err();
        assert!(matches!(err, AuthError::ParseSecret { .. }), "{err:?}");

        let err = ClientSecret::from_json(path, r#"{"other": {}}"#).unwrap_err();
        assert!(
            matches!(err, AuthError::MissingClientSection { .. }),
            "{err:?}"
        );
    }
}
