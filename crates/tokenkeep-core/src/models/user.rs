use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

impl User {
    pub fn display_name(&self) -> String {
        if self.role.is_empty() {
            self.username.clone()
        } else {
            format!("{} ({})", self.username, self.role)
        }
    }
}

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps the password out of debug logs.
impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response body of `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl AuthResponse {
    pub fn into_parts(self) -> (User, TokenPair) {
        (
            self.user,
            TokenPair {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
        )
    }
}

/// An access/refresh credential pair. Always rotated together.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{"user":{"id":"42","username":"alice","email":"alice@example.com","role":"admin"},"accessToken":"at1","refreshToken":"rt1"}"#;

        let resp: AuthResponse = serde_json::from_str(json).expect("Failed to parse login JSON");
        let (user, tokens) = resp.into_parts();
        assert_eq!(user.username, "alice");
        assert_eq!(user.display_name(), "alice (admin)");
        assert_eq!(tokens, TokenPair::new("at1", "rt1"));
    }

    #[test]
    fn test_profile_without_optional_fields() {
        let user: User = serde_json::from_str(r#"{"id":"7","username":"bob"}"#)
            .expect("Failed to parse profile JSON");
        assert_eq!(user.email, "");
        assert_eq!(user.display_name(), "bob");
    }

    #[test]
    fn test_secrets_not_in_debug_output() {
        let creds = LoginCredentials::new("alice", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));

        let pair = TokenPair::new("at-secret", "rt-secret");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("at-secret"));
        assert!(!debug.contains("rt-secret"));
    }

    #[test]
    fn test_login_body_shape() {
        let body = serde_json::to_value(LoginCredentials::new("alice", "pw")).unwrap();
        assert_eq!(body, serde_json::json!({"username": "alice", "password": "pw"}));
    }
}
