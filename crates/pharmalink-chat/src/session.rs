use serde::{Deserialize, Serialize};

/// Role of the local user within a chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Customer,
    Pharmacy,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Pharmacy => "PHARMACY",
        }
    }
}

/// Who the local user is, passed explicitly into every constructor that
/// needs it. There is no ambient/global session state anywhere in the crate.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub role: Role,
    /// Bearer credential for REST calls and the realtime handshake.
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            access_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let session = SessionContext::new("42", Role::Customer).with_token("secret-jwt");
        let debug = format!("{session:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-jwt"));
    }

    #[test]
    fn role_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Customer).unwrap(), "\"CUSTOMER\"");
        assert_eq!(serde_json::to_string(&Role::Pharmacy).unwrap(), "\"PHARMACY\"");
    }
}
