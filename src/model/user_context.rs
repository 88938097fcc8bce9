use serde::{Deserialize, Serialize};

/// The actor on whose behalf a permission check runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub username: String,
    pub is_superuser: bool,
    pub is_authenticated: bool,
    pub groups: Vec<String>,
}

impl UserContext {
    /// Create an ordinary authenticated user with no group memberships
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            is_superuser: false,
            is_authenticated: true,
            groups: Vec::new(),
        }
    }

    pub fn with_groups(username: &str, groups: &[&str]) -> Self {
        Self {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Self::new(username)
        }
    }

    /// A superuser bypasses all object-permission evaluation
    pub fn superuser(username: &str) -> Self {
        Self {
            is_superuser: true,
            ..Self::new(username)
        }
    }

    /// An unauthenticated actor; restricted collections come back empty
    pub fn anonymous() -> Self {
        Self {
            username: String::new(),
            is_superuser: false,
            is_authenticated: false,
            groups: Vec::new(),
        }
    }
}
