use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named collection of staged changes not yet applied to the live data.
///
/// A branch exists until it is merged (changes applied, then discarded) or
/// deleted (changes discarded without applying).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub description: Option<String>,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(name: String, description: Option<String>, user: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            name,
            description,
            user,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Input model for creating a new branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBranch {
    pub name: String,
    pub description: Option<String>,
    pub user: Option<String>,
}

impl NewBranch {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            user: None,
        }
    }

    /// Convert to a full Branch with server-generated timestamps
    pub fn into_branch(self) -> Branch {
        Branch::new(self.name, self.description, self.user)
    }
}
