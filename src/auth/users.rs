//! Collaborator interfaces for user records and project membership.
//!
//! Persistence is outside this crate; the directory is a seam the deployment
//! wires a real store into. [`MemoryDirectory`] backs local runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::auth::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub provider: String,
}

/// Normalized profile handed over by an OAuth provider strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider: String,
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
}

pub trait UserDirectory: Send + Sync {
    fn create_or_login_with_oauth(&self, profile: &OAuthProfile) -> Result<User, Error>;
    fn create_or_login_with_password_grant(&self, email: &str) -> Result<User, Error>;
    fn create_or_login_with_dev_secret(&self, email: &str) -> Result<User, Error>;
    fn is_user_authorized_for_project(&self, user_id: Uuid, project_id: Uuid)
    -> Result<bool, Error>;
    fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, Error>;
}

/// In-process directory keyed by email.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<String, User>>,
    memberships: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a user access to a project.
    pub fn authorize(&self, user_id: Uuid, project_id: Uuid) {
        if let Ok(mut memberships) = self.memberships.lock() {
            memberships.insert((user_id, project_id));
        }
    }

    fn create_or_login(&self, email: &str, provider: &str) -> Result<User, Error> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| Error::configuration("user directory lock poisoned"))?;
        let user = users.entry(email.to_string()).or_insert_with(|| User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            provider: provider.to_string(),
        });
        Ok(user.clone())
    }
}

impl UserDirectory for MemoryDirectory {
    fn create_or_login_with_oauth(&self, profile: &OAuthProfile) -> Result<User, Error> {
        self.create_or_login(&profile.email, &profile.provider)
    }

    fn create_or_login_with_password_grant(&self, email: &str) -> Result<User, Error> {
        self.create_or_login(email, "commerce")
    }

    fn create_or_login_with_dev_secret(&self, email: &str) -> Result<User, Error> {
        self.create_or_login(email, "dev")
    }

    fn is_user_authorized_for_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<bool, Error> {
        let memberships = self
            .memberships
            .lock()
            .map_err(|_| Error::configuration("membership lock poisoned"))?;
        Ok(memberships.contains(&(user_id, project_id)))
    }

    fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, Error> {
        let users = self
            .users
            .lock()
            .map_err(|_| Error::configuration("user directory lock poisoned"))?;
        Ok(users.values().find(|user| user.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_or_login_is_idempotent_per_email() {
        let directory = MemoryDirectory::new();
        let first = directory
            .create_or_login_with_password_grant("u@x.com")
            .expect("user");
        let second = directory
            .create_or_login_with_password_grant("u@x.com")
            .expect("user");
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn membership_defaults_to_denied() {
        let directory = MemoryDirectory::new();
        let user = directory
            .create_or_login_with_dev_secret("u@x.com")
            .expect("user");
        let project = Uuid::new_v4();
        assert!(
            !directory
                .is_user_authorized_for_project(user.id, project)
                .expect("lookup")
        );
        directory.authorize(user.id, project);
        assert!(
            directory
                .is_user_authorized_for_project(user.id, project)
                .expect("lookup")
        );
    }

    #[test]
    fn get_user_by_id_round_trips() {
        let directory = MemoryDirectory::new();
        let profile = OAuthProfile {
            provider: "github".to_string(),
            subject: "42".to_string(),
            email: "dev@x.com".to_string(),
            display_name: Some("Dev".to_string()),
        };
        let user = directory.create_or_login_with_oauth(&profile).expect("user");
        let found = directory.get_user_by_id(user.id).expect("lookup");
        assert_eq!(found, Some(user));
        assert_eq!(directory.get_user_by_id(Uuid::new_v4()).expect("lookup"), None);
    }
}
