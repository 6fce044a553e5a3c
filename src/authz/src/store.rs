//! Read-only view of the user directory
//!
//! The authorization core only ever reads users, groups and access keys;
//! managing them belongs to whatever owns persistence. [`InMemoryDirectory`]
//! backs tests, the simulator and single-process deployments.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AuthzError, Result};
use crate::policy::PolicyDocument;

/// A user with their group memberships and directly attached policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,

    /// Argon2 PHC string; `None` means the user cannot log in with a password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub policies: Vec<PolicyDocument>,
}

impl UserRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_policy(mut self, policy: PolicyDocument) -> Self {
        self.policies.push(policy);
        self
    }

    /// Hash and store a login password
    pub fn with_password(mut self, password: &str) -> Result<Self> {
        self.password_hash = Some(hash_password(password)?);
        Ok(self)
    }

    /// Check a login password against the stored hash
    ///
    /// A user without a password never verifies.
    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash
            .as_deref()
            .map(|hash| verify_password(password, hash))
            .unwrap_or(false)
    }
}

/// A group and the policies attached to it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,

    #[serde(default)]
    pub policies: Vec<PolicyDocument>,
}

impl GroupRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policies: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: PolicyDocument) -> Self {
        self.policies.push(policy);
        self
    }
}

/// An access key id, its secret and the user it acts for
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessKeyRecord {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub username: String,
}

impl AccessKeyRecord {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            username: username.into(),
        }
    }
}

impl std::fmt::Debug for AccessKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeyRecord")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** NOT LOGGED **")
            .field("username", &self.username)
            .finish()
    }
}

/// Directory lookups consumed by the authorization core
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Get a user by name
    async fn user(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Get a group by name
    async fn group(&self, name: &str) -> Result<Option<GroupRecord>>;

    /// Get an access key by id
    async fn access_key(&self, access_key_id: &str) -> Result<Option<AccessKeyRecord>>;

    /// All policies that apply to a user: group policies first, then the
    /// user's own, as one document
    ///
    /// Returns `None` for an unknown user. Groups the user names but that do
    /// not exist contribute nothing.
    async fn effective_policy(&self, username: &str) -> Result<Option<PolicyDocument>> {
        let Some(user) = self.user(username).await? else {
            return Ok(None);
        };

        let mut documents = Vec::new();
        for name in &user.groups {
            if let Some(group) = self.group(name).await? {
                documents.extend(group.policies);
            }
        }
        documents.extend(user.policies);

        Ok(Some(PolicyDocument::merged(&documents)))
    }
}

#[derive(Default)]
struct Directory {
    users: HashMap<String, UserRecord>,
    groups: HashMap<String, GroupRecord>,
    access_keys: HashMap<String, AccessKeyRecord>,
}

/// In-memory directory
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<RwLock<Directory>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user
    pub async fn put_user(&self, user: UserRecord) {
        let mut directory = self.inner.write().await;
        directory.users.insert(user.username.clone(), user);
    }

    /// Insert or replace a group
    pub async fn put_group(&self, group: GroupRecord) {
        let mut directory = self.inner.write().await;
        directory.groups.insert(group.name.clone(), group);
    }

    /// Insert or replace an access key
    pub async fn put_access_key(&self, key: AccessKeyRecord) {
        let mut directory = self.inner.write().await;
        directory.access_keys.insert(key.access_key_id.clone(), key);
    }

    /// Replace the policies attached to an existing user
    pub async fn set_user_policies(
        &self,
        username: &str,
        policies: Vec<PolicyDocument>,
    ) -> Result<()> {
        let mut directory = self.inner.write().await;
        let user = directory
            .users
            .get_mut(username)
            .ok_or_else(|| AuthzError::Internal(format!("unknown user '{}'", username)))?;
        user.policies = policies;
        Ok(())
    }

    pub async fn remove_access_key(&self, access_key_id: &str) -> Option<AccessKeyRecord> {
        self.inner.write().await.access_keys.remove(access_key_id)
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(username).cloned())
    }

    async fn group(&self, name: &str) -> Result<Option<GroupRecord>> {
        Ok(self.inner.read().await.groups.get(name).cloned())
    }

    async fn access_key(&self, access_key_id: &str) -> Result<Option<AccessKeyRecord>> {
        Ok(self.inner.read().await.access_keys.get(access_key_id).cloned())
    }
}

/// Hash a password into an argon2 PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AuthzError::Internal(format!("salt encoding failed: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthzError::Internal(format!("password hashing failed: {}", e)))
}

/// Verify a password against an argon2 PHC string
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Effect, Statement};

    fn doc(action: &str) -> PolicyDocument {
        PolicyDocument::new().with_statement(Statement::new(
            Effect::Allow,
            vec![action.to_string()],
            vec!["*".to_string()],
        ))
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let user = UserRecord::new("charles").with_password("p4ssw0rd").unwrap();

        assert!(user.verify_password("p4ssw0rd"));
        assert!(!user.verify_password("password"));
        assert!(user.password_hash.as_deref().unwrap().starts_with("$argon2"));
    }

    #[test]
    fn test_user_without_password_never_verifies() {
        assert!(!UserRecord::new("charles").verify_password(""));
        assert!(!verify_password("x", "not-a-phc-string"));
    }

    #[test]
    fn test_access_key_debug_hides_secret() {
        let key = AccessKeyRecord::new("AKIDEXAMPLE", "keymaster", "charles");
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("keymaster"));
        assert!(rendered.contains("AKIDEXAMPLE"));
    }

    #[tokio::test]
    async fn test_effective_policy_orders_groups_first() {
        let directory = InMemoryDirectory::new();
        directory
            .put_group(GroupRecord::new("admins").with_policy(doc("group:*")))
            .await;
        directory
            .put_user(
                UserRecord::new("charles")
                    .with_group("admins")
                    .with_group("ghosts")
                    .with_policy(doc("user:*")),
            )
            .await;

        let policy = directory.effective_policy("charles").await.unwrap().unwrap();
        let actions: Vec<_> = policy.statement.iter().map(|s| s.action[0].as_str()).collect();
        assert_eq!(actions, vec!["group:*", "user:*"]);

        assert!(directory.effective_policy("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_user_policies() {
        let directory = InMemoryDirectory::new();
        directory.put_user(UserRecord::new("charles")).await;

        directory
            .set_user_policies("charles", vec![doc("svc:*")])
            .await
            .unwrap();
        assert_eq!(directory.user("charles").await.unwrap().unwrap().policies.len(), 1);
        assert!(directory.set_user_policies("bob", vec![]).await.is_err());
    }
}
