//! Recipient resolution: mapping abstract roles to concrete contacts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DirectoryConfig;
use crate::model::Contact;

/// User directory collaborator: looks up the accounts holding a role.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contacts_with_role(&self, role: &str) -> Vec<Contact>;
}

/// Directory backed by the static user list in configuration.
#[derive(Debug, Clone)]
pub struct ConfigDirectory {
    users: Vec<ConfigUser>,
}

#[derive(Debug, Clone)]
struct ConfigUser {
    contact: Contact,
    roles: Vec<String>,
}

impl ConfigDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        let users = config
            .users
            .iter()
            .map(|u| ConfigUser {
                contact: Contact {
                    user_id: u.id.clone(),
                    email: u.email.clone(),
                    phone: u.phone.clone(),
                },
                roles: u.roles.clone(),
            })
            .collect();
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for ConfigDirectory {
    async fn contacts_with_role(&self, role: &str) -> Vec<Contact> {
        self.users
            .iter()
            .filter(|u| u.roles.iter().any(|r| r == role))
            .map(|u| u.contact.clone())
            .collect()
    }
}

/// Resolves a set of roles into a deduplicated contact list.
///
/// Resolution never fails: a role held by no account falls through to the
/// default administrative role, and an empty overall result is legal (the
/// dispatcher skips channels with no recipients).
pub struct RecipientResolver {
    directory: Arc<dyn UserDirectory>,
    default_role: String,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn UserDirectory>, default_role: String) -> Self {
        Self {
            directory,
            default_role,
        }
    }

    pub async fn resolve(&self, roles: &[String]) -> Vec<Contact> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut contacts = Vec::new();

        for role in roles {
            let mut found = self.directory.contacts_with_role(role).await;
            if found.is_empty() && role != &self.default_role {
                tracing::warn!(
                    role = %role,
                    default_role = %self.default_role,
                    "Role resolved to no accounts, falling back to default role"
                );
                found = self.directory.contacts_with_role(&self.default_role).await;
            }
            for contact in found {
                if seen.insert(contact.user_id.clone()) {
                    contacts.push(contact);
                }
            }
        }

        tracing::debug!(
            role_count = roles.len(),
            recipient_count = contacts.len(),
            "Recipients resolved"
        );
        contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn test_directory() -> ConfigDirectory {
        ConfigDirectory::from_config(&DirectoryConfig {
            default_role: "admin".to_string(),
            users: vec![
                UserConfig {
                    id: "ana".to_string(),
                    email: Some("ana@example.com".to_string()),
                    phone: Some("34600111222".to_string()),
                    roles: vec!["operator".to_string(), "admin".to_string()],
                },
                UserConfig {
                    id: "luis".to_string(),
                    email: Some("luis@example.com".to_string()),
                    phone: None,
                    roles: vec!["supervisor".to_string()],
                },
                UserConfig {
                    id: "marta".to_string(),
                    email: None,
                    phone: Some("34600555666".to_string()),
                    roles: vec!["operator".to_string()],
                },
            ],
        })
    }

    fn resolver() -> RecipientResolver {
        RecipientResolver::new(Arc::new(test_directory()), "admin".to_string())
    }

    #[tokio::test]
    async fn resolves_role_to_contacts() {
        let contacts = resolver().resolve(&["operator".to_string()]).await;
        let ids: Vec<&str> = contacts.iter().map(|c| c.user_id.as_str()).collect();
        assert_eq!(ids, vec!["ana", "marta"]);
    }

    #[tokio::test]
    async fn deduplicates_across_roles() {
        let contacts = resolver()
            .resolve(&["operator".to_string(), "admin".to_string()])
            .await;
        let ana_count = contacts.iter().filter(|c| c.user_id == "ana").count();
        assert_eq!(ana_count, 1);
        assert_eq!(contacts.len(), 2);
    }

    #[tokio::test]
    async fn empty_role_falls_back_to_default() {
        let contacts = resolver().resolve(&["night-shift".to_string()]).await;
        // Nobody holds night-shift; falls through to admin (ana).
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].user_id, "ana");
    }

    #[tokio::test]
    async fn unknown_default_role_yields_empty_not_error() {
        let resolver =
            RecipientResolver::new(Arc::new(test_directory()), "missing".to_string());
        let contacts = resolver.resolve(&["night-shift".to_string()]).await;
        assert!(contacts.is_empty());
    }

    #[tokio::test]
    async fn no_roles_yields_empty() {
        let contacts = resolver().resolve(&[]).await;
        assert!(contacts.is_empty());
    }
}
