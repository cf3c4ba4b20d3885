//! Contracts for the external systems the integration handlers talk to.
//!
//! Only the interfaces live here; the concrete clients (database repository,
//! learning platform web service, groupware API) are provided by the hosting
//! process. [`RetryingLearningPlatform`] and [`RetryingGroupware`] wrap any
//! client with [`retry`](crate::retry::retry) so transient failures are
//! absorbed before a handler sees them.

use crate::cursor::{Page, PageRequest, PageSource};
use crate::error::GatewayError;
use crate::mass_action::MassActionResult;
use crate::retry::{RetryPolicy, retry};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A person as stored by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Identifier
    pub id: Uuid,
    /// Login name
    pub username: String,
    /// Given name
    pub given_name: String,
    /// Family name
    pub family_name: String,
    /// Primary email address, if any
    pub email: Option<String>,
}

/// Read access to persons.
pub trait PersonRepository: Send + Sync {
    /// Persons holding `role_id`, one page at a time.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the store cannot be read.
    fn find_by_role<'a>(
        &'a self,
        role_id: Uuid,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, Result<Page<Person>, GatewayError>>;
}

/// Persons holding one role, paged through [`PersonRepository::find_by_role`].
pub struct RoleMembers<'a> {
    persons: &'a dyn PersonRepository,
    role_id: Uuid,
}

impl<'a> RoleMembers<'a> {
    /// Page source over the holders of `role_id`.
    #[must_use]
    pub fn new(persons: &'a dyn PersonRepository, role_id: Uuid) -> Self {
        Self { persons, role_id }
    }
}

impl PageSource<Person> for RoleMembers<'_> {
    fn fetch<'a>(
        &'a self,
        request: &'a PageRequest,
    ) -> BoxFuture<'a, Result<Page<Person>, GatewayError>> {
        self.persons.find_by_role(self.role_id, request)
    }
}

/// A learning platform user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlatformUser {
    /// Identity system id, used as the platform's external id
    pub external_id: String,
    /// Login name
    pub login: String,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Email address, if any
    pub email: Option<String>,
}

impl From<&Person> for LearningPlatformUser {
    fn from(person: &Person) -> Self {
        Self {
            external_id: person.id.to_string(),
            login: person.username.clone(),
            first_name: person.given_name.clone(),
            last_name: person.family_name.clone(),
            email: person.email.clone(),
        }
    }
}

/// Learning platform web service.
pub trait LearningPlatformClient: Send + Sync {
    /// Create or update users in one mass action.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the call fails as a whole.
    fn create_persons<'a>(
        &'a self,
        users: &'a [LearningPlatformUser],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>>;

    /// Delete the user with the given identity system id.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the user could not be deleted.
    fn delete_person(&self, person_id: Uuid) -> BoxFuture<'_, Result<(), GatewayError>>;
}

/// A groupware (mail and calendar) account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupwareAccount {
    /// Identity system id
    pub person_id: Uuid,
    /// Login name
    pub username: String,
    /// Primary email address
    pub address: String,
    /// Whether the account may log in
    pub enabled: bool,
}

/// Groupware administration API.
pub trait GroupwareClient: Send + Sync {
    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the account could not be created.
    fn create_account<'a>(
        &'a self,
        account: &'a GroupwareAccount,
    ) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// Change an account's login name.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the account could not be renamed.
    fn rename_account<'a>(
        &'a self,
        old_username: &'a str,
        new_username: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// Delete an account.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] if no such account exists.
    fn delete_account<'a>(&'a self, username: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// Add members to a group in one mass action.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the call fails as a whole.
    fn add_group_members<'a>(
        &'a self,
        group: &'a str,
        usernames: &'a [String],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>>;
}

/// Learning platform client that retries transient failures.
pub struct RetryingLearningPlatform {
    inner: Arc<dyn LearningPlatformClient>,
    policy: RetryPolicy,
}

impl RetryingLearningPlatform {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: Arc<dyn LearningPlatformClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl LearningPlatformClient for RetryingLearningPlatform {
    fn create_persons<'a>(
        &'a self,
        users: &'a [LearningPlatformUser],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(retry(&self.policy, "create_persons", move || {
            self.inner.create_persons(users)
        }))
    }

    fn delete_person(&self, person_id: Uuid) -> BoxFuture<'_, Result<(), GatewayError>> {
        Box::pin(retry(&self.policy, "delete_person", move || {
            self.inner.delete_person(person_id)
        }))
    }
}

/// Groupware client that retries transient failures.
pub struct RetryingGroupware {
    inner: Arc<dyn GroupwareClient>,
    policy: RetryPolicy,
}

impl RetryingGroupware {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub fn new(inner: Arc<dyn GroupwareClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl GroupwareClient for RetryingGroupware {
    fn create_account<'a>(
        &'a self,
        account: &'a GroupwareAccount,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(retry(&self.policy, "create_account", move || {
            self.inner.create_account(account)
        }))
    }

    fn rename_account<'a>(
        &'a self,
        old_username: &'a str,
        new_username: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(retry(&self.policy, "rename_account", move || {
            self.inner.rename_account(old_username, new_username)
        }))
    }

    fn delete_account<'a>(&'a self, username: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(retry(&self.policy, "delete_account", move || {
            self.inner.delete_account(username)
        }))
    }

    fn add_group_members<'a>(
        &'a self,
        group: &'a str,
        usernames: &'a [String],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(retry(&self.policy, "add_group_members", move || {
            self.inner.add_group_members(group, usernames)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_platform_user_from_person() {
        let id = Uuid::new_v4();
        let person = Person {
            id,
            username: "jdoe".to_string(),
            given_name: "Jane".to_string(),
            family_name: "Doe".to_string(),
            email: Some("jane@example.org".to_string()),
        };

        let user = LearningPlatformUser::from(&person);

        assert_eq!(user.external_id, id.to_string());
        assert_eq!(user.login, "jdoe");
        assert_eq!(user.first_name, "Jane");
        assert_eq!(user.last_name, "Doe");
        assert_eq!(user.email.as_deref(), Some("jane@example.org"));
    }
}
