//! Doubles for the external systems behind the integration handlers.
//!
//! - [`InMemoryPersonRepository`]: role → persons, offset cursors
//! - [`MockLearningPlatform`]: records mass actions and deletions
//! - [`MockGroupware`]: records account and group operations
//!
//! Failures are scripted: refuse individual usernames (per-item failure in a
//! mass action), or queue gateway errors that the next calls return.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::future::BoxFuture;
use iam_events_sync::cursor::{Page, PageRequest};
use iam_events_sync::error::GatewayError;
use iam_events_sync::gateway::{
    GroupwareAccount, GroupwareClient, LearningPlatformClient, LearningPlatformUser, Person,
    PersonRepository,
};
use iam_events_sync::mass_action::{ItemStatus, MassActionResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Person with the given username and generated id.
#[must_use]
pub fn person(username: &str) -> Person {
    Person {
        id: Uuid::new_v4(),
        username: username.to_string(),
        given_name: "Test".to_string(),
        family_name: username.to_string(),
        email: Some(format!("{username}@example.org")),
    }
}

/// `count` persons named `user-0`, `user-1`, ...
#[must_use]
pub fn persons(count: usize) -> Vec<Person> {
    (0..count).map(|n| person(&format!("user-{n}"))).collect()
}

/// Person repository backed by a map; cursors are offsets.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPersonRepository {
    by_role: Arc<RwLock<HashMap<Uuid, Vec<Person>>>>,
    failures: Arc<RwLock<VecDeque<GatewayError>>>,
    fetches: Arc<AtomicUsize>,
}

impl InMemoryPersonRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `role_id` the listed holders.
    pub fn insert_role(&self, role_id: Uuid, holders: Vec<Person>) {
        self.by_role.write().unwrap().insert(role_id, holders);
    }

    /// Make the next fetch fail with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.failures.write().unwrap().push_back(error);
    }

    /// Number of `find_by_role` calls.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PersonRepository for InMemoryPersonRepository {
    fn find_by_role<'a>(
        &'a self,
        role_id: Uuid,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, Result<Page<Person>, GatewayError>> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.failures.write().unwrap().pop_front() {
                return Err(error);
            }
            let start = match page.cursor.as_deref() {
                None => 0,
                Some(cursor) => cursor
                    .parse::<usize>()
                    .map_err(|_| GatewayError::Rejected(format!("invalid cursor {cursor}")))?,
            };
            let by_role = self.by_role.read().unwrap();
            let holders = by_role.get(&role_id).map_or(&[][..], Vec::as_slice);
            let end = start.saturating_add(page.page_size).min(holders.len());
            let items = Page::new(holders.get(start..end).unwrap_or_default().to_vec());
            Ok(if end < holders.len() {
                items.with_next_cursor(end.to_string())
            } else {
                items
            })
        })
    }
}

/// Scripted responses shared by the client doubles.
#[derive(Debug, Default)]
struct Script {
    refused: HashSet<String>,
    failures: VecDeque<GatewayError>,
}

impl Script {
    fn next_failure(&mut self) -> Option<GatewayError> {
        self.failures.pop_front()
    }

    fn status_for(&self, username: &str) -> ItemStatus {
        if self.refused.contains(username) {
            ItemStatus::failure(format!("{username} refused"))
        } else {
            ItemStatus::Success
        }
    }
}

/// Learning platform double.
#[derive(Debug, Default, Clone)]
pub struct MockLearningPlatform {
    script: Arc<RwLock<Script>>,
    batches: Arc<RwLock<Vec<Vec<LearningPlatformUser>>>>,
    deleted: Arc<RwLock<Vec<Uuid>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLearningPlatform {
    /// Healthy platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse users with this login in every mass action.
    pub fn refuse(&self, login: &str) {
        self.script.write().unwrap().refused.insert(login.to_string());
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.script.write().unwrap().failures.push_back(error);
    }

    /// Batches received by `create_persons`, in call order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<LearningPlatformUser>> {
        self.batches.read().unwrap().clone()
    }

    /// Ids passed to `delete_person`.
    #[must_use]
    pub fn deleted(&self) -> Vec<Uuid> {
        self.deleted.read().unwrap().clone()
    }

    /// Number of calls, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LearningPlatformClient for MockLearningPlatform {
    fn create_persons<'a>(
        &'a self,
        users: &'a [LearningPlatformUser],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.write().unwrap();
            if let Some(error) = script.next_failure() {
                return Err(error);
            }
            self.batches.write().unwrap().push(users.to_vec());
            let status = users.iter().map(|user| script.status_for(&user.login)).collect();
            Ok(MassActionResult::new(status, ()))
        })
    }

    fn delete_person(&self, person_id: Uuid) -> BoxFuture<'_, Result<(), GatewayError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.script.write().unwrap().next_failure() {
                return Err(error);
            }
            self.deleted.write().unwrap().push(person_id);
            Ok(())
        })
    }
}

/// Groupware double.
#[derive(Debug, Default, Clone)]
pub struct MockGroupware {
    script: Arc<RwLock<Script>>,
    accounts: Arc<RwLock<Vec<GroupwareAccount>>>,
    renames: Arc<RwLock<Vec<(String, String)>>>,
    deleted: Arc<RwLock<Vec<String>>>,
    groups: Arc<RwLock<HashMap<String, Vec<String>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockGroupware {
    /// Healthy groupware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse this username in every group mass action.
    pub fn refuse(&self, username: &str) {
        self.script.write().unwrap().refused.insert(username.to_string());
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.script.write().unwrap().failures.push_back(error);
    }

    /// Accounts created.
    #[must_use]
    pub fn accounts(&self) -> Vec<GroupwareAccount> {
        self.accounts.read().unwrap().clone()
    }

    /// `(old, new)` username pairs renamed.
    #[must_use]
    pub fn renames(&self) -> Vec<(String, String)> {
        self.renames.read().unwrap().clone()
    }

    /// Usernames whose account was deleted.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.read().unwrap().clone()
    }

    /// Members added to `group`, in call order.
    #[must_use]
    pub fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .read()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.write().unwrap().next_failure().map_or(Ok(()), Err)
    }
}

impl GroupwareClient for MockGroupware {
    fn create_account<'a>(
        &'a self,
        account: &'a GroupwareAccount,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.begin()?;
            self.accounts.write().unwrap().push(account.clone());
            Ok(())
        })
    }

    fn rename_account<'a>(
        &'a self,
        old_username: &'a str,
        new_username: &'a str,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.begin()?;
            self.renames
                .write()
                .unwrap()
                .push((old_username.to_string(), new_username.to_string()));
            Ok(())
        })
    }

    fn delete_account<'a>(&'a self, username: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.begin()?;
            self.deleted.write().unwrap().push(username.to_string());
            Ok(())
        })
    }

    fn add_group_members<'a>(
        &'a self,
        group: &'a str,
        usernames: &'a [String],
    ) -> BoxFuture<'a, Result<MassActionResult<()>, GatewayError>> {
        Box::pin(async move {
            self.begin()?;
            let script = self.script.read().unwrap();
            let status: Vec<ItemStatus> = usernames
                .iter()
                .map(|name| script.status_for(name))
                .collect();
            let accepted = usernames
                .iter()
                .zip(&status)
                .filter(|(_, status)| status.failure_description().is_none())
                .map(|(name, _)| name.clone());
            self.groups
                .write()
                .unwrap()
                .entry(group.to_string())
                .or_default()
                .extend(accepted);
            Ok(MassActionResult::new(status, ()))
        })
    }
}
