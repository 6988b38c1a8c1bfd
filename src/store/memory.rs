use super::{Field, Hasher, StoreError, User, UserStatus, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

#[derive(Default)]
struct Inner {
    next_id: u64,
    users: BTreeMap<u64, User>,
}

impl Inner {
    fn taken(&self, field: Field, value: &str, except: u64) -> bool {
        self.users.values().any(|user| {
            user.id != except
                && match field {
                    Field::Username => user.username == value,
                    Field::Email => user.email == value,
                }
        })
    }
}

/// In-process account store with the same uniqueness rules as Postgres.
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
    hasher: Hasher,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            hasher: Hasher::fast(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("user store lock poisoned".to_string()))
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username_or_email(&self, login: &str) -> Result<User, StoreError> {
        if login.is_empty() {
            return Err(StoreError::NotFound);
        }
        let inner = self.lock()?;
        inner
            .users
            .values()
            .find(|user| {
                if login.contains('@') {
                    user.email == login
                } else {
                    user.username == login
                }
            })
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError> {
        let inner = self.lock()?;
        inner.users.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, StoreError> {
        let hashed_password = self.hasher.hash(password).await?;
        let mut inner = self.lock()?;
        if inner.taken(Field::Username, username, 0) {
            return Err(StoreError::AlreadyExists(Field::Username));
        }
        if inner.taken(Field::Email, email, 0) {
            return Err(StoreError::AlreadyExists(Field::Email));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: inner.next_id,
            username: username.to_string(),
            email: email.to_string(),
            hashed_password,
            is_admin: false,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            last_login_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        if inner.taken(Field::Username, &user.username, user.id) {
            return Err(StoreError::AlreadyExists(Field::Username));
        }
        if inner.taken(Field::Email, &user.email, user.id) {
            return Err(StoreError::AlreadyExists(Field::Email));
        }

        let mut stored = user.clone();
        stored.updated_at = Utc::now();
        inner.users.insert(stored.id, stored);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn hasher(&self) -> &Hasher {
        &self.hasher
    }
}
