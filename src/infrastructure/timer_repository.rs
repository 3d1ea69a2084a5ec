use crate::domain::models::{ActiveTimerMap, Timer, TimerSession};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::store::NamespaceStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TIMERS_PREFIX: &str = "timers";
const ACTIVE_TIMERS_PREFIX: &str = "activeTimers";
const SESSIONS_PREFIX: &str = "timerSessions";

/// Typed access to the three per-user collections the timer service owns.
pub trait TimerStateRepository: Send + Sync {
    fn load_timers(&self, user_id: &str) -> Result<Vec<Timer>, InfraError>;
    fn save_timers(&self, user_id: &str, timers: &[Timer]) -> Result<(), InfraError>;
    fn load_active(&self, user_id: &str) -> Result<ActiveTimerMap, InfraError>;
    fn save_active(&self, user_id: &str, active: &ActiveTimerMap) -> Result<(), InfraError>;
    fn load_sessions(&self, user_id: &str) -> Result<Vec<TimerSession>, InfraError>;
    fn save_sessions(&self, user_id: &str, sessions: &[TimerSession]) -> Result<(), InfraError>;
}

/// Store-backed repository; works over either store variant.
#[derive(Debug, Clone)]
pub struct StoreTimerStateRepository<S: NamespaceStore> {
    store: Arc<S>,
}

impl<S: NamespaceStore> StoreTimerStateRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn scoped_key(prefix: &str, user_id: &str) -> String {
        format!("{prefix}_{user_id}")
    }

    /// A value that no longer matches its schema is treated the same way as
    /// a malformed file: the collection reads as empty.
    fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        prefix: &str,
        user_id: &str,
    ) -> Result<T, InfraError> {
        let Some(raw) = self.store.get(&Self::scoped_key(prefix, user_id))? else {
            return Ok(T::default());
        };
        Ok(serde_json::from_value(raw).unwrap_or_default())
    }

    fn save<T: Serialize>(&self, prefix: &str, user_id: &str, value: &T) -> Result<(), InfraError> {
        self.store.set(
            &Self::scoped_key(prefix, user_id),
            serde_json::to_value(value)?,
        )
    }
}

impl<S: NamespaceStore> TimerStateRepository for StoreTimerStateRepository<S> {
    fn load_timers(&self, user_id: &str) -> Result<Vec<Timer>, InfraError> {
        self.load_or_default(TIMERS_PREFIX, user_id)
    }

    fn save_timers(&self, user_id: &str, timers: &[Timer]) -> Result<(), InfraError> {
        self.save(TIMERS_PREFIX, user_id, &timers)
    }

    fn load_active(&self, user_id: &str) -> Result<ActiveTimerMap, InfraError> {
        self.load_or_default(ACTIVE_TIMERS_PREFIX, user_id)
    }

    fn save_active(&self, user_id: &str, active: &ActiveTimerMap) -> Result<(), InfraError> {
        self.save(ACTIVE_TIMERS_PREFIX, user_id, active)
    }

    fn load_sessions(&self, user_id: &str) -> Result<Vec<TimerSession>, InfraError> {
        self.load_or_default(SESSIONS_PREFIX, user_id)
    }

    fn save_sessions(&self, user_id: &str, sessions: &[TimerSession]) -> Result<(), InfraError> {
        self.save(SESSIONS_PREFIX, user_id, &sessions)
    }
}

#[derive(Debug, Default)]
struct UserState {
    timers: Vec<Timer>,
    active: ActiveTimerMap,
    sessions: Vec<TimerSession>,
}

#[derive(Debug, Default)]
pub struct InMemoryTimerStateRepository {
    users: Mutex<HashMap<String, UserState>>,
}

impl InMemoryTimerStateRepository {
    fn with_user<R>(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut UserState) -> R,
    ) -> Result<R, InfraError> {
        let mut users = self
            .users
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("repository lock poisoned: {error}")))?;
        Ok(apply(users.entry(user_id.to_string()).or_default()))
    }
}

impl TimerStateRepository for InMemoryTimerStateRepository {
    fn load_timers(&self, user_id: &str) -> Result<Vec<Timer>, InfraError> {
        self.with_user(user_id, |state| state.timers.clone())
    }

    fn save_timers(&self, user_id: &str, timers: &[Timer]) -> Result<(), InfraError> {
        self.with_user(user_id, |state| state.timers = timers.to_vec())
    }

    fn load_active(&self, user_id: &str) -> Result<ActiveTimerMap, InfraError> {
        self.with_user(user_id, |state| state.active.clone())
    }

    fn save_active(&self, user_id: &str, active: &ActiveTimerMap) -> Result<(), InfraError> {
        self.with_user(user_id, |state| state.active = active.clone())
    }

    fn load_sessions(&self, user_id: &str) -> Result<Vec<TimerSession>, InfraError> {
        self.with_user(user_id, |state| state.sessions.clone())
    }

    fn save_sessions(&self, user_id: &str, sessions: &[TimerSession]) -> Result<(), InfraError> {
        self.with_user(user_id, |state| state.sessions = sessions.to_vec())
    }
}
