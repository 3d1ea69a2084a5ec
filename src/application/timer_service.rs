use crate::application::auth_events::{AuthEvent, AuthEventBus};
use crate::domain::models::{
    aligned_event_window, rounded_minutes, ActiveTimerMap, Timer, TimerSession,
};
use crate::infrastructure::calendar_port::CalendarPort;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::encode_session_event;
use crate::infrastructure::logging::Logger;
use crate::infrastructure::timer_repository::TimerStateRepository;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const AUTOSAVE_INTERVAL_SECONDS: u64 = 30;
const SESSION_HISTORY_LIMIT: usize = 100;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStopOutcome {
    Started { start_time: DateTime<Utc> },
    Stopped { duration_minutes: i64 },
}

#[derive(Debug, Default)]
struct ScopeState {
    current_user: Option<String>,
    timers: Vec<Timer>,
    active: ActiveTimerMap,
}

/// Owns the configured timers and the subset currently running.
///
/// State per timer name is STOPPED or RUNNING, derived from membership in
/// the active map. Every transition persists the active map immediately;
/// a periodic auto-save covers long-running timers in between. Persistence
/// failures are degraded to logged warnings so the host process never
/// crashes over a bad disk; configuration errors surface to the caller.
pub struct TimerService<R, P>
where
    R: TimerStateRepository,
    P: CalendarPort,
{
    repository: Arc<R>,
    calendar: Arc<P>,
    logger: Arc<Logger>,
    time_zone: Option<String>,
    state: Mutex<ScopeState>,
    now_provider: NowProvider,
}

impl<R, P> TimerService<R, P>
where
    R: TimerStateRepository + 'static,
    P: CalendarPort + 'static,
{
    pub fn new(repository: Arc<R>, calendar: Arc<P>, logger: Arc<Logger>) -> Self {
        Self {
            repository,
            calendar,
            logger,
            time_zone: None,
            state: Mutex::new(ScopeState::default()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_time_zone(mut self, time_zone: Option<String>) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// Switch the persistence scope. Clears in-memory state and reloads the
    /// new scope's collections; active entries whose timer is no longer
    /// configured are pruned. Never fails.
    pub fn set_current_user(&self, user_id: Option<String>) {
        let user_id = user_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.timers.clear();
        state.active.clear();
        state.current_user = user_id;

        if let Some(user) = state.current_user.clone() {
            state.timers = self
                .repository
                .load_timers(&user)
                .unwrap_or_else(|error| {
                    self.logger
                        .warn("timer_service", &format!("failed loading timers: {error}"));
                    Vec::new()
                });
            let mut active = self
                .repository
                .load_active(&user)
                .unwrap_or_else(|error| {
                    self.logger.warn(
                        "timer_service",
                        &format!("failed loading active timers: {error}"),
                    );
                    ActiveTimerMap::new()
                });
            let configured = &state.timers;
            active.retain(|name, _| configured.iter().any(|timer| timer.name == *name));
            state.active = active;
            self.logger
                .info("timer_service", &format!("switched scope to user {user}"));
        } else {
            self.logger.info("timer_service", "cleared user scope");
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.current_user.clone())
    }

    pub fn get_all_timers(&self) -> Vec<Timer> {
        self.state
            .lock()
            .map(|state| state.timers.clone())
            .unwrap_or_default()
    }

    pub fn get_active_timers(&self) -> ActiveTimerMap {
        self.state
            .lock()
            .map(|state| state.active.clone())
            .unwrap_or_default()
    }

    pub fn get_sessions(&self) -> Vec<TimerSession> {
        let Some(user) = self.current_user() else {
            return Vec::new();
        };
        self.repository.load_sessions(&user).unwrap_or_else(|error| {
            self.logger
                .warn("timer_service", &format!("failed loading sessions: {error}"));
            Vec::new()
        })
    }

    pub fn add_timer(&self, name: &str, calendar_id: &str) -> Result<Timer, InfraError> {
        let timer = normalized_timer(name, calendar_id)?;

        let (user, timers) = {
            let mut state = self.lock_state()?;
            let user = require_user(&state)?;
            if state.timers.iter().any(|existing| existing.name == timer.name) {
                return Err(InfraError::DuplicateTimer(timer.name.clone()));
            }
            state.timers.push(timer.clone());
            (user, state.timers.clone())
        };

        self.persist_timers_logged(&user, &timers);
        Ok(timer)
    }

    /// Upsert: updates the calendar binding in place when the name exists,
    /// otherwise behaves as add.
    pub fn save_timer(&self, name: &str, calendar_id: &str) -> Result<Timer, InfraError> {
        let timer = normalized_timer(name, calendar_id)?;

        let (user, timers) = {
            let mut state = self.lock_state()?;
            let user = require_user(&state)?;
            match state
                .timers
                .iter_mut()
                .find(|existing| existing.name == timer.name)
            {
                Some(existing) => existing.calendar_id = timer.calendar_id.clone(),
                None => state.timers.push(timer.clone()),
            }
            (user, state.timers.clone())
        };

        self.persist_timers_logged(&user, &timers);
        Ok(timer)
    }

    /// Returns false when the name is not configured. A running timer is
    /// stopped first, with the full stop side effects, before its
    /// configuration is removed.
    pub async fn delete_timer(&self, name: &str) -> Result<bool, InfraError> {
        let name = name.trim();
        let (user, timer, running_since) = {
            let state = self.lock_state()?;
            let user = require_user(&state)?;
            let Some(timer) = state
                .timers
                .iter()
                .find(|existing| existing.name == name)
                .cloned()
            else {
                return Ok(false);
            };
            (user, timer, state.active.get(name).copied())
        };

        if let Some(started_at) = running_since {
            let now = (self.now_provider)();
            self.stop_running(&user, &timer, started_at, now).await;
        }

        let timers = {
            let mut state = self.lock_state()?;
            state.timers.retain(|existing| existing.name != name);
            state.active.remove(name);
            state.timers.clone()
        };
        self.persist_timers_logged(&user, &timers);

        self.logger
            .info("timer_service", &format!("deleted timer '{name}'"));
        Ok(true)
    }

    pub async fn start_stop_timer(&self, name: &str) -> Result<StartStopOutcome, InfraError> {
        let name = name.trim();
        let now = (self.now_provider)();

        enum Transition {
            Start { user: String, active: ActiveTimerMap },
            Stop {
                user: String,
                timer: Timer,
                started_at: DateTime<Utc>,
            },
        }

        let transition = {
            let mut state = self.lock_state()?;
            let user = require_user(&state)?;
            let Some(timer) = state
                .timers
                .iter()
                .find(|existing| existing.name == name)
                .cloned()
            else {
                return Err(InfraError::TimerNotFound(name.to_string()));
            };

            match state.active.get(name).copied() {
                None => {
                    state.active.insert(timer.name.clone(), now);
                    Transition::Start {
                        user,
                        active: state.active.clone(),
                    }
                }
                Some(started_at) => Transition::Stop {
                    user,
                    timer,
                    started_at,
                },
            }
        };

        match transition {
            Transition::Start { user, active } => {
                self.persist_active_logged(&user, &active);
                self.logger
                    .info("timer_service", &format!("started timer '{name}'"));
                Ok(StartStopOutcome::Started { start_time: now })
            }
            Transition::Stop {
                user,
                timer,
                started_at,
            } => {
                let duration_minutes = self.stop_running(&user, &timer, started_at, now).await;
                self.logger.info(
                    "timer_service",
                    &format!("stopped timer '{name}' after {duration_minutes}m"),
                );
                Ok(StartStopOutcome::Stopped { duration_minutes })
            }
        }
    }

    /// Persist the active map for the current scope; the auto-save tick and
    /// every state transition funnel through this.
    pub fn flush_active(&self) {
        let Ok(state) = self.state.lock() else {
            return;
        };
        let Some(user) = state.current_user.clone() else {
            return;
        };
        let active = state.active.clone();
        drop(state);
        self.persist_active_logged(&user, &active);
    }

    /// The stop algorithm. Removes the run from the active map and persists
    /// immediately, mirrors the aligned window to the calendar best-effort,
    /// and appends the session record regardless of the mirror's outcome.
    async fn stop_running(
        &self,
        user: &str,
        timer: &Timer,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> i64 {
        let duration_minutes = rounded_minutes(started_at, now).max(1);
        let (aligned_start, aligned_end) = aligned_event_window(started_at, now);

        let active = {
            match self.state.lock() {
                Ok(mut state) => {
                    state.active.remove(&timer.name);
                    Some(state.active.clone())
                }
                Err(_) => None,
            }
        };
        if let Some(active) = active {
            self.persist_active_logged(user, &active);
        }

        if now > started_at {
            let event = encode_session_event(
                &timer.name,
                aligned_start,
                aligned_end,
                self.time_zone.as_deref(),
            );
            if let Err(error) = self.calendar.create_event(&timer.calendar_id, &event).await {
                self.logger.warn(
                    "timer_service",
                    &format!("calendar mirror failed for '{}': {error}", timer.name),
                );
            }
        }

        let session = TimerSession {
            name: timer.name.clone(),
            calendar_id: timer.calendar_id.clone(),
            start_time: aligned_start,
            end_time: aligned_end,
            duration_minutes,
        };
        self.append_session_logged(user, session);

        duration_minutes
    }

    fn append_session_logged(&self, user: &str, session: TimerSession) {
        let mut sessions = self.repository.load_sessions(user).unwrap_or_else(|error| {
            self.logger
                .warn("timer_service", &format!("failed loading sessions: {error}"));
            Vec::new()
        });
        sessions.push(session);
        if sessions.len() > SESSION_HISTORY_LIMIT {
            let overflow = sessions.len() - SESSION_HISTORY_LIMIT;
            sessions.drain(..overflow);
        }
        if let Err(error) = self.repository.save_sessions(user, &sessions) {
            self.logger
                .warn("timer_service", &format!("failed saving sessions: {error}"));
        }
    }

    fn persist_timers_logged(&self, user: &str, timers: &[Timer]) {
        if let Err(error) = self.repository.save_timers(user, timers) {
            self.logger
                .warn("timer_service", &format!("failed saving timers: {error}"));
        }
    }

    fn persist_active_logged(&self, user: &str, active: &ActiveTimerMap) {
        if let Err(error) = self.repository.save_active(user, active) {
            self.logger.warn(
                "timer_service",
                &format!("failed saving active timers: {error}"),
            );
        }
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ScopeState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("service lock poisoned: {error}")))
    }

    /// Flush the active map on a fixed cadence so a crash loses at most one
    /// interval of wall-clock precision. Abort the handle on shutdown.
    pub fn spawn_autosave(service: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(AUTOSAVE_INTERVAL_SECONDS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.flush_active();
            }
        })
    }

    /// Drive user-scope switches from the auth event channel.
    pub fn spawn_auth_listener(service: Arc<Self>, bus: &AuthEventBus) -> JoinHandle<()> {
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(AuthEvent::SignedIn { user_id }) => {
                        service.set_current_user(Some(user_id));
                    }
                    Ok(AuthEvent::SignedOut) => service.set_current_user(None),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn normalized_timer(name: &str, calendar_id: &str) -> Result<Timer, InfraError> {
    let timer = Timer {
        name: name.trim().to_string(),
        calendar_id: calendar_id.trim().to_string(),
    };
    timer.validate().map_err(InfraError::InvalidConfig)?;
    Ok(timer)
}

fn require_user(state: &ScopeState) -> Result<String, InfraError> {
    state.current_user.clone().ok_or(InfraError::NoCurrentUser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_mapper::GoogleCalendarEvent;
    use crate::infrastructure::timer_repository::InMemoryTimerStateRepository;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCalendarPort {
        created: Mutex<Vec<(String, GoogleCalendarEvent)>>,
        fail_create: AtomicBool,
        create_calls: AtomicUsize,
    }

    impl FakeCalendarPort {
        fn created_events(&self) -> Vec<(String, GoogleCalendarEvent)> {
            self.created.lock().expect("created lock").clone()
        }
    }

    #[async_trait]
    impl CalendarPort for FakeCalendarPort {
        async fn create_event(
            &self,
            calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<String, InfraError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(InfraError::Calendar("remote sink unavailable".to_string()));
            }
            self.created
                .lock()
                .expect("created lock")
                .push((calendar_id.to_string(), event.clone()));
            Ok("created-event".to_string())
        }

        async fn list_calendars(
            &self,
        ) -> Result<Vec<crate::infrastructure::calendar_port::CalendarSummary>, InfraError>
        {
            Ok(Vec::new())
        }

        fn is_authenticated(&self) -> bool {
            true
        }

        fn current_user_id(&self) -> Option<String> {
            Some("fake-user".to_string())
        }
    }

    /// Delegates reads, fails every write. Used to prove persistence
    /// failures degrade to warnings instead of surfacing.
    #[derive(Default)]
    struct FailingWriteRepository {
        inner: InMemoryTimerStateRepository,
    }

    impl TimerStateRepository for FailingWriteRepository {
        fn load_timers(&self, user_id: &str) -> Result<Vec<Timer>, InfraError> {
            self.inner.load_timers(user_id)
        }

        fn save_timers(&self, _user_id: &str, _timers: &[Timer]) -> Result<(), InfraError> {
            Err(InfraError::Io(std::io::Error::other("disk full")))
        }

        fn load_active(&self, user_id: &str) -> Result<ActiveTimerMap, InfraError> {
            self.inner.load_active(user_id)
        }

        fn save_active(&self, _user_id: &str, _active: &ActiveTimerMap) -> Result<(), InfraError> {
            Err(InfraError::Io(std::io::Error::other("disk full")))
        }

        fn load_sessions(&self, user_id: &str) -> Result<Vec<TimerSession>, InfraError> {
            self.inner.load_sessions(user_id)
        }

        fn save_sessions(
            &self,
            _user_id: &str,
            _sessions: &[TimerSession],
        ) -> Result<(), InfraError> {
            Err(InfraError::Io(std::io::Error::other("disk full")))
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    struct Harness {
        service: Arc<TimerService<InMemoryTimerStateRepository, FakeCalendarPort>>,
        repository: Arc<InMemoryTimerStateRepository>,
        calendar: Arc<FakeCalendarPort>,
        clock: Arc<Mutex<DateTime<Utc>>>,
    }

    impl Harness {
        fn new() -> Self {
            let repository = Arc::new(InMemoryTimerStateRepository::default());
            let calendar = Arc::new(FakeCalendarPort::default());
            let clock = Arc::new(Mutex::new(fixed_time("2026-03-02T12:00:00Z")));
            let provider: NowProvider = {
                let clock = Arc::clone(&clock);
                Arc::new(move || *clock.lock().expect("clock lock"))
            };
            let logger = Arc::new(Logger::new(
                std::env::temp_dir().join("tallybar-timer-service-tests-logs"),
            ));
            let service = Arc::new(
                TimerService::new(Arc::clone(&repository), Arc::clone(&calendar), logger)
                    .with_now_provider(provider),
            );
            service.set_current_user(Some("user-1".to_string()));
            Self {
                service,
                repository,
                calendar,
                clock,
            }
        }

        fn set_now(&self, value: &str) {
            *self.clock.lock().expect("clock lock") = fixed_time(value);
        }
    }

    #[test]
    fn add_timer_then_list_contains_exactly_one_entry() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");

        let timers = harness.service.get_all_timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].name, "Deep Work");
        assert_eq!(timers[0].calendar_id, "primary");
    }

    #[test]
    fn duplicate_add_fails_and_leaves_collection_unchanged() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");

        let result = harness.service.add_timer("Deep Work", "other-calendar");
        assert!(matches!(result, Err(InfraError::DuplicateTimer(_))));

        let timers = harness.service.get_all_timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].calendar_id, "primary");
    }

    #[test]
    fn save_timer_updates_binding_in_place() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .save_timer("Deep Work", "work-calendar")
            .expect("save timer");

        let timers = harness.service.get_all_timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].calendar_id, "work-calendar");

        harness
            .service
            .save_timer("Reading", "primary")
            .expect("save behaves as add for new names");
        assert_eq!(harness.service.get_all_timers().len(), 2);
    }

    #[tokio::test]
    async fn start_transitions_to_running_and_persists_immediately() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");

        let outcome = harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");
        assert_eq!(
            outcome,
            StartStopOutcome::Started {
                start_time: fixed_time("2026-03-02T12:00:00Z")
            }
        );

        let active = harness.service.get_active_timers();
        assert_eq!(
            active.get("Deep Work").copied(),
            Some(fixed_time("2026-03-02T12:00:00Z"))
        );
        let persisted = harness
            .repository
            .load_active("user-1")
            .expect("load active");
        assert!(persisted.contains_key("Deep Work"));
    }

    #[tokio::test]
    async fn unknown_timer_name_is_rejected() {
        let harness = Harness::new();
        let result = harness.service.start_stop_timer("Missing").await;
        assert!(matches!(result, Err(InfraError::TimerNotFound(_))));
    }

    #[tokio::test]
    async fn ten_second_run_produces_one_minute_event_and_min_duration() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        harness.set_now("2026-03-02T12:00:10Z");
        let outcome = harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop");
        assert_eq!(
            outcome,
            StartStopOutcome::Stopped {
                duration_minutes: 1
            }
        );
        assert!(harness.service.get_active_timers().is_empty());

        let created = harness.calendar.created_events();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "primary");
        assert_eq!(created[0].1.start.date_time, "2026-03-02T12:00:00+00:00");
        assert_eq!(created[0].1.end.date_time, "2026-03-02T12:01:00+00:00");
    }

    #[tokio::test]
    async fn end_is_aligned_up_to_the_next_minute_boundary() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        harness.set_now("2026-03-02T12:02:05.300Z");
        let outcome = harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop");
        assert_eq!(
            outcome,
            StartStopOutcome::Stopped {
                duration_minutes: 2
            }
        );

        let created = harness.calendar.created_events();
        assert_eq!(created[0].1.end.date_time, "2026-03-02T12:03:00+00:00");

        let sessions = harness.service.get_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start_time, fixed_time("2026-03-02T12:00:00Z"));
        assert_eq!(sessions[0].end_time, fixed_time("2026-03-02T12:03:00Z"));
        assert_eq!(sessions[0].duration_minutes, 2);
    }

    #[tokio::test]
    async fn calendar_failure_still_records_the_session() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");
        harness.calendar.fail_create.store(true, Ordering::SeqCst);

        harness.set_now("2026-03-02T12:10:00Z");
        let outcome = harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop resolves despite remote failure");
        assert_eq!(
            outcome,
            StartStopOutcome::Stopped {
                duration_minutes: 10
            }
        );
        assert_eq!(harness.calendar.create_calls.load(Ordering::SeqCst), 1);

        let sessions = harness.service.get_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "Deep Work");
        assert_eq!(sessions[0].duration_minutes, 10);
    }

    #[tokio::test]
    async fn zero_elapsed_stop_skips_calendar_but_records_session() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        // Clock did not advance between start and stop.
        let outcome = harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop");
        assert_eq!(
            outcome,
            StartStopOutcome::Stopped {
                duration_minutes: 1
            }
        );
        assert_eq!(harness.calendar.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(harness.service.get_sessions().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_running_timer_stops_it_first() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        harness.set_now("2026-03-02T12:05:00Z");
        let deleted = harness
            .service
            .delete_timer("Deep Work")
            .await
            .expect("delete");
        assert!(deleted);

        assert!(harness.service.get_all_timers().is_empty());
        assert!(harness.service.get_active_timers().is_empty());
        let sessions = harness.service.get_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_minutes, 5);
        assert_eq!(harness.calendar.created_events().len(), 1);
    }

    #[tokio::test]
    async fn deleting_an_unknown_timer_returns_false() {
        let harness = Harness::new();
        let deleted = harness
            .service
            .delete_timer("Missing")
            .await
            .expect("delete resolves");
        assert!(!deleted);
    }

    #[tokio::test]
    async fn session_history_is_capped_fifo() {
        let harness = Harness::new();
        let seeded = (0..SESSION_HISTORY_LIMIT)
            .map(|index| TimerSession {
                name: format!("session-{index}"),
                calendar_id: "primary".to_string(),
                start_time: fixed_time("2026-03-02T09:00:00Z"),
                end_time: fixed_time("2026-03-02T09:01:00Z"),
                duration_minutes: 1,
            })
            .collect::<Vec<_>>();
        harness
            .repository
            .save_sessions("user-1", &seeded)
            .expect("seed history");

        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");
        harness.set_now("2026-03-02T12:01:00Z");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop");

        let sessions = harness.service.get_sessions();
        assert_eq!(sessions.len(), SESSION_HISTORY_LIMIT);
        assert_eq!(sessions[0].name, "session-1");
        assert_eq!(
            sessions[SESSION_HISTORY_LIMIT - 1].name,
            "Deep Work".to_string()
        );
    }

    #[tokio::test]
    async fn unscoped_service_fails_mutations_and_reads_empty() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness.service.set_current_user(None);

        assert!(matches!(
            harness.service.add_timer("Another", "primary"),
            Err(InfraError::NoCurrentUser)
        ));
        assert!(matches!(
            harness.service.start_stop_timer("Deep Work").await,
            Err(InfraError::NoCurrentUser)
        ));
        assert!(harness.service.get_all_timers().is_empty());
        assert!(harness.service.get_sessions().is_empty());
    }

    #[tokio::test]
    async fn switching_users_reloads_the_new_scope() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        harness.service.set_current_user(Some("user-2".to_string()));
        assert!(harness.service.get_all_timers().is_empty());
        assert!(harness.service.get_active_timers().is_empty());

        harness.service.set_current_user(Some("user-1".to_string()));
        assert_eq!(harness.service.get_all_timers().len(), 1);
        assert!(harness.service.get_active_timers().contains_key("Deep Work"));
    }

    #[test]
    fn active_entries_without_configuration_are_pruned_on_reload() {
        let harness = Harness::new();
        let mut orphaned = ActiveTimerMap::new();
        orphaned.insert("Ghost".to_string(), fixed_time("2026-03-02T09:00:00Z"));
        harness
            .repository
            .save_active("user-1", &orphaned)
            .expect("seed orphaned active entry");

        harness.service.set_current_user(Some("user-1".to_string()));
        assert!(harness.service.get_active_timers().is_empty());
    }

    #[tokio::test]
    async fn persistence_write_failures_do_not_surface() {
        let repository = Arc::new(FailingWriteRepository::default());
        let calendar = Arc::new(FakeCalendarPort::default());
        let clock = fixed_time("2026-03-02T12:00:00Z");
        let logger = Arc::new(Logger::new(
            std::env::temp_dir().join("tallybar-timer-service-tests-logs"),
        ));
        let service = TimerService::new(repository, Arc::clone(&calendar), logger)
            .with_now_provider(Arc::new(move || clock));
        service.set_current_user(Some("user-1".to_string()));

        service
            .add_timer("Deep Work", "primary")
            .expect("add succeeds despite write failure");
        let outcome = service
            .start_stop_timer("Deep Work")
            .await
            .expect("start succeeds despite write failure");
        assert!(matches!(outcome, StartStopOutcome::Started { .. }));
        let outcome = service
            .start_stop_timer("Deep Work")
            .await
            .expect("stop succeeds despite write failure");
        assert!(matches!(outcome, StartStopOutcome::Stopped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_flushes_the_active_map_on_its_interval() {
        let harness = Harness::new();
        harness
            .service
            .add_timer("Deep Work", "primary")
            .expect("add timer");
        harness
            .service
            .start_stop_timer("Deep Work")
            .await
            .expect("start");

        // Wipe the persisted copy so only the auto-save can restore it.
        harness
            .repository
            .save_active("user-1", &ActiveTimerMap::new())
            .expect("wipe persisted active map");

        let handle = TimerService::spawn_autosave(Arc::clone(&harness.service));
        // Let the task register its interval before advancing the clock.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::advance(Duration::from_secs(AUTOSAVE_INTERVAL_SECONDS + 1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let persisted = harness
            .repository
            .load_active("user-1")
            .expect("load active");
        assert!(persisted.contains_key("Deep Work"));
        handle.abort();
    }

    #[tokio::test]
    async fn auth_events_drive_scope_switches() {
        let harness = Harness::new();
        harness.service.set_current_user(None);
        let bus = AuthEventBus::new();
        let handle = TimerService::spawn_auth_listener(Arc::clone(&harness.service), &bus);

        bus.publish(AuthEvent::SignedIn {
            user_id: "user-9".to_string(),
        });
        let mut switched = false;
        for _ in 0..100 {
            if harness.service.current_user().as_deref() == Some("user-9") {
                switched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(switched, "listener should apply the signed-in scope");

        bus.publish(AuthEvent::SignedOut);
        let mut cleared = false;
        for _ in 0..100 {
            if harness.service.current_user().is_none() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(cleared, "listener should clear the scope on sign-out");
        handle.abort();
    }

    proptest! {
        #[test]
        fn stop_duration_is_always_at_least_one_minute(elapsed_ms in 0i64..86_400_000i64) {
            let start = fixed_time("2026-03-02T12:00:00Z");
            let end = start + chrono::Duration::milliseconds(elapsed_ms);
            let duration = rounded_minutes(start, end).max(1);
            prop_assert!(duration >= 1);

            let (aligned_start, aligned_end) = aligned_event_window(start, end);
            prop_assert!((aligned_end - aligned_start) >= chrono::Duration::minutes(1));
        }
    }
}
