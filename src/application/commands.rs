use crate::application::auth_events::{AuthEvent, AuthEventBus};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::timer_service::{StartStopOutcome, TimerService};
use crate::domain::models::{validate_non_empty, Timer, TimerSession};
use crate::infrastructure::calendar_port::{CalendarPort, GoogleCalendarPort};
use crate::infrastructure::config::read_timezone;
use crate::infrastructure::credential_store::KeyringCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::logging::Logger;
use crate::infrastructure::shared_store::LockedJsonFileStore;
use crate::infrastructure::timer_repository::StoreTimerStateRepository;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

const STORE_FILE: &str = "tallybar-store.json";

type DefaultRepository = StoreTimerStateRepository<LockedJsonFileStore>;
type DefaultCalendarPort = GoogleCalendarPort<KeyringCredentialStore>;
pub type DefaultTimerService = TimerService<DefaultRepository, DefaultCalendarPort>;

/// Process-wide wiring for the operation surface. The store file under
/// `state/` is shared with the out-of-process helper, hence the locked
/// store variant.
pub struct AppState {
    config_dir: PathBuf,
    logger: Arc<Logger>,
    auth_bus: AuthEventBus,
    calendar: Arc<DefaultCalendarPort>,
    service: Arc<DefaultTimerService>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let logger = Arc::new(Logger::new(&bootstrap.logs_dir));

        let store = Arc::new(LockedJsonFileStore::new(
            bootstrap.state_dir.join(STORE_FILE),
            Arc::clone(&logger),
        ));
        let repository = Arc::new(StoreTimerStateRepository::new(store));
        let credentials = Arc::new(KeyringCredentialStore::default());
        let calendar = Arc::new(GoogleCalendarPort::new(credentials));
        let time_zone = read_timezone(&bootstrap.config_dir)?;
        let service = Arc::new(
            TimerService::new(repository, Arc::clone(&calendar), Arc::clone(&logger))
                .with_time_zone(time_zone),
        );

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logger,
            auth_bus: AuthEventBus::new(),
            calendar,
            service,
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn service(&self) -> &Arc<DefaultTimerService> {
        &self.service
    }

    pub fn auth_bus(&self) -> &AuthEventBus {
        &self.auth_bus
    }

    /// Spawn the auto-save tick and the auth-event listener. Requires a
    /// running tokio runtime; call once from the embedding shell.
    pub fn start_background_tasks(&self) {
        let Ok(mut background) = self.background.lock() else {
            return;
        };
        background.push(TimerService::spawn_autosave(Arc::clone(&self.service)));
        background.push(TimerService::spawn_auth_listener(
            Arc::clone(&self.service),
            &self.auth_bus,
        ));
    }

    pub fn shutdown(&self) {
        let Ok(mut background) = self.background.lock() else {
            return;
        };
        for handle in background.drain(..) {
            handle.abort();
        }
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.logger.error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.logger.info(command, message);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActiveTimerEntry {
    pub name: String,
    pub start_time: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StartStopResponse {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CalendarSummaryResponse {
    pub id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub fn get_all_timers_impl(state: &AppState) -> Result<Vec<Timer>, InfraError> {
    Ok(state.service.get_all_timers())
}

pub fn get_active_timers_impl(state: &AppState) -> Result<Vec<ActiveTimerEntry>, InfraError> {
    Ok(state
        .service
        .get_active_timers()
        .into_iter()
        .map(|(name, start_time)| ActiveTimerEntry {
            name,
            start_time: start_time.to_rfc3339(),
        })
        .collect())
}

pub fn add_timer_impl(
    state: &AppState,
    name: String,
    calendar_id: String,
) -> Result<Timer, InfraError> {
    let timer = state.service.add_timer(&name, &calendar_id)?;
    state.log_info("add_timer", &format!("added timer '{}'", timer.name));
    Ok(timer)
}

pub fn save_timer_impl(
    state: &AppState,
    name: String,
    calendar_id: String,
) -> Result<Timer, InfraError> {
    let timer = state.service.save_timer(&name, &calendar_id)?;
    state.log_info("save_timer", &format!("saved timer '{}'", timer.name));
    Ok(timer)
}

pub async fn delete_timer_impl(state: &AppState, name: String) -> Result<bool, InfraError> {
    let deleted = state.service.delete_timer(&name).await?;
    if deleted {
        state.log_info("delete_timer", &format!("deleted timer '{}'", name.trim()));
    }
    Ok(deleted)
}

pub async fn start_stop_timer_impl(
    state: &AppState,
    name: String,
) -> Result<StartStopResponse, InfraError> {
    let response = match state.service.start_stop_timer(&name).await? {
        StartStopOutcome::Started { start_time } => StartStopResponse {
            action: "started".to_string(),
            start_time: Some(start_time.to_rfc3339()),
            duration_minutes: None,
        },
        StartStopOutcome::Stopped { duration_minutes } => StartStopResponse {
            action: "stopped".to_string(),
            start_time: None,
            duration_minutes: Some(duration_minutes),
        },
    };
    state.log_info(
        "start_stop_timer",
        &format!("timer '{}' {}", name.trim(), response.action),
    );
    Ok(response)
}

pub fn list_sessions_impl(state: &AppState) -> Result<Vec<TimerSession>, InfraError> {
    Ok(state.service.get_sessions())
}

pub async fn list_calendars_impl(
    state: &AppState,
) -> Result<Vec<CalendarSummaryResponse>, InfraError> {
    Ok(state
        .calendar
        .list_calendars()
        .await?
        .into_iter()
        .map(|calendar| CalendarSummaryResponse {
            id: calendar.id,
            summary: calendar.summary,
        })
        .collect())
}

pub fn auth_status_impl(state: &AppState) -> Result<AuthStatusResponse, InfraError> {
    Ok(AuthStatusResponse {
        authenticated: state.calendar.is_authenticated(),
        user_id: state.calendar.current_user_id(),
    })
}

pub fn set_current_user_impl(
    state: &AppState,
    user_id: Option<String>,
) -> Result<(), InfraError> {
    state.service.set_current_user(user_id);
    Ok(())
}

/// Entry point for the shell that completed an OAuth exchange: publishes
/// the scope switch instead of mutating the service directly.
pub fn notify_auth_success_impl(state: &AppState, user_id: String) -> Result<(), InfraError> {
    validate_non_empty(&user_id, "user_id").map_err(InfraError::InvalidConfig)?;
    state.auth_bus.publish(AuthEvent::SignedIn {
        user_id: user_id.trim().to_string(),
    });
    state.log_info("notify_auth_success", "published signed-in event");
    Ok(())
}

pub fn notify_signed_out_impl(state: &AppState) -> Result<(), InfraError> {
    state.auth_bus.publish(AuthEvent::SignedOut);
    state.log_info("notify_signed_out", "published signed-out event");
    Ok(())
}
