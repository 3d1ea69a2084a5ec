pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::auth_events::{AuthEvent, AuthEventBus};
pub use application::commands::{
    add_timer_impl, auth_status_impl, delete_timer_impl, get_active_timers_impl,
    get_all_timers_impl, list_calendars_impl, list_sessions_impl, notify_auth_success_impl,
    notify_signed_out_impl, save_timer_impl, set_current_user_impl, start_stop_timer_impl,
    ActiveTimerEntry, AppState, AuthStatusResponse, CalendarSummaryResponse, StartStopResponse,
};
pub use application::timer_service::{StartStopOutcome, TimerService, AUTOSAVE_INTERVAL_SECONDS};
pub use domain::models::{ActiveTimerMap, Timer, TimerSession};
pub use infrastructure::calendar_port::{CalendarPort, CalendarSummary, GoogleCalendarPort};
pub use infrastructure::error::InfraError;
