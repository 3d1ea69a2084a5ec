pub mod auth_events;
pub mod bootstrap;
pub mod commands;
pub mod timer_service;
