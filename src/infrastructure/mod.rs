pub mod calendar_port;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod logging;
pub mod shared_store;
pub mod store;
pub mod timer_repository;
