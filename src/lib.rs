pub mod config;
pub mod hw;
pub mod kicker;
pub mod link;
pub mod messages;
pub mod motor;
pub mod protocol;
pub mod runtime;
pub mod store;
pub mod watchdog;
