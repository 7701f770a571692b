pub mod app_state;
pub mod broker;
pub mod config;
pub mod startup;
