//! Infrastructure layer: event store, dispatch pipeline, read models, config.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod purchase_orders;
pub mod read_model;

mod integration_tests;
