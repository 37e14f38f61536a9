pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod grace_queue;
pub mod jobs;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
