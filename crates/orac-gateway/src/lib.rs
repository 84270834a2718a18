//! HTTP surface over the ORAC core: thin axum adapters around the
//! pipeline, stores and supervisor.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;
pub mod web_model;

pub use server::build_router;
pub use state::AppState;
