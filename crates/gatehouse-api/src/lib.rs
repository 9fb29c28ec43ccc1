//! Gatehouse API - HTTP layer over the SSO broker and directory-sync engine
//!
//! Thin boundary: handlers translate between HTTP and the controllers in
//! `gatehouse-sso` / `gatehouse-dsync`; all protocol decisions live there.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
