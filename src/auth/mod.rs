use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;
pub mod validation;

pub fn router(state: &AppState) -> Router<AppState> {
    handlers::auth_routes(state)
}
