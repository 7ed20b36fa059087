//! HTTP surface: routes and ticket verification

pub mod routes;
pub mod ticket;

pub use routes::build_router;
