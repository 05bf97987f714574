//! Route handlers. Each one extracts its inputs, calls a service trait object
//! from the request extensions and lets the error's `IntoResponse` pick the status.

pub mod forms;
pub mod health;
pub mod schemas;
pub mod users;
