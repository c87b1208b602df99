pub mod core;
pub mod models;
pub mod services;
