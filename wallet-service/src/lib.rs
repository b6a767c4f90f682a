pub mod errors;
pub mod handlers;
pub mod kafka;
pub mod models;
pub mod repository;
