pub mod api;
pub mod models;

mod encoding;
