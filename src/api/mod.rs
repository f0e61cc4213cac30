pub mod handler;
pub mod models;
pub mod signature;
pub mod validation;

pub use handler::AppState;
