pub mod digest;
pub mod models;

pub use models::*;
