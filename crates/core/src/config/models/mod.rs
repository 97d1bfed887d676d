pub mod app_config;
pub mod database;
pub mod runtime;

pub use app_config::*;
pub use database::*;
pub use runtime::*;
