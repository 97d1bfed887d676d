pub mod action_handler;
pub mod event_source;
pub mod repository;
pub mod resource_lister;

pub use action_handler::*;
pub use event_source::*;
pub use repository::*;
pub use resource_lister::*;
