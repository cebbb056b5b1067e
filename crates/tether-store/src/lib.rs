pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod webhooks;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
