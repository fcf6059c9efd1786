/// Database model definitions.
pub mod models;
/// Session document storage backends.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
