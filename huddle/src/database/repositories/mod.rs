//! Repository layer for database access.
//!
//! Each repository is an `#[async_trait]` trait with a sqlx implementation so
//! services can be exercised against in-memory databases.

pub mod campaign;
pub mod directory;
pub mod notification;
pub mod preferences;
pub mod subscription;

pub use campaign::*;
pub use directory::*;
pub use notification::*;
pub use preferences::*;
pub use subscription::*;
