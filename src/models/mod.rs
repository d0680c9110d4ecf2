//! # Data Models
//!
//! SeaORM entities backing the Permission & State Store.

pub mod connector;
pub mod container;
pub mod leaf_document;
pub mod sync_scope;

pub use connector::Entity as Connector;
pub use container::Entity as Container;
pub use leaf_document::Entity as LeafDocument;
pub use sync_scope::Entity as SyncScope;
