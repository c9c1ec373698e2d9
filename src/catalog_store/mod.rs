mod models;
mod schema;
mod store;
mod trait_def;

#[cfg(test)]
pub(crate) mod testing;

pub use models::*;
pub use schema::CATALOG_VERSIONED_SCHEMAS;
pub use store::SqliteCatalogStore;
pub use trait_def::CatalogStore;
#[cfg(feature = "mock")]
pub use trait_def::MockCatalogStore;
