use crate::catalog_store::CatalogStore;
use std::sync::Arc;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Access to the package catalog.
    pub catalog_store: Arc<dyn CatalogStore>,
}

impl JobContext {
    pub fn new(catalog_store: Arc<dyn CatalogStore>) -> Self {
        Self { catalog_store }
    }
}
