use std::{collections::HashMap, sync::Arc};

use crate::{error::RepositoryError, schema::Entity};

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Storage backing one entity type. Search hits are rehydrated through it.
pub trait Repository: Send + Sync {
    fn find_all(&self, entity_name: &str)
    -> RepositoryResult<Vec<Arc<dyn Entity>>>;

    /// `id` never carries the `<type>:` prefix of document keys.
    /// `Ok(None)` means the entity no longer exists.
    fn find_one_by_id(
        &self,
        id: &str,
    ) -> RepositoryResult<Option<Arc<dyn Entity>>>;
}

/// Resolves the repository behind an entity type's repository token.
pub trait RepositoryResolver {
    fn repository(&self, token: &str) -> Option<Arc<dyn Repository>>;
}

impl RepositoryResolver for HashMap<String, Arc<dyn Repository>> {
    fn repository(&self, token: &str) -> Option<Arc<dyn Repository>> {
        self.get(token).cloned()
    }
}
