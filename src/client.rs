//! Registry of per-type search indexes.
//!
//! [`SearchClient`] owns one [`SearchIndex`] per indexable entity type,
//! discovers persisted indexes at startup and routes writes and queries by
//! type name.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, warn};

use crate::{
    config::SearchConfig,
    error::{Error, Result},
    projector,
    reindex::{self, ReindexCoordinator, ReindexTask, TaskInfo},
    repository::{Repository, RepositoryResolver},
    schema::{Entity, EntitySchema},
    tantivy_index::{SearchIndex, SearchPage},
};

pub struct SearchClient {
    config: SearchConfig,
    schemas: HashMap<String, Arc<EntitySchema>>,
    repositories: HashMap<String, Arc<dyn Repository>>,
    indexes: RwLock<HashMap<String, Arc<SearchIndex>>>,
    /// One lock per type name, held while its index is (re)registered.
    registration: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    reindexer: ReindexCoordinator,
}

impl SearchClient {
    /// Set up the search root and reopen the indexes persisted in it.
    ///
    /// Every schema must have a repository under its token in `resolver`.
    pub fn open<R>(
        config: SearchConfig,
        schemas: impl IntoIterator<Item = EntitySchema>,
        resolver: &R,
    ) -> Result<Self>
    where
        R: RepositoryResolver + ?Sized,
    {
        std::fs::create_dir_all(config.search_dir())
            .map_err(|_| Error::DataDir(config.search_dir().to_path_buf()))?;

        let mut by_name = HashMap::new();
        let mut repositories = HashMap::new();
        for schema in schemas {
            projector::validate_declared_kinds(&schema)?;

            let token = schema.repository_token();
            let repository = resolver.repository(token).ok_or_else(|| {
                Error::RepositoryNotFound {
                    entity: schema.name.clone(),
                    token: token.to_string(),
                }
            })?;

            repositories.insert(schema.name.clone(), repository);
            by_name.insert(schema.name.clone(), Arc::new(schema));
        }

        let client = Self {
            reindexer: ReindexCoordinator::new(config.reindex_batch_size),
            config,
            schemas: by_name,
            repositories,
            indexes: RwLock::new(HashMap::new()),
            registration: Mutex::new(HashMap::new()),
        };
        client.discover()?;

        Ok(client)
    }

    /// Open every `<type><suffix>` directory of a known indexable type.
    fn discover(&self) -> Result<()> {
        let mut indexes = self.write_indexes()?;

        for entry in std::fs::read_dir(self.config.search_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let Some(name) = dir_name
                .to_str()
                .and_then(|n| self.config.entity_from_dir_name(n))
            else {
                continue;
            };
            let Some(schema) = self.schemas.get(name) else {
                debug!(entity = name, "ignoring index of unknown type");
                continue;
            };
            if !schema.indexable {
                continue;
            }

            match self.open_existing(schema) {
                Ok(Some(index)) => {
                    info!(
                        entity = name,
                        fields = ?index.searchable_fields(),
                        "opened search index"
                    );
                    indexes.insert(name.to_string(), Arc::new(index));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        entity = name,
                        error = %e,
                        "skipping unreadable index"
                    );
                }
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn schema(&self, entity: &str) -> Option<&Arc<EntitySchema>> {
        self.schemas.get(entity)
    }

    /// Known entity type names, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<_> =
            self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn index_path(&self, entity: &str) -> PathBuf {
        self.config.index_path(entity)
    }

    /// Register the index of `entity`, creating it if needed.
    ///
    /// Returns `Ok(None)` for types that opt out of indexing. Without
    /// `overwrite`, an already registered or persisted index is reused.
    /// With it, any previous index is closed and replaced by an empty one
    /// built from the current schema.
    pub fn create_index(
        &self,
        entity: &str,
        overwrite: bool,
    ) -> Result<Option<Arc<SearchIndex>>> {
        let schema = self.known_schema(entity)?;
        if !schema.indexable {
            return Ok(None);
        }

        let lock = self.registration_lock(entity)?;
        let _registering =
            lock.lock().map_err(|_| Error::Poisoned("index registration"))?;

        if !overwrite {
            if let Some(index) = self.read_indexes()?.get(entity) {
                return Ok(Some(index.clone()));
            }

            match self.open_existing(schema) {
                Ok(Some(index)) => {
                    let index = Arc::new(index);
                    self.write_indexes()?
                        .insert(entity.to_string(), index.clone());
                    info!(entity, "opened search index");
                    return Ok(Some(index));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(entity, error = %e, "recreating unreadable index");
                }
            }
        }

        self.reindexer.cancel(entity)?;
        let previous = self.write_indexes()?.remove(entity);
        if let Some(previous) = previous {
            previous.close()?;
        }

        let index = Arc::new(SearchIndex::create(
            &self.config.index_path(entity),
            schema.clone(),
            self.repository(entity)?,
            self.config.writer_memory_budget,
        )?);
        self.write_indexes()?
            .insert(entity.to_string(), index.clone());

        info!(
            entity,
            fields = ?index.searchable_fields(),
            "created search index"
        );
        Ok(Some(index))
    }

    pub fn get_index(&self, entity: &str) -> Result<Arc<SearchIndex>> {
        self.read_indexes()?
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::IndexNotRegistered(entity.to_string()))
    }

    /// Snapshot of the registered indexes, keyed by type name.
    pub fn list_indexes(&self) -> Result<BTreeMap<String, Arc<SearchIndex>>> {
        Ok(self
            .read_indexes()?
            .iter()
            .map(|(name, index)| (name.clone(), index.clone()))
            .collect())
    }

    /// Rebuild the index of `entity` from scratch and reindex every stored
    /// entity in the background.
    ///
    /// Nothing is touched unless the task can be scheduled, so this must
    /// run inside a tokio runtime.
    pub fn update_index_schema(&self, entity: &str) -> Result<ReindexTask> {
        if !self.known_schema(entity)?.indexable {
            return Err(Error::Reindex(format!(
                "{entity} is not indexable"
            )));
        }
        let runtime = reindex::current_runtime()?;

        let index = self.create_index(entity, true)?.ok_or_else(|| {
            Error::Reindex(format!("{entity} is not indexable"))
        })?;
        let task = self.reindexer.submit_on(&runtime, index)?;
        info!(entity, task = task.id(), "reindex submitted");
        Ok(task)
    }

    /// Unregister the index of `entity` and delete it from disk.
    pub fn remove_index(&self, entity: &str) -> Result<()> {
        let lock = self.registration_lock(entity)?;
        let _registering =
            lock.lock().map_err(|_| Error::Poisoned("index registration"))?;

        self.reindexer.cancel(entity)?;
        let previous = self.write_indexes()?.remove(entity);
        if let Some(previous) = previous {
            previous.close()?;
        }

        let path = self.config.index_path(entity);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
            info!(entity, path = %path.display(), "removed search index");
        }
        Ok(())
    }

    /// Index `entity` under `id`, creating its type's index on first use.
    pub fn update(&self, id: &str, entity: &dyn Entity) -> Result<()> {
        match self.create_index(entity.entity_name(), false)? {
            Some(index) => index.update(id, entity),
            None => Ok(()),
        }
    }

    /// Remove the document of `entity` stored under `id`. Nothing to do
    /// when the type has no index yet.
    pub fn delete(&self, entity: &str, id: &str) -> Result<()> {
        self.known_schema(entity)?;
        let index = self.read_indexes()?.get(entity).cloned();
        match index {
            Some(index) => index.delete(id),
            None => Ok(()),
        }
    }

    pub fn search(
        &self,
        entity: &str,
        query: &str,
        count: usize,
        offset: usize,
    ) -> Result<Vec<Arc<dyn Entity>>> {
        self.get_index(entity)?.search(query, count, offset)
    }

    pub fn search_with_pagination(
        &self,
        entity: &str,
        query: &str,
        count: usize,
        offset: usize,
    ) -> Result<SearchPage> {
        self.get_index(entity)?
            .search_with_pagination(query, count, offset)
    }

    /// Running and recently finished reindex tasks.
    pub fn tasks(&self) -> Result<Vec<TaskInfo>> {
        self.reindexer.tasks()
    }

    /// Release every index writer. Registered indexes stay searchable.
    pub fn close(&self) -> Result<()> {
        for index in self.read_indexes()?.values() {
            index.close()?;
        }
        Ok(())
    }

    fn open_existing(
        &self,
        schema: &Arc<EntitySchema>,
    ) -> Result<Option<SearchIndex>> {
        SearchIndex::open_existing(
            &self.config.index_path(&schema.name),
            schema.clone(),
            self.repository(&schema.name)?,
            self.config.writer_memory_budget,
        )
    }

    fn known_schema(&self, entity: &str) -> Result<&Arc<EntitySchema>> {
        self.schemas
            .get(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }

    fn repository(&self, entity: &str) -> Result<Arc<dyn Repository>> {
        self.repositories
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }

    fn registration_lock(&self, entity: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .registration
            .lock()
            .map_err(|_| Error::Poisoned("registration locks"))?;
        Ok(locks.entry(entity.to_string()).or_default().clone())
    }

    fn read_indexes(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<String, Arc<SearchIndex>>>> {
        self.indexes.read().map_err(|_| Error::Poisoned("index map"))
    }

    fn write_indexes(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, Arc<SearchIndex>>>> {
        self.indexes.write().map_err(|_| Error::Poisoned("index map"))
    }
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("config", &self.config)
            .field("entities", &self.entity_names())
            .finish_non_exhaustive()
    }
}
