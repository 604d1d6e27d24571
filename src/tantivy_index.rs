use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{
        Field,
        IndexRecordOption,
        STRING,
        STORED,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value,
    },
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    projector::{self, Document, KEY_FIELD, TYPE_FIELD},
    repository::Repository,
    schema::{Entity, EntitySchema},
};

const TOKENIZER: &str = "en_stem";

/// One page of hydrated search results.
#[derive(Debug)]
pub struct SearchPage {
    /// Entities in rank order. Hits whose entity no longer exists are
    /// skipped, so this may be shorter than the page size.
    pub entities: Vec<Arc<dyn Entity>>,
    /// Total number of matching documents reported by the index.
    pub total: usize,
}

/// Resolved field handles for an entity index schema.
#[derive(Debug, Clone)]
struct IndexFields {
    key: Field,
    entity_type: Field,
    searchable: Vec<(String, Field)>,
}

impl IndexFields {
    fn get(&self, name: &str) -> Option<Field> {
        self.searchable
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, field)| *field)
    }

    fn default_fields(&self) -> Vec<Field> {
        self.searchable.iter().map(|(_, field)| *field).collect()
    }
}

fn build_schema(fields: &[String]) -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(KEY_FIELD, STRING | STORED);
    builder.add_text_field(TYPE_FIELD, STRING);

    for name in fields {
        let opts = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();
        builder.add_text_field(name, opts);
    }

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(TOKENIZER, en_stem);
}

/// Searchable field names recorded in a persisted schema, in schema order.
fn persisted_fields(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .map(|(_, entry)| entry.name())
        .filter(|name| *name != KEY_FIELD && *name != TYPE_FIELD)
        .map(str::to_string)
        .collect()
}

fn open_dir(path: &Path) -> Result<tantivy::directory::MmapDirectory> {
    tantivy::directory::MmapDirectory::open(path).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

/// The full-text index of one entity type.
///
/// Every document carries the reserved `type` field, and every query is
/// scoped to it, so several types could share one physical index without
/// their hits crossing.
pub struct SearchIndex {
    name: String,
    schema: Arc<EntitySchema>,
    fields: Vec<String>,
    path: Option<PathBuf>,
    index: Index,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    handles: IndexFields,
    repository: Arc<dyn Repository>,
    /// Keys written by live calls while a rebuild is running.
    rebuild: Mutex<Option<HashSet<String>>>,
}

impl SearchIndex {
    /// Create a fresh index at `path`, replacing whatever is there.
    ///
    /// The searchable field set is discovered from the current schema and
    /// fixed for the lifetime of the index.
    pub fn create(
        path: &Path,
        schema: Arc<EntitySchema>,
        repository: Arc<dyn Repository>,
        memory_budget: usize,
    ) -> Result<Self> {
        let fields = projector::searchable_fields(&schema)?;

        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;

        let dir = open_dir(path)?;
        let index = Index::create(
            dir,
            build_schema(&fields),
            tantivy::IndexSettings::default(),
        )?;

        Self::from_index(
            index,
            schema,
            fields,
            Some(path.to_path_buf()),
            repository,
            memory_budget,
        )
    }

    /// Open an index previously persisted at `path`.
    ///
    /// Returns `Ok(None)` when no index exists there. The searchable field
    /// set is read back from the persisted schema, not rediscovered.
    pub fn open_existing(
        path: &Path,
        schema: Arc<EntitySchema>,
        repository: Arc<dyn Repository>,
        memory_budget: usize,
    ) -> Result<Option<Self>> {
        if !path.is_dir() {
            return Ok(None);
        }

        let dir = open_dir(path)?;
        let exists = Index::exists(&dir).map_err(|e| {
            Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
        })?;
        if !exists {
            return Ok(None);
        }

        let index = Index::open(dir)?;
        let fields = persisted_fields(&index.schema());

        Self::from_index(
            index,
            schema,
            fields,
            Some(path.to_path_buf()),
            repository,
            memory_budget,
        )
        .map(Some)
    }

    /// Create an in-memory index (for testing).
    pub fn create_in_ram(
        schema: Arc<EntitySchema>,
        repository: Arc<dyn Repository>,
    ) -> Result<Self> {
        let fields = projector::searchable_fields(&schema)?;
        let index = Index::create_in_ram(build_schema(&fields));
        Self::from_index(
            index,
            schema,
            fields,
            None,
            repository,
            crate::config::WRITER_MEMORY_BUDGET,
        )
    }

    fn from_index(
        index: Index,
        schema: Arc<EntitySchema>,
        fields: Vec<String>,
        path: Option<PathBuf>,
        repository: Arc<dyn Repository>,
        memory_budget: usize,
    ) -> Result<Self> {
        register_tokenizers(&index);

        let tantivy_schema = index.schema();
        let mut searchable = Vec::with_capacity(fields.len());
        for name in &fields {
            searchable.push((name.clone(), tantivy_schema.get_field(name)?));
        }
        let handles = IndexFields {
            key: tantivy_schema.get_field(KEY_FIELD)?,
            entity_type: tantivy_schema.get_field(TYPE_FIELD)?,
            searchable,
        };

        // Reloaded explicitly before every search.
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer: IndexWriter = index.writer(memory_budget)?;

        Ok(Self {
            name: schema.name.clone(),
            schema,
            fields,
            path,
            index,
            reader,
            writer: Mutex::new(Some(writer)),
            handles,
            repository,
            rebuild: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// The searchable field set this index was created with.
    pub fn searchable_fields(&self) -> &[String] {
        &self.fields
    }

    /// On-disk location, `None` for in-memory indexes.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Number of committed documents.
    pub fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    /// Document key for an entity id, namespaced by the type name.
    pub fn key(&self, id: &str) -> String {
        match id.strip_prefix(self.name.as_str()) {
            Some(rest) if rest.starts_with(':') => id.to_string(),
            _ => format!("{}:{id}", self.name),
        }
    }

    fn id_from_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    /// Index `entity` under `id`, replacing any previous document.
    ///
    /// Entities whose type or instance opts out of indexing are accepted
    /// and ignored.
    pub fn update(&self, id: &str, entity: &dyn Entity) -> Result<()> {
        let Some(document) = self.prepare(entity)? else {
            debug!(entity = %self.name, id, "skipping non-indexable entity");
            return Ok(());
        };

        let key = self.key(id);
        self.mark_live(&key)?;
        self.write(&key, |writer| {
            writer.delete_term(Term::from_field_text(self.handles.key, &key));
            writer.add_document(self.to_tantivy(&key, &document))?;
            Ok(())
        })
    }

    /// Remove the document stored under `id`. Removing a missing document
    /// is not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        let key = self.key(id);
        self.mark_live(&key)?;
        self.write(&key, |writer| {
            writer.delete_term(Term::from_field_text(self.handles.key, &key));
            Ok(())
        })
    }

    /// Search and return only the hydrated entities.
    pub fn search(
        &self,
        query: &str,
        count: usize,
        offset: usize,
    ) -> Result<Vec<Arc<dyn Entity>>> {
        Ok(self.search_with_pagination(query, count, offset)?.entities)
    }

    /// Search documents of this type and rehydrate the hits through the
    /// repository.
    ///
    /// `query` goes to the tantivy query parser as is, with the searchable
    /// fields as default fields. A blank query matches every document of
    /// the type.
    pub fn search_with_pagination(
        &self,
        query: &str,
        count: usize,
        offset: usize,
    ) -> Result<SearchPage> {
        let scoped = self.scoped_query(query)?;

        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let total = searcher.search(&scoped, &Count)?;
        if count == 0 || offset >= total {
            return Ok(SearchPage {
                entities: Vec::new(),
                total,
            });
        }

        // tantivy sizes its heap from the limit and adds the offset to it.
        let limit = count.min(total - offset);
        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(limit).and_offset(offset))?;

        let mut entities = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let key = extract_text(&doc, self.handles.key);
            let id = self.id_from_key(&key);

            match self.repository.find_one_by_id(id) {
                Ok(Some(entity)) => entities.push(entity),
                Ok(None) => {
                    debug!(
                        entity = %self.name,
                        key = %key,
                        "skipping stale hit"
                    );
                }
                Err(source) => {
                    return Err(Error::Rehydration {
                        id: id.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(SearchPage { entities, total })
    }

    fn scoped_query(&self, query: &str) -> Result<BooleanQuery> {
        let type_term =
            Term::from_field_text(self.handles.entity_type, &self.name);
        let type_query: Box<dyn Query> =
            Box::new(TermQuery::new(type_term, IndexRecordOption::Basic));
        let mut clauses = vec![(Occur::Must, type_query)];

        if !query.trim().is_empty() {
            let parser = QueryParser::for_index(
                &self.index,
                self.handles.default_fields(),
            );
            let user_query =
                parser.parse_query(query).map_err(|source| Error::Query {
                    query: query.to_string(),
                    source,
                })?;
            clauses.push((Occur::Must, user_query));
        }

        Ok(BooleanQuery::new(clauses))
    }

    /// Validate and project an entity. `None` when it opts out.
    pub(crate) fn prepare(
        &self,
        entity: &dyn Entity,
    ) -> Result<Option<Document>> {
        if entity.entity_name() != self.name {
            return Err(Error::InvalidSearchEntity {
                expected: self.name.clone(),
                found: entity.entity_name().to_string(),
            });
        }

        if !self.schema.indexable || !entity.index_content() {
            return Ok(None);
        }

        projector::project(entity, &self.schema, &self.fields).map(Some)
    }

    fn to_tantivy(&self, key: &str, document: &Document) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.handles.key, key);

        for (name, value) in document {
            if name == TYPE_FIELD {
                doc.add_text(self.handles.entity_type, value);
            } else if let Some(field) = self.handles.get(name) {
                doc.add_text(field, value);
            }
        }

        doc
    }

    /// Run `ops` against the writer and commit, rolling back on failure.
    fn write<F>(&self, target: &str, ops: F) -> Result<()>
    where
        F: FnOnce(&IndexWriter) -> tantivy::Result<()>,
    {
        let mut guard = self.lock_writer()?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::IndexClosed(self.name.clone()))?;

        let result =
            ops(writer).and_then(|()| writer.commit().map(|_opstamp| ()));
        if let Err(source) = result {
            if let Err(e) = writer.rollback() {
                warn!(entity = %self.name, error = %e, "rollback failed");
            }
            return Err(Error::IndexWrite {
                key: target.to_string(),
                source,
            });
        }

        Ok(())
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Option<IndexWriter>>> {
        self.writer
            .lock()
            .map_err(|_| Error::Poisoned("index writer"))
    }

    fn lock_rebuild(&self) -> Result<MutexGuard<'_, Option<HashSet<String>>>> {
        self.rebuild
            .lock()
            .map_err(|_| Error::Poisoned("rebuild barrier"))
    }

    fn mark_live(&self, key: &str) -> Result<()> {
        if let Some(touched) = self.lock_rebuild()?.as_mut() {
            touched.insert(key.to_string());
        }
        Ok(())
    }

    /// Start recording live writes. Recording stops when the returned
    /// guard is dropped.
    pub(crate) fn begin_rebuild(&self) -> Result<RebuildBarrier<'_>> {
        *self.lock_rebuild()? = Some(HashSet::new());
        Ok(RebuildBarrier { index: self })
    }

    /// Write a batch of reindexed documents, skipping every key a live
    /// call has touched since the rebuild began. Returns the number of
    /// documents written.
    pub(crate) fn write_rebuilt(
        &self,
        batch: Vec<(String, Document)>,
    ) -> Result<usize> {
        // Held across the commit so a concurrent live write lands after it.
        let barrier = self.lock_rebuild()?;
        let batch: Vec<_> = batch
            .into_iter()
            .filter(|(key, _)| {
                !barrier.as_ref().is_some_and(|touched| touched.contains(key))
            })
            .collect();

        if batch.is_empty() {
            return Ok(0);
        }

        let target = format!("{}:*", self.name);
        self.write(&target, |writer| {
            for (key, document) in &batch {
                writer
                    .delete_term(Term::from_field_text(self.handles.key, key));
                writer.add_document(self.to_tantivy(key, document))?;
            }
            Ok(())
        })?;

        drop(barrier);
        Ok(batch.len())
    }

    /// Release the writer. Later writes fail with [`Error::IndexClosed`];
    /// searches keep working against the last committed state.
    pub fn close(&self) -> Result<()> {
        let writer = self.lock_writer()?.take();
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(self.lock_writer()?.is_none())
    }
}

/// Live writes are recorded while this is alive.
pub(crate) struct RebuildBarrier<'a> {
    index: &'a SearchIndex,
}

impl Drop for RebuildBarrier<'_> {
    fn drop(&mut self) {
        if let Ok(mut touched) = self.index.rebuild.lock() {
            *touched = None;
        }
    }
}

impl fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchIndex")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::{any::Any, collections::HashMap, sync::RwLock};

    use super::*;
    use crate::{
        error::RepositoryError,
        repository::RepositoryResult,
        schema::{FieldKind, FieldValue},
    };

    #[derive(Debug, Clone)]
    struct Note {
        entity: &'static str,
        id: String,
        text: String,
        hidden: bool,
    }

    impl Entity for Note {
        fn entity_name(&self) -> &str {
            self.entity
        }

        fn item_id(&self) -> String {
            self.id.clone()
        }

        fn field(&self, name: &str) -> Option<FieldValue<'_>> {
            match name {
                "text" => Some(FieldValue::Str(&self.text)),
                _ => None,
            }
        }

        fn index_content(&self) -> bool {
            !self.hidden
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct Notes {
        items: RwLock<HashMap<String, Arc<dyn Entity>>>,
        broken: bool,
    }

    impl Notes {
        fn insert(&self, note: Note) {
            self.items
                .write()
                .unwrap()
                .insert(note.id.clone(), Arc::new(note));
        }

        fn remove(&self, id: &str) {
            self.items.write().unwrap().remove(id);
        }
    }

    impl Repository for Notes {
        fn find_all(
            &self,
            _entity_name: &str,
        ) -> RepositoryResult<Vec<Arc<dyn Entity>>> {
            Ok(self.items.read().unwrap().values().cloned().collect())
        }

        fn find_one_by_id(
            &self,
            id: &str,
        ) -> RepositoryResult<Option<Arc<dyn Entity>>> {
            if self.broken {
                return Err(RepositoryError::from("storage offline"));
            }
            Ok(self.items.read().unwrap().get(id).cloned())
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            entity: "Note",
            id: id.to_string(),
            text: text.to_string(),
            hidden: false,
        }
    }

    fn note_schema() -> Arc<EntitySchema> {
        Arc::new(EntitySchema::new("Note").field("text", FieldKind::String))
    }

    fn setup() -> (SearchIndex, Arc<Notes>) {
        let notes = Arc::new(Notes::default());
        let idx = SearchIndex::create_in_ram(note_schema(), notes.clone())
            .unwrap();
        (idx, notes)
    }

    fn index_note(idx: &SearchIndex, notes: &Notes, n: Note) {
        idx.update(&n.id, &n).unwrap();
        notes.insert(n);
    }

    #[test]
    fn key_is_namespaced_once() {
        let (idx, _) = setup();
        assert_eq!(idx.key("42"), "Note:42");
        assert_eq!(idx.key("Note:42"), "Note:42");
        assert_eq!(idx.key("Notebook"), "Note:Notebook");
        assert_eq!(idx.id_from_key("Note:42"), "42");
    }

    #[test]
    fn update_then_search() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "log structured merge trees"));
        index_note(&idx, &notes, note("2", "b-trees and pages"));

        let hits = idx.search("merge", 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id(), "1");
    }

    #[test]
    fn update_replaces_previous_document() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "old content"));
        index_note(&idx, &notes, note("1", "new content"));

        assert!(idx.search("old", 10, 0).unwrap().is_empty());
        let page = idx.search_with_pagination("content", 10, 0).unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn update_rejects_other_entity_types() {
        let (idx, _) = setup();
        let mut other = note("1", "text");
        other.entity = "Page";

        let err = idx.update("1", &other).unwrap_err();
        assert!(matches!(err, Error::InvalidSearchEntity { .. }));
    }

    #[test]
    fn update_skips_opted_out_instances() {
        let (idx, notes) = setup();
        let mut hidden = note("1", "secret plans");
        hidden.hidden = true;
        index_note(&idx, &notes, hidden);

        assert_eq!(idx.num_docs().unwrap(), 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "ephemeral"));

        idx.delete("1").unwrap();
        idx.delete("1").unwrap();
        assert!(idx.search("ephemeral", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn pagination_limits_entities_but_not_total() {
        let (idx, notes) = setup();
        for i in 0..5 {
            index_note(&idx, &notes, note(&i.to_string(), "shared words"));
        }

        let first = idx.search_with_pagination("shared", 2, 0).unwrap();
        let last = idx.search_with_pagination("shared", 2, 4).unwrap();
        let empty = idx.search_with_pagination("shared", 0, 0).unwrap();

        assert_eq!(first.entities.len(), 2);
        assert_eq!(last.entities.len(), 1);
        assert!(empty.entities.is_empty());
        assert_eq!(first.total, 5);
        assert_eq!(last.total, 5);
        assert_eq!(empty.total, 5);
    }

    #[test]
    fn pagination_extremes_return_empty_pages() {
        let (idx, notes) = setup();
        for i in 0..3 {
            index_note(&idx, &notes, note(&i.to_string(), "hello there"));
        }

        let far = idx.search_with_pagination("hello", 10, usize::MAX).unwrap();
        assert!(far.entities.is_empty());
        assert_eq!(far.total, 3);

        let past_end = idx.search_with_pagination("hello", 10, 3).unwrap();
        assert!(past_end.entities.is_empty());
        assert_eq!(past_end.total, 3);

        let huge = idx.search_with_pagination("hello", usize::MAX, 0).unwrap();
        assert_eq!(huge.entities.len(), 3);
        assert_eq!(huge.total, 3);

        let both = idx
            .search_with_pagination("hello", usize::MAX, usize::MAX)
            .unwrap();
        assert!(both.entities.is_empty());
        assert_eq!(both.total, 3);

        let tail = idx.search_with_pagination("hello", usize::MAX, 2).unwrap();
        assert_eq!(tail.entities.len(), 1);
    }

    #[test]
    fn prefixed_id_resolves_to_plain_id() {
        let (idx, notes) = setup();
        idx.update("Note:7", &note("7", "prefixed identifier")).unwrap();
        notes.insert(note("7", "prefixed identifier"));

        let page = idx.search_with_pagination("prefixed", 10, 0).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0].item_id(), "7");

        // Both spellings address the same document.
        idx.update("7", &note("7", "plain identifier")).unwrap();
        assert_eq!(idx.num_docs().unwrap(), 1);
        assert!(idx.search("prefixed", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn poisoned_writer_is_reported() {
        let (idx, _) = setup();
        let panicked = std::thread::scope(|s| {
            s.spawn(|| {
                let _writer = idx.writer.lock().unwrap();
                panic!("writer holder panicked");
            })
            .join()
        });
        assert!(panicked.is_err());

        assert!(matches!(idx.is_closed().unwrap_err(), Error::Poisoned(_)));
        assert!(matches!(
            idx.update("1", &note("1", "text")).unwrap_err(),
            Error::Poisoned(_)
        ));
    }

    #[test]
    fn stale_hits_are_skipped() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "kept document"));
        index_note(&idx, &notes, note("2", "removed document"));
        notes.remove("2");

        let page = idx.search_with_pagination("document", 10, 0).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0].item_id(), "1");
    }

    #[test]
    fn repository_failure_is_reported() {
        let notes = Arc::new(Notes {
            broken: true,
            ..Notes::default()
        });
        let idx =
            SearchIndex::create_in_ram(note_schema(), notes.clone()).unwrap();
        idx.update("1", &note("1", "unreachable")).unwrap();

        let err = idx.search("unreachable", 10, 0).unwrap_err();
        assert!(matches!(err, Error::Rehydration { .. }));
    }

    #[test]
    fn malformed_query_is_reported() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "anything"));

        let err = idx.search("missing_field:value", 10, 0).unwrap_err();
        assert!(matches!(err, Error::Query { .. }));
    }

    #[test]
    fn blank_query_matches_whole_type() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "one"));
        index_note(&idx, &notes, note("2", "two"));

        assert_eq!(idx.search_with_pagination("  ", 10, 0).unwrap().total, 2);
    }

    #[test]
    fn rebuild_barrier_keeps_live_writes() {
        let (idx, notes) = setup();
        let snapshot = note("1", "stale snapshot");
        let barrier = idx.begin_rebuild().unwrap();

        index_note(&idx, &notes, note("1", "fresh live write"));
        let doc = idx.prepare(&snapshot).unwrap().unwrap();
        let written = idx.write_rebuilt(vec![(idx.key("1"), doc)]).unwrap();
        drop(barrier);

        assert_eq!(written, 0);
        assert!(idx.search("stale", 10, 0).unwrap().is_empty());
        assert_eq!(idx.search("fresh", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn closed_index_rejects_writes() {
        let (idx, notes) = setup();
        index_note(&idx, &notes, note("1", "before close"));
        idx.close().unwrap();

        assert!(idx.is_closed().unwrap());
        let err = idx.update("2", &note("2", "after")).unwrap_err();
        assert!(matches!(err, Error::IndexClosed(_)));
        assert_eq!(idx.search("close", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn disk_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Note.index");
        let notes = Arc::new(Notes::default());

        {
            let idx = SearchIndex::create(
                &path,
                note_schema(),
                notes.clone(),
                crate::config::WRITER_MEMORY_BUDGET,
            )
            .unwrap();
            index_note(&idx, &notes, note("1", "persistent data"));
            idx.close().unwrap();
        }

        let idx = SearchIndex::open_existing(
            &path,
            note_schema(),
            notes.clone(),
            crate::config::WRITER_MEMORY_BUDGET,
        )
        .unwrap()
        .expect("persisted index");
        assert_eq!(idx.searchable_fields(), ["text"]);
        assert_eq!(idx.search("persistent", 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn open_existing_without_index() {
        let tmp = tempfile::tempdir().unwrap();
        let notes = Arc::new(Notes::default());

        let missing = SearchIndex::open_existing(
            &tmp.path().join("Note.index"),
            note_schema(),
            notes,
            crate::config::WRITER_MEMORY_BUDGET,
        )
        .unwrap();
        assert!(missing.is_none());
    }
}
