//! redb-backed storage for dynamic JSON records and their type schemas.
//!
//! Records of every type share one table keyed by `<type>:<id>`. Each
//! registered type resolves to a [`RecordRepository`], so the store can back
//! a [`SearchClient`](crate::client::SearchClient) directly.

use std::{any::Any, path::Path, sync::Arc};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    error::{Error, Result},
    repository::{Repository, RepositoryResolver, RepositoryResult},
    schema::{Entity, EntitySchema, FieldValue},
};

const TYPES: TableDefinition<&str, &str> = TableDefinition::new("types");
const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");

/// A schemaless record of some registered type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity: String,
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a record from a JSON object of field values.
    pub fn from_json(
        entity: impl Into<String>,
        id: impl Into<String>,
        json: &str,
    ) -> Result<Self> {
        match serde_json::from_str(json)? {
            Value::Object(fields) => Ok(Self {
                entity: entity.into(),
                id: id.into(),
                fields,
            }),
            other => Err(Error::Config(format!(
                "record fields must be a JSON object, got {other}"
            ))),
        }
    }
}

impl Entity for Record {
    fn entity_name(&self) -> &str {
        &self.entity
    }

    fn item_id(&self) -> String {
        self.id.clone()
    }

    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let value = match self.fields.get(name)? {
            Value::Null => FieldValue::Null,
            Value::String(s) => FieldValue::Str(s),
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => FieldValue::Int(i),
                (None, Some(f)) => FieldValue::Float(f),
                (None, None) => FieldValue::Other,
            },
            Value::Array(_) | Value::Object(_) => FieldValue::Other,
        };
        Some(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn record_key(entity: &str, id: &str) -> String {
    format!("{entity}:{id}")
}

/// Key range covering every record of `entity`.
fn type_range(entity: &str) -> (String, String) {
    (format!("{entity}:"), format!("{entity};"))
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config(format!("{kind} must not be empty")));
    }
    if kind == "type name" && name.contains(':') {
        return Err(Error::Config(format!(
            "{kind} {name:?} must not contain ':'"
        )));
    }
    Ok(())
}

/// Ids spelled `<entity>:<rest>` would collide with `<rest>` in the index.
fn check_record_id(entity: &str, id: &str) -> Result<()> {
    check_name("record id", id)?;
    let prefixed = id
        .strip_prefix(entity)
        .is_some_and(|rest| rest.starts_with(':'));
    if prefixed {
        return Err(Error::Config(format!(
            "record id {id:?} must not start with \"{entity}:\""
        )));
    }
    Ok(())
}

pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(TYPES)?;
        txn.open_table(RECORDS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Types --

    pub fn set_schema(&self, schema: &EntitySchema) -> Result<()> {
        check_name("type name", &schema.name)?;
        let json = serde_json::to_string(schema)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TYPES)?;
            table.insert(schema.name.as_str(), json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_schema(&self, name: &str) -> Result<Option<EntitySchema>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TYPES)?;
        match table.get(name)? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    /// All registered schemas, sorted by type name.
    pub fn list_schemas(&self) -> Result<Vec<EntitySchema>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TYPES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_str(v.value())?);
        }
        Ok(result)
    }

    /// Remove a type and every record stored under it.
    pub fn remove_schema(&self, name: &str) -> Result<bool> {
        let (start, end) = type_range(name);

        let txn = self.db.begin_write()?;
        let removed = {
            let mut types = txn.open_table(TYPES)?;
            let removed = types.remove(name)?.is_some();

            let mut records = txn.open_table(RECORDS)?;
            let mut keys = Vec::new();
            for entry in records.range(start.as_str()..end.as_str())? {
                let (k, _v) = entry?;
                keys.push(k.value().to_string());
            }
            for key in &keys {
                records.remove(key.as_str())?;
            }
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    // -- Records --

    /// Insert or replace a record. Its type must be registered.
    pub fn put(&self, record: &Record) -> Result<()> {
        check_record_id(&record.entity, &record.id)?;
        if self.get_schema(&record.entity)?.is_none() {
            return Err(Error::NotFound {
                kind: "type",
                name: record.entity.clone(),
            });
        }

        let key = record_key(&record.entity, &record.id);
        let json = serde_json::to_string(record)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS)?;
            table.insert(key.as_str(), json.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, entity: &str, id: &str) -> Result<Option<Record>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        match table.get(record_key(entity, id).as_str())? {
            Some(v) => Ok(Some(serde_json::from_str(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, entity: &str, id: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(RECORDS)?;
            table.remove(record_key(entity, id).as_str())?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Every record of `entity`, ordered by id.
    pub fn list(&self, entity: &str) -> Result<Vec<Record>> {
        let (start, end) = type_range(entity);

        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let mut result = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_k, v) = entry?;
            result.push(serde_json::from_str(v.value())?);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

/// Repository view of the records of one type.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    store: Arc<RecordStore>,
    entity: String,
}

impl RecordRepository {
    pub fn new(store: Arc<RecordStore>, entity: impl Into<String>) -> Self {
        Self {
            store,
            entity: entity.into(),
        }
    }
}

impl Repository for RecordRepository {
    fn find_all(
        &self,
        entity_name: &str,
    ) -> RepositoryResult<Vec<Arc<dyn Entity>>> {
        Ok(self
            .store
            .list(entity_name)?
            .into_iter()
            .map(|record| Arc::new(record) as Arc<dyn Entity>)
            .collect())
    }

    fn find_one_by_id(
        &self,
        id: &str,
    ) -> RepositoryResult<Option<Arc<dyn Entity>>> {
        Ok(self
            .store
            .get(&self.entity, id)?
            .map(|record| Arc::new(record) as Arc<dyn Entity>))
    }
}

impl RepositoryResolver for Arc<RecordStore> {
    /// Tokens name registered types.
    fn repository(&self, token: &str) -> Option<Arc<dyn Repository>> {
        match self.get_schema(token) {
            Ok(Some(_)) => {
                Some(Arc::new(RecordRepository::new(self.clone(), token)))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(token, error = %e, "failed to resolve record repository");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    fn test_store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            RecordStore::open(&tmp.path().join("records.redb")).unwrap();
        (tmp, Arc::new(store))
    }

    fn note_schema() -> EntitySchema {
        EntitySchema::new("Note").field("text", FieldKind::String)
    }

    #[test]
    fn schemas_crud() {
        let (_tmp, store) = test_store();
        assert!(store.list_schemas().unwrap().is_empty());

        store.set_schema(&note_schema()).unwrap();
        assert_eq!(store.get_schema("Note").unwrap(), Some(note_schema()));
        assert_eq!(store.list_schemas().unwrap().len(), 1);

        assert!(store.remove_schema("Note").unwrap());
        assert!(!store.remove_schema("Note").unwrap());
        assert!(store.get_schema("Note").unwrap().is_none());
    }

    #[test]
    fn rejects_bad_type_names() {
        let (_tmp, store) = test_store();
        assert!(store.set_schema(&EntitySchema::new("")).is_err());
        assert!(store.set_schema(&EntitySchema::new("a:b")).is_err());
    }

    #[test]
    fn put_requires_registered_type() {
        let (_tmp, store) = test_store();
        let err = store.put(&Record::new("Note", "1")).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "type", .. }));
    }

    #[test]
    fn put_rejects_type_prefixed_ids() {
        let (_tmp, store) = test_store();
        store.set_schema(&note_schema()).unwrap();

        let err = store.put(&Record::new("Note", "Note:7")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(store.put(&Record::new("Note", "")).is_err());
        assert!(store.get("Note", "Note:7").unwrap().is_none());

        store.put(&Record::new("Note", "Notebook:7")).unwrap();
        store.put(&Record::new("Note", "7:Note")).unwrap();
        assert_eq!(store.list("Note").unwrap().len(), 2);
    }

    #[test]
    fn records_crud() {
        let (_tmp, store) = test_store();
        store.set_schema(&note_schema()).unwrap();

        let record = Record::new("Note", "1").with("text", "hello");
        store.put(&record).unwrap();
        assert_eq!(store.get("Note", "1").unwrap(), Some(record));

        assert!(store.remove("Note", "1").unwrap());
        assert!(!store.remove("Note", "1").unwrap());
        assert!(store.get("Note", "1").unwrap().is_none());
    }

    #[test]
    fn list_is_scoped_to_type() {
        let (_tmp, store) = test_store();
        store.set_schema(&note_schema()).unwrap();
        let notebook =
            EntitySchema::new("Notebook").field("text", FieldKind::String);
        store.set_schema(&notebook).unwrap();

        store.put(&Record::new("Note", "b")).unwrap();
        store.put(&Record::new("Note", "a")).unwrap();
        store.put(&Record::new("Notebook", "1")).unwrap();

        let ids: Vec<_> = store
            .list("Note")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn remove_schema_drops_its_records() {
        let (_tmp, store) = test_store();
        store.set_schema(&note_schema()).unwrap();
        store.put(&Record::new("Note", "1")).unwrap();

        store.remove_schema("Note").unwrap();
        assert!(store.list("Note").unwrap().is_empty());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.redb");

        {
            let store = RecordStore::open(&path).unwrap();
            store.set_schema(&note_schema()).unwrap();
            store.put(&Record::new("Note", "1").with("text", "kept")).unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        let record = store.get("Note", "1").unwrap().unwrap();
        assert_eq!(record.fields["text"], "kept");
    }

    #[test]
    fn record_field_values() {
        let record = Record::from_json(
            "Note",
            "1",
            r#"{"s":"x","b":true,"i":3,"f":1.5,"n":null,"a":[1]}"#,
        )
        .unwrap();

        assert_eq!(record.field("s"), Some(FieldValue::Str("x")));
        assert_eq!(record.field("b"), Some(FieldValue::Bool(true)));
        assert_eq!(record.field("i"), Some(FieldValue::Int(3)));
        assert_eq!(record.field("f"), Some(FieldValue::Float(1.5)));
        assert_eq!(record.field("n"), Some(FieldValue::Null));
        assert_eq!(record.field("a"), Some(FieldValue::Other));
        assert_eq!(record.field("missing"), None);
    }

    #[test]
    fn from_json_requires_object() {
        assert!(Record::from_json("Note", "1", "[1, 2]").is_err());
        assert!(Record::from_json("Note", "1", "not json").is_err());
    }

    #[test]
    fn resolver_serves_registered_types() {
        let (_tmp, store) = test_store();
        store.set_schema(&note_schema()).unwrap();
        store.put(&Record::new("Note", "1").with("text", "hi")).unwrap();

        assert!(store.repository("Missing").is_none());

        let repo = store.repository("Note").unwrap();
        assert_eq!(repo.find_all("Note").unwrap().len(), 1);
        let found = repo.find_one_by_id("1").unwrap().unwrap();
        let record = found.downcast_ref::<Record>().unwrap();
        assert_eq!(record.fields["text"], "hi");
        assert!(repo.find_one_by_id("2").unwrap().is_none());
    }
}
