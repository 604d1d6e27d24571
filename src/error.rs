use std::path::PathBuf;

use crate::schema::FieldKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by storage repositories.
pub type RepositoryError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search engine error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("no storage repository registered for {entity} (token {token})")]
    RepositoryNotFound { entity: String, token: String },

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("{field} on {entity}: {kind} is not supported for search")]
    UnsupportedSearchFieldType {
        entity: String,
        field: String,
        kind: FieldKind,
    },

    #[error("invalid field {field} on {entity}")]
    FieldResolution { entity: String, field: String },

    #[error("{field} on {entity} has type {kind}, only strings can be indexed")]
    UnsupportedFieldType {
        entity: String,
        field: String,
        kind: FieldKind,
    },

    #[error("invalid search field name {field:?} on {entity}: {reason}")]
    InvalidFieldName {
        entity: String,
        field: String,
        reason: &'static str,
    },

    #[error("{found} is not a searchable {expected} entity")]
    InvalidSearchEntity { expected: String, found: String },

    #[error("failed to write {key} to the search index: {source}")]
    IndexWrite {
        key: String,
        #[source]
        source: tantivy::TantivyError,
    },

    #[error("search index for {0} has been closed")]
    IndexClosed(String),

    #[error("index for {0} not registered")]
    IndexNotRegistered(String),

    #[error("invalid query {query:?}: {source}")]
    Query {
        query: String,
        #[source]
        source: tantivy::query::QueryParserError,
    },

    #[error("failed to find entity {id}: {source}")]
    Rehydration {
        id: String,
        #[source]
        source: RepositoryError,
    },

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),

    #[error("reindex error: {0}")]
    Reindex(String),
}
