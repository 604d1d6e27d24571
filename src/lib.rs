//! entsearch - a full-text indexing layer for typed domain entities.
//!
//! Each entity type gets its own [Tantivy](https://github.com/quickwit-oss/tantivy)
//! index. Entities are projected into flat documents of their searchable
//! string fields, every query is scoped to one type, and hits are
//! rehydrated into full entities through the type's storage
//! [`Repository`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use entsearch::{
//!     DataDir, Entity, EntitySchema, FieldKind, Record, RecordStore,
//!     SearchClient, SearchConfig,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = Arc::new(RecordStore::open(&data_dir.records_db()).unwrap());
//!
//! let article = EntitySchema::new("Article")
//!     .field("Title", FieldKind::String)
//!     .field("Body", FieldKind::String);
//! store.set_schema(&article).unwrap();
//!
//! let client = SearchClient::open(
//!     SearchConfig::from_env(&data_dir).unwrap(),
//!     store.list_schemas().unwrap(),
//!     &store,
//! )
//! .unwrap();
//!
//! let record = Record::new("Article", "42")
//!     .with("Title", "Storage engines")
//!     .with("Body", "LSM trees and B-trees");
//! store.put(&record).unwrap();
//! client.update(&record.id, &record).unwrap();
//!
//! for hit in client.search("Article", "Title:Storage", 10, 0).unwrap() {
//!     println!("{}", hit.item_id());
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod data_dir;
pub mod error;
pub mod projector;
pub mod record_store;
pub mod reindex;
pub mod repository;
pub mod schema;
pub mod tantivy_index;

pub use client::SearchClient;
pub use config::SearchConfig;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use record_store::{Record, RecordStore};
pub use reindex::{ReindexTask, TaskStatus};
pub use repository::{Repository, RepositoryResolver};
pub use schema::{Entity, EntitySchema, FieldKind, FieldValue};
pub use tantivy_index::{SearchIndex, SearchPage};
