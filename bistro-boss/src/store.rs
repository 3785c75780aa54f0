//! Embedded document store: four typed collections held in memory.
//!
//! When opened on a data directory each collection is backed by
//! `<dir>/<name>.json`, a JSON array that is loaded at startup and rewritten
//! (temp file + rename) by every mutation before the in-memory set changes.
//! A mutation whose write fails leaves memory as it was.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::model::{CartItem, Document, MenuItem, ObjectId, Review, User};

pub const MENU: &str = "menu";
pub const REVIEWS: &str = "reviews";
pub const CARTS: &str = "carts";
pub const USERS: &str = "users";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to read collection file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid documents in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to serialize collection {collection}: {source}")]
    Serialize {
        collection: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to write collection file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("mutation of collection {collection} did not complete: {source}")]
    Task {
        collection: &'static str,
        source: tokio::task::JoinError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// Named, ordered set of documents. Clones share the same storage.
pub struct Collection<T> {
    name: &'static str,
    docs: Arc<RwLock<Vec<T>>>,
    path: Option<PathBuf>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            docs: Arc::clone(&self.docs),
            path: self.path.clone(),
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T: Document> Collection<T> {
    pub fn in_memory(name: &'static str) -> Self {
        Self {
            name,
            docs: Arc::new(RwLock::new(Vec::new())),
            path: None,
        }
    }

    /// Open the collection file in `dir`. A missing file is an empty collection.
    pub async fn open(name: &'static str, dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(format!("{name}.json"));
        let (docs, assigned_ids) = load_documents::<T>(&path).await?;
        info!(
            collection = name,
            documents = docs.len(),
            path = %path.display(),
            "collection loaded"
        );

        let collection = Self {
            name,
            docs: Arc::new(RwLock::new(docs)),
            path: Some(path),
        };

        if assigned_ids {
            let docs = collection.docs.read().await;
            collection.persist(&docs).await?;
            drop(docs);
        }

        Ok(collection)
    }

    pub async fn count(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn find_all(&self) -> Vec<T> {
        self.docs.read().await.clone()
    }

    pub async fn find<F>(&self, filter: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.docs
            .read()
            .await
            .iter()
            .filter(|doc| filter(doc))
            .cloned()
            .collect()
    }

    pub async fn find_one<F>(&self, filter: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.docs.read().await.iter().find(|doc| filter(doc)).cloned()
    }

    pub async fn insert_one(&self, doc: T) -> Result<InsertOneResult, StoreError> {
        self.commit(move |docs| {
            let (next, result) = with_inserted(docs, doc);
            (Some(next), result)
        })
        .await
    }

    /// Insert `doc` unless a document matching `exists` is already present.
    /// The check and the insert happen under one write lock.
    pub async fn insert_unless<F>(
        &self,
        exists: F,
        doc: T,
    ) -> Result<Option<InsertOneResult>, StoreError>
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.commit(move |docs| {
            if docs.iter().any(|existing| exists(existing)) {
                return (None, None);
            }
            let (next, result) = with_inserted(docs, doc);
            (Some(next), Some(result))
        })
        .await
    }

    /// Apply `update` to the document with `id`. `update` reports whether it
    /// changed anything, which becomes `modifiedCount`.
    pub async fn update_one<F>(&self, id: ObjectId, update: F) -> Result<UpdateResult, StoreError>
    where
        F: FnOnce(&mut T) -> bool + Send + 'static,
    {
        self.commit(move |docs| {
            let Some(index) = docs.iter().position(|doc| doc.id() == id) else {
                return (None, update_result(0, false));
            };

            let mut next = docs.to_vec();
            let modified = update(&mut next[index]);
            (modified.then_some(next), update_result(1, modified))
        })
        .await
    }

    pub async fn delete_one(&self, id: ObjectId) -> Result<DeleteResult, StoreError> {
        self.commit(move |docs| {
            let Some(index) = docs.iter().position(|doc| doc.id() == id) else {
                return (None, delete_result(0));
            };

            let mut next = docs.to_vec();
            next.remove(index);
            (Some(next), delete_result(1))
        })
        .await
    }

    /// Run a mutation to completion on its own task.
    ///
    /// `plan` sees the current documents under the write lock and returns the
    /// replacement set (`None` when nothing changed) plus the caller's result.
    /// The replacement is written to disk first and only then swapped in, so
    /// a failed write leaves memory untouched. Dropping the returned future
    /// does not abort the task, so memory and disk cannot drift apart when a
    /// client disconnects mid-request.
    async fn commit<R, F>(&self, plan: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[T]) -> (Option<Vec<T>>, R) + Send + 'static,
        R: Send + 'static,
    {
        let collection = self.clone();
        let handle = tokio::spawn(async move {
            let mut docs = collection.docs.write().await;
            let (next, result) = plan(docs.as_slice());
            if let Some(next) = next {
                collection.persist(&next).await?;
                *docs = next;
                debug!(
                    collection = collection.name,
                    documents = docs.len(),
                    "collection committed"
                );
            }
            Ok::<_, StoreError>(result)
        });

        handle.await.map_err(|source| StoreError::Task {
            collection: self.name,
            source,
        })?
    }

    async fn persist(&self, docs: &[T]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let buf = serde_json::to_vec_pretty(docs).map_err(|source| StoreError::Serialize {
            collection: self.name,
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let write_err = |source: std::io::Error| StoreError::Write {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::write(&tmp, buf).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_err)
    }
}

fn with_inserted<T: Document>(docs: &[T], doc: T) -> (Vec<T>, InsertOneResult) {
    let inserted_id = doc.id();
    let mut next = Vec::with_capacity(docs.len() + 1);
    next.extend_from_slice(docs);
    next.push(doc);
    (
        next,
        InsertOneResult {
            acknowledged: true,
            inserted_id,
        },
    )
}

fn update_result(matched: u64, modified: bool) -> UpdateResult {
    UpdateResult {
        acknowledged: true,
        matched_count: matched,
        modified_count: u64::from(modified),
        upserted_count: 0,
        upserted_id: None,
    }
}

fn delete_result(deleted: u64) -> DeleteResult {
    DeleteResult {
        acknowledged: true,
        deleted_count: deleted,
    }
}

/// Returns the parsed documents and whether any of them was missing an `_id`.
async fn load_documents<T: Document>(path: &Path) -> Result<(Vec<T>, bool), StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let parse_err = |source: serde_json::Error| StoreError::Parse {
        path: path.display().to_string(),
        source,
    };

    let values: Vec<Value> = serde_json::from_str(&raw).map_err(parse_err)?;
    let assigned_ids = values.iter().any(|value| value.get("_id").is_none());
    let docs = values
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(parse_err)?;

    Ok((docs, assigned_ids))
}

/// The four collections of the bistro, shared by every handler.
#[derive(Debug, Clone)]
pub struct Database {
    pub menu: Collection<MenuItem>,
    pub reviews: Collection<Review>,
    pub carts: Collection<CartItem>,
    pub users: Collection<User>,
}

impl Database {
    pub fn in_memory() -> Self {
        Self {
            menu: Collection::in_memory(MENU),
            reviews: Collection::in_memory(REVIEWS),
            carts: Collection::in_memory(CARTS),
            users: Collection::in_memory(USERS),
        }
    }

    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;

        Ok(Self {
            menu: Collection::open(MENU, dir).await?,
            reviews: Collection::open(REVIEWS, dir).await?,
            carts: Collection::open(CARTS, dir).await?,
            users: Collection::open(USERS, dir).await?,
        })
    }
}
