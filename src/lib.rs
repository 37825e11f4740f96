//! docdex - a keyword search index for documentation trees.
//!
//! docdex maintains a human-readable catalog (`index.json`) of markdown
//! and text documents, a derived inverted-term cache for fast lookups,
//! and a reconciliation pass that keeps the catalog honest against the
//! files on disk and their remote sources.
//!
//! # Quick start
//!
//! ```no_run
//! use docdex::{Config, DataDir, IndexStore, SearchCache, SearchEngine};
//! use docdex::search::SearchParams;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config = Config::from_data_dir(&data_dir).unwrap();
//! let store = IndexStore::new(
//!     &config.index_path,
//!     &config.lock_path,
//!     config.lock_timeout,
//! );
//! let cache = SearchCache::new(&config.cache_dir);
//! let engine = SearchEngine::new(&store, &cache, &config);
//!
//! let hits = engine
//!     .search_by_keyword(&SearchParams {
//!         terms: vec!["hooks".to_string()],
//!         ..Default::default()
//!     })
//!     .unwrap();
//! for hit in &hits {
//!     println!("{}\t{}", hit.doc_id, hit.title);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod content;
pub mod data_dir;
pub mod doc_id;
pub mod entry;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lock;
pub mod query;
pub mod reconcile;
pub mod search;
pub mod store;
pub mod walker;

pub use cache::SearchCache;
pub use config::Config;
pub use data_dir::DataDir;
pub use entry::IndexEntry;
pub use error::{Error, Result};
pub use reconcile::Reconciler;
pub use search::SearchEngine;
pub use store::IndexStore;
