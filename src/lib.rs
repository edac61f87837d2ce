//! PlotTag: Tag-Tree Image Catalog
//!
//! Organizes generated plot images along an ordered hierarchy of tags
//! (model, region, forecast hour, ...). In memory the catalog is a
//! [`tree::TagTree`]; on disk it is a single-table SQLite [`store::StoreFile`]
//! whose columns grow as new tags and metadata appear. Many independent
//! producers may write to the same store file, and [`merger`] folds per-job
//! store files into one.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod logging;
pub mod merger;
pub mod schema;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{ApiError, StorageError, TreeError};
pub use merger::{merge_store_files, MergeOptions, MergeReport, SourceDisposal};
pub use store::{OpenOptions, ReadOptions, SchemaMode, StoreFile, WritePolicy, WriteReport};
pub use tree::{ConflictPolicy, KeyOrder, Selector, SortMethod, SortSpec, TagFilter, TagTree};
pub use types::{ImageRecord, MetaValue, TagValue};
