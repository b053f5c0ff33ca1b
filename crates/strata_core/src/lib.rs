//! Strata Core
//!
//! Class-sectioned dense storage for entities made of named attributes:
//! - Typed, resizable columns, one per attribute
//! - A closed catalogue of entity classes fixing section order
//! - Batched add/delete with one compaction per commit
//! - Column and broadcast-index queries over contiguous memory

pub mod accessor;
pub mod allocator;
pub mod component;
pub mod config;
pub mod query;
pub mod scheme;
pub mod table;

pub use accessor::{EntityMut, EntityRef};
pub use allocator::{AllocError, Allocator, CommitSummary, Values};
pub use component::{
    ColumnData, Component, ComponentError, ComponentView, Element, ElementShape, ElementType,
};
pub use config::{ComponentConfig, ConfigError, StrataConfig};
pub use query::{QueryError, QueryLayout, QueryTerm, QueryValue, QueryView, QueryViewMut};
pub use scheme::{AllocationScheme, ClassId, ComponentSpec, SchemeError};
pub use table::{ColumnMove, CompactionPlan, Guid, MaskSlices, Placement, Table, TableError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
