//! Column and broadcast queries.
//!
//! A request is a list of strings. A bare name selects that column over every
//! class owning all requested bare columns. `"<source>__to__<target>"` asks for a
//! broadcast index: one entry per `target` row holding the local position of
//! the entity that owns it, so `source[index[i]]` lines up with `target[i]`.

use crate::allocator::{AllocError, Allocator};
use crate::component::{ComponentView, Element};
use crate::scheme::AllocationScheme;
use crate::table::Table;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

pub const BROADCAST_SEPARATOR: &str = "__to__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query names no columns")]
    Empty,
    #[error("unknown column '{name}'")]
    UnknownColumn { name: String },
    #[error("malformed broadcast spec '{spec}'")]
    MalformedBroadcast { spec: String },
    #[error("'{name}' was not part of the query")]
    NotRequested { name: String },
}

/// One parsed request string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTerm {
    Column(String),
    Broadcast { source: String, target: String },
}

impl QueryTerm {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let Some((source, target)) = raw.split_once(BROADCAST_SEPARATOR) else {
            return Ok(QueryTerm::Column(raw.to_string()));
        };
        if source.is_empty() || target.is_empty() || target.contains(BROADCAST_SEPARATOR) {
            return Err(QueryError::MalformedBroadcast {
                spec: raw.to_string(),
            });
        }
        Ok(QueryTerm::Broadcast {
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
enum Resolved {
    Column { column: usize, rows: Range<usize> },
    Index(Arc<[usize]>),
}

/// Resolved ranges for one request against one committed layout.
///
/// Layouts are cached by the allocator until the next commit that changes
/// anything.
#[derive(Debug, Clone)]
pub struct QueryLayout {
    rows: Range<usize>,
    entries: HashMap<String, Resolved>,
}

impl QueryLayout {
    pub(crate) fn resolve<S: AsRef<str>>(
        scheme: &AllocationScheme,
        table: &Table,
        request: &[S],
    ) -> Result<Self, AllocError> {
        if request.is_empty() {
            return Err(QueryError::Empty.into());
        }

        let lookup = |name: &str| {
            scheme
                .column_index(name)
                .ok_or_else(|| QueryError::UnknownColumn {
                    name: name.to_string(),
                })
        };

        let mut columns = Vec::new();
        let mut column_keys = Vec::new();
        let mut broadcasts = Vec::new();
        let mut broadcast_keys = Vec::new();
        for raw in request {
            let raw = raw.as_ref();
            match QueryTerm::parse(raw)? {
                QueryTerm::Column(name) => {
                    columns.push(lookup(&name)?);
                    column_keys.push(raw.to_string());
                }
                QueryTerm::Broadcast { source, target } => {
                    broadcasts.push((lookup(&source)?, lookup(&target)?));
                    broadcast_keys.push(raw.to_string());
                }
            }
        }

        let slices = table.mask_slices(&columns, &broadcasts)?;

        let mut entries = HashMap::with_capacity(request.len());
        for ((key, column), rows) in column_keys.into_iter().zip(columns).zip(slices.columns) {
            entries.insert(key, Resolved::Column { column, rows });
        }
        for (key, index) in broadcast_keys.into_iter().zip(slices.broadcasts) {
            entries.insert(key, Resolved::Index(index.into()));
        }

        Ok(Self {
            rows: slices.rows,
            entries,
        })
    }

    /// Number of matched entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.rows.len()
    }

    /// Row range of a requested column.
    pub fn slice(&self, name: &str) -> Option<Range<usize>> {
        match self.entries.get(name)? {
            Resolved::Column { rows, .. } => Some(rows.clone()),
            Resolved::Index(_) => None,
        }
    }

    /// Index array of a requested broadcast spec.
    pub fn index(&self, spec: &str) -> Option<&[usize]> {
        match self.entries.get(spec)? {
            Resolved::Index(index) => Some(&index[..]),
            Resolved::Column { .. } => None,
        }
    }

    fn shared_index(&self, spec: &str) -> Option<Arc<[usize]>> {
        match self.entries.get(spec)? {
            Resolved::Index(index) => Some(Arc::clone(index)),
            Resolved::Column { .. } => None,
        }
    }

    fn column(&self, name: &str) -> Result<(usize, Range<usize>), QueryError> {
        match self.entries.get(name) {
            Some(Resolved::Column { column, rows }) => Ok((*column, rows.clone())),
            _ => Err(QueryError::NotRequested {
                name: name.to_string(),
            }),
        }
    }
}

/// One entry of a query response. Index arrays are shared with the cached
/// layout, so a value outlives the view it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue<'a> {
    Data(ComponentView<'a>),
    Index(Arc<[usize]>),
}

/// Read-only query result. Borrows the allocator, so a commit forces a
/// fresh query.
#[derive(Debug)]
pub struct QueryView<'a> {
    allocator: &'a Allocator,
    layout: Arc<QueryLayout>,
}

impl<'a> QueryView<'a> {
    pub(crate) fn new(allocator: &'a Allocator, layout: Arc<QueryLayout>) -> Self {
        Self { allocator, layout }
    }

    #[inline]
    pub fn layout(&self) -> &QueryLayout {
        &self.layout
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.layout.entity_count()
    }

    /// Typed data of a requested column.
    pub fn column<T: Element>(&self, name: &str) -> Result<&'a [T], AllocError> {
        let (column, rows) = self.layout.column(name)?;
        Ok(self.allocator.component_at(column).read::<T>(rows)?)
    }

    /// Untyped data of a requested column.
    pub fn view(&self, name: &str) -> Result<ComponentView<'a>, AllocError> {
        let (column, rows) = self.layout.column(name)?;
        Ok(self.allocator.component_at(column).view_rows(rows)?)
    }

    pub fn index(&self, spec: &str) -> Result<&[usize], AllocError> {
        self.layout.index(spec).ok_or_else(|| {
            QueryError::NotRequested {
                name: spec.to_string(),
            }
            .into()
        })
    }

    pub fn get(&self, key: &str) -> Option<QueryValue<'a>> {
        if let Some(index) = self.layout.shared_index(key) {
            return Some(QueryValue::Index(index));
        }
        self.view(key).ok().map(QueryValue::Data)
    }
}

/// Mutable query result for in-place bulk updates of one column at a time.
#[derive(Debug)]
pub struct QueryViewMut<'a> {
    allocator: &'a mut Allocator,
    layout: Arc<QueryLayout>,
}

impl<'a> QueryViewMut<'a> {
    pub(crate) fn new(allocator: &'a mut Allocator, layout: Arc<QueryLayout>) -> Self {
        Self { allocator, layout }
    }

    #[inline]
    pub fn layout(&self) -> &QueryLayout {
        &self.layout
    }

    pub fn column<T: Element>(&self, name: &str) -> Result<&[T], AllocError> {
        let (column, rows) = self.layout.column(name)?;
        Ok(self.allocator.component_at(column).read::<T>(rows)?)
    }

    pub fn column_mut<T: Element>(&mut self, name: &str) -> Result<&mut [T], AllocError> {
        let (column, rows) = self.layout.column(name)?;
        Ok(self.allocator.component_at_mut(column).slice_mut::<T>(rows)?)
    }

    pub fn index(&self, spec: &str) -> Result<&[usize], AllocError> {
        self.layout.index(spec).ok_or_else(|| {
            QueryError::NotRequested {
                name: spec.to_string(),
            }
            .into()
        })
    }
}
