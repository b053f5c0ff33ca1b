// allocator.rs - Facade over the column registry and the table
//
// Mutations are cheap and staged; `commit` runs once per cycle, compacts every
// column in bulk and leaves a stable layout for queries.

use crate::accessor::{EntityMut, EntityRef};
use crate::component::{ColumnData, Component, ComponentError, Element};
use crate::query::{QueryError, QueryLayout, QueryView, QueryViewMut};
use crate::scheme::{AllocationScheme, ClassId, ComponentSpec, SchemeError};
use crate::table::{Guid, Table, TableError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use strata_metrics::{time_phase, CommitTimer, Counter, PhaseProfiler};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("add requires at least one column")]
    EmptyAdd,
    #[error("unknown column '{name}'")]
    UnknownColumn { name: String },
    #[error("column '{name}' supplied more than once")]
    DuplicateColumn { name: String },
    #[error("column '{name}' received no values")]
    EmptyValues { name: String },
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error(transparent)]
    Scheme(#[from] SchemeError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone)]
struct ValueEntry {
    name: String,
    data: ColumnData,
    /// Elements per row when supplied as fixed-size rows.
    row_width: Option<usize>,
}

/// Column values for one `add`, keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct Values {
    entries: Vec<ValueEntry>,
}

impl Values {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Flat elements; the row count is `values.len() / arity`.
    pub fn with<T: Element>(mut self, name: impl Into<String>, values: &[T]) -> Self {
        self.insert(name, ColumnData::from(values.to_vec()));
        self
    }

    /// One fixed-size array per row. `N` must equal the column arity.
    pub fn with_rows<T: Element, const N: usize>(
        mut self,
        name: impl Into<String>,
        rows: &[[T; N]],
    ) -> Self {
        let flat: Vec<T> = rows.iter().flatten().copied().collect();
        self.entries.push(ValueEntry {
            name: name.into(),
            data: ColumnData::from(flat),
            row_width: Some(N),
        });
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data: ColumnData) {
        self.entries.push(ValueEntry {
            name: name.into(),
            data,
            row_width: None,
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a `commit` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub rows_added: usize,
    pub rows_removed: usize,
    pub moves: usize,
    pub rows_moved: usize,
    pub elements_moved: usize,
}

impl CommitSummary {
    #[inline]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Default)]
struct CommitStats {
    counter: Counter,
    timer: CommitTimer,
    profiler: PhaseProfiler,
}

/// Owns every column plus the table that lays them out.
#[derive(Debug)]
pub struct Allocator {
    components: Vec<Component>,
    table: Table,
    next_guid: Guid,
    staged_values: HashMap<Guid, Vec<(usize, ColumnData)>>,
    cache: RefCell<HashMap<Box<[String]>, Arc<QueryLayout>>>,
    stats: CommitStats,
}

impl Allocator {
    /// Create an allocator for the given columns and class catalogue.
    pub fn new(specs: Vec<ComponentSpec>, classes: Vec<ClassId>) -> Result<Self, SchemeError> {
        let scheme = AllocationScheme::new(specs, classes)?;
        let components = scheme
            .specs()
            .iter()
            .map(|spec| Component::new(spec.name.clone(), spec.shape))
            .collect();

        Ok(Self {
            components,
            table: Table::new(scheme),
            next_guid: 1,
            staged_values: HashMap::new(),
            cache: RefCell::new(HashMap::new()),
            stats: CommitStats {
                counter: Counter::new(),
                timer: CommitTimer::new(64),
                profiler: PhaseProfiler::new(),
            },
        })
    }

    /// Pre-size every column to hold at least `rows` rows.
    pub fn reserve(&mut self, rows: usize) -> Result<(), ComponentError> {
        for component in &mut self.components {
            component.assert_capacity(rows)?;
        }
        Ok(())
    }

    /// Stage a new entity and return its guid.
    ///
    /// Nothing is stored until the next [`Allocator::commit`]. On error no
    /// state changes, including the guid counter.
    pub fn add(&mut self, values: Values) -> Result<Guid, AllocError> {
        let guid = self.next_guid;
        self.stage(values, guid)?;
        self.next_guid += 1;
        Ok(guid)
    }

    /// Stage a new entity under a caller-chosen guid.
    pub fn add_with_guid(&mut self, values: Values, guid: Guid) -> Result<Guid, AllocError> {
        self.stage(values, guid)?;
        self.next_guid = self.next_guid.max(guid.saturating_add(1));
        Ok(guid)
    }

    /// Tombstone an allocated guid. Storage is reclaimed at the next commit.
    pub fn delete(&mut self, guid: Guid) -> Result<(), AllocError> {
        self.table.stage_delete(guid)?;
        trace!(guid = guid, "staged delete");
        Ok(())
    }

    /// Apply every staged add and delete.
    ///
    /// Capacity growth is the only step that can fail and runs before any
    /// data moves, so an error leaves columns and table untouched and the
    /// staged work pending.
    pub fn commit(&mut self) -> Result<CommitSummary, AllocError> {
        let table = &self.table;
        let planned = time_phase!(self.stats.profiler, "plan", { table.plan_compaction() });
        let Some(plan) = planned else {
            self.stats.counter.increment("noop_commits", 1);
            return Ok(CommitSummary::default());
        };
        self.stats.timer.begin();

        let components = &mut self.components;
        let grown = time_phase!(self.stats.profiler, "grow", {
            components
                .iter_mut()
                .zip(plan.column_ends())
                .try_for_each(|(component, &end)| component.assert_capacity(end))
        });
        if let Err(err) = grown {
            warn!(error = %err, "commit rejected, staged work kept");
            return Err(err.into());
        }

        let mut elements_moved = 0;
        time_phase!(self.stats.profiler, "relocate", {
            for (column, component) in components.iter_mut().enumerate() {
                for mv in plan.moves(column) {
                    trace!(
                        column = component.name(),
                        source = ?mv.source,
                        target = mv.target,
                        "move"
                    );
                    component.relocate(mv.source.clone(), mv.target)?;
                    elements_moved += mv.rows() * component.arity();
                }
            }
            Ok::<(), AllocError>(())
        })?;

        let staged_values = &self.staged_values;
        time_phase!(self.stats.profiler, "write", {
            for placement in plan.placements() {
                let Some(payload) = staged_values.get(&placement.guid) else {
                    continue;
                };
                for (column, data) in payload {
                    components[*column].write_data(placement.slice(*column), data)?;
                }
            }
            for (component, &end) in components.iter_mut().zip(plan.column_ends()) {
                component.set_len(end)?;
            }
            Ok::<(), AllocError>(())
        })?;

        let summary = CommitSummary {
            rows_added: plan.rows_added(),
            rows_removed: plan.rows_removed(),
            moves: plan.move_count(),
            rows_moved: plan.rows_moved(),
            elements_moved,
        };

        self.table.apply_compaction(plan);
        self.staged_values.clear();
        self.cache.get_mut().clear();

        let counter = &mut self.stats.counter;
        counter.increment("commits", 1);
        counter.increment("rows_added", summary.rows_added);
        counter.increment("rows_removed", summary.rows_removed);
        counter.increment("moves", summary.moves);
        counter.increment("elements_moved", summary.elements_moved);
        self.stats.timer.end();

        debug!(
            added = summary.rows_added,
            removed = summary.rows_removed,
            moves = summary.moves,
            live = self.table.len(),
            "commit applied"
        );
        Ok(summary)
    }

    /// Resolve a request of column names and `source__to__target` specs.
    ///
    /// Layouts are cached per request until the next commit that changes
    /// anything.
    pub fn query<S: AsRef<str>>(&self, request: &[S]) -> Result<QueryView<'_>, AllocError> {
        let layout = self.layout(request)?;
        Ok(QueryView::new(self, layout))
    }

    /// Like [`Allocator::query`], with in-place write access to the columns.
    pub fn query_mut<S: AsRef<str>>(&mut self, request: &[S]) -> Result<QueryViewMut<'_>, AllocError> {
        let layout = self.layout(request)?;
        Ok(QueryViewMut::new(self, layout))
    }

    pub fn entity(&self, guid: Guid) -> Result<EntityRef<'_>, AllocError> {
        if !self.table.contains(guid) {
            return Err(TableError::UnknownGuid { guid }.into());
        }
        Ok(EntityRef::new(self, guid))
    }

    pub fn entity_mut(&mut self, guid: Guid) -> Result<EntityMut<'_>, AllocError> {
        if !self.table.contains(guid) {
            return Err(TableError::UnknownGuid { guid }.into());
        }
        Ok(EntityMut::new(self, guid))
    }

    /// Current range of `guid` in every column, in declaration order.
    pub fn slices(&self, guid: Guid) -> Result<Vec<Range<usize>>, AllocError> {
        Ok(self.table.slices_from_guid(guid)?)
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        let column = self.table.scheme().column_index(name)?;
        self.components.get(column)
    }

    #[inline]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    #[inline]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[inline]
    pub fn scheme(&self) -> &AllocationScheme {
        self.table.scheme()
    }

    /// Live guids in storage order.
    pub fn guids(&self) -> impl Iterator<Item = Guid> + '_ {
        self.table.guids()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Whether the next commit has work to do.
    #[inline]
    pub fn pending(&self) -> bool {
        self.table.is_pending()
    }

    /// Commit counters, empty unless the `metrics` feature is on.
    pub fn counters(&self) -> Vec<(&'static str, usize)> {
        self.stats.counter.snapshot()
    }

    #[inline]
    pub fn commit_timer(&self) -> &CommitTimer {
        &self.stats.timer
    }

    #[inline]
    pub fn phase_profiler(&self) -> &PhaseProfiler {
        &self.stats.profiler
    }

    pub(crate) fn column_index(&self, name: &str) -> Result<usize, AllocError> {
        self.table
            .scheme()
            .column_index(name)
            .ok_or_else(|| AllocError::UnknownColumn {
                name: name.to_string(),
            })
    }

    #[inline]
    pub(crate) fn component_at(&self, column: usize) -> &Component {
        &self.components[column]
    }

    #[inline]
    pub(crate) fn component_at_mut(&mut self, column: usize) -> &mut Component {
        &mut self.components[column]
    }

    fn layout<S: AsRef<str>>(&self, request: &[S]) -> Result<Arc<QueryLayout>, AllocError> {
        let key: Box<[String]> = request.iter().map(|s| s.as_ref().to_string()).collect();
        if let Some(layout) = self.cache.borrow().get(&key) {
            return Ok(Arc::clone(layout));
        }

        let layout = Arc::new(QueryLayout::resolve(self.table.scheme(), &self.table, request)?);
        self.cache.borrow_mut().insert(key, Arc::clone(&layout));
        Ok(layout)
    }

    /// Validate `values`, then stage them under `guid`.
    fn stage(&mut self, values: Values, guid: Guid) -> Result<(), AllocError> {
        if values.is_empty() {
            return Err(AllocError::EmptyAdd);
        }

        let mut sizes = vec![0usize; self.components.len()];
        let mut payload = Vec::with_capacity(values.len());
        for entry in values.entries {
            let column = self.column_index(&entry.name)?;
            if sizes[column] != 0 {
                return Err(AllocError::DuplicateColumn { name: entry.name });
            }
            sizes[column] = row_count(&self.components[column], &entry)?;
            payload.push((column, entry.data));
        }

        let class = self.table.stage_add(guid, &sizes)?;
        trace!(guid = guid, class = class, "staged add");
        self.staged_values.insert(guid, payload);
        Ok(())
    }
}

/// Rows described by `entry` once flattened into `component`'s layout.
fn row_count(component: &Component, entry: &ValueEntry) -> Result<usize, AllocError> {
    let found = entry.data.dtype();
    if found != component.dtype() {
        return Err(ComponentError::TypeMismatch {
            name: entry.name.clone(),
            expected: component.dtype(),
            found,
        }
        .into());
    }

    let arity = component.arity();
    if let Some(width) = entry.row_width {
        if width != arity {
            return Err(ComponentError::ShapeMismatch {
                name: entry.name.clone(),
                expected: arity,
                found: width,
            }
            .into());
        }
    }

    let elements = entry.data.len();
    if elements == 0 {
        return Err(AllocError::EmptyValues {
            name: entry.name.clone(),
        });
    }
    if elements % arity != 0 {
        return Err(ComponentError::ShapeMismatch {
            name: entry.name.clone(),
            expected: elements.div_ceil(arity) * arity,
            found: elements,
        }
        .into());
    }
    Ok(elements / arity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ElementType;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    fn two_column() -> Allocator {
        Allocator::new(
            vec![
                ComponentSpec::scalar("A", ElementType::I32),
                ComponentSpec::scalar("B", ElementType::I32),
            ],
            vec![ClassId::from_flags(&[1, 1]), ClassId::from_flags(&[1, 0])],
        )
        .unwrap()
    }

    /// position (one row per shape), verts (many rows), color (one row)
    fn shapes() -> Allocator {
        Allocator::new(
            vec![
                ComponentSpec::vector("position", ElementType::F32, 2),
                ComponentSpec::vector("verts", ElementType::F32, 2),
                ComponentSpec::vector("color", ElementType::U8, 4),
            ],
            vec![
                ClassId::from_flags(&[1, 1, 1]),
                ClassId::from_flags(&[1, 1, 0]),
                ClassId::from_flags(&[1, 0, 0]),
            ],
        )
        .unwrap()
    }

    fn polygon(x: f32, corners: usize) -> Values {
        let verts: Vec<[f32; 2]> = (0..corners).map(|i| [x, i as f32]).collect();
        Values::new()
            .with_rows("position", &[[x, 0.0]])
            .with_rows("verts", &verts)
    }

    #[test]
    fn test_concrete_scenario() {
        init_tracing();
        let mut alloc = two_column();

        let first = alloc.add(Values::new().with("A", &[1i32]).with("B", &[1i32])).unwrap();
        let second = alloc.add(Values::new().with("A", &[2i32])).unwrap();
        assert_eq!((first, second), (1, 2));

        alloc.commit().unwrap();
        assert_eq!(alloc.component("A").unwrap().read::<i32>(0..2).unwrap(), &[1, 2]);
        assert_eq!(alloc.component("B").unwrap().read::<i32>(0..1).unwrap(), &[1]);

        alloc.delete(1).unwrap();
        let summary = alloc.commit().unwrap();
        assert_eq!(summary.rows_removed, 1);
        assert_eq!(alloc.component("A").unwrap().read::<i32>(0..1).unwrap(), &[2]);
        assert!(alloc.component("B").unwrap().is_empty());
        assert_eq!(alloc.slices(2).unwrap(), vec![0..1, 0..0]);
        assert!(alloc.slices(1).is_err());
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut alloc = two_column();
        alloc.add(Values::new().with("A", &[5i32, 6, 7])).unwrap();
        assert!(!alloc.commit().unwrap().is_noop());

        let capacities: Vec<_> = alloc.components().iter().map(Component::capacity).collect();
        let slices = alloc.slices(1).unwrap();
        for _ in 0..2 {
            assert!(alloc.commit().unwrap().is_noop());
        }
        assert_eq!(
            alloc.components().iter().map(Component::capacity).collect::<Vec<_>>(),
            capacities
        );
        assert_eq!(alloc.slices(1).unwrap(), slices);
    }

    #[test]
    fn test_failed_add_changes_nothing() {
        let mut alloc = two_column();

        assert_eq!(alloc.add(Values::new()), Err(AllocError::EmptyAdd));
        assert_eq!(
            alloc.add(Values::new().with("C", &[1i32])),
            Err(AllocError::UnknownColumn { name: "C".into() })
        );
        // Only B present is not a declared class.
        assert!(matches!(
            alloc.add(Values::new().with("B", &[1i32])),
            Err(AllocError::Table(TableError::UnknownClass { .. }))
        ));
        assert!(matches!(
            alloc.add(Values::new().with("A", &[1.0f32])),
            Err(AllocError::Component(ComponentError::TypeMismatch { .. }))
        ));
        assert_eq!(
            alloc.add(Values::new().with::<i32>("A", &[])),
            Err(AllocError::EmptyValues { name: "A".into() })
        );
        assert_eq!(
            alloc.add(Values::new().with("A", &[1i32]).with("A", &[2i32])),
            Err(AllocError::DuplicateColumn { name: "A".into() })
        );

        assert!(!alloc.pending());
        assert_eq!(alloc.add(Values::new().with("A", &[1i32])).unwrap(), 1);
    }

    #[test]
    fn test_vector_values_are_flattened() {
        let mut alloc = shapes();
        let err = alloc
            .add(Values::new().with("position", &[1.0f32, 2.0, 3.0]))
            .unwrap_err();
        assert_eq!(
            err,
            AllocError::Component(ComponentError::ShapeMismatch {
                name: "position".into(),
                expected: 4,
                found: 3,
            })
        );
        let err = alloc
            .add(Values::new().with_rows("position", &[[1.0f32, 2.0, 3.0]]))
            .unwrap_err();
        assert!(matches!(err, AllocError::Component(ComponentError::ShapeMismatch { .. })));

        let guid = alloc
            .add(Values::new().with("position", &[1.0f32, 2.0]))
            .unwrap();
        alloc.commit().unwrap();
        assert_eq!(alloc.entity(guid).unwrap().get::<f32>("position").unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_add_with_guid() {
        let mut alloc = two_column();
        assert_eq!(
            alloc.add_with_guid(Values::new().with("A", &[1i32]), 0),
            Err(AllocError::Table(TableError::ReservedGuid))
        );
        assert!(!alloc.pending());
        alloc.add_with_guid(Values::new().with("A", &[1i32]), 10).unwrap();
        assert!(matches!(
            alloc.add_with_guid(Values::new().with("A", &[1i32]), 10),
            Err(AllocError::Table(TableError::AlreadyStaged { guid: 10 }))
        ));
        assert_eq!(alloc.add(Values::new().with("A", &[2i32])).unwrap(), 11);

        alloc.commit().unwrap();
        assert!(matches!(
            alloc.add_with_guid(Values::new().with("A", &[1i32]), 11),
            Err(AllocError::Table(TableError::AlreadyAllocated { guid: 11 }))
        ));
    }

    #[test]
    fn test_mixed_churn_keeps_every_entity_intact() {
        init_tracing();
        let mut alloc = shapes();
        let mut expected = HashMap::new();

        for i in 0..12 {
            let x = i as f32;
            let values = match i % 3 {
                0 => polygon(x, 3).with_rows("color", &[[i as u8, 0, 0, 255]]),
                1 => polygon(x, 4),
                _ => Values::new().with_rows("position", &[[x, 0.0]]),
            };
            let guid = alloc.add(values).unwrap();
            expected.insert(guid, x);
        }
        alloc.commit().unwrap();

        // Drop from the first class, grow the second, then commit once.
        for guid in [1, 4, 7] {
            alloc.delete(guid).unwrap();
            expected.remove(&guid);
        }
        for i in 12..16 {
            let x = i as f32;
            let guid = alloc.add(polygon(x, 2 + i % 3)).unwrap();
            expected.insert(guid, x);
        }
        let summary = alloc.commit().unwrap();
        assert_eq!(summary.rows_added, 4);
        assert_eq!(summary.rows_removed, 3);
        assert!(summary.moves > 0);

        assert_eq!(alloc.len(), expected.len());
        for (&guid, &x) in &expected {
            let entity = alloc.entity(guid).unwrap();
            assert_eq!(entity.get::<f32>("position").unwrap()[0], x);
            if entity.has("verts") {
                let verts = entity.get::<f32>("verts").unwrap();
                assert!(verts.chunks(2).all(|v| v[0] == x));
            }
        }
    }

    #[test]
    fn test_broadcast_reproduces_owner_values() {
        let mut alloc = shapes();
        alloc.add(polygon(1.0, 3)).unwrap();
        alloc.add(polygon(2.0, 5)).unwrap();
        alloc.add(Values::new().with_rows("position", &[[9.0f32, 0.0]])).unwrap();
        alloc
            .add(polygon(3.0, 4).with_rows("color", &[[0u8, 0, 0, 0]]))
            .unwrap();
        alloc.commit().unwrap();

        let view = alloc
            .query(&["position", "verts", "position__to__verts"])
            .unwrap();
        assert_eq!(view.entity_count(), 3);

        let position = view.column::<f32>("position").unwrap();
        let verts = view.column::<f32>("verts").unwrap();
        let index = view.index("position__to__verts").unwrap();
        assert_eq!(index.len() * 2, verts.len());
        assert_eq!(index.len(), 12);
        for (i, &owner) in index.iter().enumerate() {
            assert_eq!(position[owner * 2], verts[i * 2]);
        }
        assert!(matches!(view.get("verts"), Some(crate::query::QueryValue::Data(_))));
        assert!(matches!(
            view.get("position__to__verts"),
            Some(crate::query::QueryValue::Index(_))
        ));
    }

    #[test]
    fn test_broadcast_covers_entities_without_target() {
        let mut alloc = shapes();
        alloc.add(polygon(1.0, 3)).unwrap();
        alloc.add(Values::new().with_rows("position", &[[9.0f32, 0.0]])).unwrap();
        alloc.add(polygon(2.0, 2)).unwrap();
        alloc.commit().unwrap();

        let view = alloc.query(&["position", "position__to__verts"]).unwrap();
        assert_eq!(view.entity_count(), 3);
        let position = view.column::<f32>("position").unwrap();
        assert_eq!(position, alloc.query(&["position"]).unwrap().column::<f32>("position").unwrap());
        assert_eq!(position.len(), 6);

        let verts = alloc.component("verts").unwrap().read::<f32>(0..5).unwrap();
        let index = view.index("position__to__verts").unwrap();
        assert_eq!(index.len(), 5);
        for (i, &owner) in index.iter().enumerate() {
            assert_eq!(position[owner * 2], verts[i * 2]);
        }
    }

    #[test]
    fn test_query_value_outlives_view() {
        let mut alloc = shapes();
        alloc.add(polygon(4.0, 2)).unwrap();
        alloc.commit().unwrap();

        let (index, data) = {
            let view = alloc.query(&["position", "position__to__verts"]).unwrap();
            (
                view.get("position__to__verts").unwrap(),
                view.get("position").unwrap(),
            )
        };
        assert_eq!(index, crate::query::QueryValue::Index(vec![0, 0].into()));
        assert!(matches!(data, crate::query::QueryValue::Data(_)));
    }

    #[test]
    fn test_query_errors() {
        let mut alloc = shapes();
        alloc.add(polygon(1.0, 2)).unwrap();
        alloc.commit().unwrap();

        assert_eq!(
            alloc.query::<&str>(&[]).unwrap_err(),
            AllocError::Query(QueryError::Empty)
        );
        assert_eq!(
            alloc.query(&["mass"]).unwrap_err(),
            AllocError::Query(QueryError::UnknownColumn { name: "mass".into() })
        );
        assert_eq!(
            alloc.query(&["position__to__"]).unwrap_err(),
            AllocError::Query(QueryError::MalformedBroadcast {
                spec: "position__to__".into()
            })
        );
        assert!(matches!(
            alloc.query(&["verts__to__position"]).unwrap_err(),
            AllocError::Table(TableError::BroadcastSourceNotUnit { size: 2, .. })
        ));

        let view = alloc.query(&["position"]).unwrap();
        assert!(matches!(
            view.column::<f32>("verts"),
            Err(AllocError::Query(QueryError::NotRequested { .. }))
        ));
        assert!(matches!(
            view.column::<u8>("position"),
            Err(AllocError::Component(ComponentError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_query_cache_lives_until_commit() {
        let mut alloc = shapes();
        alloc.add(polygon(1.0, 3)).unwrap();
        alloc.commit().unwrap();

        let first = Arc::clone(&alloc.layout(&["position"]).unwrap());
        let again = alloc.layout(&["position"]).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // A no-op commit keeps the cache.
        alloc.commit().unwrap();
        assert!(Arc::ptr_eq(&first, &alloc.layout(&["position"]).unwrap()));

        alloc.add(polygon(2.0, 3)).unwrap();
        alloc.commit().unwrap();
        let fresh = alloc.layout(&["position"]).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.slice("position"), Some(0..2));
    }

    #[test]
    fn test_query_mut_updates_in_place() {
        let mut alloc = shapes();
        alloc.add(polygon(1.0, 3)).unwrap();
        alloc.add(polygon(2.0, 2)).unwrap();
        alloc.commit().unwrap();

        let mut view = alloc.query_mut(&["position", "position__to__verts"]).unwrap();
        for value in view.column_mut::<f32>("position").unwrap() {
            *value += 10.0;
        }
        assert_eq!(view.index("position__to__verts").unwrap(), &[0, 0, 0, 1, 1]);

        let view = alloc.query(&["position"]).unwrap();
        assert_eq!(view.column::<f32>("position").unwrap(), &[11.0, 10.0, 12.0, 10.0]);
    }

    #[test]
    fn test_capacity_grows_by_powers_of_two() {
        let mut alloc = two_column();
        let mut last = 0;
        for i in 0..20 {
            alloc.add(Values::new().with("A", &[i])).unwrap();
            alloc.commit().unwrap();
            let capacity = alloc.component("A").unwrap().capacity();
            assert!(capacity.is_power_of_two());
            assert!(capacity >= last);
            assert!(capacity >= alloc.component("A").unwrap().len());
            last = capacity;
        }
        assert_eq!(last, 32);
    }

    #[test]
    fn test_reserve_reports_exhaustion() {
        let mut alloc = two_column();
        alloc.reserve(4).unwrap();
        assert_eq!(alloc.component("B").unwrap().capacity(), 4);
        assert!(matches!(
            alloc.reserve(usize::MAX),
            Err(ComponentError::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn test_metrics_follow_commits() {
        let mut alloc = two_column();
        alloc.add(Values::new().with("A", &[1i32])).unwrap();
        alloc.commit().unwrap();
        alloc.commit().unwrap();

        let counters = alloc.counters();
        if strata_metrics::ENABLED {
            assert!(counters.contains(&("commits", 1)));
            assert!(counters.contains(&("noop_commits", 1)));
            assert!(counters.contains(&("rows_added", 1)));
            assert_eq!(alloc.commit_timer().samples(), 1);
        } else {
            assert!(counters.is_empty());
        }
    }
}
