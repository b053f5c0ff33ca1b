//! Entity bookkeeping and the compaction planner.
//!
//! The table records, for every live guid, its class and its row count in
//! each column. Rows are kept in class order: every class owns one section
//! of the table, and sections appear in the order the scheme declares them.
//! Because all columns lay their rows out in that same order, a row's start
//! offset in a column is the running total of the sizes before it.
//!
//! Mutations are staged. [`Table::stage_add`] queues a guid under its class
//! and [`Table::stage_delete`] tombstones a row in place; nothing moves until
//! [`Table::plan_compaction`] computes the next layout and the list of bulk
//! moves that turns the current column contents into it.

use crate::scheme::{AllocationScheme, ClassId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Entity identity. Assigned from 1 upwards and stable across compaction.
pub type Guid = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("size tuple has {found} entries but {expected} columns are declared")]
    SizeArity { expected: usize, found: usize },
    #[error("sizes describe class {class}, which the scheme does not declare")]
    UnknownClass { class: ClassId },
    #[error("guid {guid} is already allocated")]
    AlreadyAllocated { guid: Guid },
    #[error("guid {guid} is already staged")]
    AlreadyStaged { guid: Guid },
    #[error("guid {guid} is not allocated")]
    UnknownGuid { guid: Guid },
    #[error("column index {column} is out of range")]
    ColumnOutOfRange { column: usize },
    #[error("rows owning every requested column are not contiguous")]
    NonContiguousSelection,
    #[error("broadcast source '{source_column}' has {size} rows for a matched entity, expected 1")]
    BroadcastSourceNotUnit {
        source_column: String,
        /// `None` for a tombstoned row.
        guid: Option<Guid>,
        size: usize,
    },
    #[error("guid 0 is reserved")]
    ReservedGuid,
}

#[derive(Debug, Clone)]
struct Row {
    /// `None` once tombstoned.
    guid: Option<Guid>,
    class: usize,
    sizes: Box<[usize]>,
    starts: Box<[usize]>,
}

#[derive(Debug, Clone)]
struct StagedRow {
    guid: Guid,
    sizes: Box<[usize]>,
}

/// One bulk copy inside a single column, in rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMove {
    pub source: Range<usize>,
    pub target: usize,
}

impl ColumnMove {
    #[inline]
    pub fn rows(&self) -> usize {
        self.source.len()
    }

    #[inline]
    pub fn is_leftward(&self) -> bool {
        self.target < self.source.start
    }
}

/// Where a staged guid lands once the plan is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub guid: Guid,
    pub starts: Box<[usize]>,
    pub sizes: Box<[usize]>,
}

impl Placement {
    pub fn slice(&self, column: usize) -> Range<usize> {
        let start = self.starts[column];
        start..start + self.sizes[column]
    }
}

/// Output of [`Table::plan_compaction`].
///
/// Moves for a column must be applied in the order given. Leftward moves
/// come first in ascending source order, then rightward moves in descending
/// source order; with rows keeping their relative order this never reads a
/// range that an earlier move already overwrote.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    moves: Vec<Vec<ColumnMove>>,
    column_ends: Box<[usize]>,
    placements: Vec<Placement>,
    removed: usize,
    rows: Vec<Row>,
    sections: Vec<Range<usize>>,
}

impl CompactionPlan {
    #[inline]
    pub fn moves(&self, column: usize) -> &[ColumnMove] {
        self.moves.get(column).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Required valid length of every column after the plan is applied.
    #[inline]
    pub fn column_ends(&self) -> &[usize] {
        &self.column_ends
    }

    #[inline]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    #[inline]
    pub fn rows_added(&self) -> usize {
        self.placements.len()
    }

    #[inline]
    pub fn rows_removed(&self) -> usize {
        self.removed
    }

    pub fn move_count(&self) -> usize {
        self.moves.iter().map(Vec::len).sum()
    }

    /// Rows copied across all columns.
    pub fn rows_moved(&self) -> usize {
        self.moves.iter().flatten().map(ColumnMove::rows).sum()
    }
}

/// Column ranges and broadcast indices for one query mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSlices {
    /// Matched rows, as table row positions.
    pub rows: Range<usize>,
    /// One range per requested column, in request order.
    pub columns: Vec<Range<usize>>,
    /// One index array per requested broadcast, in request order.
    pub broadcasts: Vec<Vec<usize>>,
}

/// Per-entity bookkeeping for one allocation scheme.
#[derive(Debug)]
pub struct Table {
    scheme: AllocationScheme,
    rows: Vec<Row>,
    row_of: HashMap<Guid, usize>,
    sections: Vec<Range<usize>>,
    column_ends: Box<[usize]>,
    staged: Vec<Vec<StagedRow>>,
    staged_guids: HashSet<Guid>,
    tombstones: usize,
}

impl Table {
    pub fn new(scheme: AllocationScheme) -> Self {
        let classes = scheme.classes().len();
        let columns = scheme.column_count();
        Self {
            scheme,
            rows: Vec::new(),
            row_of: HashMap::new(),
            sections: vec![0..0; classes],
            column_ends: vec![0; columns].into_boxed_slice(),
            staged: vec![Vec::new(); classes],
            staged_guids: HashSet::new(),
            tombstones: 0,
        }
    }

    #[inline]
    pub fn scheme(&self) -> &AllocationScheme {
        &self.scheme
    }

    /// Number of allocated, non-tombstoned guids.
    #[inline]
    pub fn len(&self) -> usize {
        self.row_of.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.row_of.is_empty()
    }

    #[inline]
    pub fn contains(&self, guid: Guid) -> bool {
        self.row_of.contains_key(&guid)
    }

    #[inline]
    pub fn is_staged(&self, guid: Guid) -> bool {
        self.staged_guids.contains(&guid)
    }

    /// Whether a compaction would do anything.
    #[inline]
    pub fn is_pending(&self) -> bool {
        !self.staged_guids.is_empty() || self.tombstones > 0
    }

    #[inline]
    pub fn staged_len(&self) -> usize {
        self.staged_guids.len()
    }

    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Live guids in storage order.
    pub fn guids(&self) -> impl Iterator<Item = Guid> + '_ {
        self.rows.iter().filter_map(|row| row.guid)
    }

    pub fn class_of(&self, guid: Guid) -> Option<&ClassId> {
        let row = self.row_of.get(&guid)?;
        self.scheme.classes().get(self.rows[*row].class)
    }

    /// Valid length of every column as of the last compaction.
    #[inline]
    pub fn column_ends(&self) -> &[usize] {
        &self.column_ends
    }

    /// Row range of every declared class, in declaration order.
    #[inline]
    pub fn section_slices(&self) -> &[Range<usize>] {
        &self.sections
    }

    /// Declared class position for a size tuple.
    pub fn class_id_from_sizes(&self, sizes: &[usize]) -> Result<usize, TableError> {
        let expected = self.scheme.column_count();
        if sizes.len() != expected {
            return Err(TableError::SizeArity {
                expected,
                found: sizes.len(),
            });
        }
        let class = ClassId::from_sizes(sizes);
        self.scheme
            .class_position(&class)
            .ok_or(TableError::UnknownClass { class })
    }

    /// Queue `guid` for allocation at the next compaction.
    pub fn stage_add(&mut self, guid: Guid, sizes: &[usize]) -> Result<usize, TableError> {
        if guid == 0 {
            return Err(TableError::ReservedGuid);
        }
        if self.row_of.contains_key(&guid) {
            return Err(TableError::AlreadyAllocated { guid });
        }
        if self.staged_guids.contains(&guid) {
            return Err(TableError::AlreadyStaged { guid });
        }
        let class = self.class_id_from_sizes(sizes)?;
        self.staged[class].push(StagedRow {
            guid,
            sizes: sizes.into(),
        });
        self.staged_guids.insert(guid);
        Ok(class)
    }

    /// Tombstone an allocated guid. Its storage is reclaimed at the next
    /// compaction; until then it is no longer found.
    pub fn stage_delete(&mut self, guid: Guid) -> Result<(), TableError> {
        let row = self
            .row_of
            .remove(&guid)
            .ok_or(TableError::UnknownGuid { guid })?;
        self.rows[row].guid = None;
        self.tombstones += 1;
        Ok(())
    }

    /// Current `[start, start + size)` of `guid` in every column.
    pub fn slices_from_guid(&self, guid: Guid) -> Result<Vec<Range<usize>>, TableError> {
        let row = &self.rows[self.row_index(guid)?];
        Ok(row
            .starts
            .iter()
            .zip(row.sizes.iter())
            .map(|(&start, &size)| start..start + size)
            .collect())
    }

    /// Current range of `guid` in a single column.
    pub fn slice_from_guid(&self, guid: Guid, column: usize) -> Result<Range<usize>, TableError> {
        let row = &self.rows[self.row_index(guid)?];
        let start = *row
            .starts
            .get(column)
            .ok_or(TableError::ColumnOutOfRange { column })?;
        Ok(start..start + row.sizes[column])
    }

    /// Slices for every class owning all of `columns`.
    ///
    /// Broadcast `(source, target)` yields one entry per target row in the
    /// matched rows, holding the position within those rows of the entity
    /// owning it. Every matched row needs exactly one `source` row; rows
    /// without `target` rows contribute nothing to the index.
    pub fn mask_slices(
        &self,
        columns: &[usize],
        broadcasts: &[(usize, usize)],
    ) -> Result<MaskSlices, TableError> {
        let referenced = columns
            .iter()
            .chain(broadcasts.iter().flat_map(|(source, target)| [source, target]));
        for &column in referenced {
            if column >= self.scheme.column_count() {
                return Err(TableError::ColumnOutOfRange { column });
            }
        }

        let matched = self.scheme.classes_with_all(columns);
        let mut run: Option<Range<usize>> = None;
        for &class in &matched {
            let section = &self.sections[class];
            if section.is_empty() {
                continue;
            }
            run = match run.take() {
                None => Some(section.clone()),
                Some(current) if current.end == section.start => Some(current.start..section.end),
                Some(_) => return Err(TableError::NonContiguousSelection),
            };
        }
        let rows = run.unwrap_or(0..0);

        let column_slices = columns
            .iter()
            .map(|&column| self.column_span(&rows, column))
            .collect();

        let mut indices = Vec::with_capacity(broadcasts.len());
        for &(source, target) in broadcasts {
            let mut index = Vec::with_capacity(self.column_span(&rows, target).len());
            for (local, row) in self.rows[rows.clone()].iter().enumerate() {
                let size = row.sizes[source];
                if size != 1 {
                    return Err(TableError::BroadcastSourceNotUnit {
                        source_column: self
                            .scheme
                            .column_name(source)
                            .unwrap_or_default()
                            .to_string(),
                        guid: row.guid,
                        size,
                    });
                }
                index.extend(std::iter::repeat(local).take(row.sizes[target]));
            }
            indices.push(index);
        }

        Ok(MaskSlices {
            rows,
            columns: column_slices,
            broadcasts: indices,
        })
    }

    /// Compute the next layout without touching the table.
    ///
    /// Returns `None` when nothing is staged and nothing is tombstoned.
    pub fn plan_compaction(&self) -> Option<CompactionPlan> {
        if !self.is_pending() {
            return None;
        }

        let columns = self.scheme.column_count();
        let mut running = vec![0usize; columns];
        let mut shifts: Vec<Vec<ColumnMove>> = vec![Vec::new(); columns];
        let mut rows = Vec::with_capacity(self.len() + self.staged_len());
        let mut sections = Vec::with_capacity(self.sections.len());
        let mut placements = Vec::with_capacity(self.staged_len());
        let mut removed = 0;

        for (class, section) in self.sections.iter().enumerate() {
            let first = rows.len();

            for row in &self.rows[section.clone()] {
                let Some(guid) = row.guid else {
                    removed += 1;
                    continue;
                };
                for (column, &size) in row.sizes.iter().enumerate() {
                    let source = row.starts[column];
                    if size > 0 && source != running[column] {
                        push_shift(&mut shifts[column], source..source + size, running[column]);
                    }
                }
                rows.push(Row {
                    guid: Some(guid),
                    class,
                    sizes: row.sizes.clone(),
                    starts: advance(&mut running, &row.sizes),
                });
            }

            // Fresh rows go straight after the compacted section.
            for staged in &self.staged[class] {
                let starts = advance(&mut running, &staged.sizes);
                placements.push(Placement {
                    guid: staged.guid,
                    starts: starts.clone(),
                    sizes: staged.sizes.clone(),
                });
                rows.push(Row {
                    guid: Some(staged.guid),
                    class,
                    sizes: staged.sizes.clone(),
                    starts,
                });
            }

            sections.push(first..rows.len());
        }

        Some(CompactionPlan {
            moves: shifts.into_iter().map(order_moves).collect(),
            column_ends: running.into_boxed_slice(),
            placements,
            removed,
            rows,
            sections,
        })
    }

    /// Adopt a layout produced by [`Table::plan_compaction`] on this table.
    pub fn apply_compaction(&mut self, plan: CompactionPlan) {
        self.row_of = plan
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| row.guid.map(|guid| (guid, i)))
            .collect();
        self.rows = plan.rows;
        self.sections = plan.sections;
        self.column_ends = plan.column_ends;
        for staged in &mut self.staged {
            staged.clear();
        }
        self.staged_guids.clear();
        self.tombstones = 0;
    }

    /// Plan and apply in one step. Returns `None` on a no-op.
    pub fn compress(&mut self) -> Option<CompactionPlan> {
        let plan = self.plan_compaction()?;
        self.apply_compaction(plan.clone());
        Some(plan)
    }

    pub fn show_sizes(&self) -> String {
        Grid {
            table: self,
            field: Field::Sizes,
        }
        .to_string()
    }

    pub fn show_starts(&self) -> String {
        Grid {
            table: self,
            field: Field::Starts,
        }
        .to_string()
    }

    fn row_index(&self, guid: Guid) -> Result<usize, TableError> {
        self.row_of
            .get(&guid)
            .copied()
            .ok_or(TableError::UnknownGuid { guid })
    }

    /// Range covered in `column` by the given table rows.
    fn column_span(&self, rows: &Range<usize>, column: usize) -> Range<usize> {
        if rows.is_empty() {
            return 0..0;
        }
        let first = &self.rows[rows.start];
        let last = &self.rows[rows.end - 1];
        first.starts[column]..last.starts[column] + last.sizes[column]
    }
}

/// Returns the current offsets and bumps them by `sizes`.
fn advance(running: &mut [usize], sizes: &[usize]) -> Box<[usize]> {
    let starts = running.to_vec().into_boxed_slice();
    for (offset, size) in running.iter_mut().zip(sizes) {
        *offset += size;
    }
    starts
}

/// Appends a shift, merging it into the previous one when both ranges are
/// adjacent and move by the same distance.
fn push_shift(shifts: &mut Vec<ColumnMove>, source: Range<usize>, target: usize) {
    if let Some(last) = shifts.last_mut() {
        if last.source.end == source.start && last.target + last.rows() == target {
            last.source.end = source.end;
            return;
        }
    }
    shifts.push(ColumnMove { source, target });
}

fn order_moves(shifts: Vec<ColumnMove>) -> Vec<ColumnMove> {
    let (mut ordered, mut rightward): (Vec<_>, Vec<_>) =
        shifts.into_iter().partition(ColumnMove::is_leftward);
    rightward.reverse();
    ordered.extend(rightward);
    ordered
}

enum Field {
    Sizes,
    Starts,
}

struct Grid<'a> {
    table: &'a Table,
    field: Field,
}

impl fmt::Display for Grid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = self.table.scheme();
        write!(f, "{:>8}", "guid")?;
        for spec in scheme.specs() {
            write!(f, " {:>8}", spec.name)?;
        }
        writeln!(f)?;
        for row in &self.table.rows {
            match row.guid {
                Some(guid) => write!(f, "{guid:>8}")?,
                None => write!(f, "{:>8}", "-")?,
            }
            let values = match self.field {
                Field::Sizes => &row.sizes,
                Field::Starts => &row.starts,
            };
            for value in values.iter() {
                write!(f, " {value:>8}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sizes:")?;
        f.write_str(&self.show_sizes())?;
        writeln!(f, "starts:")?;
        f.write_str(&self.show_starts())
    }
}
