//! Per-entity access by guid.
//!
//! Accessors hold `(allocator, guid)` and look the entity's rows up on every
//! call, so they stay correct for as long as the borrow allows.

use crate::allocator::{AllocError, Allocator};
use crate::component::Element;
use crate::scheme::ClassId;
use crate::table::Guid;

/// Read access to one committed entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    allocator: &'a Allocator,
    guid: Guid,
}

impl<'a> EntityRef<'a> {
    pub(crate) fn new(allocator: &'a Allocator, guid: Guid) -> Self {
        Self { allocator, guid }
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn class(&self) -> Option<&'a ClassId> {
        self.allocator.table().class_of(self.guid)
    }

    /// Whether the entity owns rows in `name`.
    pub fn has(&self, name: &str) -> bool {
        self.get_rows(name).map(|rows| !rows.is_empty()).unwrap_or(false)
    }

    /// The entity's rows in `name`, flattened.
    pub fn get<T: Element>(&self, name: &str) -> Result<&'a [T], AllocError> {
        let column = self.allocator.column_index(name)?;
        let rows = self.allocator.table().slice_from_guid(self.guid, column)?;
        Ok(self.allocator.component_at(column).read::<T>(rows)?)
    }

    fn get_rows(&self, name: &str) -> Result<std::ops::Range<usize>, AllocError> {
        let column = self.allocator.column_index(name)?;
        Ok(self.allocator.table().slice_from_guid(self.guid, column)?)
    }
}

/// Read-write access to one committed entity.
#[derive(Debug)]
pub struct EntityMut<'a> {
    allocator: &'a mut Allocator,
    guid: Guid,
}

impl<'a> EntityMut<'a> {
    pub(crate) fn new(allocator: &'a mut Allocator, guid: Guid) -> Self {
        Self { allocator, guid }
    }

    #[inline]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn get<T: Element>(&self, name: &str) -> Result<&[T], AllocError> {
        EntityRef::new(&*self.allocator, self.guid).get(name)
    }

    /// Overwrite the entity's rows in `name`. `values` must cover exactly the
    /// rows it already owns.
    pub fn set<T: Element>(&mut self, name: &str, values: &[T]) -> Result<(), AllocError> {
        let column = self.allocator.column_index(name)?;
        let rows = self.allocator.table().slice_from_guid(self.guid, column)?;
        self.allocator.component_at_mut(column).write(rows, values)?;
        Ok(())
    }
}
