//! Dense, resizable per-attribute columns.
//!
//! A [`Component`] stores one attribute for every entity that owns it. Rows
//! are `arity` elements wide and packed back to back; an entity may own any
//! number of consecutive rows. The backing storage is a typed vector (one
//! [`ColumnData`] variant per element type), so typed slices are always
//! correctly aligned and `bytemuck` can hand out raw bytes for wholesale
//! uploads.

use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

mod sealed {
    pub trait Sealed {}
}

/// Primitive element types a column can hold.
pub trait Element:
    bytemuck::Pod + Default + PartialEq + fmt::Debug + sealed::Sealed
{
    const TYPE: ElementType;

    fn column(data: &ColumnData) -> Option<&[Self]>;
    fn column_mut(data: &mut ColumnData) -> Option<&mut [Self]>;
    fn into_column(values: Vec<Self>) -> ColumnData;
    fn from_view(view: ComponentView<'_>) -> Option<&[Self]>;
}

macro_rules! define_element_types {
    ($($variant:ident $ty:ident),* $(,)?) => {
        /// Element type tag. Serialized as the lowercase Rust type name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum ElementType {
            $($variant),*
        }

        impl ElementType {
            pub const ALL: &'static [ElementType] = &[$(ElementType::$variant),*];

            #[inline]
            pub fn size_bytes(self) -> usize {
                match self {
                    $(ElementType::$variant => std::mem::size_of::<$ty>()),*
                }
            }

            #[inline]
            pub fn name(self) -> &'static str {
                match self {
                    $(ElementType::$variant => stringify!($ty)),*
                }
            }
        }

        /// Owned, typed element storage.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ColumnData {
            $($variant(Vec<$ty>)),*
        }

        /// Borrowed, typed view over part of a column.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum ComponentView<'a> {
            $($variant(&'a [$ty])),*
        }

        impl ColumnData {
            pub fn empty(dtype: ElementType) -> Self {
                match dtype {
                    $(ElementType::$variant => ColumnData::$variant(Vec::new())),*
                }
            }

            #[inline]
            pub fn dtype(&self) -> ElementType {
                match self {
                    $(ColumnData::$variant(_) => ElementType::$variant),*
                }
            }

            /// Number of elements (not rows).
            #[inline]
            pub fn len(&self) -> usize {
                match self {
                    $(ColumnData::$variant(v) => v.len()),*
                }
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            fn resize_zeroed(&mut self, elements: usize) -> Result<(), TryReserveError> {
                match self {
                    $(ColumnData::$variant(v) => {
                        v.try_reserve_exact(elements.saturating_sub(v.len()))?;
                        v.resize(elements, <$ty>::default());
                    })*
                }
                Ok(())
            }

            fn copy_within(&mut self, source: Range<usize>, dest: usize) {
                match self {
                    $(ColumnData::$variant(v) => v.copy_within(source, dest)),*
                }
            }

            /// Copies `other` to `offset`. Returns false on type mismatch.
            fn copy_from(&mut self, offset: usize, other: &ColumnData) -> bool {
                match (self, other) {
                    $((ColumnData::$variant(dst), ColumnData::$variant(src)) => {
                        dst[offset..offset + src.len()].copy_from_slice(src);
                        true
                    })*
                    _ => false,
                }
            }

            fn view(&self, elements: Range<usize>) -> ComponentView<'_> {
                match self {
                    $(ColumnData::$variant(v) => ComponentView::$variant(&v[elements])),*
                }
            }
        }

        impl<'a> ComponentView<'a> {
            #[inline]
            pub fn dtype(&self) -> ElementType {
                match self {
                    $(ComponentView::$variant(_) => ElementType::$variant),*
                }
            }

            /// Number of elements (not rows).
            #[inline]
            pub fn len(&self) -> usize {
                match self {
                    $(ComponentView::$variant(v) => v.len()),*
                }
            }

            #[inline]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn bytes(&self) -> &'a [u8] {
                match *self {
                    $(ComponentView::$variant(v) => bytemuck::cast_slice(v)),*
                }
            }

            #[inline]
            pub fn typed<T: Element>(self) -> Option<&'a [T]> {
                T::from_view(self)
            }
        }

        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;

                #[inline]
                fn column(data: &ColumnData) -> Option<&[Self]> {
                    match data {
                        ColumnData::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }

                #[inline]
                fn column_mut(data: &mut ColumnData) -> Option<&mut [Self]> {
                    match data {
                        ColumnData::$variant(v) => Some(v.as_mut_slice()),
                        _ => None,
                    }
                }

                #[inline]
                fn into_column(values: Vec<Self>) -> ColumnData {
                    ColumnData::$variant(values)
                }

                #[inline]
                fn from_view(view: ComponentView<'_>) -> Option<&[Self]> {
                    match view {
                        ComponentView::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

define_element_types! {
    U8 u8, U16 u16, U32 u32, U64 u64,
    I8 i8, I16 i16, I32 i32, I64 i64,
    F32 f32, F64 f64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<T: Element> From<Vec<T>> for ColumnData {
    fn from(values: Vec<T>) -> Self {
        T::into_column(values)
    }
}

/// Static shape of one row of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementShape {
    Scalar(ElementType),
    Vector(ElementType, usize),
}

impl ElementShape {
    #[inline]
    pub fn dtype(self) -> ElementType {
        match self {
            ElementShape::Scalar(dtype) | ElementShape::Vector(dtype, _) => dtype,
        }
    }

    /// Elements per row.
    #[inline]
    pub fn arity(self) -> usize {
        match self {
            ElementShape::Scalar(_) => 1,
            ElementShape::Vector(_, n) => n,
        }
    }
}

impl fmt::Display for ElementShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementShape::Scalar(dtype) => write!(f, "{dtype}"),
            ElementShape::Vector(dtype, n) => write!(f, "[{dtype}; {n}]"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("rows {start}..{end} are out of bounds for column '{name}' (limit {limit})")]
    OutOfBounds {
        name: String,
        start: usize,
        end: usize,
        limit: usize,
    },
    #[error("column '{name}' expects {expected} elements but received {found}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("column '{name}' stores {expected} but received {found}")]
    TypeMismatch {
        name: String,
        expected: ElementType,
        found: ElementType,
    },
    #[error("column '{name}' cannot grow to {requested} rows")]
    CapacityExhausted { name: String, requested: usize },
}

/// One named attribute column.
///
/// `len` counts valid rows, `capacity` counts backed rows. Capacity is zero
/// until the first growth and a power of two afterwards.
#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    shape: ElementShape,
    data: ColumnData,
    len: usize,
    capacity: usize,
}

impl Component {
    pub fn new(name: impl Into<String>, shape: ElementShape) -> Self {
        Self {
            name: name.into(),
            shape,
            data: ColumnData::empty(shape.dtype()),
            len: 0,
            capacity: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn shape(&self) -> ElementShape {
        self.shape
    }

    #[inline]
    pub fn dtype(&self) -> ElementType {
        self.shape.dtype()
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.shape.arity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow to the next power of two >= `rows`, preserving contents.
    /// Never shrinks.
    pub fn assert_capacity(&mut self, rows: usize) -> Result<(), ComponentError> {
        if rows <= self.capacity {
            return Ok(());
        }
        let exhausted = || ComponentError::CapacityExhausted {
            name: self.name.clone(),
            requested: rows,
        };
        let capacity = rows.checked_next_power_of_two().ok_or_else(exhausted)?;
        let elements = capacity.checked_mul(self.arity()).ok_or_else(exhausted)?;
        self.data.resize_zeroed(elements).map_err(|_| exhausted())?;
        self.capacity = capacity;
        Ok(())
    }

    /// Set the valid row count. Must not exceed capacity.
    pub fn set_len(&mut self, rows: usize) -> Result<(), ComponentError> {
        if rows > self.capacity {
            return Err(self.out_of_bounds(0..rows, self.capacity));
        }
        self.len = rows;
        Ok(())
    }

    /// Typed rows within the valid region.
    pub fn read<T: Element>(&self, rows: Range<usize>) -> Result<&[T], ComponentError> {
        self.check_type(T::TYPE)?;
        let elements = self.elements(rows, self.len)?;
        let data = T::column(&self.data).ok_or_else(|| self.type_mismatch(T::TYPE))?;
        Ok(&data[elements])
    }

    /// Mutable typed rows within the valid region.
    pub fn slice_mut<T: Element>(&mut self, rows: Range<usize>) -> Result<&mut [T], ComponentError> {
        self.check_type(T::TYPE)?;
        let elements = self.elements(rows, self.len)?;
        let found = T::TYPE;
        let expected = self.dtype();
        let name = &self.name;
        let data = T::column_mut(&mut self.data).ok_or_else(|| ComponentError::TypeMismatch {
            name: name.clone(),
            expected,
            found,
        })?;
        Ok(&mut data[elements])
    }

    /// Write typed rows anywhere inside capacity. `values` must fill the
    /// range exactly.
    pub fn write<T: Element>(&mut self, rows: Range<usize>, values: &[T]) -> Result<(), ComponentError> {
        self.check_type(T::TYPE)?;
        let elements = self.elements(rows, self.capacity)?;
        self.check_shape(elements.len(), values.len())?;
        if let Some(data) = T::column_mut(&mut self.data) {
            data[elements].copy_from_slice(values);
        }
        Ok(())
    }

    /// Untyped variant of [`Component::write`] for staged payloads.
    pub fn write_data(&mut self, rows: Range<usize>, values: &ColumnData) -> Result<(), ComponentError> {
        self.check_type(values.dtype())?;
        let elements = self.elements(rows, self.capacity)?;
        self.check_shape(elements.len(), values.len())?;
        if !self.data.copy_from(elements.start, values) {
            return Err(self.type_mismatch(values.dtype()));
        }
        Ok(())
    }

    /// Copy `source` rows so they start at `target`. Ranges may overlap.
    pub fn relocate(&mut self, source: Range<usize>, target: usize) -> Result<(), ComponentError> {
        let rows = source.len();
        let elements = self.elements(source, self.capacity)?;
        let dest = self.elements(target..target + rows, self.capacity)?;
        self.data.copy_within(elements, dest.start);
        Ok(())
    }

    /// Untyped view over the valid region.
    pub fn view(&self) -> ComponentView<'_> {
        self.data.view(0..self.len * self.arity())
    }

    /// Untyped view over a row range of the valid region.
    pub fn view_rows(&self, rows: Range<usize>) -> Result<ComponentView<'_>, ComponentError> {
        let elements = self.elements(rows, self.len)?;
        Ok(self.data.view(elements))
    }

    /// Raw bytes of the valid region.
    pub fn bytes(&self) -> &[u8] {
        self.view().bytes()
    }

    fn elements(&self, rows: Range<usize>, limit: usize) -> Result<Range<usize>, ComponentError> {
        if rows.start > rows.end || rows.end > limit {
            return Err(self.out_of_bounds(rows, limit));
        }
        let arity = self.arity();
        Ok(rows.start * arity..rows.end * arity)
    }

    fn check_type(&self, found: ElementType) -> Result<(), ComponentError> {
        if found == self.dtype() {
            Ok(())
        } else {
            Err(self.type_mismatch(found))
        }
    }

    fn check_shape(&self, expected: usize, found: usize) -> Result<(), ComponentError> {
        if expected == found {
            Ok(())
        } else {
            Err(ComponentError::ShapeMismatch {
                name: self.name.clone(),
                expected,
                found,
            })
        }
    }

    fn type_mismatch(&self, found: ElementType) -> ComponentError {
        ComponentError::TypeMismatch {
            name: self.name.clone(),
            expected: self.dtype(),
            found,
        }
    }

    fn out_of_bounds(&self, rows: Range<usize>, limit: usize) -> ComponentError {
        ComponentError::OutOfBounds {
            name: self.name.clone(),
            start: rows.start,
            end: rows.end,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec2(name: &str) -> Component {
        Component::new(name, ElementShape::Vector(ElementType::F32, 2))
    }

    #[test]
    fn test_capacity_starts_at_zero_and_rounds_up() {
        let mut col = Component::new("mass", ElementShape::Scalar(ElementType::F64));
        assert_eq!(col.capacity(), 0);

        col.assert_capacity(5).unwrap();
        assert_eq!(col.capacity(), 8);

        col.assert_capacity(8).unwrap();
        assert_eq!(col.capacity(), 8);

        col.assert_capacity(9).unwrap();
        assert_eq!(col.capacity(), 16);

        // Never shrinks
        col.assert_capacity(1).unwrap();
        assert_eq!(col.capacity(), 16);
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut col = vec2("position");
        col.assert_capacity(2).unwrap();
        col.write(0..2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        col.set_len(2).unwrap();

        col.assert_capacity(3).unwrap();
        assert_eq!(col.capacity(), 4);
        assert_eq!(col.read::<f32>(0..2).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_huge_growth_is_an_error() {
        let mut col = vec2("position");
        let err = col.assert_capacity(usize::MAX).unwrap_err();
        assert!(matches!(err, ComponentError::CapacityExhausted { .. }));
        assert_eq!(col.capacity(), 0);
    }

    #[test]
    fn test_write_rejects_mismatches() {
        let mut col = vec2("position");
        col.assert_capacity(2).unwrap();

        let err = col.write(0..1, &[1.0f32]).unwrap_err();
        assert_eq!(
            err,
            ComponentError::ShapeMismatch {
                name: "position".into(),
                expected: 2,
                found: 1,
            }
        );

        let err = col.write(0..1, &[1u8, 2]).unwrap_err();
        assert!(matches!(err, ComponentError::TypeMismatch { found: ElementType::U8, .. }));

        let err = col.write(1..3, &[0.0f32; 4]).unwrap_err();
        assert!(matches!(err, ComponentError::OutOfBounds { limit: 2, .. }));
    }

    #[test]
    fn test_read_is_limited_to_valid_rows() {
        let mut col = Component::new("id", ElementShape::Scalar(ElementType::U32));
        col.assert_capacity(4).unwrap();
        col.write(0..3, &[7u32, 8, 9]).unwrap();
        col.set_len(2).unwrap();

        assert_eq!(col.read::<u32>(0..2).unwrap(), &[7, 8]);
        assert!(col.read::<u32>(0..3).is_err());
        assert!(col.set_len(5).is_err());
    }

    #[test]
    fn test_relocate_handles_overlap_both_ways() {
        let mut col = Component::new("id", ElementShape::Scalar(ElementType::I32));
        col.assert_capacity(8).unwrap();
        col.write(0..5, &[0, 1, 2, 3, 4]).unwrap();
        col.set_len(6).unwrap();

        // Left, overlapping
        col.relocate(2..5, 1).unwrap();
        assert_eq!(col.read::<i32>(0..4).unwrap(), &[0, 2, 3, 4]);

        // Right, overlapping
        col.relocate(0..4, 2).unwrap();
        assert_eq!(col.read::<i32>(2..6).unwrap(), &[0, 2, 3, 4]);

        assert!(col.relocate(6..8, 7).is_err());
    }

    #[test]
    fn test_untyped_views() {
        let mut col = Component::new("color", ElementShape::Vector(ElementType::U8, 4));
        col.assert_capacity(1).unwrap();
        col.write_data(0..1, &ColumnData::from(vec![1u8, 2, 3, 4])).unwrap();
        col.set_len(1).unwrap();

        assert_eq!(col.bytes(), &[1, 2, 3, 4]);
        assert_eq!(col.view().dtype(), ElementType::U8);
        assert_eq!(col.view().typed::<u8>(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(col.view().typed::<f32>(), None);

        let err = col.write_data(0..1, &ColumnData::from(vec![1.0f64; 4])).unwrap_err();
        assert!(matches!(err, ComponentError::TypeMismatch { .. }));
    }

    #[test]
    fn test_slice_mut_edits_in_place() {
        let mut col = vec2("velocity");
        col.assert_capacity(1).unwrap();
        col.set_len(1).unwrap();
        col.slice_mut::<f32>(0..1).unwrap().copy_from_slice(&[0.5, -0.5]);
        assert_eq!(col.read::<f32>(0..1).unwrap(), &[0.5, -0.5]);
    }

    #[test]
    fn test_element_type_names_roundtrip_serde() {
        for &dtype in ElementType::ALL {
            let json = serde_json::to_string(&dtype).unwrap();
            assert_eq!(json, format!("\"{}\"", dtype.name()));
        }
        assert_eq!(ElementShape::Vector(ElementType::F32, 3).to_string(), "[f32; 3]");
    }
}
