//! Column declarations and the closed catalogue of entity classes.

use crate::component::{ElementShape, ElementType};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Declared name and row shape of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    pub name: String,
    pub shape: ElementShape,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>, shape: ElementShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    pub fn scalar(name: impl Into<String>, dtype: ElementType) -> Self {
        Self::new(name, ElementShape::Scalar(dtype))
    }

    pub fn vector(name: impl Into<String>, dtype: ElementType, arity: usize) -> Self {
        Self::new(name, ElementShape::Vector(dtype, arity))
    }
}

/// Presence vector over every declared column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassId(Box<[bool]>);

impl ClassId {
    pub fn new(presence: impl Into<Box<[bool]>>) -> Self {
        Self(presence.into())
    }

    /// Build from `0`/`1` flags. Any nonzero value counts as present.
    pub fn from_flags(flags: &[u8]) -> Self {
        Self(flags.iter().map(|&flag| flag != 0).collect())
    }

    /// Presence of every column with a nonzero size.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        Self(sizes.iter().map(|&size| size > 0).collect())
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn contains(&self, column: usize) -> bool {
        self.0.get(column).copied().unwrap_or(false)
    }

    pub fn contains_all(&self, columns: &[usize]) -> bool {
        columns.iter().all(|&column| self.contains(column))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&present| present)
    }

    pub fn presence(&self) -> &[bool] {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, &present) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(if present { "1" } else { "0" })?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemeError {
    #[error("allocation scheme declares no classes")]
    Empty,
    #[error("class {class} has {found} flags but {expected} columns are declared")]
    ClassArity {
        class: ClassId,
        expected: usize,
        found: usize,
    },
    #[error("class {class} is declared more than once")]
    DuplicateClass { class: ClassId },
    #[error("class {class} owns no columns")]
    EmptyClass { class: ClassId },
    #[error("column '{name}' is not present in a contiguous run of classes")]
    NonContiguousColumn { name: String },
    #[error("column '{name}' is declared more than once")]
    DuplicateName { name: String },
    #[error("column names must not be empty")]
    EmptyName,
    #[error("column '{name}' has zero elements per row")]
    ZeroArity { name: String },
}

/// Validated column list plus the ordered class catalogue.
///
/// Declaration order of the classes is the section order in every column.
#[derive(Debug, Clone)]
pub struct AllocationScheme {
    specs: Vec<ComponentSpec>,
    index: HashMap<String, usize>,
    classes: Vec<ClassId>,
}

impl AllocationScheme {
    pub fn new(specs: Vec<ComponentSpec>, classes: Vec<ClassId>) -> Result<Self, SchemeError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(SchemeError::EmptyName);
            }
            if spec.shape.arity() == 0 {
                return Err(SchemeError::ZeroArity {
                    name: spec.name.clone(),
                });
            }
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(SchemeError::DuplicateName {
                    name: spec.name.clone(),
                });
            }
        }

        verify_classes(&specs, &classes)?;

        Ok(Self {
            specs,
            index,
            classes,
        })
    }

    #[inline]
    pub fn specs(&self) -> &[ComponentSpec] {
        &self.specs
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.specs.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.specs.get(column).map(|spec| spec.name.as_str())
    }

    #[inline]
    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    /// Position of `class` in declaration order.
    pub fn class_position(&self, class: &ClassId) -> Option<usize> {
        self.classes.iter().position(|declared| declared == class)
    }

    /// Positions of every class that owns all of `columns`.
    pub fn classes_with_all(&self, columns: &[usize]) -> Vec<usize> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, class)| class.contains_all(columns))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Checks arity, uniqueness, non-emptiness and per-column contiguity.
fn verify_classes(specs: &[ComponentSpec], classes: &[ClassId]) -> Result<(), SchemeError> {
    if classes.is_empty() {
        return Err(SchemeError::Empty);
    }

    let mut seen = HashSet::with_capacity(classes.len());
    for class in classes {
        if class.arity() != specs.len() {
            return Err(SchemeError::ClassArity {
                class: class.clone(),
                expected: specs.len(),
                found: class.arity(),
            });
        }
        if class.is_empty() {
            return Err(SchemeError::EmptyClass {
                class: class.clone(),
            });
        }
        if !seen.insert(class) {
            return Err(SchemeError::DuplicateClass {
                class: class.clone(),
            });
        }
    }

    // A column may switch on and off at most once going down the scheme.
    for (column, spec) in specs.iter().enumerate() {
        let mut runs = 0;
        let mut previous = false;
        for class in classes {
            let present = class.contains(column);
            if present && !previous {
                runs += 1;
            }
            previous = present;
        }
        if runs > 1 {
            return Err(SchemeError::NonContiguousColumn {
                name: spec.name.clone(),
            });
        }
    }

    Ok(())
}
