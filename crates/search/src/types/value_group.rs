//! Two-level AND-of-OR value groups.

use serde::{Deserialize, Serialize};

/// A disjunction of values. Any one value matching satisfies the group.
pub type OrGroup<T> = Vec<T>;

/// A conjunction of [`OrGroup`]s.
///
/// Every OR-group must be satisfied for a row to match. An empty OR-group can
/// never be satisfied, which makes the whole group unsatisfiable; an empty
/// AND-list places no constraint at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueGroup<T>(Vec<OrGroup<T>>);

impl<T> Default for ValueGroup<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> ValueGroup<T> {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a group holding one OR-group with a single value.
    pub fn single(value: T) -> Self {
        Self(vec![vec![value]])
    }

    /// Creates a group holding one OR-group.
    pub fn any_of(values: impl IntoIterator<Item = T>) -> Self {
        Self(vec![values.into_iter().collect()])
    }

    /// Conjoins another OR-group.
    pub fn and(mut self, or_group: impl IntoIterator<Item = T>) -> Self {
        self.push_and(or_group.into_iter().collect());
        self
    }

    /// Conjoins another OR-group in place.
    pub fn push_and(&mut self, or_group: OrGroup<T>) {
        self.0.push(or_group);
    }

    /// Appends every OR-group of `other` to this AND-list.
    pub fn extend(&mut self, other: ValueGroup<T>) {
        self.0.extend(other.0);
    }

    /// Returns the OR-groups in insertion order.
    pub fn or_groups(&self) -> &[OrGroup<T>] {
        &self.0
    }

    /// Returns true if some OR-group is empty.
    pub fn is_unsatisfiable(&self) -> bool {
        self.0.iter().any(|g| g.is_empty())
    }

    /// Returns true if the group places no constraint.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of OR-groups.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<T> From<Vec<OrGroup<T>>> for ValueGroup<T> {
    fn from(groups: Vec<OrGroup<T>>) -> Self {
        Self(groups)
    }
}
