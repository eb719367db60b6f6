use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Sparse month-indexed series. Months that were never written read back as `T::default()`,
/// so a document only stores the months that actually carry data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Timeline<T> {
    entries: BTreeMap<usize, T>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Clone + Default> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from a dense series, index `i` of the slice becoming month `i`.
    pub fn from_dense(values: &[T]) -> Self {
        Self {
            entries: values.iter().cloned().enumerate().collect(),
        }
    }

    /// Same value for every month in `range`.
    pub fn filled(range: Range<usize>, value: T) -> Self {
        Self {
            entries: range.map(|month| (month, value.clone())).collect(),
        }
    }

    pub fn get(&self, month: usize) -> T {
        self.entries.get(&month).cloned().unwrap_or_default()
    }

    pub fn get_ref(&self, month: usize) -> Option<&T> {
        self.entries.get(&month)
    }

    pub fn get_mut(&mut self, month: usize) -> &mut T {
        self.entries.entry(month).or_default()
    }

    pub fn set(&mut self, month: usize, value: T) {
        self.entries.insert(month, value);
    }

    pub fn set_range(&mut self, range: Range<usize>, value: T) {
        for month in range {
            self.entries.insert(month, value.clone());
        }
    }

    /// Puts back an exact prior state for one month: `None` means the month was never written.
    pub fn restore(&mut self, month: usize, value: Option<T>) {
        match value {
            Some(v) => {
                self.entries.insert(month, v);
            }
            None => {
                self.entries.remove(&month);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries.iter().map(|(month, value)| (*month, value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dense view over `0..horizon`, filling gaps with defaults.
    pub fn to_dense(&self, horizon: usize) -> Vec<T> {
        (0..horizon).map(|month| self.get(month)).collect()
    }
}

impl Timeline<f64> {
    pub fn add(&mut self, month: usize, delta: f64) {
        *self.get_mut(month) += delta;
    }

    pub fn add_range(&mut self, range: Range<usize>, delta: f64) {
        for month in range {
            self.add(month, delta);
        }
    }

    /// True when every stored month inside the horizon is zero.
    pub fn is_all_zero(&self, horizon: usize) -> bool {
        self.entries
            .range(0..horizon)
            .all(|(_, value)| value.abs() < f64::EPSILON)
    }
}
