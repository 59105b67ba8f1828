use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::model::{EntityId, EntityViewModel};

/// One renderable pick-list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRow {
    pub id: EntityId,
    pub label: String,
    pub selected: bool,
}

/// Drops repeated ids, first occurrence wins. Unsaved options have no id to
/// compare and are all kept.
fn distinct_options<V: EntityViewModel>(options: Vec<V>) -> Vec<V> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter(|option| option.id().map_or(true, |id| seen.insert(id)))
        .collect()
}

fn rows<V, F>(options: &[V], is_selected: impl Fn(EntityId) -> bool, label: F) -> Vec<OptionRow>
where
    V: EntityViewModel,
    F: Fn(&V) -> String,
{
    options
        .iter()
        .filter_map(|option| match option.id() {
            Some(id) => Some(OptionRow {
                id,
                label: label(option),
                selected: is_selected(id),
            }),
            None => {
                log::debug!("Option '{}' has no id and cannot be rendered as a row", label(option));
                None
            }
        })
        .collect()
}

/// Single-select relation projection: the current selection plus the
/// candidates eligible for selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice<V> {
    #[serde(default)]
    selection: Option<Box<V>>,
    #[serde(default)]
    options: Vec<V>,
}

impl<V> Default for Choice<V> {
    fn default() -> Self {
        Self {
            selection: None,
            options: Vec::new(),
        }
    }
}

impl<V: EntityViewModel> Choice<V> {
    /// Duplicate options (by id) are dropped, first occurrence wins
    pub fn new(selection: Option<V>, options: Vec<V>) -> Self {
        Self {
            selection: selection.map(Box::new),
            options: distinct_options(options),
        }
    }

    pub fn selected(selection: V) -> Self {
        Self::new(Some(selection), Vec::new())
    }

    pub fn selection(&self) -> Option<&V> {
        self.selection.as_deref()
    }

    pub fn options(&self) -> &[V] {
        &self.options
    }

    pub fn selected_id(&self) -> Option<EntityId> {
        self.selection().and_then(EntityViewModel::id)
    }

    pub fn option_rows(&self, label: impl Fn(&V) -> String) -> Vec<OptionRow> {
        let selected = self.selected_id();
        rows(&self.options, |id| selected == Some(id), label)
    }
}

/// Multi-select relation projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choices<V> {
    #[serde(default)]
    selections: Vec<V>,
    #[serde(default)]
    options: Vec<V>,
}

impl<V> Default for Choices<V> {
    fn default() -> Self {
        Self {
            selections: Vec::new(),
            options: Vec::new(),
        }
    }
}

impl<V: EntityViewModel> Choices<V> {
    pub fn new(selections: Vec<V>, options: Vec<V>) -> Self {
        Self {
            selections,
            options: distinct_options(options),
        }
    }

    pub fn selected(selections: Vec<V>) -> Self {
        Self::new(selections, Vec::new())
    }

    pub fn selections(&self) -> &[V] {
        &self.selections
    }

    pub fn options(&self) -> &[V] {
        &self.options
    }

    pub fn selected_ids(&self) -> Vec<EntityId> {
        self.selections.iter().filter_map(EntityViewModel::id).collect()
    }

    pub fn option_rows(&self, label: impl Fn(&V) -> String) -> Vec<OptionRow> {
        let selected = self.selected_ids();
        rows(&self.options, |id| selected.contains(&id), label)
    }
}
