use std::collections::HashMap;

use crate::model::{html_escape, Choice, Choices, EntityId, EntityViewModel, ModelState, VersionToken};

/// Suffix under which selected relation ids are posted
pub const ID_SUFFIX: &str = "Id";

/// Key the version token of the edited entity is posted under
pub const VERSION_KEY: &str = "Timestamp";

/// Posted form values. Repeated keys are joined with `,` as the transport
/// does for multi-selects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostedValues {
    values: HashMap<String, String>,
}

impl PostedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut posted = Self::new();
        for (key, value) in pairs {
            posted.append(key, value);
        }
        posted
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        self.values
            .entry(key.into())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert_with(|| value.clone());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A view model that can be bound from posted values
pub trait FormModel: Sized {
    fn bind(binder: &FormBinder<'_>, state: &mut ModelState) -> Self;
}

fn invalid_value(raw: &str, field: &str) -> String {
    format!("The value '{}' is not valid for {}.", html_escape(raw), field)
}

/// Reads relation selections and scalars out of [`PostedValues`].
///
/// Never touches a repository: selections come back as bare view models that
/// carry only an id, and options stay empty until a full mapping pass.
#[derive(Debug, Clone)]
pub struct FormBinder<'a> {
    values: &'a PostedValues,
    prefix: String,
}

impl<'a> FormBinder<'a> {
    pub fn new(values: &'a PostedValues) -> Self {
        Self {
            values,
            prefix: String::new(),
        }
    }

    /// A binder for the model nested under `name`
    pub fn scoped(&self, name: &str) -> FormBinder<'a> {
        FormBinder {
            values: self.values,
            prefix: self.key(name),
        }
    }

    /// Full posted key of `name` under this binder's prefix
    pub fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    fn raw(&self, name: &str) -> Option<&'a str> {
        let values: &'a PostedValues = self.values;
        values.get(&self.key(name))
    }

    fn selected_id(&self, member: &str, state: &mut ModelState) -> Option<EntityId> {
        let raw = self.raw(&format!("{}.{}", member, ID_SUFFIX))?.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<EntityId>() {
            Ok(id) => Some(id),
            Err(_) => {
                log::debug!("Rejected posted id '{}' for {}", raw, self.key(member));
                state.add_error(self.key(member), invalid_value(raw, member));
                None
            }
        }
    }

    /// Single selection posted under `<member>.Id`
    pub fn bind_choice<V: EntityViewModel>(&self, member: &str, state: &mut ModelState) -> Choice<V> {
        match self.selected_id(member, state) {
            Some(id) => Choice::selected(V::with_id(id)),
            None => Choice::default(),
        }
    }

    /// Comma-joined selections posted under `<member>.Id`, kept in posted order.
    /// A value that is not an id is reported and skipped; its siblings still bind.
    pub fn bind_choices<V: EntityViewModel>(&self, member: &str, state: &mut ModelState) -> Choices<V> {
        let Some(raw) = self.raw(&format!("{}.{}", member, ID_SUFFIX)) else {
            return Choices::default();
        };

        let mut selections = Vec::new();
        for value in raw.split(',').map(str::trim).filter(|value| !value.is_empty()) {
            match value.parse::<EntityId>() {
                Ok(id) => selections.push(V::with_id(id)),
                Err(_) => state.add_error(self.key(member), invalid_value(value, member)),
            }
        }
        Choices::selected(selections)
    }

    /// Plain nested relation reference posted under `<member>.Id`
    pub fn bind_reference<V: EntityViewModel>(&self, member: &str, state: &mut ModelState) -> Option<V> {
        self.selected_id(member, state).map(V::with_id)
    }

    /// Identity of the edited model itself, posted under `Id`
    pub fn bind_identity(&self, state: &mut ModelState) -> Option<EntityId> {
        let raw = self.raw(ID_SUFFIX)?.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<EntityId>() {
            Ok(id) => Some(id),
            Err(_) => {
                state.add_error(self.key(ID_SUFFIX), invalid_value(raw, ID_SUFFIX));
                None
            }
        }
    }

    pub fn bind_version(&self, state: &mut ModelState) -> Option<VersionToken> {
        let raw = self.raw(VERSION_KEY)?.trim();
        if raw.is_empty() {
            return None;
        }
        let version = VersionToken::from_hex(raw);
        if version.is_none() {
            state.add_error(self.key(VERSION_KEY), invalid_value(raw, VERSION_KEY));
        }
        version
    }

    pub fn text(&self, name: &str) -> String {
        self.raw(name).unwrap_or_default().to_string()
    }

    /// Blank values bind as absent
    pub fn optional_text(&self, name: &str) -> Option<String> {
        self.raw(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn bind_model<M: FormModel>(&self, state: &mut ModelState) -> M {
        M::bind(self, state)
    }
}
