use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Store-assigned identity. Zero means "not yet persisted".
pub type EntityId = i64;

/// Default timestamp for entities that have not been stamped by a repository
fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(Utc::now)
}

/// Opaque row version used for optimistic concurrency.
///
/// The store replaces the token on every successful write; a save carrying a
/// token that no longer matches the stored row is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionToken(Vec<u8>);

impl VersionToken {
    /// Token derived from a monotonically increasing store counter
    pub fn from_counter(counter: u64) -> Self {
        Self(counter.to_be_bytes().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        hex::decode(value.trim()).ok().map(Self)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for VersionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VersionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid version token '{}'", raw)))
    }
}

/// Identity, audit timestamps and version token shared by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    #[serde(default = "default_timestamp")]
    pub created: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub version: VersionToken,
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self {
            id: 0,
            created: default_timestamp(),
            modified: default_timestamp(),
            version: VersionToken::default(),
        }
    }
}

impl EntityMeta {
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Declared shape of an entity member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Scalar,
    /// Single reference to another entity type (by type name)
    Reference(&'static str),
    /// Collection of references to another entity type (by type name)
    Collection(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub name: &'static str,
    pub kind: MemberKind,
}

impl Member {
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Scalar,
        }
    }

    pub const fn reference(name: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Reference(target),
        }
    }

    pub const fn collection(name: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Collection(target),
        }
    }
}

/// A store-level constraint violation reported by an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn on(property: &str, message: impl Into<String>) -> Self {
        Self {
            property: Some(property.to_string()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            property: None,
            message: message.into(),
        }
    }
}

/// A persisted domain object with identity and a version token.
///
/// `members()` declares every member so relation registrations can be
/// checked against the entity's real shape at startup.
pub trait Entity: Clone + Default + fmt::Debug + Send + Sync + 'static {
    /// Human-readable type name, also used in user-facing messages
    const TYPE_NAME: &'static str;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn members() -> &'static [Member];

    /// Constraint checks run by the store before a write is accepted
    fn validate(&self) -> Vec<Violation> {
        Vec::new()
    }

    /// Label used when the entity is named in notifications
    fn label(&self) -> String {
        self.id().to_string()
    }

    fn id(&self) -> EntityId {
        self.meta().id
    }

    fn version(&self) -> &VersionToken {
        &self.meta().version
    }

    /// A minimally populated instance carrying only an id
    fn stub(id: EntityId) -> Self {
        let mut stub = Self::default();
        stub.meta_mut().id = id;
        stub
    }

    fn member(name: &str) -> Option<&'static Member> {
        Self::members().iter().find(|member| member.name == name)
    }

    /// Reduces every relation to an id-only reference. Stored rows keep
    /// relations in this form; entities that leave it a no-op store snapshots.
    fn detach_relations(&mut self) {}

    /// Replaces id-only references with the stored rows they point at
    fn hydrate_relations<S: RowSource>(&mut self, _rows: &S) {}
}

/// Read access to stored rows while relations are hydrated
pub trait RowSource {
    fn row<E: Entity>(&self, id: EntityId) -> Option<E>;
}

pub fn detach_reference<E: Entity>(reference: &mut E) {
    *reference = E::stub(reference.id());
}

/// Swaps `reference` for the stored row with the same id. A dangling id stays
/// an id-only reference.
pub fn hydrate_reference<E: Entity, S: RowSource>(reference: &mut E, rows: &S) {
    match rows.row::<E>(reference.id()) {
        Some(stored) => *reference = stored,
        None => log::debug!("{} {} has no stored row to hydrate from", E::TYPE_NAME, reference.id()),
    }
}
