use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleParseError {
    #[error("expected 'type:id', got '{0}'")]
    InvalidEntity(String),
    #[error("expected 'type:id' or 'type:id#relation', got '{0}'")]
    InvalidSubject(String),
    #[error("expected 'type:id#relation@subject', got '{0}'")]
    InvalidTuple(String),
    #[error("invalid snapshot token '{0}'")]
    InvalidSnapshot(String),
}

fn split_type_id(input: &str) -> Option<(&str, &str)> {
    let (kind, id) = input.split_once(':')?;
    if kind.is_empty() || id.is_empty() || id.contains(':') {
        return None;
    }
    Some((kind, id))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for EntityRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) =
            split_type_id(s.trim()).ok_or_else(|| TupleParseError::InvalidEntity(s.to_string()))?;
        Ok(Self::new(kind, id))
    }
}

/// A tuple subject: either a concrete principal (`user:1`) or a computed
/// userset (`organization:1#admin`) naming everyone who holds `admin` on
/// `organization:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl SubjectRef {
    pub fn direct(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: Some(relation.into()),
        }
    }

    pub fn is_userset(&self) -> bool {
        self.subject_relation.is_some()
    }

    /// The entity this subject lives on, dropping any relation component.
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(&self.subject_type, &self.subject_id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)?;
        if let Some(ref rel) = self.subject_relation {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

impl FromStr for SubjectRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TupleParseError::InvalidSubject(s.to_string());
        let trimmed = s.trim();
        let (entity, relation) = match trimmed.split_once('#') {
            Some((entity, relation)) => {
                if relation.is_empty() || relation.contains('#') {
                    return Err(invalid());
                }
                (entity, Some(relation))
            }
            None => (trimmed, None),
        };
        let (kind, id) = split_type_id(entity).ok_or_else(invalid)?;
        Ok(match relation {
            Some(rel) => Self::userset(kind, id, rel),
            None => Self::direct(kind, id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub entity: EntityRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Tuple {
    pub fn new(entity: EntityRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.entity, self.relation, self.subject)
    }
}

impl FromStr for Tuple {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TupleParseError::InvalidTuple(s.to_string());
        let (left, subject) = s.trim().split_once('@').ok_or_else(invalid)?;
        let (entity, relation) = left.split_once('#').ok_or_else(invalid)?;
        if relation.is_empty() {
            return Err(invalid());
        }
        let entity = entity.parse::<EntityRef>().map_err(|_| invalid())?;
        let subject = subject.parse::<SubjectRef>().map_err(|_| invalid())?;
        Ok(Self::new(entity, relation, subject))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleWrite {
    pub entity: EntityRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl TupleWrite {
    pub fn new(entity: EntityRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            entity,
            relation: relation.into(),
            subject,
        }
    }
}

impl From<TupleWrite> for Tuple {
    fn from(write: TupleWrite) -> Self {
        Self {
            entity: write.entity,
            relation: write.relation,
            subject: write.subject,
        }
    }
}

impl From<Tuple> for TupleWrite {
    fn from(tuple: Tuple) -> Self {
        Self {
            entity: tuple.entity,
            relation: tuple.relation,
            subject: tuple.subject,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<Option<String>>,
}

impl TupleFilter {
    /// Every tuple stored under `entity#relation`.
    pub fn for_relation(entity: &EntityRef, relation: &str) -> Self {
        Self {
            entity_type: Some(entity.entity_type.clone()),
            entity_id: Some(entity.entity_id.clone()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(ref et) = self.entity_type
            && et != &tuple.entity.entity_type
        {
            return false;
        }
        if let Some(ref ei) = self.entity_id
            && ei != &tuple.entity.entity_id
        {
            return false;
        }
        if let Some(ref r) = self.relation
            && r != &tuple.relation
        {
            return false;
        }
        if let Some(ref st) = self.subject_type
            && st != &tuple.subject.subject_type
        {
            return false;
        }
        if let Some(ref si) = self.subject_id
            && si != &tuple.subject.subject_id
        {
            return false;
        }
        if let Some(ref sr) = self.subject_relation
            && sr != &tuple.subject.subject_relation
        {
            return false;
        }
        true
    }
}

/// Point-in-time marker pinning every relationship read of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotToken(u64);

impl SnapshotToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotToken {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TupleParseError::InvalidSnapshot(s.to_string()))
    }
}
