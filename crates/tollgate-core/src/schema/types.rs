#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub entities: Vec<EntityDefinition>,
}

impl Schema {
    pub fn get_entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDefinition {
    pub name: String,
    pub relations: Vec<RelationDef>,
    pub permissions: Vec<PermissionDef>,
}

/// What a name on an entity type resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    Relation(&'a RelationDef),
    Permission(&'a Expression),
}

impl EntityDefinition {
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_permission(&self, name: &str) -> Option<&PermissionDef> {
        self.permissions.iter().find(|p| p.name == name)
    }

    pub fn reference(&self, name: &str) -> Option<Reference<'_>> {
        if let Some(relation) = self.get_relation(name) {
            return Some(Reference::Relation(relation));
        }
        self.get_permission(name)
            .map(|p| Reference::Permission(&p.expression))
    }

    /// Declared names in evaluation order: relations first, then
    /// permissions, each in declaration order.
    pub fn names(&self, only_permission: bool) -> Vec<&str> {
        let relations = self
            .relations
            .iter()
            .filter(|_| !only_permission)
            .map(|r| r.name.as_str());
        let permissions = self.permissions.iter().map(|p| p.name.as_str());
        relations.chain(permissions).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub subject_types: Vec<SubjectTypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTypeRef {
    pub type_name: String,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDef {
    pub name: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// A relation or permission on the same entity.
    Leaf(String),
    /// `relation.target`: follow `relation` and evaluate `target` on each
    /// entity it points to.
    Hop { relation: String, target: String },
    Union(Vec<Expression>),
    Intersection(Vec<Expression>),
    Exclusion(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::Leaf(name.into())
    }

    pub fn hop(relation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Hop {
            relation: relation.into(),
            target: target.into(),
        }
    }

    pub fn exclusion(base: Expression, excluded: Expression) -> Self {
        Self::Exclusion(Box::new(base), Box::new(excluded))
    }
}
