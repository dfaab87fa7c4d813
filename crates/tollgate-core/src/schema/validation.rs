use super::types::{EntityDefinition, Expression, Schema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLimits {
    pub max_entities: usize,
    pub max_relations_per_entity: usize,
    pub max_permissions_per_entity: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_entities: 50,
            max_relations_per_entity: 30,
            max_permissions_per_entity: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("too many entities: {count} exceeds limit of {limit}")]
    TooManyEntities { count: usize, limit: usize },
    #[error("too many relations in entity '{entity}': {count} exceeds limit of {limit}")]
    TooManyRelations {
        entity: String,
        count: usize,
        limit: usize,
    },
    #[error("too many permissions in entity '{entity}': {count} exceeds limit of {limit}")]
    TooManyPermissions {
        entity: String,
        count: usize,
        limit: usize,
    },
    #[error("relation '{entity}#{relation}' allows unknown subject type '{subject_type}'")]
    UnknownSubjectType {
        entity: String,
        relation: String,
        subject_type: String,
    },
    #[error("permission '{entity}#{permission}' references undefined '{reference}'")]
    UndefinedReference {
        entity: String,
        permission: String,
        reference: String,
    },
    #[error(
        "permission '{entity}#{permission}' hops through '{relation}', which is not a relation"
    )]
    HopThroughNonRelation {
        entity: String,
        permission: String,
        relation: String,
    },
}

pub fn validate_schema_limits(
    schema: &Schema,
    limits: &SchemaLimits,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if schema.entities.len() > limits.max_entities {
        errors.push(ValidationError::TooManyEntities {
            count: schema.entities.len(),
            limit: limits.max_entities,
        });
    }

    for entity in &schema.entities {
        if entity.relations.len() > limits.max_relations_per_entity {
            errors.push(ValidationError::TooManyRelations {
                entity: entity.name.clone(),
                count: entity.relations.len(),
                limit: limits.max_relations_per_entity,
            });
        }
        if entity.permissions.len() > limits.max_permissions_per_entity {
            errors.push(ValidationError::TooManyPermissions {
                entity: entity.name.clone(),
                count: entity.permissions.len(),
                limit: limits.max_permissions_per_entity,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks that every name a permission mentions resolves, either on its own
/// entity or, for a hop, on every entity type the hop relation may point to.
pub fn validate_schema(schema: &Schema) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for entity in &schema.entities {
        for relation in &entity.relations {
            for subject_type in &relation.subject_types {
                let target = schema.get_entity(&subject_type.type_name);
                let resolves = match (target, &subject_type.relation) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(target), Some(rel)) => target.reference(rel).is_some(),
                };
                if !resolves {
                    let subject_type = match &subject_type.relation {
                        Some(rel) => format!("{}#{rel}", subject_type.type_name),
                        None => subject_type.type_name.clone(),
                    };
                    errors.push(ValidationError::UnknownSubjectType {
                        entity: entity.name.clone(),
                        relation: relation.name.clone(),
                        subject_type,
                    });
                }
            }
        }

        for permission in &entity.permissions {
            check_expression(
                schema,
                entity,
                &permission.name,
                &permission.expression,
                &mut errors,
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_expression(
    schema: &Schema,
    entity: &EntityDefinition,
    permission: &str,
    expression: &Expression,
    errors: &mut Vec<ValidationError>,
) {
    match expression {
        Expression::Leaf(name) => {
            if entity.reference(name).is_none() {
                errors.push(ValidationError::UndefinedReference {
                    entity: entity.name.clone(),
                    permission: permission.to_string(),
                    reference: name.clone(),
                });
            }
        }
        Expression::Hop { relation, target } => {
            let Some(relation_def) = entity.get_relation(relation) else {
                errors.push(ValidationError::HopThroughNonRelation {
                    entity: entity.name.clone(),
                    permission: permission.to_string(),
                    relation: relation.clone(),
                });
                return;
            };
            for subject_type in &relation_def.subject_types {
                let resolves = schema
                    .get_entity(&subject_type.type_name)
                    .is_some_and(|t| t.reference(target).is_some());
                if !resolves {
                    errors.push(ValidationError::UndefinedReference {
                        entity: entity.name.clone(),
                        permission: permission.to_string(),
                        reference: format!("{relation}.{target} on {}", subject_type.type_name),
                    });
                }
            }
        }
        Expression::Union(children) | Expression::Intersection(children) => {
            for child in children {
                check_expression(schema, entity, permission, child, errors);
            }
        }
        Expression::Exclusion(base, excluded) => {
            check_expression(schema, entity, permission, base, errors);
            check_expression(schema, entity, permission, excluded, errors);
        }
    }
}
