use std::collections::HashSet;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::types::{
    EntityDefinition, Expression, PermissionDef, RelationDef, Schema, SubjectTypeRef,
};

#[derive(Parser)]
#[grammar = "schema/grammar.pest"]
struct SchemaParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    #[error("duplicate relation '{relation}' in entity '{entity}'")]
    DuplicateRelation { entity: String, relation: String },
    #[error("duplicate permission '{permission}' in entity '{entity}'")]
    DuplicatePermission { entity: String, permission: String },
    #[error("'{name}' in entity '{entity}' is declared as both a relation and a permission")]
    NameConflict { entity: String, name: String },
}

/// Compiles schema text such as
///
/// ```text
/// entity doc {
///     relation owner @user @organization#admin
///     permission share = update and (member not parent.update)
/// }
/// ```
///
/// `or` binds loosest; `and` and `not` share a tighter level and associate
/// to the left.
pub fn parse_schema(input: &str) -> Result<Schema, ParseError> {
    let pairs =
        SchemaParser::parse(Rule::schema, input).map_err(|e| ParseError::Syntax(e.to_string()))?;

    let mut entities = Vec::new();
    let mut seen = HashSet::new();

    for pair in pairs {
        if pair.as_rule() != Rule::schema {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::definition {
                let entity = parse_definition(inner)?;
                if !seen.insert(entity.name.clone()) {
                    return Err(ParseError::DuplicateEntity(entity.name));
                }
                entities.push(entity);
            }
        }
    }

    Ok(Schema { entities })
}

fn unexpected_rule(rule: Rule) -> ParseError {
    ParseError::Syntax(format!("unexpected rule: {rule:?}"))
}

fn missing_token(context: &str) -> ParseError {
    ParseError::Syntax(format!("missing token: {context}"))
}

fn parse_definition(pair: Pair<'_, Rule>) -> Result<EntityDefinition, ParseError> {
    let mut name: Option<String> = None;
    let mut relations: Vec<RelationDef> = Vec::new();
    let mut permissions: Vec<PermissionDef> = Vec::new();

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::identifier if name.is_none() => name = Some(item.as_str().to_string()),
            Rule::relation_def => {
                let entity = name.clone().ok_or_else(|| missing_token("entity name"))?;
                let rel = parse_relation_def(item)?;
                if relations.iter().any(|r| r.name == rel.name) {
                    return Err(ParseError::DuplicateRelation {
                        entity,
                        relation: rel.name,
                    });
                }
                relations.push(rel);
            }
            Rule::permission_def => {
                let entity = name.clone().ok_or_else(|| missing_token("entity name"))?;
                let perm = parse_permission_def(item)?;
                if permissions.iter().any(|p| p.name == perm.name) {
                    return Err(ParseError::DuplicatePermission {
                        entity,
                        permission: perm.name,
                    });
                }
                permissions.push(perm);
            }
            Rule::entity_kw => {}
            other => return Err(unexpected_rule(other)),
        }
    }

    let name = name.ok_or_else(|| missing_token("entity name"))?;

    if let Some(clash) = permissions
        .iter()
        .find(|p| relations.iter().any(|r| r.name == p.name))
    {
        return Err(ParseError::NameConflict {
            entity: name,
            name: clash.name.clone(),
        });
    }

    Ok(EntityDefinition {
        name,
        relations,
        permissions,
    })
}

fn parse_relation_def(pair: Pair<'_, Rule>) -> Result<RelationDef, ParseError> {
    let mut name = None;
    let mut subject_types = Vec::new();

    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::relation_kw => {}
            Rule::identifier => name = Some(item.as_str().to_string()),
            Rule::subject_type => subject_types.push(parse_subject_type(item)?),
            other => return Err(unexpected_rule(other)),
        }
    }

    Ok(RelationDef {
        name: name.ok_or_else(|| missing_token("relation name"))?,
        subject_types,
    })
}

fn parse_subject_type(pair: Pair<'_, Rule>) -> Result<SubjectTypeRef, ParseError> {
    let mut inner = pair.into_inner();
    let type_name = inner
        .next()
        .ok_or_else(|| missing_token("subject type name"))?
        .as_str()
        .to_string();
    let relation = inner.next().map(|p| p.as_str().to_string());

    Ok(SubjectTypeRef {
        type_name,
        relation,
    })
}

fn parse_permission_def(pair: Pair<'_, Rule>) -> Result<PermissionDef, ParseError> {
    let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::permission_kw);
    let name = inner
        .next()
        .ok_or_else(|| missing_token("permission name"))?
        .as_str()
        .to_string();
    let expr = inner
        .next()
        .ok_or_else(|| missing_token("permission expression"))?;

    Ok(PermissionDef {
        name,
        expression: parse_expr(expr)?,
    })
}

fn parse_expr(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    let mut operands = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::and_expr)
        .map(parse_and_expr)
        .collect::<Result<Vec<_>, _>>()?;

    match operands.len() {
        0 => Err(missing_token("expression operand")),
        1 => operands.pop().ok_or_else(|| missing_token("expression operand")),
        _ => Ok(Expression::Union(operands)),
    }
}

fn parse_and_expr(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    let mut inner = pair.into_inner();
    let mut acc = parse_term(inner.next().ok_or_else(|| missing_token("term"))?)?;
    // Only intersections built by this chain may absorb further operands.
    let mut chained = false;

    while let Some(op) = inner.next() {
        let rhs = parse_term(
            inner
                .next()
                .ok_or_else(|| missing_token("term after operator"))?,
        )?;
        match op.as_rule() {
            Rule::and_op => {
                acc = match acc {
                    Expression::Intersection(mut children) if chained => {
                        children.push(rhs);
                        Expression::Intersection(children)
                    }
                    other => Expression::Intersection(vec![other, rhs]),
                };
                chained = true;
            }
            Rule::not_op => {
                acc = Expression::exclusion(acc, rhs);
                chained = false;
            }
            other => return Err(unexpected_rule(other)),
        }
    }

    Ok(acc)
}

fn parse_term(pair: Pair<'_, Rule>) -> Result<Expression, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing_token("term content"))?;
    match inner.as_rule() {
        Rule::expr => parse_expr(inner),
        Rule::hop => {
            let mut parts = inner.into_inner();
            let relation = parts
                .next()
                .ok_or_else(|| missing_token("hop relation"))?
                .as_str();
            let target = parts
                .next()
                .ok_or_else(|| missing_token("hop target"))?
                .as_str();
            Ok(Expression::hop(relation, target))
        }
        Rule::identifier => Ok(Expression::leaf(inner.as_str())),
        other => Err(unexpected_rule(other)),
    }
}
