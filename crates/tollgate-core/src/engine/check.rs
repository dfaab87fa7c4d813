use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};

use futures::{Stream, StreamExt};
use futures::stream;

use crate::schema::types::{EntityDefinition, Expression, Reference};
use crate::tuple::{EntityRef, SubjectRef, Tuple, TupleFilter};

use super::{
    CheckDispatcher, CheckError, CheckFuture, CheckRequest, CheckResult, EngineConfig,
    InvocationContext, RelationshipReader, SchemaReader, load_schema,
};

/// Answers membership questions by walking permission expressions against
/// the relationship graph.
///
/// Every nested check (a leaf naming another permission, a hop, a userset
/// subject) goes through the dispatcher handed to [`set_dispatcher`]. Until
/// one is set, or once it has been dropped, nested checks call straight
/// back into this engine.
///
/// [`set_dispatcher`]: CheckEngine::set_dispatcher
pub struct CheckEngine<R, S> {
    reader: Arc<R>,
    schemas: Arc<S>,
    config: EngineConfig,
    dispatcher: OnceLock<Weak<dyn CheckDispatcher>>,
}

impl<R: RelationshipReader, S: SchemaReader> CheckEngine<R, S> {
    pub fn new(reader: Arc<R>, schemas: Arc<S>, config: EngineConfig) -> Self {
        Self {
            reader,
            schemas,
            config,
            dispatcher: OnceLock::new(),
        }
    }

    /// Routes nested checks through `dispatcher`. Only the first call takes
    /// effect; returns false if a dispatcher was already wired.
    pub fn set_dispatcher(&self, dispatcher: Weak<dyn CheckDispatcher>) -> bool {
        self.dispatcher.set(dispatcher).is_ok()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn check(
        &self,
        ctx: &InvocationContext,
        request: &CheckRequest,
    ) -> Result<CheckResult, CheckError> {
        ctx.run(self.evaluate_request(ctx, request)).await
    }

    async fn evaluate_request(
        &self,
        ctx: &InvocationContext,
        request: &CheckRequest,
    ) -> Result<CheckResult, CheckError> {
        if ctx.depth() == 0 {
            return Err(CheckError::DepthExceeded);
        }

        let schema = load_schema(self.schemas.as_ref(), ctx).await?;
        let entity_def = schema
            .get_entity(&request.entity.entity_type)
            .ok_or_else(|| CheckError::UndefinedEntityType(request.entity.entity_type.clone()))?;
        let reference = entity_def
            .reference(&request.permission)
            .ok_or_else(|| undefined(entity_def, &request.permission))?;

        if is_same_userset(&request.subject, &request.entity, &request.permission) {
            return Ok(CheckResult::Allowed);
        }

        let result = match reference {
            Reference::Relation(_) => {
                self.check_relation(ctx, &request.entity, &request.permission, &request.subject)
                    .await?
            }
            Reference::Permission(expression) => {
                self.evaluate(ctx, entity_def, expression, request).await?
            }
        };

        tracing::trace!(
            entity = %request.entity,
            permission = %request.permission,
            subject = %request.subject,
            depth = ctx.depth(),
            %result,
            "check evaluated"
        );
        Ok(result)
    }

    fn evaluate<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        entity_def: &'a EntityDefinition,
        expression: &'a Expression,
        request: &'a CheckRequest,
    ) -> CheckFuture<'a> {
        Box::pin(async move {
            match expression {
                Expression::Leaf(name) => match entity_def.reference(name) {
                    Some(Reference::Relation(_)) => {
                        self.check_relation(ctx, &request.entity, name, &request.subject)
                            .await
                    }
                    Some(Reference::Permission(_)) => {
                        let child = ctx.descend()?;
                        let nested = CheckRequest::new(
                            request.entity.clone(),
                            name,
                            request.subject.clone(),
                        );
                        self.dispatch(&child, &nested).await
                    }
                    None => Err(undefined(entity_def, name)),
                },
                Expression::Hop { relation, target } => {
                    self.evaluate_hop(ctx, entity_def, relation, target, request)
                        .await
                }
                Expression::Union(children) => {
                    let branches: Vec<CheckFuture<'_>> = children
                        .iter()
                        .map(|child| self.evaluate(ctx, entity_def, child, request))
                        .collect();
                    any_allowed(branches, self.config.max_concurrent_branches).await
                }
                Expression::Intersection(children) => {
                    let branches: Vec<CheckFuture<'_>> = children
                        .iter()
                        .map(|child| self.evaluate(ctx, entity_def, child, request))
                        .collect();
                    all_allowed(branches, self.config.max_concurrent_branches).await
                }
                Expression::Exclusion(base, excluded) => {
                    let outcomes = futures::future::join(
                        self.evaluate(ctx, entity_def, base, request),
                        self.evaluate(ctx, entity_def, excluded, request),
                    )
                    .await;
                    // A denied base or an allowed exclusion decides regardless
                    // of the other side.
                    match outcomes {
                        (Ok(CheckResult::Denied), _) | (_, Ok(CheckResult::Allowed)) => {
                            Ok(CheckResult::Denied)
                        }
                        (Err(e), _) | (_, Err(e)) => Err(e),
                        (Ok(CheckResult::Allowed), Ok(CheckResult::Denied)) => {
                            Ok(CheckResult::Allowed)
                        }
                    }
                }
            }
        })
    }

    /// A stored tuple grants the relation either directly or through a
    /// userset subject whose members are checked one level down.
    async fn check_relation(
        &self,
        ctx: &InvocationContext,
        entity: &EntityRef,
        relation: &str,
        subject: &SubjectRef,
    ) -> Result<CheckResult, CheckError> {
        let tuples = self
            .query(ctx, &TupleFilter::for_relation(entity, relation))
            .await?;

        if tuples.iter().any(|t| &t.subject == subject) {
            return Ok(CheckResult::Allowed);
        }

        let nested: Vec<CheckRequest> = tuples
            .into_iter()
            .filter_map(|t| {
                let relation = t.subject.subject_relation.clone()?;
                Some(CheckRequest::new(t.subject.entity(), relation, subject.clone()))
            })
            .collect();
        if nested.is_empty() {
            return Ok(CheckResult::Denied);
        }

        let child = ctx.descend()?;
        let branches: Vec<CheckFuture<'_>> = nested
            .iter()
            .map(|request| self.dispatch(&child, request))
            .collect();
        any_allowed(branches, self.config.max_concurrent_branches).await
    }

    async fn evaluate_hop(
        &self,
        ctx: &InvocationContext,
        entity_def: &EntityDefinition,
        relation: &str,
        target: &str,
        request: &CheckRequest,
    ) -> Result<CheckResult, CheckError> {
        if entity_def.get_relation(relation).is_none() {
            return Err(undefined(entity_def, relation));
        }

        let filter = TupleFilter {
            subject_relation: Some(None),
            ..TupleFilter::for_relation(&request.entity, relation)
        };
        let tuples = self.query(ctx, &filter).await?;
        if tuples.is_empty() {
            return Ok(CheckResult::Denied);
        }

        let child = ctx.descend()?;
        let nested: Vec<CheckRequest> = tuples
            .iter()
            .map(|t| CheckRequest::new(t.subject.entity(), target, request.subject.clone()))
            .collect();
        let branches: Vec<CheckFuture<'_>> = nested
            .iter()
            .map(|request| self.dispatch(&child, request))
            .collect();
        any_allowed(branches, self.config.max_concurrent_branches).await
    }

    async fn query(
        &self,
        ctx: &InvocationContext,
        filter: &TupleFilter,
    ) -> Result<Vec<Tuple>, CheckError> {
        ctx.run(self.reader.query_tuples(ctx.tenant(), filter, ctx.snapshot()))
            .await
    }

    fn dispatch<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        request: &'a CheckRequest,
    ) -> CheckFuture<'a> {
        match self.dispatcher.get().and_then(Weak::upgrade) {
            Some(dispatcher) => {
                Box::pin(async move { dispatcher.dispatch_check(ctx, request).await })
            }
            None => Box::pin(self.check(ctx, request)),
        }
    }
}

impl<R, S> CheckDispatcher for CheckEngine<R, S>
where
    R: RelationshipReader,
    S: SchemaReader,
{
    fn dispatch_check<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        request: &'a CheckRequest,
    ) -> CheckFuture<'a> {
        Box::pin(self.check(ctx, request))
    }
}

fn undefined(entity_def: &EntityDefinition, reference: &str) -> CheckError {
    CheckError::UndefinedReference {
        entity_type: entity_def.name.clone(),
        reference: reference.to_string(),
    }
}

/// A userset subject always holds the relation it names.
fn is_same_userset(subject: &SubjectRef, entity: &EntityRef, relation: &str) -> bool {
    subject.subject_relation.as_deref() == Some(relation)
        && subject.subject_type == entity.entity_type
        && subject.subject_id == entity.entity_id
}

/// Evaluates branches with at most `limit` in flight. Any `Allowed` decides
/// the set; without one, a failure outranks `Denied`.
async fn any_allowed(
    branches: Vec<CheckFuture<'_>>,
    limit: usize,
) -> Result<CheckResult, CheckError> {
    settle(branches, limit, CheckResult::Allowed).await
}

/// Counterpart of [`any_allowed`] decided by any `Denied`. An empty set is
/// denied.
async fn all_allowed(
    branches: Vec<CheckFuture<'_>>,
    limit: usize,
) -> Result<CheckResult, CheckError> {
    if branches.is_empty() {
        return Ok(CheckResult::Denied);
    }
    settle(branches, limit, CheckResult::Denied).await
}

/// Stops as soon as a branch yields `decisive`. Otherwise every branch runs to
/// completion and the failure of the lowest-indexed failing branch is
/// returned, so the outcome never depends on completion order.
async fn settle(
    branches: Vec<CheckFuture<'_>>,
    limit: usize,
    decisive: CheckResult,
) -> Result<CheckResult, CheckError> {
    let mut pending: Pin<
        Box<dyn Stream<Item = (usize, Result<CheckResult, CheckError>)> + Send + '_>,
    > = Box::pin(
        stream::iter(branches.into_iter().enumerate())
            .map(|(index, branch)| async move { (index, branch.await) })
            .buffer_unordered(limit.max(1)),
    );

    let mut failure: Option<(usize, CheckError)> = None;
    while let Some((index, outcome)) = pending.next().await {
        match outcome {
            Ok(result) if result == decisive => return Ok(decisive),
            Ok(_) => {}
            Err(e) => {
                if failure.as_ref().is_none_or(|(first, _)| index < *first) {
                    failure = Some((index, e));
                }
            }
        }
    }

    match failure {
        Some((_, e)) => Err(e),
        None => Ok(CheckResult::from(!decisive.is_allowed())),
    }
}
