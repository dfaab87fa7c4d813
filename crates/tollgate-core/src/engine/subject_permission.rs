use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::tuple::{EntityRef, SubjectRef};

use super::{
    CheckDispatcher, CheckError, CheckRequest, CheckResult, EngineConfig, InvocationContext,
    SchemaReader, load_schema,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPermissionRequest {
    pub entity: EntityRef,
    pub subject: SubjectRef,
    /// Skip relations and evaluate permissions only.
    pub only_permission: bool,
}

/// Verdicts keyed by name, in the order the entity type declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectPermissionResults {
    entries: Vec<(String, CheckResult)>,
}

impl SubjectPermissionResults {
    pub fn get(&self, name: &str) -> Option<CheckResult> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, result)| *result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, CheckResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), *r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, result)| result.is_allowed())
            .map(|(name, _)| name)
    }
}

impl FromIterator<(String, CheckResult)> for SubjectPermissionResults {
    fn from_iter<T: IntoIterator<Item = (String, CheckResult)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Evaluates every relation and permission of one entity for one subject,
/// one independent check per name, run as bounded parallel tasks.
pub struct SubjectPermissionEngine<S> {
    schemas: Arc<S>,
    checker: Arc<dyn CheckDispatcher>,
    config: EngineConfig,
}

impl<S: SchemaReader> SubjectPermissionEngine<S> {
    pub fn new(schemas: Arc<S>, checker: Arc<dyn CheckDispatcher>, config: EngineConfig) -> Self {
        Self {
            schemas,
            checker,
            config,
        }
    }

    pub async fn subject_permission(
        &self,
        ctx: &InvocationContext,
        request: &SubjectPermissionRequest,
    ) -> Result<SubjectPermissionResults, CheckError> {
        ctx.run(self.evaluate(ctx, request)).await
    }

    async fn evaluate(
        &self,
        ctx: &InvocationContext,
        request: &SubjectPermissionRequest,
    ) -> Result<SubjectPermissionResults, CheckError> {
        let schema = load_schema(self.schemas.as_ref(), ctx).await?;
        let entity_def = schema
            .get_entity(&request.entity.entity_type)
            .ok_or_else(|| CheckError::UndefinedEntityType(request.entity.entity_type.clone()))?;
        let names: Vec<String> = entity_def
            .names(request.only_permission)
            .into_iter()
            .map(str::to_string)
            .collect();

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_branches.max(1)));
        // Dropping the set aborts whatever is still running, so an early
        // return on error leaves no stray checks behind.
        let mut workers = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let checker = Arc::clone(&self.checker);
            let permits = Arc::clone(&permits);
            let ctx = ctx.clone();
            let check = CheckRequest::new(request.entity.clone(), name, request.subject.clone());
            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| CheckError::Worker(e.to_string()))?;
                let result = checker.dispatch_check(&ctx, &check).await?;
                Ok::<_, CheckError>((index, result))
            });
        }

        let mut verdicts: Vec<Option<CheckResult>> = vec![None; names.len()];
        while let Some(joined) = workers.join_next().await {
            let (index, result) = joined.map_err(|e| CheckError::Worker(e.to_string()))??;
            if let Some(slot) = verdicts.get_mut(index) {
                *slot = Some(result);
            }
        }

        names
            .into_iter()
            .zip(verdicts)
            .map(|(name, verdict)| match verdict {
                Some(result) => Ok((name, result)),
                None => Err(CheckError::Worker(format!("no verdict for '{name}'"))),
            })
            .collect()
    }
}
