use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{ActionId, CoreError, CoreErrorKind, CoreResult, ProjectId};

/// A public action name and where the gateway runs it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: ActionId,
    pub target: String,
}

/// Public action names, their execution targets, and which projects may
/// invoke which actions. Anything not listed is refused.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionCatalog {
    actions: BTreeMap<ActionId, ActionDescriptor>,
    allowlists: BTreeMap<ProjectId, BTreeSet<ActionId>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty target runs the action under its own name.
    pub fn with_action(mut self, action: impl Into<ActionId>, target: impl Into<String>) -> Self {
        let action = action.into();
        let target = target.into();
        let target = if target.trim().is_empty() {
            action.as_str().to_string()
        } else {
            target
        };
        self.actions
            .insert(action.clone(), ActionDescriptor { action, target });
        self
    }

    pub fn with_project<I, A>(mut self, project: impl Into<ProjectId>, allowed: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ActionId>,
    {
        self.allowlists
            .entry(project.into())
            .or_default()
            .extend(allowed.into_iter().map(Into::into));
        self
    }

    pub fn is_allowed(&self, project: &ProjectId, action: &ActionId) -> bool {
        self.actions.contains_key(action)
            && self
                .allowlists
                .get(project)
                .is_some_and(|allowed| allowed.contains(action))
    }

    pub fn resolve(&self, project: &ProjectId, action: &ActionId) -> CoreResult<&ActionDescriptor> {
        let Some(descriptor) = self.actions.get(action) else {
            return Err(CoreError::new(
                CoreErrorKind::NotAllowlisted,
                format!("unknown action '{action}'"),
            )
            .for_action(action));
        };
        if !self.is_allowed(project, action) {
            return Err(CoreError::new(
                CoreErrorKind::NotAllowlisted,
                format!("action '{action}' is not allowlisted for project '{project}'"),
            )
            .for_action(action));
        }
        Ok(descriptor)
    }

    /// Allowlist entries that name actions missing from the catalog.
    pub fn unknown_allowlisted(&self) -> Vec<(ProjectId, ActionId)> {
        self.allowlists
            .iter()
            .flat_map(|(project, allowed)| {
                allowed
                    .iter()
                    .filter(|action| !self.actions.contains_key(*action))
                    .map(move |action| (project.clone(), action.clone()))
            })
            .collect()
    }
}
