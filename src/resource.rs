//! Resource trait for declarative state management
//!
//! A Resource is one piece of desired state on a target (a file, a directory,
//! a symlink, a crontab block). It knows how to detect its current state and
//! how to converge. Resources are applied strictly one after another; the
//! first failure aborts the run.

use crate::error::Result;
use crate::target::Target;
use std::fmt;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Something else occupies the resource's place
    Modified { from: String, to: String },
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply was skipped
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Summary of an apply run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub no_change: usize,
}

impl ApplySummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Core trait for declarative resources
pub trait Resource: fmt::Debug {
    /// Unique identifier for this resource within its type (usually a path)
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category, e.g. "file", "directory", "crontab_entry"
    fn resource_type(&self) -> &'static str;

    /// Probe the target for the state this resource is in now
    fn current_state(&self, target: &Target<'_>) -> Result<ResourceState>;

    /// The state this resource should be in
    fn desired_state(&self, target: &Target<'_>) -> Result<ResourceState>;

    /// Check if the resource needs changes to reach desired state
    fn needs_apply(&self, target: &Target<'_>) -> Result<bool> {
        Ok(self.current_state(target)? != self.desired_state(target)?)
    }

    /// Converge the target; calling it again right after must be a no-op
    fn apply(&self, target: &Target<'_>) -> Result<ApplyResult>;
}

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    pub resource_id: String,
    pub resource_type: String,
    pub description: String,
    pub current: ResourceState,
    pub desired: ResourceState,
}

impl ResourceDiff {
    /// Create a diff from a resource, returning None if no changes needed
    pub fn from_resource(resource: &dyn Resource, target: &Target<'_>) -> Result<Option<Self>> {
        let current = resource.current_state(target)?;
        let desired = resource.desired_state(target)?;

        if current == desired {
            return Ok(None);
        }

        Ok(Some(Self {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            desired,
        }))
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Absent, ResourceState::Present { .. })
        )
    }
}

/// Compute diffs for a list of resources without changing anything.
///
/// Returns only resources whose current state differs from the desired one.
pub fn compute_diffs(target: &Target<'_>, resources: &[&dyn Resource]) -> Result<Vec<ResourceDiff>> {
    let mut diffs = Vec::new();
    for resource in resources {
        if let Some(diff) = ResourceDiff::from_resource(*resource, target)? {
            diffs.push(diff);
        }
    }
    Ok(diffs)
}

/// Apply resources in order, stopping at the first error.
///
/// With `dry_run`, nothing is changed: resources that would change are
/// reported as skipped.
pub fn apply_all(
    target: &Target<'_>,
    resources: &[&dyn Resource],
    dry_run: bool,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for resource in resources {
        log::debug!("{}", resource.description());

        let result = if dry_run {
            if resource.needs_apply(target)? {
                ApplyResult::Skipped {
                    reason: "Dry run".to_string(),
                }
            } else {
                ApplyResult::NoChange
            }
        } else {
            resource.apply(target).inspect_err(|e| {
                log::error!("{} {} failed: {e}", resource.resource_type(), resource.id());
            })?
        };

        if result.is_change() {
            log::info!("{} {}: {:?}", resource.resource_type(), resource.id(), result);
        }
        summary.add_result(&result);
    }

    Ok(summary)
}
