// The provisioning workflow engine: payload validation, the two
// reconcilers that drive desired state into Confluence, and the runner
// that walks each request through its lifecycle.

pub mod access;
pub mod runner;
pub mod space;
pub mod validation;

pub use access::{AccessGrant, AccessLevel, AccessReconciler, AccessRequest};
pub use runner::WorkflowRunner;
pub use space::{SpaceOutcome, SpaceReconciler, SpaceRequest};

/// The three role groups every space is expected to have.
pub const STANDARD_ROLES: [AccessLevel; 3] =
    [AccessLevel::Read, AccessLevel::Dev, AccessLevel::Admin];

/// Name of the role group for a space, e.g. `ENG_dev`.
pub fn role_group(space_key: &str, level: AccessLevel) -> String {
    format!("{space_key}_{level}")
}
