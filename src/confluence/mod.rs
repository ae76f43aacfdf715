// Confluence REST surface - the external identity/permission provider.
// Check-then-act only: the API offers no create-if-absent primitive and
// read-after-write may lag.

pub mod client;
pub mod errors;
pub mod types;

pub use client::ConfluenceClient;
pub use errors::ConfluenceError;
pub use types::{
    ConfluenceUser, GroupMember, NewUser, Page, PermissionGrant, Space, SpacePermission, Webhook,
};
