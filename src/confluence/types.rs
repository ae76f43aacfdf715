use serde::{Deserialize, Serialize};

/// A platform user. `user_key` is the opaque key permission subjects are
/// matched by; `username` is the login the rest of the API addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfluenceUser {
    pub username: String,
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Admin user-creation payload. `notify_via_email` stays false: provisioning
/// is silent from the platform's side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub user_name: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub notify_via_email: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct ResultsPage<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// One permission grant on a space, as the permission list reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacePermission {
    pub operation: PermissionOperation,
    #[serde(default)]
    pub subject: Option<PermissionSubject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOperation {
    pub operation_key: String,
    #[serde(default)]
    pub target_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSubject {
    #[serde(rename = "type", default)]
    pub subject_type: Option<String>,
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
}

/// A grant to request on a space, scoped either to the space itself or to a
/// content type within it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub target_type: String,
    pub operation_key: String,
}

impl PermissionGrant {
    pub fn new(target_type: &str, operation_key: &str) -> Self {
        Self {
            target_type: target_type.to_string(),
            operation_key: operation_key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub version: PageVersion,
    pub body: PageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersion {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageBody {
    pub storage: PageStorage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageStorage {
    pub value: String,
    pub representation: String,
}
