//! Structural validation of space-creation payloads. Pure functions: no IO,
//! no Provider calls. Cross-referential checks (user existence, license)
//! live in the reconcilers and accumulate into the same issue list.

/// Space name rule: non-empty, first character not a digit.
pub fn validate_space_name(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("Name is required".to_string());
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Some("Name can't start with a number".to_string());
    }
    None
}

/// Space key rule: non-empty, at most 5 characters, uppercase ASCII letters
/// only. Digits, lowercase and punctuation are all rejected.
pub fn validate_space_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key is required".to_string());
    }
    if key.chars().count() > 5 {
        return Some("Key max 5 chars".to_string());
    }
    if !key.chars().all(|c| c.is_ascii_uppercase()) {
        return Some("Key must be uppercase letters only".to_string());
    }
    None
}

/// Ordered list of violated structural rules; empty means the payload is
/// structurally valid (which does not yet mean it can proceed).
pub fn structural_issues(name: &str, key: &str) -> Vec<String> {
    let mut issues = Vec::new();
    if let Some(issue) = validate_space_name(name) {
        issues.push(issue);
    }
    if let Some(issue) = validate_space_key(key) {
        issues.push(issue);
    }
    issues
}
