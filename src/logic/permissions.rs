use crate::error::PermissionError;
use crate::model::TypeTag;

/// Resolve the named permission for an object type and action, e.g.
/// `("dcim.site", "view")` -> `"dcim.view_site"`.
pub fn get_permission_for_type(tag: &TypeTag, action: &str) -> String {
    format!("{}.{}_{}", tag.app_label(), action, tag.model_name())
}

/// Split a permission name into its app label, action, and model name.
/// `"dcim.view_site"` returns `("dcim", "view", "site")`.
pub fn resolve_permission(name: &str) -> Result<(&str, &str, &str), PermissionError> {
    let invalid = || PermissionError::InvalidName(name.to_string());
    let (app_label, codename) = name.split_once('.').ok_or_else(invalid)?;
    // The model name is everything after the last underscore, so actions
    // like "bulk_edit" resolve intact
    let (action, model_name) = codename.rsplit_once('_').ok_or_else(invalid)?;
    if app_label.is_empty() || action.is_empty() || model_name.is_empty() {
        return Err(invalid());
    }
    Ok((app_label, action, model_name))
}

/// Administrator-configured bypasses for permission enforcement. Only view
/// permissions can be exempt; `"*"` exempts every type not listed in the
/// exclusions.
#[derive(Debug, Clone, Default)]
pub struct EnforcementPolicy {
    pub exempt_view_permissions: Vec<String>,
    pub exempt_exclude_types: Vec<String>,
}

impl EnforcementPolicy {
    /// Determine whether the named permission is exempt from evaluation
    pub fn permission_is_exempt(&self, name: &str) -> Result<bool, PermissionError> {
        let (app_label, action, model_name) = resolve_permission(name)?;
        if action != "view" {
            return Ok(false);
        }

        let type_name = format!("{}.{}", app_label, model_name);
        let wildcard = self.exempt_view_permissions.iter().any(|p| p == "*")
            && !self.exempt_exclude_types.contains(&type_name);
        Ok(wildcard || self.exempt_view_permissions.contains(&type_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_name_round_trip() {
        let tag = TypeTag::new("dcim", "site");
        let name = get_permission_for_type(&tag, "view");
        assert_eq!(name, "dcim.view_site");
        assert_eq!(resolve_permission(&name).unwrap(), ("dcim", "view", "site"));
    }

    #[test]
    fn resolve_rejects_malformed_names() {
        assert!(resolve_permission("view_site").is_err());
        assert!(resolve_permission("dcim.viewsite").is_err());
        assert!(resolve_permission("dcim._site").is_err());
    }

    #[test]
    fn underscored_action_resolves_intact() {
        assert_eq!(
            resolve_permission("dcim.bulk_edit_device").unwrap(),
            ("dcim", "bulk_edit", "device"),
        );
    }

    #[test]
    fn exemption_policy() {
        let policy = EnforcementPolicy {
            exempt_view_permissions: vec!["*".to_string()],
            exempt_exclude_types: vec!["users.objectpermission".to_string()],
        };
        assert!(policy.permission_is_exempt("dcim.view_site").unwrap());
        // Exclusions survive the wildcard
        assert!(!policy
            .permission_is_exempt("users.view_objectpermission")
            .unwrap());
        // Only view can be exempt
        assert!(!policy.permission_is_exempt("dcim.delete_site").unwrap());

        let explicit = EnforcementPolicy {
            exempt_view_permissions: vec!["dcim.site".to_string()],
            exempt_exclude_types: vec![],
        };
        assert!(explicit.permission_is_exempt("dcim.view_site").unwrap());
        assert!(!explicit.permission_is_exempt("dcim.view_rack").unwrap());
    }
}
