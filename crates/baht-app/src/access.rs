// Tenant membership and role checks shared by every service.

use baht_core::db::Database;
use baht_core::model::{Membership, Permission};

use crate::error::{ServiceError, ServiceResult};

/// The caller's membership in `company_id`.
///
/// Unknown companies and companies the caller does not belong to both come
/// back as `NotFound`, so tenants cannot discover each other's IDs.
pub fn require_member(db: &Database, company_id: &str, user_id: &str) -> ServiceResult<Membership> {
    db.membership(company_id, user_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("company {company_id}")))
}

/// Like [`require_member`], but the role must also grant `permission`.
pub fn require_permission(
    db: &Database,
    company_id: &str,
    user_id: &str,
    permission: Permission,
) -> ServiceResult<Membership> {
    let membership = require_member(db, company_id, user_id)?;
    if membership.can(permission) {
        Ok(membership)
    } else {
        Err(ServiceError::Forbidden(format!(
            "role `{}` lacks {permission:?}",
            membership.role.as_str()
        )))
    }
}
