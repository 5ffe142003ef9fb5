//! Authenticated principal and capability model.
//!
//! Access tokens are issued elsewhere and stored in the `api_tokens` table as
//! SHA-256 hashes. A resolved token yields a `Principal`: who is calling,
//! in which role, for which school.

use serde::Serialize;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform operator; acts on every school
    SuperAdmin,
    /// Back-office staff of one school
    SchoolAdmin,
    /// Parent paying fees for students of one school
    Parent,
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "super_admin" => Ok(Role::SuperAdmin),
            "school_admin" => Ok(Role::SchoolAdmin),
            "parent" => Ok(Role::Parent),
            _ => Err(UnknownVariant::new("role", value)),
        }
    }
}

/// Operations guarded by the capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateTransaction,
    CreateDonation,
    ViewTransaction,
    ManageInvoiceFormat,
    ReconcilePayments,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CreateTransaction => "create transactions",
            Capability::CreateDonation => "create donations",
            Capability::ViewTransaction => "view transactions",
            Capability::ManageInvoiceFormat => "manage invoice formats",
            Capability::ReconcilePayments => "reconcile payments",
        }
    }
}

/// The authenticated caller, injected into request extensions by the auth middleware.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: Role,

    /// School the principal belongs to; `None` only for super admins
    pub school_id: Option<Uuid>,
}

impl Principal {
    /// Whether this principal may perform `capability` on data of `school_id`.
    pub fn allows(&self, capability: Capability, school_id: Uuid) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::SchoolAdmin => self.school_id == Some(school_id),
            Role::Parent => {
                self.school_id == Some(school_id)
                    && matches!(
                        capability,
                        Capability::CreateTransaction
                            | Capability::CreateDonation
                            | Capability::ViewTransaction
                    )
            }
        }
    }

    /// Whether this principal may perform `capability` across every school.
    pub fn allows_platform_wide(&self, _capability: Capability) -> bool {
        self.role == Role::SuperAdmin
    }
}
