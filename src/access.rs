//! Role checks for requests entering the engine.
//!
//! Authentication happens upstream; by the time a request reaches the
//! engine it carries a [`Requester`] whose role has already been resolved.
//! The guards here only decide what that role may do.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Staff,
    SuperAdmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffPosition {
    Manager,
    Host,
    Waiter,
}

/// Links a staff account to the restaurant it works for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffProfile {
    pub restaurant_id: Ulid,
    pub position: StaffPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: Ulid,
    pub role: Role,
    /// Present for staff accounts that have been assigned to a restaurant.
    #[serde(default)]
    pub staff: Option<StaffProfile>,
}

impl Requester {
    pub fn customer(id: Ulid) -> Self {
        Self {
            id,
            role: Role::Customer,
            staff: None,
        }
    }

    pub fn staff(id: Ulid, restaurant_id: Ulid, position: StaffPosition) -> Self {
        Self {
            id,
            role: Role::Staff,
            staff: Some(StaffProfile {
                restaurant_id,
                position,
            }),
        }
    }

    pub fn super_admin(id: Ulid) -> Self {
        Self {
            id,
            role: Role::SuperAdmin,
            staff: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("only customers or restaurant staff can make reservations")]
    CannotReserve,
    #[error("requester is not a staff member")]
    NotStaff,
    #[error("staff member has no staff profile")]
    MissingStaffProfile,
    #[error("staff member does not work at restaurant {0}")]
    WrongRestaurant(Ulid),
    #[error("restaurant manager role required")]
    NotManager,
    #[error("super admin role required")]
    NotSuperAdmin,
    #[error("reservation belongs to another customer")]
    NotOwner,
}

/// Staff profile of `requester` for `restaurant_id`.
pub fn staff_profile(requester: &Requester, restaurant_id: Ulid) -> Result<&StaffProfile, AccessDenied> {
    if requester.role != Role::Staff {
        return Err(AccessDenied::NotStaff);
    }
    let profile = requester.staff.as_ref().ok_or(AccessDenied::MissingStaffProfile)?;
    if profile.restaurant_id != restaurant_id {
        return Err(AccessDenied::WrongRestaurant(restaurant_id));
    }
    Ok(profile)
}

pub fn ensure_can_reserve(requester: &Requester, restaurant_id: Ulid) -> Result<(), AccessDenied> {
    match requester.role {
        Role::Customer => Ok(()),
        Role::Staff => staff_profile(requester, restaurant_id).map(|_| ()),
        Role::SuperAdmin => Err(AccessDenied::CannotReserve),
    }
}

/// Approve/reject and policy-free cancellation.
pub fn ensure_restaurant_staff(requester: &Requester, restaurant_id: Ulid) -> Result<(), AccessDenied> {
    if requester.role == Role::SuperAdmin {
        return Ok(());
    }
    staff_profile(requester, restaurant_id).map(|_| ())
}

/// Inventory changes (tables, opening hours).
pub fn ensure_manager(requester: &Requester, restaurant_id: Ulid) -> Result<(), AccessDenied> {
    if requester.role == Role::SuperAdmin {
        return Ok(());
    }
    match staff_profile(requester, restaurant_id)?.position {
        StaffPosition::Manager => Ok(()),
        _ => Err(AccessDenied::NotManager),
    }
}

/// Registering new restaurants is reserved to super admins.
pub fn ensure_super_admin(requester: &Requester) -> Result<(), AccessDenied> {
    match requester.role {
        Role::SuperAdmin => Ok(()),
        _ => Err(AccessDenied::NotSuperAdmin),
    }
}

/// Reservations made by a manager of the restaurant skip the approval queue.
pub fn may_auto_approve(requester: &Requester, restaurant_id: Ulid) -> bool {
    ensure_manager(requester, restaurant_id).is_ok()
}
