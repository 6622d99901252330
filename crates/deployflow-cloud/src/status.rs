//! Status and error-message classification per resource class
//!
//! The remote platform does not expose structured "no-op" or "already gone"
//! outcomes; they only appear as substrings of human-readable error messages.
//! All of that fragile matching lives here so it is centralized and testable
//! on its own. Do not scatter message matching into controllers.

use crate::poll::StatusClass;

/// Stack statuses reported while an enumeration should still include the
/// stack. Deleted stacks are excluded so `exists` goes back to false after a
/// successful delete.
pub const STACK_LIST_STATUSES: &[&str] = &[
    "CREATE_IN_PROGRESS",
    "CREATE_FAILED",
    "CREATE_COMPLETE",
    "ROLLBACK_IN_PROGRESS",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "DELETE_IN_PROGRESS",
    "DELETE_FAILED",
    "UPDATE_IN_PROGRESS",
    "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_COMPLETE",
    "UPDATE_ROLLBACK_IN_PROGRESS",
    "UPDATE_ROLLBACK_FAILED",
    "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_ROLLBACK_COMPLETE",
    "REVIEW_IN_PROGRESS",
    "IMPORT_IN_PROGRESS",
    "IMPORT_COMPLETE",
    "IMPORT_ROLLBACK_IN_PROGRESS",
    "IMPORT_ROLLBACK_FAILED",
    "IMPORT_ROLLBACK_COMPLETE",
];

pub fn classify_stack_create(status: &str) -> StatusClass {
    match status {
        "CREATE_COMPLETE" => StatusClass::Success,
        "CREATE_FAILED" | "ROLLBACK_IN_PROGRESS" | "ROLLBACK_FAILED" | "ROLLBACK_COMPLETE" => {
            StatusClass::Failure
        }
        _ => StatusClass::InProgress,
    }
}

pub fn classify_stack_update(status: &str) -> StatusClass {
    match status {
        "UPDATE_COMPLETE" => StatusClass::Success,
        "UPDATE_ROLLBACK_FAILED" | "UPDATE_ROLLBACK_COMPLETE" => StatusClass::Failure,
        _ => StatusClass::InProgress,
    }
}

pub fn classify_stack_delete(status: &str) -> StatusClass {
    match status {
        "DELETE_COMPLETE" => StatusClass::Success,
        "DELETE_FAILED" => StatusClass::Failure,
        _ => StatusClass::InProgress,
    }
}

pub fn classify_node_group(status: &str) -> StatusClass {
    match status {
        "ACTIVE" => StatusClass::Success,
        s if s.ends_with("_FAILED") => StatusClass::Failure,
        _ => StatusClass::InProgress,
    }
}

pub fn classify_node_group_delete(status: &str) -> StatusClass {
    match status {
        "DELETE_COMPLETE" => StatusClass::Success,
        "DELETE_FAILED" => StatusClass::Failure,
        _ => StatusClass::InProgress,
    }
}

/// DNS changes expose an eventual-consistency signal instead of a lifecycle
/// status enum: PENDING until the change has propagated, then INSYNC.
pub fn classify_dns_change(status: &str) -> StatusClass {
    if status == "INSYNC" {
        StatusClass::Success
    } else {
        StatusClass::InProgress
    }
}

/// An update request the platform recognized as changing nothing. The only
/// signal is the message text; treated as a successful no-op by the stack
/// controller. Known fragility, kept deliberately narrow.
pub fn is_no_updates_message(message: &str) -> bool {
    message.to_lowercase().contains("no updates")
}

/// A describe call answered for a stack that no longer exists.
pub fn is_stack_not_found_message(message: &str) -> bool {
    message.to_lowercase().contains("does not exist")
}

/// A describe call answered for a node group that no longer exists.
pub fn is_nodegroup_not_found_message(message: &str) -> bool {
    message.to_lowercase().contains("no node group found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_create_terminal_states() {
        assert_eq!(classify_stack_create("CREATE_COMPLETE"), StatusClass::Success);
        assert_eq!(classify_stack_create("CREATE_FAILED"), StatusClass::Failure);
        assert_eq!(classify_stack_create("ROLLBACK_COMPLETE"), StatusClass::Failure);
        assert_eq!(
            classify_stack_create("CREATE_IN_PROGRESS"),
            StatusClass::InProgress
        );
    }

    #[test]
    fn stack_update_rollback_is_failure() {
        assert_eq!(classify_stack_update("UPDATE_COMPLETE"), StatusClass::Success);
        assert_eq!(
            classify_stack_update("UPDATE_ROLLBACK_COMPLETE"),
            StatusClass::Failure
        );
        assert_eq!(
            classify_stack_update("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"),
            StatusClass::InProgress
        );
    }

    #[test]
    fn node_group_failures_match_suffix() {
        assert_eq!(classify_node_group("ACTIVE"), StatusClass::Success);
        assert_eq!(classify_node_group("CREATE_FAILED"), StatusClass::Failure);
        assert_eq!(classify_node_group("DEGRADED_FAILED"), StatusClass::Failure);
        assert_eq!(classify_node_group("CREATING"), StatusClass::InProgress);
    }

    #[test]
    fn dns_change_only_insync_is_terminal() {
        assert_eq!(classify_dns_change("INSYNC"), StatusClass::Success);
        assert_eq!(classify_dns_change("PENDING"), StatusClass::InProgress);
    }

    #[test]
    fn no_updates_message_is_case_insensitive() {
        assert!(is_no_updates_message(
            "An error occurred (ValidationError): No updates are to be performed."
        ));
        assert!(is_no_updates_message("NO UPDATES to be performed"));
        assert!(!is_no_updates_message("Rate exceeded"));
    }

    #[test]
    fn not_found_messages() {
        assert!(is_stack_not_found_message("Stack with id prod does not exist"));
        assert!(!is_stack_not_found_message("Access denied"));
        assert!(is_nodegroup_not_found_message(
            "No node group found for name: prod-Node-Group-20240110-ABCDE"
        ));
        assert!(!is_nodegroup_not_found_message("throttled"));
    }
}
