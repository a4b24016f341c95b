//! Severity assessment and recovery level escalation.

use std::path::PathBuf;

use session_warden::models::recovery::{RecoveryLevel, RecoveryOutcome, Severity};
use session_warden::models::validation::{ValidationIssue, ValidationReport, ValidationWarning};
use session_warden::session::recovery::assess_severity;

fn report(issues: Vec<ValidationIssue>, warnings: Vec<ValidationWarning>) -> ValidationReport {
    ValidationReport {
        path: PathBuf::from("/base/.auth_shared"),
        exists: true,
        is_valid: issues.is_empty(),
        issues,
        warnings,
        ..ValidationReport::default()
    }
}

#[test]
fn clean_report_needs_nothing() {
    assert_eq!(assess_severity(&report(vec![], vec![])), Severity::None);
}

#[test]
fn warnings_and_stale_artifacts_are_minor() {
    let warned = report(
        vec![],
        vec![ValidationWarning::MissingOptional("session/Local State".into())],
    );
    assert_eq!(assess_severity(&warned), Severity::Minor);

    let stale = report(
        vec![ValidationIssue::StaleArtifact(PathBuf::from("SingletonLock"))],
        vec![],
    );
    assert_eq!(assess_severity(&stale), Severity::Minor);
}

#[test]
fn missing_or_empty_required_paths_are_major() {
    let missing = ValidationReport {
        required_missing: vec!["session/Default/IndexedDB".into()],
        ..report(
            vec![ValidationIssue::MissingRequired("session/Default/IndexedDB".into())],
            vec![],
        )
    };
    assert_eq!(assess_severity(&missing), Severity::Major);

    let empty = report(
        vec![ValidationIssue::EmptyRequired("session/Default/Local Storage".into())],
        vec![],
    );
    assert_eq!(assess_severity(&empty), Severity::Major);
}

#[test]
fn unusable_directory_is_critical() {
    for issue in [
        ValidationIssue::DirectoryEmpty,
        ValidationIssue::DirectoryMissing,
        ValidationIssue::Unreadable("permission denied".into()),
    ] {
        let r = report(vec![issue.clone(), ValidationIssue::StaleArtifact("x".into())], vec![]);
        assert_eq!(assess_severity(&r), Severity::Critical, "{issue:?}");
    }
}

#[test]
fn levels_follow_severity_and_escalate_to_reset() {
    assert_eq!(RecoveryLevel::for_severity(Severity::None), None);
    assert_eq!(
        RecoveryLevel::for_severity(Severity::Minor),
        Some(RecoveryLevel::PruneArtifacts)
    );
    assert_eq!(
        RecoveryLevel::for_severity(Severity::Major),
        Some(RecoveryLevel::ClearCaches)
    );
    assert_eq!(
        RecoveryLevel::for_severity(Severity::Critical),
        Some(RecoveryLevel::FullReset)
    );

    assert_eq!(
        RecoveryLevel::PruneArtifacts.escalate(),
        Some(RecoveryLevel::ClearCaches)
    );
    assert_eq!(RecoveryLevel::ClearCaches.escalate(), Some(RecoveryLevel::FullReset));
    assert_eq!(RecoveryLevel::FullReset.escalate(), None);
}

#[test]
fn only_pruning_is_non_destructive() {
    assert!(!RecoveryLevel::PruneArtifacts.is_destructive());
    assert!(RecoveryLevel::ClearCaches.is_destructive());
    assert!(RecoveryLevel::FullReset.is_destructive());
}

#[test]
fn not_needed_outcome_is_successful_and_idle() {
    let outcome = RecoveryOutcome::not_needed(Severity::None);
    assert!(outcome.success);
    assert!(!outcome.performed);
    assert!(!outcome.requires_reauth);
    assert_eq!(outcome.level_applied, None);
}
