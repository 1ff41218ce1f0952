use curator_core::{AuthorField, FieldSelection, FieldValue};
use curator_engine::{EngineError, MergeConfig, Phase, StepOutcome};
use curator_harness::{TestCatalog, init_tracing};
use curator_storage::{AuditTrail, MergeOutcome, Storage, StorageError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn survivor_takes_selected_field_and_assets() -> TestResult {
    init_tracing();
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane Doe".into())])?;
    let d = cat.add_author(&[
        (AuthorField::Name, "Jane D.".into()),
        (AuthorField::Bio, "Pixel artist from Lisbon".into()),
    ])?;
    let asset1 = cat.add_asset("Stone Texture Pack", d)?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    assert_eq!(group.survivor().id, s);

    let mut selection = FieldSelection::new();
    selection.toggle(d, AuthorField::Bio);
    let plan = cat.engine.compile(&group, &selection)?;
    assert_eq!(plan.tombstone_ids(), &[d]);
    assert_eq!(plan.dependent_reassignments().len(), 1);

    let result = cat.engine.execute(&plan)?.into_result()?;
    assert!(result.audited);

    assert_eq!(
        cat.field(s, AuthorField::Bio)?,
        Some(FieldValue::from("Pixel artist from Lisbon"))
    );
    assert_eq!(cat.field(s, AuthorField::Name)?, Some(FieldValue::from("Jane Doe")));
    assert_eq!(cat.owner_of(asset1)?, Some(s));
    assert!(!cat.exists(d)?);
    assert!(cat.engine.load_group::<AuthorField>("jane")?.is_none());

    let log = cat.store().get_merge_log(s)?;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].outcome, MergeOutcome::Completed);
    assert_eq!(log[0].plan_digest, plan.digest()?);
    assert_eq!(log[0].fields, vec!["bio".to_string()]);
    assert_eq!(log[0].reassigned, vec![asset1]);
    Ok(())
}

#[test]
fn executing_twice_is_harmless() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[(AuthorField::Website, "https://jane.example".into())])?;
    cat.add_asset("Forest Tiles", d)?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let mut selection = FieldSelection::new();
    selection.toggle(d, AuthorField::Website);
    let plan = cat.engine.compile(&group, &selection)?;

    cat.engine.execute(&plan)?.into_result()?;
    let second = cat.engine.execute(&plan)?;
    assert!(second.is_success(), "{second}");
    assert!(
        second
            .completed_in(Phase::Tombstone)
            .all(|c| c.outcome == StepOutcome::AlreadyDone)
    );
    assert_eq!(cat.store().get_merge_log(s)?.len(), 2);
    Ok(())
}

#[test]
fn three_way_merge_picks_fields_from_each() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let a = cat.add_author(&[(AuthorField::Bio, "Sprites".into())])?;
    let b = cat.add_author(&[
        (AuthorField::Location, "Lisbon".into()),
        (AuthorField::Links, vec!["https://a.example", "https://b.example"].into()),
    ])?;
    let from_a = cat.add_asset("Hero Sprites", a)?;
    let from_b = cat.add_asset("Cave Tiles", b)?;
    cat.mark_duplicates("jane", &[s, a, b])?;

    let mut session = cat.session("jane")?;
    session.toggle(a, AuthorField::Bio)?;
    session.toggle(b, AuthorField::Location)?;
    session.toggle(b, AuthorField::Links)?;
    let review = session.plan()?.to_string();
    assert!(review.contains("write 3 field(s):"), "{review}");
    assert!(review.contains("delete 2 record(s):"), "{review}");

    assert!(session.apply(&mut cat.engine)?.is_success());
    assert_eq!(cat.field(s, AuthorField::Location)?, Some(FieldValue::from("Lisbon")));
    assert_eq!(
        cat.field(s, AuthorField::Links)?,
        Some(FieldValue::from(vec!["https://a.example", "https://b.example"]))
    );
    assert_eq!(cat.owner_of(from_a)?, Some(s));
    assert_eq!(cat.owner_of(from_b)?, Some(s));
    assert!(!cat.exists(a)? && !cat.exists(b)?);
    Ok(())
}

// ============================================================================
// Partial failure and retry
// ============================================================================

#[test]
fn failed_reassignment_halts_before_tombstones_and_retry_completes() -> TestResult {
    init_tracing();
    let mut cat = TestCatalog::faulty()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[(AuthorField::Bio, "Hello".into())])?;
    let ok_asset = cat.add_asset("Forest Tiles", d)?;
    let stuck_asset = cat.add_asset("Cave Tiles", d)?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let mut selection = FieldSelection::new();
    selection.toggle(d, AuthorField::Bio);
    let plan = cat.engine.compile(&group, &selection)?;

    cat.faults().fail_reassignment_of(stuck_asset);
    let result = cat.engine.execute(&plan)?;
    assert_eq!(result.failed_at, Some(Phase::Reassignment));
    assert_eq!(result.failures.len(), 1);
    assert_eq!(cat.field(s, AuthorField::Bio)?, Some(FieldValue::from("Hello")));
    assert_eq!(cat.owner_of(ok_asset)?, Some(s));
    assert_eq!(cat.owner_of(stuck_asset)?, Some(d));
    assert!(cat.exists(d)?);
    assert!(matches!(
        result.into_result(),
        Err(EngineError::ReassignmentFailed { failures }) if failures.len() == 1
    ));

    cat.faults().clear_faults();
    let retry = cat.engine.execute(&plan)?;
    assert!(retry.is_success(), "{retry}");
    assert_eq!(
        retry.completed_in(Phase::Write).next().map(|c| c.outcome),
        Some(StepOutcome::AlreadyDone)
    );
    assert_eq!(cat.owner_of(stuck_asset)?, Some(s));
    assert!(!cat.exists(d)?);

    let outcomes: Vec<_> = cat
        .store()
        .get_merge_log(s)?
        .into_iter()
        .map(|e| (e.outcome, e.failed_phase))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (MergeOutcome::Failed, Some("reassignment".to_string())),
            (MergeOutcome::Completed, None),
        ]
    );
    Ok(())
}

#[test]
fn failed_write_touches_nothing() -> TestResult {
    let mut cat = TestCatalog::faulty()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[(AuthorField::Bio, "Hello".into())])?;
    let asset = cat.add_asset("Forest Tiles", d)?;
    cat.mark_duplicates("jane", &[s, d])?;

    let mut session = cat.session("jane")?;
    session.toggle(d, AuthorField::Bio)?;
    session.plan()?;

    cat.faults().fail_updates(true);
    let result = session.apply(&mut cat.engine)?;
    assert_eq!(result.failed_at, Some(Phase::Write));
    assert!(matches!(result.failures[0].error, StorageError::Sqlite(_)));
    assert_eq!(cat.field(s, AuthorField::Bio)?, None);
    assert_eq!(cat.owner_of(asset)?, Some(d));
    assert!(cat.exists(d)?);
    Ok(())
}

#[test]
fn one_failed_delete_does_not_block_the_other() -> TestResult {
    let mut cat = TestCatalog::faulty()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let a = cat.add_author(&[])?;
    let b = cat.add_author(&[])?;
    cat.mark_duplicates("jane", &[s, a, b])?;

    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;

    cat.faults().fail_delete_of(a);
    let result = cat.engine.execute(&plan)?;
    assert_eq!(result.failed_at, Some(Phase::Tombstone));
    assert!(cat.exists(a)?);
    assert!(!cat.exists(b)?);
    assert!(result.to_string().contains("FAILED in tombstone phase"));

    cat.faults().clear_faults();
    let retry = cat.engine.execute(&plan)?;
    let outcomes: Vec<_> = retry
        .completed_in(Phase::Tombstone)
        .map(|c| c.outcome)
        .collect();
    assert_eq!(outcomes, vec![StepOutcome::Applied, StepOutcome::AlreadyDone]);
    assert!(!cat.exists(a)?);
    Ok(())
}

#[test]
fn audit_failure_does_not_fail_the_merge() -> TestResult {
    let mut cat = TestCatalog::faulty()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[])?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;

    cat.faults().fail_audit(true);
    let result = cat.engine.execute(&plan)?;
    assert!(result.is_success());
    assert!(!result.audited);
    assert!(!cat.exists(d)?);
    assert!(cat.store().get_merge_log(s)?.is_empty());
    Ok(())
}

// ============================================================================
// Concurrent edits and integrity
// ============================================================================

#[test]
fn survivor_edited_after_load_fails_write() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[(AuthorField::Bio, "Hello".into())])?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let mut selection = FieldSelection::new();
    selection.toggle(d, AuthorField::Bio);
    let plan = cat.engine.compile(&group, &selection)?;

    cat.engine
        .storage_mut()
        .update_fields(s, &[("bio".into(), FieldValue::from("Edited elsewhere"))], None)?;

    let err = cat.engine.execute(&plan)?.into_result().unwrap_err();
    match err {
        EngineError::WriteFailed { failures } => assert!(matches!(
            failures[0].error,
            StorageError::VersionMismatch { expected: 1, actual: 2, .. }
        )),
        other => panic!("expected WriteFailed, got {other}"),
    }
    assert_eq!(
        cat.field(s, AuthorField::Bio)?,
        Some(FieldValue::from("Edited elsewhere"))
    );
    assert!(cat.exists(d)?);
    Ok(())
}

#[test]
fn version_check_disabled_overwrites() -> TestResult {
    let mut cat = TestCatalog::with_config(MergeConfig {
        verify_survivor_version: false,
        ..MergeConfig::default()
    })?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[(AuthorField::Bio, "Hello".into())])?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let mut selection = FieldSelection::new();
    selection.toggle(d, AuthorField::Bio);
    let plan = cat.engine.compile(&group, &selection)?;

    cat.engine
        .storage_mut()
        .update_fields(s, &[("bio".into(), FieldValue::from("Edited elsewhere"))], None)?;

    cat.engine.execute(&plan)?.into_result()?;
    assert_eq!(cat.field(s, AuthorField::Bio)?, Some(FieldValue::from("Hello")));
    Ok(())
}

#[test]
fn dependent_added_after_load_blocks_tombstone() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[])?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;
    let late = cat.add_asset("Uploaded during review", d)?;

    let result = cat.engine.execute(&plan)?;
    assert_eq!(result.failed_at, Some(Phase::Tombstone));
    assert!(matches!(
        result.failures[0].error,
        StorageError::ConstraintViolation(_)
    ));
    assert!(cat.exists(d)?);
    assert_eq!(cat.owner_of(late)?, Some(d));

    // A reload picks the new asset up and the fresh plan goes through.
    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;
    cat.engine.execute(&plan)?.into_result()?;
    assert_eq!(cat.owner_of(late)?, Some(s));
    assert!(!cat.exists(d)?);
    Ok(())
}

#[test]
fn dependent_moved_elsewhere_is_left_alone() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let d = cat.add_author(&[])?;
    let other = cat.add_author(&[(AuthorField::Name, "Someone else".into())])?;
    let asset = cat.add_asset("Forest Tiles", d)?;
    cat.mark_duplicates("jane", &[s, d])?;

    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;
    cat.engine.storage_mut().reassign_dependent(asset, other)?;

    let result = cat.engine.execute(&plan)?;
    assert!(result.is_success(), "{result}");
    assert_eq!(
        result.completed_in(Phase::Reassignment).next().map(|c| c.outcome),
        Some(StepOutcome::Skipped)
    );
    assert_eq!(cat.owner_of(asset)?, Some(other));
    assert!(!cat.exists(d)?);
    Ok(())
}

#[test]
fn dependent_moved_to_another_duplicate_still_reaches_survivor() -> TestResult {
    let mut cat = TestCatalog::new()?;
    let s = cat.add_author(&[(AuthorField::Name, "Jane".into())])?;
    let a = cat.add_author(&[])?;
    let b = cat.add_author(&[])?;
    let asset = cat.add_asset("Forest Tiles", a)?;
    cat.mark_duplicates("jane", &[s, a, b])?;

    let group = cat.load("jane")?.group;
    let plan = cat.engine.compile(&group, &FieldSelection::new())?;
    cat.engine.storage_mut().reassign_dependent(asset, b)?;

    let result = cat.engine.execute(&plan)?;
    assert!(result.is_success(), "{result}");
    assert_eq!(
        result.completed_in(Phase::Reassignment).next().map(|c| c.outcome),
        Some(StepOutcome::Applied)
    );
    assert_eq!(cat.owner_of(asset)?, Some(s));
    assert!(!cat.exists(a)? && !cat.exists(b)?);
    Ok(())
}
