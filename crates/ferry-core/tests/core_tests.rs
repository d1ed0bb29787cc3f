use ferry_core::{
    ConflictResolution, Location, Operation, OperationId, OperationKind, OperationOptions,
    OperationStatus, Priority, QueueConfig, TransferError, TransferRequest,
};
use strum::IntoEnumIterator;

#[test]
fn test_operation_id_display() {
    let id = OperationId::new(42);
    assert_eq!(id, OperationId(42));
    assert_eq!(id.to_string(), "op-42");
}

#[test]
fn test_every_status_has_a_way_out_or_is_final() {
    for status in OperationStatus::iter() {
        let exits: Vec<_> = OperationStatus::iter()
            .filter(|next| status.can_transition_to(*next))
            .collect();

        match status {
            OperationStatus::Completed | OperationStatus::Cancelled => {
                assert!(exits.is_empty(), "{status} should be final")
            }
            _ => assert!(!exits.is_empty(), "{status} should have exits"),
        }
    }
}

#[test]
fn test_cancel_edges() {
    for status in OperationStatus::iter() {
        let expected = matches!(
            status,
            OperationStatus::Pending
                | OperationStatus::Queued
                | OperationStatus::Running
                | OperationStatus::Paused
                | OperationStatus::Failed
        );
        assert_eq!(
            status.can_transition_to(OperationStatus::Cancelled),
            expected,
            "cancel from {status}"
        );
    }
}

#[test]
fn test_retry_budget() {
    let options = OperationOptions::builder()
        .max_retries(1u32)
        .build()
        .unwrap();
    let mut op = Operation::new(
        OperationId::new(7),
        OperationKind::Move,
        "/a",
        Some("/b".to_string()),
        options,
    );

    op.status = OperationStatus::Failed;
    assert!(op.can_retry());

    op.retry_count = 1;
    assert!(!op.can_retry());
}

#[test]
fn test_finish_progress_fills_unknown_totals() {
    let mut op = Operation::new(
        OperationId::new(1),
        OperationKind::Download,
        "s3://acct/x",
        Some("/tmp".to_string()),
        OperationOptions::default(),
    );

    op.record_progress(4096, 2);
    op.finish_progress();

    assert_eq!(op.total_bytes, 4096);
    assert_eq!(op.processed_bytes, op.total_bytes);
    assert_eq!(op.total_files, 2);
    assert!(op.current_file.is_none());
}

#[test]
fn test_operation_serialization() {
    let op = Operation::new(
        OperationId::new(3),
        OperationKind::Archive,
        "/photos",
        Some("/backup/photos.zip".to_string()),
        OperationOptions::default(),
    );

    let json = serde_json::to_string(&op).unwrap();
    let back: Operation = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, op.id);
    assert_eq!(back.kind, OperationKind::Archive);
    assert_eq!(back.options, op.options);
}

#[test]
fn test_config_from_toml() {
    let config: QueueConfig = toml::from_str(
        r#"
        max_concurrent_transfers = 2
        global_speed_limit = 1048576

        [default_options]
        max_retries = 5
        conflict_resolution = "AutoRename"
        "#,
    )
    .unwrap();

    assert_eq!(config.max_concurrent_transfers, 2);
    assert_eq!(config.global_speed_limit, Some(1_048_576));
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.default_options.max_retries, 5);
    assert_eq!(
        config.default_options.conflict_resolution,
        ConflictResolution::AutoRename
    );
    assert!(config.default_options.preserve_timestamps);
}

#[test]
fn test_request_locations() {
    let request = TransferRequest::new(
        OperationKind::Download,
        "gdrive://me/docs/a.txt",
        Some("/tmp/out".to_string()),
    )
    .with_priority(Priority::Critical);

    let source = request.source_location().unwrap();
    assert!(matches!(source, Location::Cloud(ref c) if c.account == "me"));
    assert_eq!(request.priority, Priority::Critical);

    let bad = TransferRequest::copy("gdrive:///docs", "/tmp");
    assert!(matches!(
        bad.source_location(),
        Err(TransferError::InvalidLocation { .. })
    ));
}
