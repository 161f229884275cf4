//! Lifecycle integration tests
//!
//! Drive [`SorterLifecycle`] end to end with the in-process mock adapter:
//! partitioning, staging order, sequential and parallel execution, result
//! assembly and cleanup.

mod helpers;

use helpers::{grouped_recording, plain_recording, Event, MockSorter};
use serde_json::json;
use spikesort_common::property::GROUP_PROPERTY;
use spikesort_common::{InMemoryRecording, PropertyValue, Recording, Sorting};
use spikesort_sorters::{
    Installation, LifecycleState, SorterAdapter, SorterError, SorterLifecycle, SorterOptions,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn installed() -> Installation {
    Installation {
        path: None,
        installed: true,
    }
}

fn options(base: &Path) -> SorterOptions {
    SorterOptions {
        output_folder: Some(base.to_path_buf()),
        ..Default::default()
    }
}

fn grouped_options(base: &Path, parallel: bool) -> SorterOptions {
    SorterOptions {
        output_folder: Some(base.to_path_buf()),
        grouping_property: Some(GROUP_PROPERTY.to_string()),
        parallel,
        ..Default::default()
    }
}

fn group_tags(sorting: &dyn Sorting) -> Vec<Option<PropertyValue>> {
    sorting
        .unit_ids()
        .into_iter()
        .map(|u| sorting.unit_property(u, GROUP_PROPERTY))
        .collect()
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_not_installed_fails_before_creating_folders() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("out");
    let mock = MockSorter::new("mock").shared();

    let result = SorterLifecycle::new(
        mock,
        Installation::default(),
        plain_recording(2),
        options(&base),
    );

    match result {
        Err(SorterError::Installation { sorter, message }) => {
            assert_eq!(sorter, "mock");
            assert_eq!(message, "install the mock sorter");
        }
        other => panic!("expected installation error, got {:?}", other.err()),
    }
    assert!(!base.exists());
}

#[test]
fn test_missing_locations_rejected() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").requiring_locations().shared();

    let result = SorterLifecycle::new(mock, installed(), plain_recording(2), options(temp.path()));
    assert!(matches!(result, Err(SorterError::Configuration(_))));
}

#[test]
fn test_locations_satisfy_requirement() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").requiring_locations().shared();
    let mut rec = InMemoryRecording::new(vec![vec![0.0; 10]; 2], 30000.0).unwrap();
    rec.set_channel_locations(&[vec![0.0, 0.0], vec![0.0, 20.0]]).unwrap();

    assert!(SorterLifecycle::new(mock, installed(), rec.into_shared(), options(temp.path())).is_ok());
}

#[test]
fn test_missing_grouping_property_rejected() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();

    let result = SorterLifecycle::new(
        mock,
        installed(),
        plain_recording(4),
        grouped_options(temp.path(), false),
    );
    match result {
        Err(SorterError::Configuration(message)) => assert!(message.contains("group")),
        other => panic!("expected configuration error, got {:?}", other.err()),
    }
}

#[test]
fn test_partition_folders_created_eagerly() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("sorted");
    let mock = MockSorter::new("mock").shared();

    let lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[3, 1, 3, 2]),
        grouped_options(&base, false),
    )
    .unwrap();

    let partitions = lifecycle.partitions();
    assert_eq!(partitions.len(), 3);
    for (i, partition) in partitions.iter().enumerate() {
        assert_eq!(partition.index, i);
        assert_eq!(partition.output_folder, base.join(i.to_string()));
        assert!(partition.output_folder.is_dir());
    }

    // Ascending group values
    let groups: Vec<_> = partitions.iter().map(|p| p.group.clone()).collect();
    assert_eq!(
        groups,
        vec![
            Some(PropertyValue::Int(1)),
            Some(PropertyValue::Int(2)),
            Some(PropertyValue::Int(3)),
        ]
    );
    assert_eq!(partitions[2].recording.channel_ids(), vec![0, 2]);
    assert_eq!(lifecycle.state(), LifecycleState::Configured);
}

#[test]
fn test_single_group_uses_base_folder() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();

    let lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[5, 5]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    assert_eq!(lifecycle.partitions().len(), 1);
    assert_eq!(lifecycle.partitions()[0].output_folder, temp.path());
}

// ============================================================================
// Parameters
// ============================================================================

#[test]
fn test_set_params_is_all_or_nothing() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle =
        SorterLifecycle::new(mock, installed(), plain_recording(1), options(temp.path())).unwrap();

    let result = lifecycle.set_params([("a", json!(1)), ("zz", json!(2)), ("yy", json!(3))]);
    match result {
        Err(SorterError::Validation { bad_params }) => assert_eq!(bad_params, vec!["zz", "yy"]),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(lifecycle.params().get("a"), Some(&json!(0)));

    lifecycle.set_params([("a", json!(7))]).unwrap();
    assert_eq!(lifecycle.params().get("a"), Some(&json!(7)));
    assert_eq!(lifecycle.params().get("b"), Some(&json!("x")));
}

#[test]
fn test_default_params_are_independent_copies() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle =
        SorterLifecycle::new(mock, installed(), plain_recording(1), options(temp.path())).unwrap();

    let mut first = lifecycle.default_params();
    first.update_checked([("a", json!(99))]).unwrap();
    lifecycle.set_params([("a", json!(5))]).unwrap();

    assert_eq!(lifecycle.default_params().get("a"), Some(&json!(0)));
}

// ============================================================================
// Run and collect
// ============================================================================

#[tokio::test]
async fn test_single_partition_result_returned_untagged() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle =
        SorterLifecycle::new(mock, installed(), plain_recording(2), options(temp.path())).unwrap();

    lifecycle.set_params([("a", json!(3))]).unwrap();
    let elapsed = lifecycle.run().await.unwrap();
    assert!(elapsed < Duration::from_secs(60));
    assert_eq!(lifecycle.state(), LifecycleState::Completed);

    let staged: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(temp.path().join("staged.json")).unwrap())
            .unwrap();
    assert_eq!(staged["a"], json!(3));

    let sorting = lifecycle.get_result().unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Collected);
    assert_eq!(sorting.unit_ids(), vec![0, 1]);
    assert_eq!(sorting.unit_spike_train(1), Some(vec![1]));
    assert_eq!(sorting.sampling_frequency(), Some(30000.0));
    assert_eq!(group_tags(sorting.as_ref()), vec![None, None]);
}

#[tokio::test]
async fn test_single_partition_without_output_is_error() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").empty_on(0).shared();
    let mut lifecycle =
        SorterLifecycle::new(mock, installed(), plain_recording(2), options(temp.path())).unwrap();

    lifecycle.run().await.unwrap();
    match lifecycle.get_result() {
        Err(SorterError::NoOutput { sorter, folder }) => {
            assert_eq!(sorter, "mock");
            assert_eq!(folder, temp.path());
        }
        other => panic!("expected no-output error, got {:?}", other.map(|s| s.num_units())),
    }
}

#[tokio::test]
async fn test_grouped_results_tagged_in_partition_order() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 0, 1, 1, 2, 2]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();

    let list = lifecycle.get_result_list().unwrap();
    assert_eq!(list.len(), 3);
    assert!(list.iter().all(|r| r.is_some()));

    let sorting = lifecycle.get_result().unwrap();
    assert_eq!(sorting.num_units(), 6);
    assert_eq!(
        group_tags(sorting.as_ref()),
        [0, 0, 1, 1, 2, 2]
            .into_iter()
            .map(|g| Some(PropertyValue::Int(g)))
            .collect::<Vec<_>>()
    );
    // Partition 2 sorted channels 4 and 5
    assert_eq!(sorting.unit_spike_train(5), Some(vec![2005]));
}

#[tokio::test]
async fn test_parallel_matches_sequential() {
    let seq_dir = TempDir::new().unwrap();
    let par_dir = TempDir::new().unwrap();
    let groups = [4, 4, 9, 9, 1];

    let mut sequential = SorterLifecycle::new(
        MockSorter::new("mock").shared(),
        installed(),
        grouped_recording(&groups),
        grouped_options(seq_dir.path(), false),
    )
    .unwrap();
    let mut parallel = SorterLifecycle::new(
        MockSorter::new("mock")
            .delay_on(0, Duration::from_millis(50))
            .shared(),
        installed(),
        grouped_recording(&groups),
        grouped_options(par_dir.path(), true),
    )
    .unwrap();

    sequential.run().await.unwrap();
    parallel.run().await.unwrap();
    let a = sequential.get_result().unwrap();
    let b = parallel.get_result().unwrap();

    assert_eq!(a.num_units(), b.num_units());
    assert_eq!(group_tags(a.as_ref()), group_tags(b.as_ref()));
    for unit in a.unit_ids() {
        assert_eq!(a.unit_spike_train(unit), b.unit_spike_train(unit));
    }
}

#[tokio::test]
async fn test_sequential_runs_one_partition_at_a_time() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();

    assert_eq!(
        mock.events(),
        vec![
            Event::Setup(0),
            Event::Setup(1),
            Event::RunStart(0),
            Event::RunEnd(0),
            Event::RunStart(1),
            Event::RunEnd(1),
        ]
    );
}

#[tokio::test]
async fn test_staging_runs_off_the_runtime_thread() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();

    // #[tokio::test] drives the future on this thread
    let runtime_thread = std::thread::current().id();
    let threads = mock.setup_threads();
    assert_eq!(threads.len(), 2);
    assert!(threads.iter().all(|t| *t != runtime_thread));
}

#[tokio::test]
async fn test_parallel_stages_everything_before_running() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1, 2, 3]),
        grouped_options(temp.path(), true),
    )
    .unwrap();

    lifecycle.run().await.unwrap();

    let events = mock.events();
    assert_eq!(events.len(), 12);
    let last_setup = events
        .iter()
        .rposition(|e| matches!(e, Event::Setup(_)))
        .unwrap();
    let first_run = events
        .iter()
        .position(|e| matches!(e, Event::RunStart(_)))
        .unwrap();
    assert!(last_setup < first_run);
    assert_eq!(
        &events[..4],
        &[Event::Setup(0), Event::Setup(1), Event::Setup(2), Event::Setup(3)]
    );
}

#[tokio::test]
async fn test_parallel_partitions_overlap() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock")
        .delay_on(0, Duration::from_millis(200))
        .shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), true),
    )
    .unwrap();

    lifecycle.run().await.unwrap();

    let events = mock.events();
    let start_1 = events.iter().position(|e| *e == Event::RunStart(1)).unwrap();
    let end_0 = events.iter().position(|e| *e == Event::RunEnd(0)).unwrap();
    assert!(start_1 < end_0, "partition 1 waited for partition 0: {:?}", events);
}

#[tokio::test]
async fn test_parallel_failure_waits_for_all_partitions() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock")
        .failing_on(0)
        .delay_on(1, Duration::from_millis(100))
        .delay_on(2, Duration::from_millis(150))
        .shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1, 2]),
        grouped_options(temp.path(), true),
    )
    .unwrap();

    let err = lifecycle.run().await.unwrap_err();
    assert!(matches!(err, SorterError::ExternalTool { .. }));

    let events = mock.events();
    assert!(events.contains(&Event::RunEnd(1)));
    assert!(events.contains(&Event::RunEnd(2)));
    assert_eq!(lifecycle.state(), LifecycleState::Executing);

    // Finished partitions left their output behind
    assert!(temp.path().join("1").join("units.json").is_file());
    assert!(temp.path().join("2").join("units.json").is_file());
}

#[tokio::test]
async fn test_parallel_reports_lowest_failing_partition() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock")
        .failing_on(0)
        .failing_on(2)
        .delay_on(0, Duration::from_millis(100))
        .shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 1, 2]),
        grouped_options(temp.path(), true),
    )
    .unwrap();

    match lifecycle.run().await {
        Err(SorterError::ExternalTool { stderr, .. }) => assert_eq!(stderr, "partition 0 failed"),
        other => panic!("expected external tool error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sequential_failure_stops_remaining_partitions() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").failing_on(0).shared();
    let mut lifecycle = SorterLifecycle::new(
        Arc::clone(&mock) as Arc<dyn SorterAdapter>,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    assert!(lifecycle.run().await.is_err());
    assert!(!mock.events().contains(&Event::RunStart(1)));
}

#[tokio::test]
async fn test_partitions_without_output_are_dropped_from_merge() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").empty_on(1).shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 1, 2]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();
    let sorting = lifecycle.get_result().unwrap();

    assert_eq!(sorting.num_units(), 2);
    assert_eq!(
        group_tags(sorting.as_ref()),
        vec![Some(PropertyValue::Int(0)), Some(PropertyValue::Int(2))]
    );
    assert_eq!(sorting.unit_spike_train(1), Some(vec![2002]));
}

#[tokio::test]
async fn test_all_partitions_empty_gives_empty_merge() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").empty_on(0).empty_on(1).shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();
    let sorting = lifecycle.get_result().unwrap();
    assert_eq!(sorting.num_units(), 0);
    assert_eq!(sorting.sampling_frequency(), Some(30000.0));
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_delete_output_folder_removes_everything() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("work");
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 1]),
        SorterOptions {
            delete_output_folder: true,
            ..grouped_options(&base, false)
        },
    )
    .unwrap();

    lifecycle.run().await.unwrap();
    let sorting = lifecycle.get_result().unwrap();

    assert_eq!(sorting.num_units(), 2);
    assert_eq!(lifecycle.state(), LifecycleState::Cleaned);
    assert!(!base.join("0").exists());
    assert!(!base.join("1").exists());
    assert!(!base.exists());
}

#[tokio::test]
async fn test_cleanup_runs_even_without_output() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("work");
    let mock = MockSorter::new("mock").empty_on(0).shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        plain_recording(1),
        SorterOptions {
            delete_output_folder: true,
            ..options(&base)
        },
    )
    .unwrap();

    lifecycle.run().await.unwrap();
    assert!(matches!(lifecycle.get_result(), Err(SorterError::NoOutput { .. })));
    assert!(!base.exists());
}

#[tokio::test]
async fn test_folders_kept_by_default() {
    let temp = TempDir::new().unwrap();
    let mock = MockSorter::new("mock").shared();
    let mut lifecycle = SorterLifecycle::new(
        mock,
        installed(),
        grouped_recording(&[0, 1]),
        grouped_options(temp.path(), false),
    )
    .unwrap();

    lifecycle.run().await.unwrap();
    lifecycle.get_result().unwrap();
    assert!(temp.path().join("0").join("units.json").is_file());
    assert_eq!(lifecycle.state(), LifecycleState::Collected);
}
