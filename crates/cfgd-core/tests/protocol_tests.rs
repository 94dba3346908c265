use cfgd_core::prelude::*;
use cfgd_core::{ReadRequestBuilder, Step, StepError};
use cfgd_test_utils::{poll_until_finished, problems, test_repository, FlagStore};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_read_without_validation_returns_body() {
    let repo = test_repository();
    let request = ReadRequestBuilder::new()
        .name("get-security")
        .build_response(|| Ok("ldap".to_string()))
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.outcome().await.unwrap(), Some("ldap".to_string()));
    assert_eq!(task.state(), TaskState::Succeeded);
    assert!(task.problems().is_empty());
    assert_eq!(task.validation(), Validation::Skipped);
}

#[tokio::test]
async fn test_read_reports_filtered_problems() {
    let repo = test_repository();
    let request = ReadRequest::builder()
        .severity(Severity::Error)
        .build_response(|| Ok(7u32))
        .validate_response(|| {
            Ok(problems(&[
                Severity::Warning,
                Severity::Error,
                Severity::Fatal,
            ]))
        })
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.outcome().await.unwrap(), Some(7));

    let reported = task.problems();
    assert_eq!(reported.len(), 2);
    assert!(reported.iter().all(|p| p.severity() >= Severity::Error));
}

#[tokio::test]
async fn test_read_build_failure_skips_validation() {
    let repo = test_repository();
    let validated = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = validated.clone();
    let request = ReadRequest::<u32>::builder()
        .build_response(|| anyhow::bail!("section missing"))
        .validate_response(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(ProblemSet::new())
        })
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Failed);
    assert!(!validated.load(std::sync::atomic::Ordering::SeqCst));
    assert!(matches!(
        task.result(),
        Err(TaskError::Failed { failure, .. }) if failure.step() == Some(Step::Build)
    ));
}

#[tokio::test]
async fn test_flag_with_warning_is_saved() {
    let repo = test_repository();
    let store = FlagStore::new(false);
    let request = store
        .mutation(true, Some(problems(&[Severity::Warning])))
        .reject_at(Severity::Error)
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Succeeded);

    assert!(store.flag());
    assert!(store.saved_flag());
    assert_eq!(store.count("save"), 1);
    assert_eq!(store.count("revert"), 0);
    assert!(!task.is_rejected());
    assert_eq!(task.result().unwrap(), None);

    let reported = task.problems();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported.max_severity(), Some(Severity::Warning));
}

#[tokio::test]
async fn test_flag_with_fatal_is_rejected() {
    let repo = test_repository();
    let store = FlagStore::new(false);
    let request = store
        .mutation(true, Some(problems(&[Severity::Fatal])))
        .reject_at(Severity::Error)
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Succeeded);

    assert!(!store.flag());
    assert_eq!(store.count("save"), 0);
    assert_eq!(store.count("revert"), 1);
    assert!(task.is_rejected());
    assert_eq!(task.stage(), Some(MutationStage::Reverted));
    assert_eq!(task.result().unwrap(), None);

    let reported = task.problems();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported.max_severity(), Some(Severity::Fatal));
}

#[tokio::test]
async fn test_error_at_error_threshold_rejects() {
    let repo = test_repository();
    let store = FlagStore::new(true);
    let request = store
        .mutation(false, Some(problems(&[Severity::Error])))
        .build()
        .unwrap();

    let task = repo.submit(request);
    task.wait().await;

    assert_eq!(store.count("revert"), 1);
    assert_eq!(store.count("save"), 0);
    assert_eq!(task.state(), TaskState::Succeeded);
    assert_eq!(task.problems().len(), 1);
}

#[tokio::test]
async fn test_error_below_report_threshold_is_saved() {
    let repo = test_repository();
    let store = FlagStore::new(false);
    let request = store
        .mutation(true, Some(problems(&[Severity::Error])))
        .severity(Severity::Fatal)
        .reject_at(Severity::Error)
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Succeeded);

    assert!(store.saved_flag());
    assert_eq!(store.log().calls(), vec!["update", "validate", "save"]);
    assert!(!task.is_rejected());
    assert_eq!(task.stage(), Some(MutationStage::Saved));
    assert!(task.validation().ran());
    assert!(task.problems().is_empty());
}

#[tokio::test]
async fn test_rejection_with_failing_revert_fails_task() {
    let repo = test_repository();
    let store = FlagStore::new(false).failing_revert();
    let request = store
        .mutation(true, Some(problems(&[Severity::Fatal])))
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Failed);

    assert_eq!(store.log().calls(), vec!["update", "validate", "revert"]);
    assert!(store.flag());
    assert!(!store.saved_flag());
    assert!(!task.is_rejected());
    assert_eq!(task.stage(), Some(MutationStage::RevertFailed));

    let failure = task.failure().unwrap();
    assert!(matches!(failure.error, StepError::Revert(_)));
    assert!(failure.compensation.is_none());

    let reported = task.problems();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported.max_severity(), Some(Severity::Fatal));
}

#[tokio::test]
async fn test_save_failure_reverts_once_and_fails() {
    let repo = test_repository();
    let store = FlagStore::new(false).failing_save();
    let request = store
        .mutation(true, Some(ProblemSet::new()))
        .build()
        .unwrap();

    let task = repo.submit(request);
    assert_eq!(task.wait().await, TaskState::Failed);

    assert_eq!(store.log().calls(), vec!["update", "validate", "save", "revert"]);
    assert!(!store.flag());
    assert_eq!(task.stage(), Some(MutationStage::Reverted));

    let failure = task.failure().unwrap();
    assert!(matches!(failure.error, StepError::Save(_)));
    assert!(failure.compensation.is_none());
    assert!(failure.to_string().contains("disk full"));
}

#[tokio::test]
async fn test_update_failure_invokes_nothing_else() {
    let repo = test_repository();
    let store = FlagStore::new(false).failing_update();
    let request = store.mutation(true, Some(ProblemSet::new())).build().unwrap();
    let task = repo.submit(request);

    assert_eq!(task.wait().await, TaskState::Failed);
    assert_eq!(store.log().calls(), vec!["update"]);
    assert_eq!(task.stage(), Some(MutationStage::UpdateFailed));
    assert_eq!(task.failure().unwrap().step(), Some(Step::Update));
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let repo = test_repository();
    repo.submit_fn("noise", || Ok(()));

    for _ in 0..32 {
        let id = TaskId::new();
        assert!(matches!(repo.get(id), Err(TaskError::NotFound(missing)) if missing == id));
    }
}

#[tokio::test]
async fn test_poll_after_submit_is_running_or_consistent() {
    let repo = test_repository();
    let store = FlagStore::new(false);
    let request = store
        .mutation(true, Some(problems(&[Severity::Warning])))
        .build()
        .unwrap();
    let task = repo.submit(request);

    let snapshot = repo.snapshot(task.id()).unwrap();
    match snapshot.state {
        TaskState::Running => {
            assert!(snapshot.failure.is_none());
            assert!(snapshot.finished_at.is_none());
        }
        TaskState::Succeeded => {
            assert_eq!(snapshot.stage, Some(MutationStage::Saved));
            assert!(snapshot.finished_at.is_some());
        }
        TaskState::Failed => panic!("healthy mutation reported failed"),
    }

    let finished = poll_until_finished(&repo, task.id(), TIMEOUT).await.unwrap();
    assert_eq!(finished.state, TaskState::Succeeded);
    assert_eq!(finished.stage, Some(MutationStage::Saved));
}

#[tokio::test]
async fn test_typed_lookup() {
    let repo = test_repository();
    let task = repo.submit_fn("count", || Ok(3usize));
    task.wait().await;

    let typed = repo.get_typed::<usize>(task.id()).unwrap();
    assert_eq!(typed.result().unwrap(), Some(3));
    assert!(matches!(
        repo.get_typed::<String>(task.id()),
        Err(TaskError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_panicking_work_fails_task() {
    let repo = test_repository();
    let task = repo.submit_fn::<(), _>("boom", || panic!("worker exploded"));

    assert_eq!(task.wait().await, TaskState::Failed);
    let failure = task.failure().unwrap();
    assert!(matches!(
        failure.error,
        StepError::Panicked { step: Step::Work, ref message } if message.contains("worker exploded")
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_are_independent() {
    let repo = std::sync::Arc::new(test_repository());
    let mut handles = Vec::new();

    for i in 0..50u32 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let task = repo.submit_fn(format!("work-{i}"), move || Ok(i * 2));
            (i, task.id(), task.outcome().await)
        }));
    }

    for handle in handles {
        let (i, id, outcome) = handle.await.unwrap();
        assert_eq!(outcome.unwrap(), Some(i * 2));
        assert_eq!(repo.get(id).unwrap().state(), TaskState::Succeeded);
    }
    assert_eq!(repo.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_lock_serializes_mutations() {
    let repo = test_repository();
    let lock = std::sync::Arc::new(parking_lot::Mutex::new(()));
    let store = FlagStore::new(false);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let request = store
                .mutation(i % 2 == 0, Some(ProblemSet::new()))
                .exclusive(lock.clone())
                .build()
                .unwrap();
            repo.submit(request)
        })
        .collect();

    for task in &tasks {
        assert_eq!(task.wait().await, TaskState::Succeeded);
    }

    // Each protocol runs to completion before the next update starts.
    let calls = store.log().calls();
    assert_eq!(calls.len(), 24);
    for protocol in calls.chunks(3) {
        assert_eq!(protocol, ["update", "validate", "save"]);
    }
    assert_eq!(store.flag(), store.saved_flag());
}
