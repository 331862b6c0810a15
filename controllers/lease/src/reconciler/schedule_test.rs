//! Unit tests for the Schedule reconciler

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::BlazarMode;
    use crate::error::ControllerError;
    use crate::k8s::Propagation;
    use crate::test_utils::*;
    use crds::ScheduleStatus;
    use openstack_client::MockCloud;
    use serde_json::json;

    const NOT_AFTER: &str = "2024-08-21T16:00:00Z";
    const TIMER_KEY: &str = "fake-ns/fake-schedule";

    fn found() -> Option<ScheduleStatus> {
        Some(ScheduleStatus {
            ref_exists: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_reconcile_records_ref_and_installs_timer() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        reconciler
            .reconcile_schedule(&fake_schedule(NOT_AFTER, None), at("2024-08-21T15:00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            kube.schedule_status_patches(),
            vec![json!({"status": {"refExists": true, "updatedAt": "2024-08-21T15:00:00Z"}})]
        );
        assert!(reconciler.timers.is_pending(TIMER_KEY));
        assert!(kube.deleted_objects().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_missing_ref_fails() {
        let kube = MockKubeClient::new();
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        let err = reconciler
            .reconcile_schedule(&fake_schedule(NOT_AFTER, None), at("2024-08-21T15:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NotFound(_)));
        assert!(kube.schedule_status_patches().is_empty());
        assert!(!reconciler.timers.is_pending(TIMER_KEY));
    }

    #[tokio::test]
    async fn test_timer_fires_before_not_after() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        // Within 15 minutes of notAfter the timer fires straight away
        reconciler
            .reconcile_schedule(&fake_schedule(NOT_AFTER, None), at("2024-08-21T15:50:00Z"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(kube.deleted_objects(), vec![(schedule_target(), Propagation::Default)]);
        let patches = kube.schedule_status_patches();
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1]["status"]["refDeleteTriggered"], true);
        assert!(!reconciler.timers.is_pending(TIMER_KEY));
    }

    #[tokio::test]
    async fn test_resume_after_delete_triggered_installs_no_timer() {
        let kube = MockKubeClient::new();
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);
        let status = ScheduleStatus {
            ref_exists: true,
            ref_delete_triggered: true,
            updated_at: Some(at(NOT_AFTER)),
        };

        reconciler
            .reconcile_schedule(&fake_schedule(NOT_AFTER, Some(status)), at("2024-08-21T17:00:00Z"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!reconciler.timers.is_pending(TIMER_KEY));
        assert!(kube.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_timer() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        reconciler
            .reconcile_schedule(&fake_schedule("2024-08-21T15:50:00Z", None), at("2024-08-21T15:00:00Z"))
            .await
            .unwrap();
        // Moving notAfter out replaces the pending deletion
        reconciler
            .reconcile_schedule(&fake_schedule("2024-08-22T15:50:00Z", found()), at("2024-08-21T15:00:00Z"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(reconciler.timers.is_pending(TIMER_KEY));
        assert!(kube.deleted_objects().is_empty());
    }

    #[tokio::test]
    async fn test_remove_schedule_cancels_timer() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);
        let schedule = fake_schedule(NOT_AFTER, None);

        reconciler
            .reconcile_schedule(&schedule, at("2024-08-21T15:00:00Z"))
            .await
            .unwrap();
        reconciler.remove_schedule(&schedule);

        assert!(!reconciler.timers.is_pending(TIMER_KEY));
    }

    #[tokio::test]
    async fn test_check_records_ref() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        reconciler
            .check_schedule(&fake_schedule(NOT_AFTER, None), at("2024-08-21T15:00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            kube.schedule_status_patches(),
            vec![json!({"status": {"refExists": true, "updatedAt": "2024-08-21T15:00:00Z"}})]
        );
        assert!(kube.deleted_objects().is_empty());
    }

    #[tokio::test]
    async fn test_check_missing_ref_fails() {
        let kube = MockKubeClient::new();
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        let err = reconciler
            .check_schedule(&fake_schedule(NOT_AFTER, None), at("2024-08-21T17:00:00Z"))
            .await
            .unwrap_err();

        assert!(matches!(err, ControllerError::NotFound(_)));
        assert!(kube.deleted_objects().is_empty());
    }

    #[tokio::test]
    async fn test_check_deletes_expired_ref() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        reconciler
            .check_schedule(&fake_schedule(NOT_AFTER, found()), at(NOT_AFTER))
            .await
            .unwrap();

        assert_eq!(kube.deleted_objects(), vec![(schedule_target(), Propagation::Default)]);
        assert_eq!(
            kube.schedule_status_patches(),
            vec![json!({"status": {"refDeleteTriggered": true, "updatedAt": "2024-08-21T16:00:00Z"}})]
        );
    }

    #[tokio::test]
    async fn test_check_tolerates_ref_already_gone() {
        let kube = MockKubeClient::new();
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);

        reconciler
            .check_schedule(&fake_schedule(NOT_AFTER, found()), at("2024-08-21T16:30:00Z"))
            .await
            .unwrap();

        assert_eq!(kube.schedule_status_patches().len(), 1);
    }

    #[tokio::test]
    async fn test_check_after_delete_triggered_does_nothing() {
        let kube = MockKubeClient::new().with_object(NAMESPACE, &schedule_target());
        let reconciler = reconciler(&kube, &MockCloud::new(), BlazarMode::Auto);
        let status = ScheduleStatus {
            ref_exists: true,
            ref_delete_triggered: true,
            updated_at: Some(at(NOT_AFTER)),
        };

        reconciler
            .check_schedule(&fake_schedule(NOT_AFTER, Some(status)), at("2024-08-21T17:00:00Z"))
            .await
            .unwrap();

        assert!(kube.calls().is_empty());
    }
}
