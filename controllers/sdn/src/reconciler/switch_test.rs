//! Unit tests for the Switch reconciler

#[cfg(test)]
mod tests {
    use crate::events::reasons;
    use crate::store::ResourceApi;
    use crate::test_utils::*;
    use crds::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_registers_client_and_reporter() {
        let env = TestEnv::new();
        let switch = create_test_switch("sw1.example.com", None);
        env.switches.insert(switch.clone());

        let action = env.reconciler.reconcile_switch(&switch).await.unwrap();

        assert!(env.devices.get_switch_client("sw1.example.com").is_ok());
        assert!(env.reporter.has_switch("sw1.example.com"));
        assert_eq!(action, kube_runtime::controller::Action::requeue(Duration::from_secs(60)));
        env.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_deleted_switch_releases_client_and_reporter() {
        let env = TestEnv::new();
        let switch = create_test_switch("sw1.example.com", None);
        env.switches.insert(switch.clone());
        env.reconciler.reconcile_switch(&switch).await.unwrap();

        env.switches.delete("sw1.example.com").await.unwrap();
        env.reconciler.reconcile_switch(&switch).await.unwrap();

        assert!(env.devices.get_switch_client("sw1.example.com").is_err());
        assert!(!env.reporter.has_switch("sw1.example.com"));
    }

    #[tokio::test]
    async fn test_pushes_differing_bgp_community() {
        let env = TestEnv::new();
        let switch = create_test_switch("sw1.example.com", Some(200));
        env.switches.insert(switch.clone());

        env.reconciler.reconcile_switch(&switch).await.unwrap();

        assert_eq!(env.mock.write_calls(), vec!["update_bgp_community sw1.example.com 200"]);
        assert_eq!(env.events.with_reason(reasons::BGP_UPDATED).len(), 1);
        env.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_in_sync_and_noop_bgp_are_left_alone() {
        let env = TestEnv::new();
        let mut switch = create_test_switch("sw1.example.com", Some(200));
        env.switches.insert(switch.clone());
        env.switches
            .patch_status(
                "sw1.example.com",
                &json!({"status": {"switchBgpConfigStatus": {"lastObservedBgpCommunity": 200}}}),
            )
            .await
            .unwrap();
        env.reconciler.reconcile_switch(&switch).await.unwrap();

        switch.spec.bgp = Some(BgpConfig { bgp_community: NOOP_BGP_COMMUNITY });
        env.switches.insert(switch.clone());
        env.reconciler.reconcile_switch(&switch).await.unwrap();

        assert!(env.mock.write_calls().is_empty(), "Nothing should be written: {:?}", env.mock.write_calls());
        env.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_maintenance_skips_convergence() {
        let env = TestEnv::new();
        let mut switch = create_test_switch("sw1.example.com", Some(200));
        switch.spec.maintenance = true;
        env.switches.insert(switch.clone());

        env.reconciler.reconcile_switch(&switch).await.unwrap();

        assert!(env.mock.write_calls().is_empty());
        assert!(env.reporter.has_switch("sw1.example.com"), "Reporter keeps observing a switch in maintenance");
        env.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_bgp_failure_is_an_error_with_warning() {
        let env = TestEnv::new();
        let switch = create_test_switch("sw1.example.com", Some(200));
        env.switches.insert(switch.clone());
        env.mock.fail_on("update_bgp_community");

        let result = env.reconciler.reconcile_switch(&switch).await;

        assert!(result.is_err());
        assert_eq!(env.events.with_reason(reasons::BGP_UPDATE_FAILED).len(), 1);
        env.reporter.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_fqdn_is_rejected() {
        let env = TestEnv::new();
        let mut switch = create_test_switch("bad_name.example.com", None);
        switch.metadata.name = Some("bad-name".to_string());
        env.switches.insert(switch.clone());

        let result = env.reconciler.reconcile_switch(&switch).await;
        assert!(matches!(result, Err(crate::error::ControllerError::Validation(_))));
    }
}
