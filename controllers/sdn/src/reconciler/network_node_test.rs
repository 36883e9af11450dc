//! Unit tests for the NetworkNode reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::events::reasons;
    use crate::reconciler::network_node::network_node_for_switch_port;
    use crate::store::ResourceApi;
    use crate::test_utils::*;
    use crds::*;
    use kube::{Resource, ResourceExt};
    use serde_json::json;

    const SW: &str = "sw1.example.com";
    const SP: &str = "ethernet5.sw1.example.com";

    async fn observe(env: &TestEnv, record: &str, mode: &str, vlan: i64) {
        env.switch_ports
            .patch_status(
                record,
                &json!({"status": {"name": "Ethernet5", "mode": mode, "vlanId": vlan}}),
            )
            .await
            .unwrap();
    }

    fn front_end_readiness(env: &TestEnv, node: &str) -> String {
        env.network_nodes
            .object(node)
            .and_then(|n| n.status)
            .map(|s| s.front_end_fabric_status.readiness)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_switch_port_is_created_and_owned() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());

        env.reconciler.reconcile_network_node(&node).await.unwrap();

        let sp = env.switch_ports.object(SP).expect("SwitchPort should be created");
        assert_eq!(sp.spec.name, "Ethernet5");
        assert_eq!(sp.spec.vlan_id, 100);
        assert_eq!(sp.spec.mode, MODE_ACCESS);
        assert_eq!(sp.labels().get(LABEL_SWITCH_FQDN).map(String::as_str), Some(SW));
        assert_eq!(sp.labels().get(LABEL_NETWORK_NODE).map(String::as_str), Some("node1"));
        assert_eq!(sp.labels().get(LABEL_FABRIC_TYPE).map(String::as_str), Some("frontend"));
        let owner = &sp.owner_references()[0];
        assert_eq!(owner.uid, "networknode-node1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(front_end_readiness(&env, "node1"), "0/1");
    }

    #[tokio::test]
    async fn test_switch_port_needs_known_switch() {
        let env = TestEnv::new();
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());

        let result = env.reconciler.reconcile_network_node(&node).await;

        assert!(matches!(result, Err(ControllerError::NotFound(_))));
        assert!(env.switch_ports.object(SP).is_none());
    }

    #[tokio::test]
    async fn test_unowned_switch_port_is_claimed() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        env.switch_ports.insert(create_test_switch_port(SP, SW, "Ethernet5"));
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());

        env.reconciler.reconcile_network_node(&node).await.unwrap();

        let sp = env.switch_ports.object(SP).unwrap();
        assert_eq!(sp.owner_references().len(), 1);
        assert_eq!(sp.owner_references()[0].uid, "networknode-node1");
        assert_eq!(sp.spec.vlan_id, 100);
        assert_eq!(env.events.with_reason(reasons::VLAN_UPDATE).len(), 1);
    }

    #[tokio::test]
    async fn test_switch_port_owned_by_other_node_is_not_touched() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let node_a = create_test_network_node("nodeA", SP, 100);
        let mut sp = create_test_switch_port(SP, SW, "Ethernet5");
        sp.spec.vlan_id = 100;
        sp.metadata.owner_references = Some(vec![node_a.controller_owner_ref(&()).unwrap()]);
        env.switch_ports.insert(sp);
        let node_b = create_test_network_node("nodeB", SP, 200);
        env.network_nodes.insert(node_b.clone());

        let result = env.reconciler.reconcile_network_node(&node_b).await;

        assert!(matches!(result, Err(ControllerError::OwnershipConflict(_))));
        let warnings = env.events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, reasons::SWITCH_PORT_ALREADY_OWNED);
        assert_eq!(warnings[0].name, "nodeB");
        let sp = env.switch_ports.object(SP).unwrap();
        assert_eq!(sp.spec.vlan_id, 100, "Owned SwitchPort keeps its spec");
        assert_eq!(sp.owner_references()[0].uid, "networknode-nodeA");
        assert!(env.log.for_kind("SwitchPort").is_empty());
    }

    #[tokio::test]
    async fn test_readiness_follows_observed_state() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());

        env.reconciler.reconcile_network_node(&node).await.unwrap();
        assert_eq!(front_end_readiness(&env, "node1"), "0/1");

        observe(&env, SP, MODE_ACCESS, 100).await;
        env.reconciler.reconcile_network_node(&node).await.unwrap();

        assert_eq!(front_end_readiness(&env, "node1"), "1/1");
        let status = env.network_nodes.object("node1").unwrap().status.unwrap();
        assert_eq!(status.front_end_fabric_status.last_observed_vlan_id, 100);
        assert_eq!(status.front_end_fabric_status.last_observed_mode, MODE_ACCESS);
    }

    #[tokio::test]
    async fn test_converged_node_makes_no_writes() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());
        env.reconciler.reconcile_network_node(&node).await.unwrap();
        observe(&env, SP, MODE_ACCESS, 100).await;
        env.reconciler.reconcile_network_node(&node).await.unwrap();

        env.log.clear();
        env.reconciler.reconcile_network_node(&node).await.unwrap();

        assert_eq!(env.log.len(), 0, "Unexpected writes: {:?}", env.log.records());
        assert!(env.mock.calls().is_empty(), "Reconciler never talks to switches directly");
    }

    #[tokio::test]
    async fn test_vlan_change_patches_switch_port_spec() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let node = create_test_network_node("node1", SP, 100);
        env.network_nodes.insert(node.clone());
        env.reconciler.reconcile_network_node(&node).await.unwrap();
        observe(&env, SP, MODE_ACCESS, 100).await;

        let mut moved = env.network_nodes.object("node1").unwrap();
        moved.spec.set_fabric_vlan(Fabric::FrontEnd, 200);
        env.network_nodes.insert(moved.clone());
        env.reconciler.reconcile_network_node(&moved).await.unwrap();

        assert_eq!(env.switch_ports.object(SP).unwrap().spec.vlan_id, 200);
        assert_eq!(env.events.with_reason(reasons::VLAN_UPDATE).len(), 1);
        assert_eq!(front_end_readiness(&env, "node1"), "0/1");
    }

    #[tokio::test]
    async fn test_trunk_port_vlan_is_left_alone() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let mut node = create_test_network_node("node1", SP, 100);
        if let Some(fabric) = node.spec.front_end_fabric.as_mut() {
            fabric.mode = MODE_TRUNK.to_string();
            fabric.trunk_groups = Some(vec!["tg2".to_string(), "tg1".to_string()]);
        }
        env.network_nodes.insert(node.clone());

        env.reconciler.reconcile_network_node(&node).await.unwrap();

        let sp = env.switch_ports.object(SP).unwrap();
        assert_eq!(sp.spec.vlan_id, NOOP_VLAN_ID);
        assert_eq!(sp.spec.trunk_groups, Some(vec!["tg1".to_string(), "tg2".to_string()]));
    }

    #[tokio::test]
    async fn test_multi_port_fabric_counts_each_port() {
        let env = TestEnv::new();
        env.add_switch(SW, None);
        let mut node = create_test_network_node("node1", "", 0);
        node.spec.front_end_fabric = None;
        node.spec.accelerator_fabric = Some(MultiPortFabric {
            switch_ports: vec![
                "ethernet1.sw1.example.com".to_string(),
                "ethernet2.sw1.example.com".to_string(),
            ],
            vlan_id: 300,
            mode: MODE_ACCESS.to_string(),
        });
        env.network_nodes.insert(node.clone());
        env.reconciler.reconcile_network_node(&node).await.unwrap();

        env.switch_ports
            .patch_status(
                "ethernet1.sw1.example.com",
                &json!({"status": {"name": "Ethernet1", "mode": "access", "vlanId": 300}}),
            )
            .await
            .unwrap();
        env.reconciler.reconcile_network_node(&node).await.unwrap();

        let status = env.network_nodes.object("node1").unwrap().status.unwrap();
        assert_eq!(status.accelerator_fabric_status.readiness, "1/2");
        assert_eq!(status.accelerator_fabric_status.switch_ports.len(), 2);
        assert_eq!(status.accelerator_fabric_status.switch_ports[0].last_observed_vlan_id, 300);
        assert_eq!(status.accelerator_fabric_status.switch_ports[1].last_observed_vlan_id, 0);
        let sp = env.switch_ports.object("ethernet2.sw1.example.com").unwrap();
        assert_eq!(sp.labels().get(LABEL_FABRIC_TYPE).map(String::as_str), Some("accelerator"));
    }

    #[test]
    fn test_switch_port_maps_to_its_network_node() {
        let sp = with_label(create_test_switch_port(SP, SW, "Ethernet5"), LABEL_NETWORK_NODE, "node1");
        let node_ref = network_node_for_switch_port(&sp).unwrap();
        assert_eq!(node_ref.name, "node1");
        assert_eq!(node_ref.namespace.as_deref(), Some("idcs-system"));

        let unlabelled = create_test_switch_port(SP, SW, "Ethernet5");
        assert!(network_node_for_switch_port(&unlabelled).is_none());
    }
}
