use std::{net::Ipv4Addr, sync::Arc, thread};

use fipqos_agent::{AgentMode, Error, ExtensionOptions, HaState, RpcError};
use fipqos_common::{BandwidthLimitRule, Direction, QosPolicy, RateLimit, Router};

use crate::common::*;

#[test]
fn add_router_applies_policy() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[
            set(Direction::Ingress, TEST_QOS_FIP, 1111, 2222),
            set(Direction::Egress, TEST_QOS_FIP, 3333, 4444),
        ],
    );

    let devices = h.factory.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "qg-e3a1e8c4-2f");
    assert_eq!(devices[0].namespace.as_deref(), Some(format!("qrouter-{ROUTER_ID}").as_str()));

    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY));
    h.ext.with_maps(|maps| {
        assert_eq!(
            maps.get_fip_ratelimit(Direction::Ingress, TEST_QOS_FIP),
            Some(RateLimit::new(1111, 2222))
        );
        assert_eq!(maps.find_fip_router_id(TEST_QOS_FIP).map(String::as_str), Some(ROUTER_ID));
    });

    assert_eq!(h.ext.stats().limits_set(), 2);
}

#[test]
fn add_router_without_gateway_is_skipped() {
    let h = Harness::new();
    let router = Router::new(ROUTER_ID).with_floating_ips(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    h.add_router(&router);

    assert!(h.factory.devices().is_empty());
    assert!(h.limiter().calls().is_empty());
    assert_eq!(h.pull.pulls(), 0);
}

#[test]
fn distributed_router_on_compute_node_is_skipped() {
    let h = Harness::with_options(ExtensionOptions::default().with_agent_mode(AgentMode::Dvr));
    let mut router = router(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    router.distributed = true;
    h.add_router(&router);

    assert!(h.limiter().calls().is_empty());
}

#[test]
fn update_router_reapplies_unchanged_limits() {
    let h = Harness::new();
    let router = router(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    h.add_router(&router);
    h.update_router(&router);

    assert_eq!(h.limiter().calls().len(), 4);
    // Setting replaces the filter, so each direction still has exactly one.
    assert_eq!(h.limiter().filters(Direction::Ingress).len(), 1);
    assert_eq!(h.limiter().filters(Direction::Egress).len(), 1);
    // The gateway device is resolved once per router.
    assert_eq!(h.factory.devices().len(), 1);
}

#[test]
fn fip_qos_changed_to_other_policy() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();

    h.update_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY_EGRESS))]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[
            clear(Direction::Ingress, TEST_QOS_FIP),
            set(Direction::Egress, TEST_QOS_FIP, 5555, 6666),
        ],
    );
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY_EGRESS));
    // Nothing references the old policy anymore.
    h.ext.with_maps(|maps| assert!(maps.get_policy(POLICY).is_none()));
}

#[test]
fn fip_qos_changed_to_none() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();

    h.update_router(&router(vec![fip(TEST_QOS_FIP, None)]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[clear(Direction::Ingress, TEST_QOS_FIP), clear(Direction::Egress, TEST_QOS_FIP)],
    );
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP), None);
    h.ext.with_maps(|maps| {
        assert!(maps.known_policies().is_empty());
        assert!(maps.fip_directions(TEST_QOS_FIP).is_empty());
        // Still a member of the router.
        assert!(maps.router_floating_ips(ROUTER_ID).unwrap().contains(&TEST_QOS_FIP));
    });
    assert_eq!(h.ext.stats().limits_cleared(), 2);
}

#[test]
fn fip_without_policy_and_limits_is_untouched() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, None)]));
    h.update_router(&router(vec![fip(TEST_QOS_FIP, None)]));

    assert!(h.limiter().calls().is_empty());
}

#[test]
fn fip_removed_from_router() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();

    h.update_router(&router(vec![]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[clear(Direction::Ingress, TEST_QOS_FIP), clear(Direction::Egress, TEST_QOS_FIP)],
    );
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP), None);
    h.ext.with_maps(|maps| assert!(maps.find_fip_router_id(TEST_QOS_FIP).is_none()));
}

#[test]
fn failed_removal_is_retried_on_next_update() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();
    h.limiter().fail_clears(TEST_QOS_FIP, true);

    let err = h.ext.update_router(&h.context, &router(vec![])).unwrap_err();
    assert!(matches!(err, Error::Tc(_)));
    h.ext.with_maps(|maps| {
        // Kept until its limits are gone.
        assert!(maps.router_floating_ips(ROUTER_ID).unwrap().contains(&TEST_QOS_FIP));
        assert_eq!(maps.fip_directions(TEST_QOS_FIP).len(), 2);
    });
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY));

    h.limiter().fail_clears(TEST_QOS_FIP, false);
    h.update_router(&router(vec![]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[clear(Direction::Ingress, TEST_QOS_FIP), clear(Direction::Egress, TEST_QOS_FIP)],
    );
    assert!(h.limiter().filters(Direction::Ingress).is_empty());
    h.ext.with_maps(|maps| {
        assert!(maps.router_floating_ips(ROUTER_ID).unwrap().is_empty());
        assert!(maps.fip_policies().is_empty());
        assert!(maps.known_policies().is_empty());
        assert!(maps.fip_directions(TEST_QOS_FIP).is_empty());
    });
    assert_eq!(h.ext.stats().failures(), 1);
}

#[test]
fn policy_rules_removed() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();

    h.pull.insert(QosPolicy::new(POLICY, "test-policy"));
    h.update_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[clear(Direction::Ingress, TEST_QOS_FIP), clear(Direction::Egress, TEST_QOS_FIP)],
    );
    // The binding survives so that rules added later are applied.
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY));
}

#[test]
fn rule_without_burst_uses_zero() {
    let h = Harness::new();
    h.pull.insert(
        QosPolicy::new("no-burst", "")
            .with_rules(vec![BandwidthLimitRule::new(Direction::Ingress, 1000).into()]),
    );
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some("no-burst"))]));

    assert_eq!(h.limiter().calls(), [set(Direction::Ingress, TEST_QOS_FIP, 1000, 0)]);
}

#[test]
fn dscp_only_policy_sets_no_limits() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY_DSCP))]));

    assert!(h.limiter().calls().is_empty());
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY_DSCP));
}

#[test]
fn fips_with_different_policies() {
    let h = Harness::new();
    h.add_router(&router(vec![
        fip(TEST_QOS_FIP, Some(POLICY)),
        fip(TEST_QOS_FIP2, Some(POLICY_EGRESS)),
    ]));

    assert_calls_any_order(
        h.limiter().calls(),
        &[
            set(Direction::Ingress, TEST_QOS_FIP, 1111, 2222),
            set(Direction::Egress, TEST_QOS_FIP, 3333, 4444),
            set(Direction::Egress, TEST_QOS_FIP2, 5555, 6666),
        ],
    );
    h.ext.with_maps(|maps| {
        assert_eq!(maps.get_fips(POLICY).collect::<Vec<_>>(), [TEST_QOS_FIP]);
        assert_eq!(maps.get_fips(POLICY_EGRESS).collect::<Vec<_>>(), [TEST_QOS_FIP2]);
    });
}

#[test]
fn delete_router_clears_limits() {
    let h = Harness::new();
    let router = router(vec![
        fip(TEST_QOS_FIP, Some(POLICY)),
        fip(TEST_QOS_FIP2, Some(POLICY_EGRESS)),
    ]);
    h.add_router(&router);
    h.limiter().reset_calls();

    h.ext.delete_router(&h.context, &router).unwrap();

    assert_calls_any_order(
        h.limiter().calls(),
        &[
            clear(Direction::Ingress, TEST_QOS_FIP),
            clear(Direction::Egress, TEST_QOS_FIP),
            clear(Direction::Egress, TEST_QOS_FIP2),
        ],
    );
    h.ext.with_maps(|maps| {
        assert!(maps.fip_policies().is_empty());
        assert!(maps.known_policies().is_empty());
        assert!(maps.router_floating_ips(ROUTER_ID).is_none());
    });

    // A new add resolves the device again.
    h.add_router(&router);
    assert_eq!(h.factory.devices().len(), 2);
}

#[test]
fn delete_router_continues_past_clear_failure() {
    let h = Harness::new();
    let router = router(vec![
        fip(TEST_QOS_FIP, Some(POLICY)),
        fip(TEST_QOS_FIP2, Some(POLICY_EGRESS)),
    ]);
    h.add_router(&router);
    h.limiter().reset_calls();
    h.limiter().fail_clears(TEST_QOS_FIP, true);

    let err = h.ext.delete_router(&h.context, &router).unwrap_err();

    assert!(matches!(
        err,
        Error::Tc(fipqos_tc::Error::FilterIdForIpNotFound { ip }) if ip == TEST_QOS_FIP
    ));
    assert_eq!(h.limiter().calls(), [clear(Direction::Egress, TEST_QOS_FIP2)]);
    // The index forgets both floating IPs regardless.
    h.ext.with_maps(|maps| {
        assert!(maps.fip_policies().is_empty());
        assert!(maps.known_policies().is_empty());
        assert!(maps.fip_directions(TEST_QOS_FIP).is_empty());
        assert!(maps.fip_directions(TEST_QOS_FIP2).is_empty());
        assert!(maps.router_floating_ips(ROUTER_ID).is_none());
    });
    assert_eq!(h.ext.stats().failures(), 1);
}

#[test]
fn delete_unknown_router() {
    let h = Harness::new();
    h.ext.delete_router(&h.context, &router(vec![fip(TEST_QOS_FIP, Some(POLICY))])).unwrap();

    assert!(h.limiter().calls().is_empty());
}

#[test]
fn missing_policy_fails_router_event() {
    let h = Harness::new();
    h.pull.remove(POLICY);

    let router = router(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    let err = h.ext.add_router(&h.context, &router).unwrap_err();

    assert!(matches!(err, Error::Rpc(RpcError::NotFound { ref id, .. }) if id == POLICY));
    assert!(h.limiter().calls().is_empty());
    assert_eq!(h.ext.stats().failures(), 1);
}

#[test]
fn tc_failure_fails_router_event() {
    let h = Harness::new();
    h.limiter().fail_sets(true);

    let router = router(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    let err = h.ext.add_router(&h.context, &router).unwrap_err();

    assert!(matches!(err, Error::Tc(_)));
    // Nothing was recorded for the failed direction.
    h.ext.with_maps(|maps| assert!(maps.fip_directions(TEST_QOS_FIP).is_empty()));

    h.limiter().fail_sets(false);
    h.update_router(&router);
    assert_eq!(h.limiter().calls().len(), 2);
}

#[test]
fn add_router_deletes_stale_filters() {
    let h = Harness::new();
    h.limiter().seed(Direction::Ingress, Some(TEST_QOS_FIP2), "800::7f0");
    h.limiter().seed(Direction::Egress, None, "800::7f1");

    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));

    let calls = h.limiter().calls();
    assert!(calls.contains(&Call::Delete {
        direction: Direction::Ingress,
        filter_ids: vec!["800::7f0".to_string()],
    }));
    assert!(calls.contains(&Call::Delete {
        direction: Direction::Egress,
        filter_ids: vec!["800::7f1".to_string()],
    }));

    assert_eq!(h.limiter().filters(Direction::Ingress).len(), 1);
    assert_eq!(h.limiter().filters(Direction::Egress).len(), 1);
}

#[test]
fn first_update_deletes_stale_filters_once() {
    let h = Harness::new();
    h.limiter().seed(Direction::Ingress, Some(TEST_QOS_FIP2), "800::7f0");

    // The add was missed, the first event for the router is an update.
    let router = router(vec![fip(TEST_QOS_FIP, Some(POLICY))]);
    h.update_router(&router);

    assert!(h.limiter().calls().contains(&Call::Delete {
        direction: Direction::Ingress,
        filter_ids: vec!["800::7f0".to_string()],
    }));
    assert_eq!(h.limiter().filters(Direction::Ingress).len(), 1);

    h.limiter().reset_calls();
    h.limiter().seed(Direction::Ingress, Some(TEST_QOS_FIP2), "800::7f2");
    h.update_router(&router);

    assert!(!h.limiter().calls().iter().any(|call| matches!(call, Call::Delete { .. })));
    assert!(h.limiter().filters(Direction::Ingress).contains(&"800::7f2".to_string()));
}

#[test]
fn stale_filters_kept_without_sync() {
    let h = Harness::with_options(ExtensionOptions::default().with_sync_stale_filters(false));
    h.limiter().seed(Direction::Ingress, Some(TEST_QOS_FIP2), "800::7f0");

    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));

    assert_eq!(h.limiter().calls().len(), 2);
    assert!(h.limiter().filters(Direction::Ingress).contains(&"800::7f0".to_string()));
}

#[test]
fn ha_state_change_is_a_noop() {
    let h = Harness::new();
    h.add_router(&router(vec![fip(TEST_QOS_FIP, Some(POLICY))]));
    h.limiter().reset_calls();

    h.ext.ha_state_change(&h.context, ROUTER_ID, HaState::Backup);

    assert!(h.limiter().calls().is_empty());
    assert_eq!(h.fip_policy_id(TEST_QOS_FIP).as_deref(), Some(POLICY));
}

#[test]
fn concurrent_router_events_keep_index_consistent() {
    let h = Harness::new();

    let workers: Vec<_> = (1..=4u8)
        .map(|i| {
            let ext = Arc::clone(&h.ext);
            let context = h.context.clone();
            thread::spawn(move || {
                let address = Ipv4Addr::new(10, 0, 0, i);
                let with = |policy_id: Option<&str>| {
                    Router::new(format!("router-{i}"))
                        .with_gateway(GW_PORT_ID)
                        .with_floating_ips(vec![fip(address, policy_id)])
                };

                for round in 0..20 {
                    ext.add_router(&context, &with(Some(POLICY))).unwrap();
                    ext.update_router(&context, &with(Some(POLICY_EGRESS))).unwrap();
                    ext.update_router(&context, &with(None)).unwrap();
                    ext.update_router(&context, &with(Some(POLICY))).unwrap();
                    if round % 2 == 0 {
                        ext.delete_router(&context, &with(None)).unwrap();
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    h.ext.with_maps(|maps| {
        for i in 1..=4u8 {
            let address = Ipv4Addr::new(10, 0, 0, i);
            let router_id = format!("router-{i}");
            assert_eq!(maps.fip_policies().get(&address).map(String::as_str), Some(POLICY));
            assert_eq!(maps.find_fip_router_id(address), Some(&router_id));
            assert_eq!(maps.fip_directions(address), Direction::ALL);
        }
        for (address, policy_id) in maps.fip_policies() {
            assert!(maps.known_policies().contains_key(policy_id));
            assert!(maps.get_fips(policy_id).any(|fip| fip == *address));
        }
        assert_eq!(maps.known_policies().len(), 1);
    });
    assert_eq!(h.ext.stats().failures(), 0);
}
