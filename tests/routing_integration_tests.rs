//! Integration tests for the link-state routing subsystem
//!
//! Several policies exchange flow state through a `MemoryFabric` while
//! paused time drives their periodic tasks.

mod common;

use common::{fast_config, route_of, settle, Cluster};
use ipcp_routing::routing::{AdjacencyState, FsoKey, PullOutcome};
use ipcp_routing::RoutingEvent;

/// Square: 1 -p1- 2 -p2- 3 -p2- 4 -p2- 1
fn square() -> Cluster {
    let cluster = Cluster::start(&[1, 2, 3, 4], fast_config());
    cluster.link(1, 1, 2, 1);
    cluster.link(2, 2, 3, 1);
    cluster.link(3, 2, 4, 1);
    cluster.link(4, 2, 1, 2);
    cluster
}

#[tokio::test(start_paused = true)]
async fn test_line_converges() {
    let cluster = Cluster::start(&[1, 2, 3, 4], fast_config());
    cluster.link(1, 1, 2, 1);
    cluster.link(2, 2, 3, 1);
    cluster.link(3, 2, 4, 1);
    settle(1000).await;

    for address in cluster.addresses() {
        assert_eq!(cluster.policy(address).database().len(), 6, "node {}", address);
        assert_eq!(cluster.node(address).tree.len(), 6, "node {}", address);
    }

    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(route_of(&table, 2), Some((vec![1], 1)));
    assert_eq!(route_of(&table, 3), Some((vec![1], 2)));
    assert_eq!(route_of(&table, 4), Some((vec![1], 3)));

    let table = cluster.policy(4).current_forwarding_table();
    assert_eq!(route_of(&table, 1), Some((vec![1], 3)));

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_square_uses_both_equal_cost_paths() {
    let cluster = square();
    settle(1000).await;

    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(route_of(&table, 2), Some((vec![1], 1)));
    assert_eq!(route_of(&table, 3), Some((vec![1, 2], 2)));
    assert_eq!(route_of(&table, 4), Some((vec![2], 1)));
    assert_eq!(table.lookup(3).len(), 2);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sink_receives_every_table() {
    let cluster = square();
    settle(1000).await;

    let node = cluster.node(2);
    assert_eq!(node.sink.count() as u64, node.policy.recompute_count());
    assert_eq!(
        node.sink.latest().as_deref(),
        Some(&*node.policy.current_forwarding_table())
    );

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_down_reroutes_and_purges() {
    let cluster = square();
    settle(1000).await;

    cluster.unlink(1, 1, 2, 1);
    settle(1000).await;

    assert_eq!(cluster.policy(1).adjacency_state(2), Some(AdjacencyState::Withdrawn));

    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(route_of(&table, 2), Some((vec![2], 3)));
    assert_eq!(route_of(&table, 3), Some((vec![2], 2)));

    let table = cluster.policy(2).current_forwarding_table();
    assert_eq!(route_of(&table, 1), Some((vec![2], 3)));

    // Withdrawals are gone everywhere once flooded
    for address in cluster.addresses() {
        let policy = cluster.policy(address);
        assert_eq!(policy.database().len(), 6, "node {}", address);
        assert!(policy.database().get(&FsoKey::new(1, 2, 1)).is_none());
        assert!(policy.database().get(&FsoKey::new(2, 1, 1)).is_none());
        assert_eq!(cluster.node(address).tree.len(), 6, "node {}", address);
    }

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_free_alternates_in_triangle() {
    let cluster = Cluster::start(&[1, 2, 3], fast_config().with_loop_free_alternates(true));
    cluster.link(1, 1, 2, 1);
    cluster.link(1, 2, 3, 1);
    cluster.link(2, 2, 3, 2);
    settle(1000).await;

    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(table.ports(2, 1), &[1]);
    assert_eq!(table.alternates(2, 1), &[2]);
    assert_eq!(table.ports(3, 1), &[2]);
    assert_eq!(table.alternates(3, 1), &[1]);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_enrolling_node_pulls_full_state() {
    let mut cluster = Cluster::start(&[1, 2, 3], fast_config());
    cluster.link(1, 1, 2, 1);
    cluster.link(2, 2, 3, 1);
    settle(1000).await;

    cluster.add_node(5);
    cluster.fabric.connect(5, 1, 1, 3);
    cluster.policy(1).on_enrollment_started(5, false).unwrap();
    cluster.policy(5).on_enrollment_started(1, true).unwrap();
    settle(100).await;

    // The pull alone brings the whole database over
    assert_eq!(cluster.policy(5).database().len(), 4);
    assert!(cluster.node(5).events.lock().iter().any(|e| matches!(
        e,
        RoutingEvent::FullStatePullFinished {
            port: 1,
            outcome: PullOutcome::Complete
        }
    )));
    assert_eq!(cluster.policy(5).pending_pulls(), 0);

    cluster.policy(5).adjacency_up(1, 1, 3).unwrap();
    cluster.policy(1).adjacency_up(5, 3, 1).unwrap();
    settle(1000).await;

    let table = cluster.policy(5).current_forwarding_table();
    assert_eq!(route_of(&table, 3), Some((vec![1], 3)));
    let table = cluster.policy(3).current_forwarding_table();
    assert_eq!(route_of(&table, 5), Some((vec![1], 3)));

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refreshed_links_survive_and_silent_node_expires() {
    let cluster = Cluster::start(&[1, 2, 3], fast_config().with_max_age(10));
    cluster.link(1, 1, 2, 1);
    cluster.link(2, 2, 3, 1);

    // Many times the maximum age: refreshing keeps everything alive
    settle(5000).await;
    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(route_of(&table, 3), Some((vec![1], 2)));
    assert!(!cluster
        .node(1)
        .events
        .lock()
        .iter()
        .any(|e| matches!(e, RoutingEvent::LinkExpired { .. })));

    cluster.silence(3).await;
    settle(3000).await;

    let table = cluster.policy(1).current_forwarding_table();
    assert_eq!(route_of(&table, 3), None);
    assert_eq!(route_of(&table, 2), Some((vec![1], 1)));
    assert!(cluster
        .policy(2)
        .database()
        .get(&FsoKey::new(3, 2, 1))
        .is_none());
    assert!(cluster.node(2).events.lock().iter().any(|e| matches!(
        e,
        RoutingEvent::LinkExpired { key } if *key == FsoKey::new(3, 2, 1)
    )));

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_node() {
    let cluster = square();
    settle(200).await;
    cluster.shutdown().await;

    for address in cluster.addresses() {
        let node = cluster.node(address);
        assert!(!node.policy.is_running());
        assert!(matches!(
            node.events.lock().last(),
            Some(RoutingEvent::PolicyStopped)
        ));
    }
}
