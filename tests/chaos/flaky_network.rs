//! Chaos test: unreachable processes.
//!
//! Sends to a process marked down are dropped and never retried. A
//! requester whose request set contains the down process stalls for good;
//! requesters that avoid it are unaffected.

use std::time::Duration;

use coterie_integration_tests::{LiveCluster, p};
use coterie_mutex::RequesterPhase;
use coterie_net::LatencyConfig;

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_unreachable_voter_stalls_only_its_requesters() {
    let c = LiveCluster::start(3, LatencyConfig::none(), Duration::ZERO).await;
    c.net.set_down(p(3), true).await;

    // P1 asks V1 and V2 only.
    c.controller(1).request_critical_section().await.unwrap();

    // P2 needs V3.
    let p2 = c.controller(2);
    let stalled = tokio::time::timeout(Duration::from_millis(300), p2.request_critical_section()).await;
    assert!(stalled.is_err());
    assert!(c.net.dropped_count() > 0);

    let status = p2.status().await.unwrap();
    assert_eq!(status.phase, RequesterPhase::Requesting);
    assert_eq!(status.votes_collected, 1);
    assert_eq!(c.section.overlaps(), 0);
    c.shutdown();
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn test_dropped_request_is_not_retried() {
    let c = LiveCluster::start(3, LatencyConfig::none(), Duration::ZERO).await;
    c.net.set_down(p(3), true).await;

    let p2 = c.controller(2);
    let waiter = tokio::spawn(async move { p2.request_critical_section().await });

    // Wait for the REQUEST to V3 to be dropped, then heal the network.
    for _ in 0..100 {
        if c.net.dropped_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(c.net.dropped_count() > 0);
    c.net.set_down(p(3), false).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!waiter.is_finished());
    let v3 = c.controller(3).status().await.unwrap();
    assert!(!v3.granted);
    assert!(v3.pending.is_empty());

    // Shutting down fails the stalled request instead of leaving it hanging.
    c.shutdown();
    let result = waiter.await.unwrap();
    assert!(result.is_err());
}
