//! Integration test: scripted schedules over the deterministic simulation.

use coterie_integration_tests::{Event, Simulation, p};
use coterie_types::{MessageKind, RequestSetTable};

/// A lone requester needs one REQUEST, GRANT and RELEASE per request-set
/// member and nothing else.
#[test]
fn test_lone_requester_on_fano_plane() {
    let table = RequestSetTable::well_known(7).unwrap();
    let mut sim = Simulation::new(&table, 1);

    assert!(sim.request(p(4)));
    assert!(sim.run(1_000));

    assert_eq!(sim.entries(), vec![p(4)]);
    let delivered = sim
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Delivered { .. }))
        .count();
    assert_eq!(delivered, 3 * 3);
    assert!(sim.violations().is_empty());
    sim.assert_all_votes_free();
}

/// Requests issued one after another never meet: no INQUIRE, no POSTPONED.
#[test]
fn test_sequential_requests_do_not_contend() {
    let table = RequestSetTable::well_known(3).unwrap();
    let mut sim = Simulation::new(&table, 7);

    for id in [1, 2, 3, 1, 3, 2] {
        assert!(sim.request(p(id)));
        assert!(sim.run(1_000));
    }

    let ids: Vec<u32> = sim.entries().iter().map(|id| id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 1, 3, 2]);
    let contested = sim.events().iter().any(|e| {
        matches!(
            e,
            Event::Delivered { message, .. }
                if matches!(message.kind, MessageKind::Inquire | MessageKind::Postponed)
        )
    });
    assert!(!contested);
    sim.assert_all_votes_free();
}

/// P1, P3 and P2 request with timestamps 5, 6 and 7. Whenever P2 grabs V2
/// ahead of P1 and is postponed at V3, it hands V2 back and P1 goes first.
#[test]
fn test_postponed_holder_relinquishes_to_older_request() {
    let table = RequestSetTable::well_known(3).unwrap();
    let mut relinquished = 0;

    for seed in 0..100 {
        let mut sim = Simulation::new(&table, seed);
        sim.process_mut(p(1)).set_clock(4);
        sim.process_mut(p(3)).set_clock(5);
        sim.process_mut(p(2)).set_clock(6);

        assert!(sim.request(p(1)));
        assert!(sim.request(p(3)));
        assert!(sim.request(p(2)));
        assert!(sim.run(10_000), "seed {seed} did not finish");

        let entries = sim.entries();
        assert_eq!(entries.len(), 3, "seed {seed}: {entries:?}");

        let v2_relinquished = sim.events().iter().any(|e| {
            matches!(
                e,
                Event::Delivered { to, message }
                    if *to == p(2)
                        && message.origin == p(2)
                        && message.kind == MessageKind::Relinquish
            )
        });
        if v2_relinquished {
            relinquished += 1;
            let pos = |id| entries.iter().position(|&x| x == p(id));
            assert!(pos(1) < pos(2), "seed {seed}: {entries:?}");
        }
        sim.assert_exclusive();
        sim.assert_all_votes_free();
    }
    assert!(relinquished > 0);
}

/// Every process of the three-process coterie requests at once; each gets
/// exactly one turn.
#[test]
fn test_all_three_contend_once() {
    let table = RequestSetTable::well_known(3).unwrap();

    for seed in 0..100 {
        let mut sim = Simulation::new(&table, seed);
        for id in 1..=3 {
            assert!(sim.request(p(id)));
        }
        assert!(sim.run(10_000), "seed {seed} did not finish");

        let mut entries = sim.entries();
        entries.sort();
        assert_eq!(entries, vec![p(1), p(2), p(3)], "seed {seed}");
        assert!(sim.waiting().is_empty());
        sim.assert_exclusive();
        sim.assert_all_votes_free();
    }
}

/// A second request while the first is outstanding is refused.
#[test]
fn test_request_while_requesting_is_refused() {
    let table = RequestSetTable::well_known(3).unwrap();
    let mut sim = Simulation::new(&table, 3);

    assert!(sim.request(p(2)));
    assert!(!sim.request(p(2)));
    assert!(sim.run(1_000));
    assert_eq!(sim.entries(), vec![p(2)]);
    assert!(sim.request(p(2)));
}

/// Clocks only move forward and end past every timestamp they received.
#[test]
fn test_clocks_dominate_received_timestamps() {
    let table = RequestSetTable::well_known(3).unwrap();
    let mut sim = Simulation::new(&table, 11);
    for id in 1..=3 {
        sim.request(p(id));
    }
    assert!(sim.run(10_000));

    for event in sim.events() {
        if let Event::Delivered { to, message } = event {
            assert!(sim.process(*to).clock() > message.timestamp);
        }
    }
}
