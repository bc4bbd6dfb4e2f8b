//! End-to-end transfer rounds over an in-process fabric, one thread per
//! rank.

use fabric::{SimFabric, SimFabricConfig};
use multipath::topology::Placement;
use multipath::{run_rank, Error, JobConfig, SweepConfig, SweepPoint, ThreadGroup};

const KIB: usize = 1 << 10;
const MIB: usize = 1 << 20;

fn launch(ranks: usize, ranks_per_node: usize, proxies: usize, sweep: SweepConfig) -> Vec<multipath::Result<Vec<SweepPoint>>> {
    let job = JobConfig {
        sweep,
        placement: Placement {
            ranks_per_node,
            ..Placement::default()
        },
        num_proxies: proxies,
    };
    let nics = SimFabric::create(ranks, &SimFabricConfig::default());
    let groups = ThreadGroup::create(ranks);

    let handles: Vec<_> = groups
        .into_iter()
        .zip(nics)
        .map(|(group, nic)| std::thread::spawn(move || run_rank(&group, &nic, &job)))
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

#[test]
fn direct_transfer_delivers_the_payload_intact() {
    // 4 distinct nodes, 4 MiB payload, one iteration, no proxies.
    let sweep = SweepConfig {
        min_window: 4 * MIB,
        max_window: 4 * MIB,
        payload: 4 * MIB,
        iterations: 1,
    };
    let results = launch(4, 1, 0, sweep);

    for result in &results {
        let points = result.as_ref().expect("rank failed");
        assert_eq!(points.len(), 1);
        assert!(points[0].bandwidth_mib_s > 0.0);
        assert!(points[0].latency_us > 0.0);
    }
    // Rank 3 is the destination; zero mismatched words means the received
    // buffer equals the source pattern byte for byte.
    let dest_points = results[3].as_ref().unwrap();
    assert_eq!(dest_points[0].mismatched_words, 0);
}

#[test]
fn single_proxy_sweep_reports_positive_figures_and_clean_payloads() {
    // Window sweep 128 KiB to 4 MiB doubling, 4 MiB payload, 10 iterations.
    let sweep = SweepConfig {
        min_window: 128 * KIB,
        max_window: 4 * MIB,
        payload: 4 * MIB,
        iterations: 10,
    };
    let results = launch(4, 1, 1, sweep);

    for result in &results {
        let points = result.as_ref().expect("rank failed");
        assert_eq!(points.len(), 6);
        let mut expected = 128 * KIB;
        for point in points {
            assert_eq!(point.window, expected);
            assert!(point.bandwidth_mib_s > 0.0);
            assert!(point.latency_us > 0.0);
            expected *= 2;
        }
    }
    for point in results[3].as_ref().unwrap() {
        assert_eq!(point.mismatched_words, 0);
    }
}

#[test]
fn two_proxy_round_splits_shares_and_delivers_intact() {
    let sweep = SweepConfig {
        min_window: 256 * KIB,
        max_window: 256 * KIB,
        payload: 1 * MIB,
        iterations: 2,
    };
    let results = launch(4, 1, 2, sweep);

    for result in &results {
        assert!(result.is_ok());
    }
    let dest_points = results[3].as_ref().unwrap();
    assert_eq!(dest_points[0].mismatched_words, 0);
}

#[test]
fn extra_ranks_on_the_route_stay_idle_but_participate() {
    // 6 ranks on 6 distinct nodes: ranks 1 and 4 hold no role with the
    // middle pair proxying, yet the job completes on every rank.
    let sweep = SweepConfig {
        min_window: 512 * KIB,
        max_window: 512 * KIB,
        payload: 512 * KIB,
        iterations: 1,
    };
    let results = launch(6, 1, 2, sweep);
    for result in &results {
        assert!(result.is_ok());
    }
    // Destination is the last distinct node, rank 5.
    assert_eq!(results[5].as_ref().unwrap()[0].mismatched_words, 0);
}

#[test]
fn insufficient_distinct_nodes_aborts_every_rank() {
    // Four ranks packed onto one physical node.
    let sweep = SweepConfig {
        min_window: 128 * KIB,
        max_window: 128 * KIB,
        payload: 128 * KIB,
        iterations: 1,
    };
    let results = launch(4, 4, 2, sweep);
    for result in results {
        match result {
            Err(Error::InsufficientTopology { found, required }) => {
                assert_eq!(found, 1);
                assert_eq!(required, 4);
            }
            other => panic!("expected InsufficientTopology, got {:?}", other),
        }
    }
}

#[test]
fn invalid_sweep_shapes_fail_before_any_exchange() {
    let sweep = SweepConfig {
        min_window: 1 * MIB,
        max_window: 128 * KIB,
        payload: 4 * MIB,
        iterations: 1,
    };
    let results = launch(4, 1, 0, sweep);
    for result in results {
        assert!(matches!(result, Err(Error::InvalidWindowRange { .. })));
    }
}
