use clap::Parser;

use fabric::{SimFabric, SimFabricConfig};
use multipath::topology::Placement;
use multipath::{
    affinity, parquet_out, run_rank, Error, JobConfig, SweepConfig, EXIT_INSUFFICIENT_TOPOLOGY,
};
use multipath::group::ThreadGroup;

#[derive(Parser, Debug)]
#[command(name = "multipath_bench")]
#[command(about = "Windowed multipath put-pipeline benchmark")]
struct Cli {
    /// Minimum window size in KiB
    #[arg(default_value = "128")]
    min_window_kib: usize,

    /// Maximum window size in KiB
    #[arg(default_value = "4096")]
    max_window_kib: usize,

    /// Payload size in KiB
    #[arg(default_value = "1024")]
    payload_kib: usize,

    /// Iterations per window size
    #[arg(default_value = "10")]
    iterations: usize,

    /// Number of ranks to launch (one thread each)
    #[arg(long, default_value = "4")]
    ranks: usize,

    /// Ranks sharing one physical node
    #[arg(long, default_value = "1")]
    ranks_per_node: usize,

    /// Proxy hops on the route (0, 1, or 2)
    #[arg(long, default_value = "2")]
    proxies: usize,

    /// Source completion-queue entries per rank
    #[arg(long, default_value = "4096")]
    cq_size: usize,

    /// Destination completion-queue entries per rank
    #[arg(long, default_value = "4096")]
    dest_cq_size: usize,

    /// Pin rank threads to cores, assigned downward from affinity-start
    #[arg(long)]
    pin: bool,

    /// Starting core ID for pinning (default: last online core)
    #[arg(long)]
    affinity_start: Option<usize>,

    /// Output parquet file path
    #[arg(short = 'o', long, default_value = "multipath_bench.parquet")]
    output: String,
}

fn main() {
    let cli = Cli::parse();
    if cli.proxies > 2 {
        eprintln!("at most two proxies are supported");
        std::process::exit(2);
    }

    let job = JobConfig {
        sweep: SweepConfig {
            min_window: cli.min_window_kib << 10,
            max_window: cli.max_window_kib << 10,
            payload: cli.payload_kib << 10,
            iterations: cli.iterations,
        },
        placement: Placement {
            ranks_per_node: cli.ranks_per_node,
            ..Placement::default()
        },
        num_proxies: cli.proxies,
    };

    let nics = SimFabric::create(
        cli.ranks,
        &SimFabricConfig {
            source_cq_entries: cli.cq_size,
            dest_cq_entries: cli.dest_cq_size,
        },
    );
    let groups = ThreadGroup::create(cli.ranks);

    let mut handles = Vec::new();
    for (rank, (group, nic)) in groups.into_iter().zip(nics).enumerate() {
        let pin = cli.pin;
        let affinity_start = cli.affinity_start;
        handles.push(std::thread::spawn(move || {
            if pin {
                affinity::pin_rank(rank, affinity_start);
            }
            run_rank(&group, &nic, &job)
        }));
    }

    let mut rank0_points = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.join().expect("rank thread panicked") {
            Ok(points) => {
                if rank == 0 {
                    rank0_points = Some(points);
                }
            }
            Err(Error::InsufficientTopology { found, required }) => {
                eprintln!(
                    "Rank: {:4} only {} distinct nodes, need {}; aborting",
                    rank, found, required
                );
                std::process::exit(EXIT_INSUFFICIENT_TOPOLOGY);
            }
            Err(err) => {
                eprintln!("Rank: {:4} fatal: {}", rank, err);
                std::process::exit(1);
            }
        }
    }

    // Every rank holds identical reduced figures; rank 0 reports.
    let Some(points) = rank0_points else { return };
    eprintln!("window_bytes\tbandwidth_mib_s\tlatency_us");
    for point in &points {
        println!(
            "{}\t{:.6}\t{:.4}",
            point.window, point.bandwidth_mib_s, point.latency_us
        );
    }

    let route = match cli.proxies {
        0 => "direct",
        1 => "one-proxy",
        _ => "two-proxy",
    };
    let rows = parquet_out::rows_from_sweep(
        route,
        (cli.payload_kib << 10) as u64,
        cli.iterations as u32,
        &points,
    );
    if let Err(e) = parquet_out::write_parquet(&cli.output, &rows) {
        eprintln!("Error writing parquet: {}", e);
    } else if !rows.is_empty() {
        eprintln!("Results written to {}", cli.output);
    }
}
