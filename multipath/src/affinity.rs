//! Optional CPU pinning for rank threads.

/// Pin the current thread to a core assigned downward from `start_core`,
/// `core = start_core - rank`, defaulting the start to the last core.
/// Pinning failures are logged, not fatal; the rank runs unpinned.
pub fn pin_rank(rank: usize, start_core: Option<usize>) {
    let Some(core_ids) = core_affinity::get_core_ids() else {
        eprintln!("Rank: {:4} core enumeration failed, running unpinned", rank);
        return;
    };
    let start = start_core.unwrap_or(core_ids.len().saturating_sub(1));
    if rank > start {
        eprintln!(
            "Rank: {:4} no core left below start core {}, running unpinned",
            rank, start
        );
        return;
    }
    let wanted = start - rank;
    match core_ids.iter().find(|c| c.id == wanted) {
        Some(&core) => {
            if !core_affinity::set_for_current(core) {
                eprintln!("Rank: {:4} failed to pin to core {}", rank, wanted);
            }
        }
        None => {
            eprintln!("Rank: {:4} core {} is not online, running unpinned", rank, wanted);
        }
    }
}
