//! Per-peer endpoint table: address exchange, bind, and teardown.

use std::io;

use fabric::{NicAddress, SimEndpoint, SimNic};

use crate::group::ProcessGroup;

/// Exchange NIC addresses with every rank. Returns the address table
/// indexed by rank.
pub fn exchange_nic_addresses<G: ProcessGroup>(group: &G, nic: &SimNic) -> Vec<NicAddress> {
    group
        .exchange(&nic.address().0.to_le_bytes())
        .iter()
        .map(|bytes| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            NicAddress(u32::from_le_bytes(raw))
        })
        .collect()
}

/// One bound endpoint per peer, indexed by rank. The self slot stays empty.
pub struct EndpointTable {
    endpoints: Vec<Option<SimEndpoint>>,
}

impl EndpointTable {
    /// Create and bind an endpoint to every peer in `peer_addrs` other than
    /// `rank` itself. Each endpoint is tagged with the peer's rank, so
    /// source completion events identify the peer they refer to.
    ///
    /// # Errors
    /// Fails if any peer address does not resolve.
    pub fn create_and_bind(
        nic: &SimNic,
        rank: usize,
        peer_addrs: &[NicAddress],
    ) -> io::Result<EndpointTable> {
        let mut endpoints = Vec::with_capacity(peer_addrs.len());
        for (peer, &addr) in peer_addrs.iter().enumerate() {
            if peer == rank {
                endpoints.push(None);
            } else {
                endpoints.push(Some(nic.create_endpoint(addr, peer)?));
            }
        }
        Ok(EndpointTable { endpoints })
    }

    pub fn get(&self, peer: usize) -> Option<&SimEndpoint> {
        self.endpoints.get(peer).and_then(|slot| slot.as_ref())
    }

    /// Unbind every endpoint. Safe to call more than once.
    ///
    /// An endpoint that refuses to unbind (operations still outstanding) is
    /// logged and leaked: destroying it in that state is erroneous, so the
    /// handle is abandoned instead.
    pub fn teardown(&mut self, rank: usize) {
        for (peer, slot) in self.endpoints.iter_mut().enumerate() {
            let Some(mut ep) = slot.take() else { continue };
            match ep.unbind() {
                Ok(()) => {}
                Err(err) => {
                    eprintln!(
                        "Rank: {:4} unbind failed for remote rank: {:4} status: {}",
                        rank, peer, err
                    );
                    std::mem::forget(ep);
                }
            }
        }
    }
}
