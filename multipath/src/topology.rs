//! Process identity and physical placement.
//!
//! Every rank resolves, once at startup, who it is (rank, size), where it
//! runs (node id), and where that node sits in the 3-D mesh. The resolved
//! [`JobContext`] is created once and passed by reference to every component
//! that needs identity or exchange services.

use crate::group::ProcessGroup;

/// 3-D mesh coordinate of a physical node. Assigned once, immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MeshCoord {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Identity record exchanged between all ranks.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ProcIdentity {
    pub rank: u32,
    pub nid: u32,
    pub coord: MeshCoord,
}

pub const IDENTITY_SIZE: usize = std::mem::size_of::<ProcIdentity>();

impl ProcIdentity {
    pub fn to_bytes(self) -> Vec<u8> {
        let ptr = &self as *const Self as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, IDENTITY_SIZE).to_vec() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= IDENTITY_SIZE);
        let mut identity = Self::default();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                &mut identity as *mut Self as *mut u8,
                IDENTITY_SIZE,
            );
        }
        identity
    }
}

/// Synthetic placement for the in-process launcher: ranks map to node ids
/// in contiguous blocks, node ids map to coordinates on a fixed mesh grid.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    /// Ranks sharing one physical node.
    pub ranks_per_node: usize,
    /// Mesh extent in x.
    pub mesh_x: u32,
    /// Mesh extent in y.
    pub mesh_y: u32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            ranks_per_node: 1,
            mesh_x: 4,
            mesh_y: 4,
        }
    }
}

impl Placement {
    pub fn node_of(&self, rank: usize) -> u32 {
        (rank / self.ranks_per_node.max(1)) as u32
    }

    pub fn coord_of(&self, nid: u32) -> MeshCoord {
        MeshCoord {
            x: nid % self.mesh_x,
            y: (nid / self.mesh_x) % self.mesh_y,
            z: nid / (self.mesh_x * self.mesh_y),
        }
    }
}

/// Identity of this process, resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct JobContext {
    pub rank: usize,
    pub size: usize,
    pub nid: u32,
    pub coord: MeshCoord,
}

impl JobContext {
    /// Resolve rank, size, and placement from the group runtime.
    pub fn resolve<G: ProcessGroup>(group: &G, placement: &Placement) -> JobContext {
        let rank = group.rank();
        let size = group.size();
        let nid = placement.node_of(rank);
        JobContext {
            rank,
            size,
            nid,
            coord: placement.coord_of(nid),
        }
    }

    pub fn identity(&self) -> ProcIdentity {
        ProcIdentity {
            rank: self.rank as u32,
            nid: self.nid,
            coord: self.coord,
        }
    }
}

/// All-to-all exchange of identities; index `r` holds rank `r`'s record.
pub fn exchange_identities<G: ProcessGroup>(group: &G, ctx: &JobContext) -> Vec<ProcIdentity> {
    group
        .exchange(&ctx.identity().to_bytes())
        .iter()
        .map(|bytes| ProcIdentity::from_bytes(bytes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_bytes_round_trip() {
        let identity = ProcIdentity {
            rank: 7,
            nid: 3,
            coord: MeshCoord { x: 3, y: 0, z: 0 },
        };
        let restored = ProcIdentity::from_bytes(&identity.to_bytes());
        assert_eq!(restored.rank, 7);
        assert_eq!(restored.nid, 3);
        assert_eq!(restored.coord, identity.coord);
    }

    #[test]
    fn placement_derives_distinct_coords_per_node() {
        let placement = Placement {
            ranks_per_node: 2,
            ..Placement::default()
        };
        assert_eq!(placement.node_of(0), 0);
        assert_eq!(placement.node_of(1), 0);
        assert_eq!(placement.node_of(2), 1);

        let mut coords: Vec<MeshCoord> = (0..32).map(|nid| placement.coord_of(nid)).collect();
        coords.dedup();
        assert_eq!(coords.len(), 32);
        // Wraps into higher dimensions past the x extent.
        assert_eq!(placement.coord_of(5), MeshCoord { x: 1, y: 1, z: 0 });
        assert_eq!(placement.coord_of(17), MeshCoord { x: 1, y: 0, z: 1 });
    }
}
