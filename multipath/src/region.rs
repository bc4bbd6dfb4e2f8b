//! Transfer buffers: owned allocation, registration, and the all-to-all
//! region exchange.
//!
//! Registration pins a buffer for the lifetime of the transfer. Ownership
//! encodes the release order: [`TransferMemory`] declares its memory
//! regions before its buffers, so deregistration always runs before the
//! backing allocation is freed.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::io;

use fabric::{AccessFlags, MemoryRegion, RegionDesc, SimNic};

use crate::group::ProcessGroup;

/// Page alignment for registered buffers.
const BUF_ALIGN: usize = 4096;

/// Page-aligned, zero-initialized buffer. Freed on drop.
pub struct AlignedBuf {
    ptr: *mut u8,
    layout: Layout,
}

// The buffer is a plain allocation; the registering rank owns it.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    /// # Panics
    /// Panics if `len` is zero or the allocation fails.
    pub fn zeroed(len: usize) -> AlignedBuf {
        assert!(len > 0, "buffer must be non-empty");
        let layout = Layout::from_size_align(len, BUF_ALIGN).expect("invalid buffer layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "buffer allocation failed");
        AlignedBuf { ptr, layout }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn addr(&self) -> u64 {
        self.ptr as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len()) }
    }

    pub fn fill(&mut self, byte: u8) {
        self.as_mut_slice().fill(byte);
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Registered send/receive buffers plus every peer's receive-region
/// descriptor, indexed by rank.
pub struct TransferMemory {
    // Field order is load-bearing: regions deregister before buffers free.
    send_mr: MemoryRegion,
    recv_mr: MemoryRegion,
    send_buf: AlignedBuf,
    recv_buf: AlignedBuf,
    peer_recv: Vec<RegionDesc>,
}

impl TransferMemory {
    /// Allocate and register `len`-byte send and receive buffers, then
    /// exchange receive-region descriptors with every rank. The exchange
    /// also acts as a barrier: on return, every rank can address every
    /// other rank's receive buffer.
    ///
    /// # Errors
    /// Registration failure is unrecoverable for the run and propagates.
    pub fn register_and_exchange<G: ProcessGroup>(
        nic: &SimNic,
        group: &G,
        len: usize,
    ) -> io::Result<TransferMemory> {
        let send_buf = AlignedBuf::zeroed(len);
        let recv_buf = AlignedBuf::zeroed(len);
        let send_mr = unsafe { nic.register(send_buf.as_ptr(), len, AccessFlags::LOCAL_WRITE)? };
        let recv_mr = unsafe {
            nic.register(
                recv_buf.as_ptr(),
                len,
                AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
            )?
        };
        let peer_recv = group
            .exchange(&recv_mr.desc().to_bytes())
            .iter()
            .map(|bytes| RegionDesc::from_bytes(bytes))
            .collect();
        Ok(TransferMemory {
            send_mr,
            recv_mr,
            send_buf,
            recv_buf,
            peer_recv,
        })
    }

    pub fn len(&self) -> usize {
        self.send_buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.send_buf.is_empty()
    }

    pub fn send_base(&self) -> u64 {
        self.send_buf.addr()
    }

    pub fn recv_base(&self) -> u64 {
        self.recv_buf.addr()
    }

    pub fn send_handle(&self) -> u64 {
        self.send_mr.handle()
    }

    pub fn recv_handle(&self) -> u64 {
        self.recv_mr.handle()
    }

    /// Receive-region descriptor of `peer`, as exchanged at setup.
    pub fn peer_recv(&self, peer: usize) -> RegionDesc {
        self.peer_recv[peer]
    }

    pub fn send_slice(&self) -> &[u8] {
        self.send_buf.as_slice()
    }

    pub fn send_slice_mut(&mut self) -> &mut [u8] {
        self.send_buf.as_mut_slice()
    }

    pub fn recv_slice(&self) -> &[u8] {
        self.recv_buf.as_slice()
    }

    /// Reset the receive buffer between verification rounds.
    pub fn clear_recv(&mut self) {
        self.recv_buf.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_buf_is_page_aligned_and_zeroed() {
        let buf = AlignedBuf::zeroed(8192);
        assert_eq!(buf.addr() % BUF_ALIGN as u64, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(buf.len(), 8192);
    }
}
