//! The message-passing fabric abstraction.
//!
//! Models the non-blocking subset of an MPI-like interconnect the
//! transfer manager needs: immediate send, probe-for-any-source on a
//! known tag, and completion tests. Delivery is assumed reliable and
//! in-order per (source, destination) pair; a failed operation is fatal
//! to the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tessera_core::NodeId;

/// The tag under which buffer data frames travel
pub const TAG_DATA_TRANSFER: u32 = 1;

/// Fabric errors; all fatal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FabricError {
    /// Send could not be posted
    #[error("send to {0} failed: {1}")]
    SendFailed(NodeId, String),

    /// Receive failed
    #[error("receive failed: {0}")]
    RecvFailed(String),

    /// Target rank does not exist
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// A request id the fabric never issued
    #[error("unknown request: {0}")]
    UnknownRequest(u64),
}

/// Fabric result type
pub type FabricResult<T> = Result<T, FabricError>;

/// Handle for a posted non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRequest {
    id: u64,
}

/// Handle for a posted non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvRequest {
    id: u64,
}

/// A fully received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// Sending rank
    pub source: NodeId,
    /// Raw frame bytes
    pub payload: Vec<u8>,
}

/// Non-blocking message fabric.
///
/// All operations return immediately. `iprobe` both probes for a matching
/// inbound message and, when one is present, posts the receive for it;
/// the caller later collects the bytes with `test_recv`.
pub trait Fabric {
    /// This node's rank
    fn rank(&self) -> NodeId;

    /// Number of ranks in the fabric
    fn num_nodes(&self) -> usize;

    /// Post a non-blocking send.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown or the send cannot be
    /// posted.
    fn isend(&mut self, target: NodeId, tag: u32, payload: Vec<u8>) -> FabricResult<SendRequest>;

    /// Probe for an inbound message from any source with the given tag,
    /// posting its receive if one is pending.
    ///
    /// # Errors
    ///
    /// Returns an error on a failed probe.
    fn iprobe(&mut self, tag: u32) -> FabricResult<Option<RecvRequest>>;

    /// Test a posted send for completion.
    ///
    /// # Errors
    ///
    /// Returns an error for a request this fabric never issued.
    fn test_send(&mut self, req: &SendRequest) -> FabricResult<bool>;

    /// Test a posted receive; returns the message once complete.
    ///
    /// # Errors
    ///
    /// Returns an error for a request this fabric never issued.
    fn test_recv(&mut self, req: &RecvRequest) -> FabricResult<Option<ReceivedFrame>>;
}

struct Envelope {
    source: NodeId,
    tag: u32,
    payload: Vec<u8>,
}

struct HubShared {
    mailboxes: Vec<Mutex<VecDeque<Envelope>>>,
}

/// Connects the in-memory endpoints of one simulated run.
///
/// Messages are delivered through per-destination FIFO queues, so
/// delivery is in-order per (source, destination) pair and the merged
/// arrival order equals the global send order.
#[derive(Clone)]
pub struct MemoryFabricHub {
    shared: Arc<HubShared>,
}

impl MemoryFabricHub {
    /// Create a hub for `num_nodes` ranks
    #[must_use]
    pub fn new(num_nodes: usize) -> Self {
        let mailboxes = (0..num_nodes).map(|_| Mutex::new(VecDeque::new())).collect();
        Self {
            shared: Arc::new(HubShared { mailboxes }),
        }
    }

    /// Number of ranks
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.shared.mailboxes.len()
    }

    /// The endpoint for one rank
    #[must_use]
    pub fn endpoint(&self, rank: NodeId) -> MemoryFabric {
        MemoryFabric {
            rank,
            shared: Arc::clone(&self.shared),
            next_req: 0,
            posted_recvs: HashMap::new(),
        }
    }
}

/// In-memory fabric endpoint for one rank.
///
/// Sends complete as soon as they are tested; receives complete on the
/// first test after the probe. The request indirection preserves the
/// shape of a real non-blocking interconnect.
pub struct MemoryFabric {
    rank: NodeId,
    shared: Arc<HubShared>,
    next_req: u64,
    posted_recvs: HashMap<u64, ReceivedFrame>,
}

impl MemoryFabric {
    fn mailbox(&self, rank: NodeId) -> FabricResult<&Mutex<VecDeque<Envelope>>> {
        self.shared
            .mailboxes
            .get(rank.as_index())
            .ok_or(FabricError::UnknownPeer(rank))
    }
}

impl Fabric for MemoryFabric {
    fn rank(&self) -> NodeId {
        self.rank
    }

    fn num_nodes(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn isend(&mut self, target: NodeId, tag: u32, payload: Vec<u8>) -> FabricResult<SendRequest> {
        let mailbox = self.mailbox(target)?;
        mailbox
            .lock()
            .map_err(|_| FabricError::SendFailed(target, "mailbox poisoned".to_string()))?
            .push_back(Envelope {
                source: self.rank,
                tag,
                payload,
            });
        let id = self.next_req;
        self.next_req += 1;
        Ok(SendRequest { id })
    }

    fn iprobe(&mut self, tag: u32) -> FabricResult<Option<RecvRequest>> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queue = mailbox
            .lock()
            .map_err(|_| FabricError::RecvFailed("mailbox poisoned".to_string()))?;

        let position = queue.iter().position(|e| e.tag == tag);
        let Some(position) = position else {
            return Ok(None);
        };
        let envelope = queue.remove(position).expect("position just found");
        drop(queue);

        let id = self.next_req;
        self.next_req += 1;
        self.posted_recvs.insert(
            id,
            ReceivedFrame {
                source: envelope.source,
                payload: envelope.payload,
            },
        );
        Ok(Some(RecvRequest { id }))
    }

    fn test_send(&mut self, _req: &SendRequest) -> FabricResult<bool> {
        // in-memory sends land in the destination mailbox immediately
        Ok(true)
    }

    fn test_recv(&mut self, req: &RecvRequest) -> FabricResult<Option<ReceivedFrame>> {
        match self.posted_recvs.remove(&req.id) {
            Some(frame) => Ok(Some(frame)),
            None => Err(FabricError::UnknownRequest(req.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_receive() {
        let hub = MemoryFabricHub::new(2);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        let mut b = hub.endpoint(NodeId::from_raw(1));

        let req = a.isend(NodeId::from_raw(1), TAG_DATA_TRANSFER, vec![1, 2, 3]).unwrap();
        assert!(a.test_send(&req).unwrap());

        let recv = b.iprobe(TAG_DATA_TRANSFER).unwrap().expect("message pending");
        let frame = b.test_recv(&recv).unwrap().expect("receive complete");
        assert_eq!(frame.source, NodeId::from_raw(0));
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_probe_empty() {
        let hub = MemoryFabricHub::new(2);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        assert!(a.iprobe(TAG_DATA_TRANSFER).unwrap().is_none());
    }

    #[test]
    fn test_in_order_per_pair() {
        let hub = MemoryFabricHub::new(2);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        let mut b = hub.endpoint(NodeId::from_raw(1));

        a.isend(NodeId::from_raw(1), TAG_DATA_TRANSFER, vec![1]).unwrap();
        a.isend(NodeId::from_raw(1), TAG_DATA_TRANSFER, vec![2]).unwrap();

        let r1 = b.iprobe(TAG_DATA_TRANSFER).unwrap().unwrap();
        let r2 = b.iprobe(TAG_DATA_TRANSFER).unwrap().unwrap();
        assert_eq!(b.test_recv(&r1).unwrap().unwrap().payload, vec![1]);
        assert_eq!(b.test_recv(&r2).unwrap().unwrap().payload, vec![2]);
    }

    #[test]
    fn test_unknown_peer() {
        let hub = MemoryFabricHub::new(2);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        let result = a.isend(NodeId::from_raw(5), TAG_DATA_TRANSFER, vec![]);
        assert_eq!(result, Err(FabricError::UnknownPeer(NodeId::from_raw(5))));
    }

    #[test]
    fn test_probe_filters_tag() {
        let hub = MemoryFabricHub::new(1);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        a.isend(NodeId::from_raw(0), 9, vec![7]).unwrap();

        assert!(a.iprobe(TAG_DATA_TRANSFER).unwrap().is_none());
        assert!(a.iprobe(9).unwrap().is_some());
    }

    #[test]
    fn test_recv_unknown_request() {
        let hub = MemoryFabricHub::new(1);
        let mut a = hub.endpoint(NodeId::from_raw(0));
        let result = a.test_recv(&RecvRequest { id: 99 });
        assert!(result.is_err());
    }
}
