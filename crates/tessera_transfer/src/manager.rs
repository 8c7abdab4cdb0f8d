//! The per-node transfer manager.
//!
//! Matches outgoing PUSH commands on sender nodes with AWAIT_PUSH
//! commands on receiver nodes via the push blackboard, keyed by the push
//! command id. Either arrival order works: a frame arriving before its
//! `await_push` is committed and parked; an `await_push` issued before
//! its frame parks an incomplete handle that the inbound poll completes.
//! Each push id is consumed exactly once.

use crate::fabric::{Fabric, RecvRequest, SendRequest, TAG_DATA_TRANSFER};
use crate::frame::DataFrame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::{CommandId, CoreError, CoreResult, NodeId};
use tessera_graph::{Command, CommandKind};
use tessera_state::{BufferStore, ReductionRegistry};
use tracing::trace;

/// How many times `commit_transfer` retries waiting for a buffer or
/// reduction registration before giving up.
const COMMIT_RETRY_LIMIT: usize = 1 << 20;

/// Completion flag shared between the manager and the command executor.
#[derive(Debug, Default)]
pub struct TransferHandle {
    complete: AtomicBool,
}

impl TransferHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn completed() -> Arc<Self> {
        let handle = Self::default();
        handle.complete.store(true, Ordering::Release);
        Arc::new(handle)
    }

    fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    /// Whether the transfer has finished
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

struct OutgoingTransfer {
    handle: Arc<TransferHandle>,
    request: SendRequest,
}

struct IncomingTransfer {
    request: RecvRequest,
}

/// What an `await_push` said it expects, checked against the frame
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExpectedFrame {
    bid: tessera_core::BufferId,
    rid: Option<tessera_core::ReductionId>,
    sr: tessera_grid::Subrange,
}

struct IncomingSlot {
    handle: Arc<TransferHandle>,
    expected: Option<ExpectedFrame>,
    committed: bool,
}

/// Per-node transfer manager
pub struct TransferManager<F: Fabric> {
    fabric: F,
    store: Arc<BufferStore>,
    reductions: Arc<ReductionRegistry>,
    outgoing: Vec<OutgoingTransfer>,
    incoming: Vec<IncomingTransfer>,
    blackboard: HashMap<CommandId, IncomingSlot>,
}

impl<F: Fabric> TransferManager<F> {
    /// Create a manager over the given fabric endpoint and local stores
    #[must_use]
    pub fn new(fabric: F, store: Arc<BufferStore>, reductions: Arc<ReductionRegistry>) -> Self {
        Self {
            fabric,
            store,
            reductions,
            outgoing: Vec::new(),
            incoming: Vec::new(),
            blackboard: HashMap::new(),
        }
    }

    /// This node's rank
    #[must_use]
    pub fn rank(&self) -> NodeId {
        self.fabric.rank()
    }

    /// Number of blackboard entries currently parked
    #[must_use]
    pub fn blackboard_len(&self) -> usize {
        self.blackboard.len()
    }

    /// Execute a PUSH command: read the subrange from the local store,
    /// post a non-blocking send, and return a handle that completes when
    /// the send does.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a non-push command, a store error if the
    /// data is not local, or a fatal fabric error.
    pub fn push(&mut self, cmd: &Command) -> CoreResult<Arc<TransferHandle>> {
        let CommandKind::Push { target, bid, rid, sr } = &cmd.kind else {
            return Err(CoreError::usage(format!("push() called on {}", cmd)));
        };

        let payload = self.store.get_buffer_data(*bid, sr.offset, sr.range)?;
        let frame = DataFrame {
            sr: *sr,
            bid: *bid,
            rid: *rid,
            push_cid: cmd.cid,
            payload,
        };
        trace!(
            cmd = %cmd.cid,
            buffer = %bid,
            target = %target,
            bytes = frame.payload.len(),
            "sending push frame"
        );

        let request = self
            .fabric
            .isend(*target, TAG_DATA_TRANSFER, frame.encode())
            .map_err(|e| CoreError::Fabric { reason: e.to_string() })?;

        let handle = TransferHandle::new();
        self.outgoing.push(OutgoingTransfer {
            handle: Arc::clone(&handle),
            request,
        });
        Ok(handle)
    }

    /// Execute an AWAIT_PUSH command: rendezvous with the matching frame
    /// via the blackboard.
    ///
    /// If the frame already arrived (and was committed on arrival), the
    /// parked entry is consumed and a completed handle returned.
    /// Otherwise an incomplete handle is parked for the inbound poll to
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a non-await-push command, or an
    /// invariant violation if a parked frame does not match the command.
    pub fn await_push(&mut self, cmd: &Command) -> CoreResult<Arc<TransferHandle>> {
        let CommandKind::AwaitPush { source_cid, bid, rid, sr } = &cmd.kind else {
            return Err(CoreError::usage(format!("await_push() called on {}", cmd)));
        };

        if let Some(slot) = self.blackboard.remove(source_cid) {
            // The push arrived first; the frame was validated and
            // committed when it came in.
            if !slot.committed || !slot.handle.is_complete() {
                return Err(CoreError::invariant(
                    Some(*bid),
                    format!("parked transfer for {} is not committed", source_cid),
                ));
            }
            trace!(cmd = %cmd.cid, source = %source_cid, "await satisfied by parked frame");
            return Ok(slot.handle);
        }

        trace!(cmd = %cmd.cid, source = %source_cid, "awaiting frame");
        let handle = TransferHandle::new();
        self.blackboard.insert(
            *source_cid,
            IncomingSlot {
                handle: Arc::clone(&handle),
                expected: Some(ExpectedFrame {
                    bid: *bid,
                    rid: *rid,
                    sr: *sr,
                }),
                committed: false,
            },
        );
        Ok(handle)
    }

    /// One polling round: probe for a new inbound frame, drain completed
    /// receives into the blackboard, and retire completed sends.
    ///
    /// Performs no blocking waits; the outer event loop calls this
    /// regularly.
    ///
    /// # Errors
    ///
    /// Returns fatal fabric errors, frame validation failures, and
    /// timing errors from `commit_transfer`.
    pub fn poll(&mut self) -> CoreResult<()> {
        self.poll_incoming()?;
        self.drain_incoming()?;
        self.drain_outgoing()?;
        Ok(())
    }

    fn poll_incoming(&mut self) -> CoreResult<()> {
        let probed = self
            .fabric
            .iprobe(TAG_DATA_TRANSFER)
            .map_err(|e| CoreError::Fabric { reason: e.to_string() })?;
        if let Some(request) = probed {
            self.incoming.push(IncomingTransfer { request });
        }
        Ok(())
    }

    fn drain_incoming(&mut self) -> CoreResult<()> {
        let mut i = 0;
        while i < self.incoming.len() {
            let received = self
                .fabric
                .test_recv(&self.incoming[i].request)
                .map_err(|e| CoreError::Fabric { reason: e.to_string() })?;
            let Some(received) = received else {
                i += 1;
                continue;
            };
            self.incoming.swap_remove(i);

            let frame = DataFrame::decode(&received.payload)
                .map_err(|e| CoreError::Fabric { reason: e.to_string() })?;
            trace!(
                push = %frame.push_cid,
                buffer = %frame.bid,
                source = %received.source,
                bytes = frame.payload.len(),
                "received push frame"
            );

            match self.blackboard.remove(&frame.push_cid) {
                Some(slot) => {
                    // await_push got here first
                    if let Some(expected) = &slot.expected {
                        if expected.bid != frame.bid
                            || expected.rid != frame.rid
                            || expected.sr != frame.sr
                        {
                            return Err(CoreError::invariant(
                                Some(frame.bid),
                                format!(
                                    "frame for {} does not match its await ({} vs {})",
                                    frame.push_cid, frame.sr, expected.sr
                                ),
                            ));
                        }
                    }
                    self.commit_transfer(received.source, &frame)?;
                    slot.handle.mark_complete();
                }
                None => {
                    // push arrived first: commit now, park a completed
                    // handle for the await_push to consume
                    self.commit_transfer(received.source, &frame)?;
                    self.blackboard.insert(
                        frame.push_cid,
                        IncomingSlot {
                            handle: TransferHandle::completed(),
                            expected: None,
                            committed: true,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn drain_outgoing(&mut self) -> CoreResult<()> {
        let mut i = 0;
        while i < self.outgoing.len() {
            let done = self
                .fabric
                .test_send(&self.outgoing[i].request)
                .map_err(|e| CoreError::Fabric { reason: e.to_string() })?;
            if done {
                let transfer = self.outgoing.swap_remove(i);
                transfer.handle.mark_complete();
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Write a received payload into the local buffer store, or hand it
    /// to the reduction registry when the frame carries a reduction id.
    ///
    /// A frame can overtake the local registration of its buffer or
    /// reduction by a hair; retry a bounded number of times before
    /// treating it as an error.
    fn commit_transfer(&mut self, source: NodeId, frame: &DataFrame) -> CoreResult<()> {
        let volume = frame.sr.range[0] * frame.sr.range[1] * frame.sr.range[2];
        if volume == 0 || frame.payload.len() as u64 % volume != 0 {
            return Err(CoreError::invariant(
                Some(frame.bid),
                format!(
                    "payload of {} bytes does not tile box {} ({} points)",
                    frame.payload.len(),
                    frame.sr,
                    volume
                ),
            ));
        }

        if let Some(rid) = frame.rid {
            let mut attempts = 0;
            while !self.reductions.has_reduction(rid) {
                attempts += 1;
                if attempts >= COMMIT_RETRY_LIMIT {
                    return Err(CoreError::Timing {
                        resource: "reduction".to_string(),
                        id: rid.as_u64(),
                    });
                }
                std::thread::yield_now();
            }
            self.reductions.push_partial(rid, source, frame.payload.clone());
            trace!(reduction = %rid, source = %source, "committed partial reduction");
            return Ok(());
        }

        let mut attempts = 0;
        while !self.store.has_buffer(frame.bid) {
            attempts += 1;
            if attempts >= COMMIT_RETRY_LIMIT {
                return Err(CoreError::Timing {
                    resource: "buffer".to_string(),
                    id: frame.bid.as_u64(),
                });
            }
            std::thread::yield_now();
        }
        self.store
            .set_buffer_data(frame.bid, frame.sr.offset, frame.sr.range, &frame.payload)?;
        trace!(buffer = %frame.bid, sr = %frame.sr, "committed transfer");
        Ok(())
    }
}
