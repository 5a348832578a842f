//! Queue endpoints and the sessions opened on them.
//!
//! An endpoint owns one [`MessageQueue`] behind its own mutex. The mutex is
//! taken inside [`QueueEndpoint::write`], [`QueueEndpoint::read`] and
//! [`QueueEndpoint::drain`] and covers the whole index/count mutation, so no
//! caller ever needs an outer lock. Endpoints for different addresses share
//! nothing and can be used fully in parallel.
//!
//! Messages cross the endpoint by copy: `write` copies the caller's message
//! into a fresh heap allocation that the queue then owns, and `read` moves the
//! dequeued allocation's contents back out to the caller and releases it.
//! Each stored copy is charged to a [`StorageBudget`]; when the budget is
//! exhausted the write fails with [`WriteError::AllocationFailure`] and the
//! queue is left as it was.

use crate::clock::SharedClock;
use crate::error::{BusError, ReadError, StatusCode, WriteError, STATUS_OK};
use crate::message::{Message, RECORD_SIZE};
use crate::queue::MessageQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Address of the single inbound endpoint.
pub const INBOUND_ADDRESS: u32 = 0;

/// Snapshot of an endpoint's activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub name: String,
    pub address: u32,
    pub capacity: usize,
    pub writes: u64,
    pub reads: u64,
    pub rejected_full: u64,
    pub empty_reads: u64,
    pub size_mismatches: u64,
    /// Writes or reads that could not acquire message storage.
    pub allocation_failures: u64,
    pub drained: u64,
    /// Messages resident at the time of the snapshot.
    pub resident: usize,
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    rejected_full: AtomicU64,
    empty_reads: AtomicU64,
    size_mismatches: AtomicU64,
    allocation_failures: AtomicU64,
    drained: AtomicU64,
}

/// Cap on the number of message copies held in queue storage at once.
///
/// One budget is usually shared by every endpoint of a bus. A stored copy
/// takes a unit when it is written and gives it back when it is read or
/// drained.
#[derive(Debug)]
pub struct StorageBudget {
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl StorageBudget {
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Units currently held by stored messages.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        match self.limit {
            None => {
                self.in_use.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .in_use
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    fn release(&self, units: usize) {
        self.in_use.fetch_sub(units, Ordering::AcqRel);
    }
}

impl Default for StorageBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// One named, bounded queue reachable by callers.
pub struct QueueEndpoint {
    name: String,
    address: u32,
    queue: Mutex<MessageQueue>,
    clock: SharedClock,
    budget: Arc<StorageBudget>,
    counters: Counters,
    next_session: AtomicU64,
}

impl std::fmt::Debug for QueueEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEndpoint")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("len", &self.len())
            .finish()
    }
}

impl QueueEndpoint {
    /// Allocate an empty endpoint with its own unlimited storage budget.
    pub fn new(
        name: impl Into<String>,
        address: u32,
        capacity: usize,
        clock: SharedClock,
    ) -> Result<Self, BusError> {
        Self::with_budget(name, address, capacity, clock, Arc::default())
    }

    /// Allocate an empty endpoint that charges stored messages to `budget`.
    pub fn with_budget(
        name: impl Into<String>,
        address: u32,
        capacity: usize,
        clock: SharedClock,
        budget: Arc<StorageBudget>,
    ) -> Result<Self, BusError> {
        Ok(Self {
            name: name.into(),
            address,
            queue: Mutex::new(MessageQueue::with_capacity(capacity)?),
            clock,
            budget,
            counters: Counters::default(),
            next_session: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn capacity(&self) -> usize {
        self.queue.lock().capacity()
    }

    /// Messages currently resident.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Start a caller session on this endpoint.
    pub fn open(self: &Arc<Self>) -> EndpointHandle {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        debug!("Opened session {} on {}", session, self.name);
        EndpointHandle {
            endpoint: Arc::clone(self),
            session,
        }
    }

    /// Copy `message` into the queue.
    ///
    /// `len` is the size of the caller's buffer and must equal
    /// [`RECORD_SIZE`]. The stored copy is stamped with the current clock
    /// reading. A full queue is reported as [`WriteError::Rejected`] without
    /// waiting; retrying is up to the caller. An exhausted storage budget is
    /// reported as [`WriteError::AllocationFailure`].
    pub fn write(&self, message: &Message, len: usize) -> Result<(), WriteError> {
        self.check_len(len).map_err(|actual| WriteError::SizeMismatch {
            expected: RECORD_SIZE,
            actual,
        })?;

        if !self.budget.try_acquire() {
            self.counters
                .allocation_failures
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                "No storage for message {} on {} ({} in use)",
                message.id,
                self.name,
                self.budget.in_use()
            );
            return Err(WriteError::AllocationFailure);
        }

        let mut stored = Box::new(message.clone());
        stored.stamp_insert(self.clock.now_ns());

        let result = self.queue.lock().enqueue(stored);
        match result {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                trace!("{} accepted message {}", self.name, message.id);
                Ok(())
            }
            Err((_, rejected)) => {
                self.counters.rejected_full.fetch_add(1, Ordering::Relaxed);
                drop(rejected);
                self.budget.release(1);
                Err(WriteError::Rejected)
            }
        }
    }

    /// Take the oldest message out of the queue.
    ///
    /// `len` is the size of the caller's buffer and must equal
    /// [`RECORD_SIZE`]. Before returning, the time the message spent in this
    /// queue is added to its `queueing_time`.
    pub fn read(&self, len: usize) -> Result<Message, ReadError> {
        self.check_len(len).map_err(|actual| ReadError::SizeMismatch {
            expected: RECORD_SIZE,
            actual,
        })?;

        let dequeued = self.queue.lock().dequeue();
        let mut stored = match dequeued {
            Ok(stored) => stored,
            Err(_) => {
                self.counters.empty_reads.fetch_add(1, Ordering::Relaxed);
                return Err(ReadError::Empty);
            }
        };

        self.budget.release(1);
        stored.account_dequeue(self.clock.now_ns());
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        trace!("{} released message {}", self.name, stored.id);
        Ok(*stored)
    }

    /// Copy the oldest message out into `buf` as a raw record.
    ///
    /// The record is built from the resident message before it is dequeued,
    /// so a copy-out failure leaves the queue exactly as it was.
    pub fn read_record(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        self.check_len(buf.len()).map_err(|actual| ReadError::SizeMismatch {
            expected: RECORD_SIZE,
            actual,
        })?;

        let mut queue = self.queue.lock();
        let Some(front) = queue.front() else {
            self.counters.empty_reads.fetch_add(1, Ordering::Relaxed);
            return Err(ReadError::Empty);
        };
        let mut outgoing = Message::clone(front);
        outgoing.account_dequeue(self.clock.now_ns());

        let record = self.copy_out(&outgoing)?;
        let released = queue.dequeue();
        drop(queue);
        drop(released);

        self.budget.release(1);
        buf.copy_from_slice(&record);
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        trace!("{} released message {} as a record", self.name, outgoing.id);
        Ok(record.len())
    }

    fn copy_out(&self, message: &Message) -> Result<Vec<u8>, ReadError> {
        let mut record = Vec::new();
        let encoded = record
            .try_reserve_exact(RECORD_SIZE)
            .map_err(anyhow::Error::from)
            .and_then(|()| message.encode_into(&mut record));

        match encoded {
            Ok(()) if record.len() == RECORD_SIZE => Ok(record),
            result => {
                self.counters
                    .allocation_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    "Copy-out of message {} failed on {}: {:?}",
                    message.id,
                    self.name,
                    result.err()
                );
                Err(ReadError::AllocationFailure)
            }
        }
    }

    /// Buffer sizes other than the record size are a caller bug; they are
    /// counted and refused before the queue is touched.
    fn check_len(&self, len: usize) -> Result<(), usize> {
        if len == RECORD_SIZE {
            return Ok(());
        }
        self.counters.size_mismatches.fetch_add(1, Ordering::Relaxed);
        debug!("Wrong size on {}: count={} req={}", self.name, len, RECORD_SIZE);
        Err(len)
    }

    /// Dequeue and release every resident message, returning how many there were.
    pub fn drain(&self) -> usize {
        let drained = self.queue.lock().drain();
        let count = drained.len();
        drop(drained);
        self.budget.release(count);

        if count > 0 {
            self.counters
                .drained
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!("Drained {} message(s) from {}", count, self.name);
        }
        count
    }

    pub fn stats(&self) -> EndpointStats {
        let (capacity, resident) = {
            let queue = self.queue.lock();
            (queue.capacity(), queue.len())
        };

        EndpointStats {
            name: self.name.clone(),
            address: self.address,
            capacity,
            writes: self.counters.writes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            rejected_full: self.counters.rejected_full.load(Ordering::Relaxed),
            empty_reads: self.counters.empty_reads.load(Ordering::Relaxed),
            size_mismatches: self.counters.size_mismatches.load(Ordering::Relaxed),
            allocation_failures: self.counters.allocation_failures.load(Ordering::Relaxed),
            drained: self.counters.drained.load(Ordering::Relaxed),
            resident,
        }
    }
}

/// A caller session on one endpoint.
///
/// The handle only records which endpoint later reads and writes apply to.
/// Dropping it does not touch the queue; [`EndpointHandle::close`] does.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    endpoint: Arc<QueueEndpoint>,
    session: u64,
}

impl EndpointHandle {
    pub fn endpoint(&self) -> &Arc<QueueEndpoint> {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn session_id(&self) -> u64 {
        self.session
    }

    pub fn write(&self, message: &Message) -> Result<(), WriteError> {
        self.endpoint.write(message, RECORD_SIZE)
    }

    pub fn read(&self) -> Result<Message, ReadError> {
        self.endpoint.read(RECORD_SIZE)
    }

    /// Copy a raw record in from the caller's buffer.
    pub fn write_bytes(&self, buf: &[u8]) -> Result<(), WriteError> {
        self.endpoint
            .check_len(buf.len())
            .map_err(|actual| WriteError::SizeMismatch {
                expected: RECORD_SIZE,
                actual,
            })?;

        let message = Message::from_record(buf).map_err(|e| {
            error!("Copy-in failed on {}: {}", self.name(), e);
            WriteError::AllocationFailure
        })?;
        self.endpoint.write(&message, buf.len())
    }

    /// Copy the oldest message out into the caller's buffer as a raw record.
    ///
    /// Returns the number of bytes written, which is always [`RECORD_SIZE`].
    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<usize, ReadError> {
        self.endpoint.read_record(buf)
    }

    /// [`write_bytes`](Self::write_bytes) reduced to a status code: `0` or a
    /// negative errno.
    pub fn write_status(&self, buf: &[u8]) -> i32 {
        match self.write_bytes(buf) {
            Ok(()) => STATUS_OK,
            Err(e) => e.status(),
        }
    }

    /// [`read_bytes`](Self::read_bytes) reduced to a status code: the byte
    /// count or a negative errno.
    pub fn read_status(&self, buf: &mut [u8]) -> isize {
        match self.read_bytes(buf) {
            Ok(n) => n as isize,
            Err(e) => e.status() as isize,
        }
    }

    /// End the session, releasing every message still resident in the
    /// endpoint's queue. Returns how many were released.
    pub fn close(self) -> usize {
        let released = self.endpoint.drain();
        debug!(
            "Closed session {} on {} ({} message(s) released)",
            self.session,
            self.endpoint.name(),
            released
        );
        released
    }
}
