//! Bounded compression ring: a fixed-size array of slots cycling
//! `Empty -> Filling -> Ready -> Compressing -> Compressed -> Empty`, guarded
//! by a single mutex and condition variable. The writer thread fills slots
//! in order; the same thread also drains finished slots back out in that
//! same order, so output order matches submission order even though
//! compression itself may finish out of order across worker threads.
//! `submit` never blocks unless the ring is genuinely full *and* nothing is
//! ready to drain yet — it opportunistically drains whatever has already
//! finished on its way in, which is what lets compression of record N+1
//! overlap with the caller still assembling record N+2.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::buffer::ByteOrder;
use crate::error::Result;
use crate::header::CompressionKind;
use crate::record::Record;

/// One record's worth of not-yet-serialized data, handed to a worker thread.
pub(crate) struct PendingRecord {
    pub events: Vec<Vec<u8>>,
    pub user_header: Vec<u8>,
    pub record_number: u32,
    pub order: ByteOrder,
    pub compression: CompressionKind,
    pub has_dictionary: bool,
    pub has_first_event: bool,
    pub is_last: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SlotState {
    Empty,
    Ready,
    Compressing,
    Compressed,
}

struct Slot {
    state: SlotState,
    job: Option<PendingRecord>,
    output: Option<std::result::Result<Vec<u8>, String>>,
}

struct RingInner {
    slots: Vec<Slot>,
    /// Index of the next slot the writer thread will fill.
    head: usize,
    /// Index of the next slot the writer thread will drain.
    tail: usize,
    shutdown: bool,
}

struct Ring {
    state: Mutex<RingInner>,
    cv: Condvar,
}

impl RingInner {
    fn is_full(&self) -> bool {
        self.slots[self.head].state != SlotState::Empty
    }

    fn is_empty(&self) -> bool {
        self.slots[self.tail].state == SlotState::Empty
    }
}

/// A background pool of worker threads that compress records submitted
/// through [`submit`](CompressionPool::submit).
pub(crate) struct CompressionPool {
    ring: Arc<Ring>,
    workers: Vec<JoinHandle<()>>,
}

impl CompressionPool {
    pub fn new(ring_size: usize, worker_count: usize) -> CompressionPool {
        let ring_size = ring_size.max(1);
        let slots: Vec<Slot> = (0..ring_size)
            .map(|_| Slot {
                state: SlotState::Empty,
                job: None,
                output: None,
            })
            .collect();
        let ring = Arc::new(Ring {
            state: Mutex::new(RingInner {
                slots,
                head: 0,
                tail: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || worker_loop(ring))
            })
            .collect();

        CompressionPool { ring, workers }
    }

    /// Drains a single finished slot, unconditionally blocking until one is
    /// ready. Internal helper shared by `submit` and `drain_remaining`.
    fn drain_one_locked(inner: &mut RingInner) -> Result<Vec<u8>> {
        let tail = inner.tail;
        let slot = &mut inner.slots[tail];
        let output = slot.output.take().expect("compressed slot always has output");
        slot.state = SlotState::Empty;
        slot.job = None;
        inner.tail = (tail + 1) % inner.slots.len();
        output.map_err(crate::error::Error::MalformedHeader)
    }

    /// Submits a job for background compression. If the ring is full this
    /// blocks until at least one worker finishes, draining every slot that
    /// has already finished along the way (possibly zero, possibly more
    /// than one) and returning their encoded bytes in submission order.
    pub fn submit(&self, job: PendingRecord) -> Result<Vec<Vec<u8>>> {
        let mut drained = Vec::new();
        let mut inner = self.ring.state.lock().unwrap();
        loop {
            if !inner.is_full() {
                let head = inner.head;
                inner.slots[head].job = Some(job);
                inner.slots[head].state = SlotState::Ready;
                inner.head = (head + 1) % inner.slots.len();
                self.ring.cv.notify_all();
                return Ok(drained);
            }
            if inner.slots[inner.tail].state == SlotState::Compressed {
                drained.push(Self::drain_one_locked(&mut inner)?);
                self.ring.cv.notify_all();
                continue;
            }
            inner = self.ring.cv.wait(inner).unwrap();
        }
    }

    /// Blocks until every outstanding job has been compressed and drained,
    /// returning the results in submission order. Used by `flush`/`close`.
    pub fn drain_remaining(&self) -> Result<Vec<Vec<u8>>> {
        let mut drained = Vec::new();
        let mut inner = self.ring.state.lock().unwrap();
        while !inner.is_empty() {
            if inner.slots[inner.tail].state == SlotState::Compressed {
                drained.push(Self::drain_one_locked(&mut inner)?);
                self.ring.cv.notify_all();
            } else {
                inner = self.ring.cv.wait(inner).unwrap();
            }
        }
        Ok(drained)
    }
}

impl Drop for CompressionPool {
    fn drop(&mut self) {
        {
            let mut inner = self.ring.state.lock().unwrap();
            inner.shutdown = true;
        }
        self.ring.cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(ring: Arc<Ring>) {
    loop {
        let (index, job) = {
            let mut inner = ring.state.lock().unwrap();
            loop {
                if inner.shutdown {
                    return;
                }
                if let Some(index) = find_ready(&inner.slots) {
                    let job = inner.slots[index].job.take().expect("ready slot has a job");
                    inner.slots[index].state = SlotState::Compressing;
                    break (index, job);
                }
                inner = ring.cv.wait(inner).unwrap();
            }
        };

        let encoded = Record::encode(
            &job.events,
            &job.user_header,
            job.compression,
            job.record_number,
            job.order,
            job.has_dictionary,
            job.has_first_event,
            job.is_last,
        )
        .map_err(|e| e.to_string());

        let mut inner = ring.state.lock().unwrap();
        inner.slots[index].output = Some(encoded);
        inner.slots[index].state = SlotState::Compressed;
        ring.cv.notify_all();
    }
}

fn find_ready(slots: &[Slot]) -> Option<usize> {
    slots.iter().position(|s| s.state == SlotState::Ready)
}
