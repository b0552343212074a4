//! CPU workers: the batch-enumeration loop plus the taproot and TXID
//! per-candidate loops. Each worker owns its state; the orchestrator
//! only reads the counter and writes the rekey request.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use rand::RngCore;

use crate::hashing::{sha256d, tagged_hash};
use crate::secp::{Point, Scalar, SecpContext};
use crate::target::mask::limbs_from_be;
use crate::target::MaskTarget;

use super::batch::{run_pass, BatchBuffers};
use super::predicate::{Checker, MatchKind, MatchRecord};

/// Worker lifecycle, advanced only at pass boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    Idle = 0,
    Starting = 1,
    Running = 2,
    RekeyPending = 3,
    Stopping = 4,
    Done = 5,
}

/// Per-worker slot shared with the orchestrator. The counter has a
/// single writer (the worker); the rekey request has a single writer
/// (the orchestrator) and is consumed with a swap.
pub struct WorkerHandle {
    phase: AtomicU8,
    pub counter: AtomicU64,
    pub rekey_request: AtomicBool,
}

impl WorkerHandle {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(WorkerPhase::Idle as u8),
            counter: AtomicU64::new(0),
            rekey_request: AtomicBool::new(false),
        }
    }

    pub fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> WorkerPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => WorkerPhase::Idle,
            1 => WorkerPhase::Starting,
            2 => WorkerPhase::Running,
            3 => WorkerPhase::RekeyPending,
            4 => WorkerPhase::Stopping,
            _ => WorkerPhase::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase() == WorkerPhase::Done
    }

    pub fn has_started(&self) -> bool {
        self.phase() as u8 >= WorkerPhase::Running as u8
    }
}

impl Default for WorkerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A fresh random scalar, retried until valid as a private key.
pub fn fresh_random_key() -> Scalar {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        let key = Scalar::from_bytes_reduced(&bytes);
        if key.is_valid_key() {
            return key;
        }
    }
}

/// The batch-enumeration worker (prefix, pattern, mask and sig-R modes).
pub struct BatchWorker {
    pub secp: Arc<SecpContext>,
    pub handle: Arc<WorkerHandle>,
    pub end_of_search: Arc<AtomicBool>,
    /// Deterministic base key; None means every (re)key is random.
    pub initial_key: Option<Scalar>,
    pub start_pubkey: Option<Point>,
    pub iters: usize,
    pub checker: Checker,
}

impl BatchWorker {
    fn start_point(&self, key: &Scalar) -> Point {
        // The group center sits half a group above the base key
        let half = self.secp.group.half as u64;
        let centered = key.add(&Scalar::from_u64(half));
        let mut p = self.secp.compute_public_key(&centered);
        if let Some(offset) = &self.start_pubkey {
            p = p.add_direct(offset);
        }
        p
    }

    pub fn run(self) {
        self.handle.set_phase(WorkerPhase::Starting);

        let group_size = 2 * self.secp.group.half;
        let step = (group_size * self.iters) as u64;
        let mut bufs = BatchBuffers::new(self.secp.group.half);

        let mut key = match self.initial_key {
            Some(k) => k,
            None => fresh_random_key(),
        };
        let mut start = self.start_point(&key);

        self.handle.set_phase(WorkerPhase::Running);

        while !self.end_of_search.load(Ordering::Relaxed) {
            if self.handle.rekey_request.swap(false, Ordering::Relaxed) {
                self.handle.set_phase(WorkerPhase::RekeyPending);
                key = fresh_random_key();
                start = self.start_point(&key);
                self.handle.set_phase(WorkerPhase::Running);
            }

            match run_pass(
                &self.secp,
                &mut start,
                &key,
                self.iters,
                &self.checker,
                &mut bufs,
                &self.end_of_search,
            ) {
                Ok(()) => {
                    key = key.add(&Scalar::from_u64(step));
                    // point + endo1 + endo2 + their symmetric twins
                    self.handle
                        .counter
                        .fetch_add(6 * step, Ordering::Relaxed);
                }
                Err(_) => {
                    // start point collided with the generator table;
                    // the pass is discarded
                    self.handle.set_phase(WorkerPhase::RekeyPending);
                    key = fresh_random_key();
                    start = self.start_point(&key);
                    self.handle.set_phase(WorkerPhase::Running);
                }
            }
        }

        self.handle.set_phase(WorkerPhase::Stopping);
        self.handle.set_phase(WorkerPhase::Done);
    }
}

/// Taproot worker: every candidate needs its own tweak and t*G, so the
/// batch engine is bypassed and the point advances by one G per step.
pub struct TaprootWorker {
    pub thread_id: usize,
    pub secp: Arc<SecpContext>,
    pub handle: Arc<WorkerHandle>,
    pub end_of_search: Arc<AtomicBool>,
    pub initial_key: Option<Scalar>,
    pub start_pubkey: Option<Point>,
    pub target: MaskTarget,
    pub tx: Sender<MatchRecord>,
}

impl TaprootWorker {
    fn start_point(&self, key: &Scalar) -> Point {
        let mut p = self.secp.compute_public_key(key);
        if let Some(offset) = &self.start_pubkey {
            p = p.add_direct(offset);
        }
        p
    }

    pub fn run(self) {
        self.handle.set_phase(WorkerPhase::Starting);

        let mut key = match self.initial_key {
            Some(k) => k,
            None => fresh_random_key(),
        };
        let mut p = self.start_point(&key);

        self.handle.set_phase(WorkerPhase::Running);

        while !self.end_of_search.load(Ordering::Relaxed) {
            if self.handle.rekey_request.swap(false, Ordering::Relaxed) {
                self.handle.set_phase(WorkerPhase::RekeyPending);
                key = fresh_random_key();
                p = self.start_point(&key);
                self.handle.set_phase(WorkerPhase::Running);
            }

            // Q = P + H_TapTweak(P.x)*G
            let tweak = tagged_hash("TapTweak", &p.x.to_bytes());
            let t = Scalar::from_bytes_reduced(&tweak);
            let tg = self.secp.compute_public_key(&t);
            let q = p.add_direct(&tg);

            if !q.is_infinity() && self.target.matches(&q.x.d) {
                let _ = self.tx.send(MatchRecord {
                    thread_id: self.thread_id,
                    base_key: key,
                    incr: 0,
                    endo: 0,
                    compressed: true,
                    kind: MatchKind::Taproot { qx: q.x.d },
                });
            }

            p = p.add_direct(&Point::G);
            key = key.add(&Scalar::ONE);
            self.handle.counter.fetch_add(1, Ordering::Relaxed);
        }

        self.handle.set_phase(WorkerPhase::Stopping);
        self.handle.set_phase(WorkerPhase::Done);
    }
}

/// TXID worker: pure hashing, no curve. Each worker strides the nonce
/// window so the space is covered exactly once across workers.
pub struct TxidWorker {
    pub thread_id: usize,
    pub handle: Arc<WorkerHandle>,
    pub end_of_search: Arc<AtomicBool>,
    pub raw_tx: Vec<u8>,
    pub nonce_offset: usize,
    pub nonce_len: usize,
    pub start_nonce: u64,
    pub stride: u64,
    pub target: MaskTarget,
    pub tx: Sender<MatchRecord>,
}

impl TxidWorker {
    pub fn run(self) {
        self.handle.set_phase(WorkerPhase::Starting);

        let space: u64 = 1u64 << (8 * self.nonce_len.min(4)) as u32;
        let mut buf = self.raw_tx.clone();
        let mut nonce = self.start_nonce;

        self.handle.set_phase(WorkerPhase::Running);

        while nonce < space && !self.end_of_search.load(Ordering::Relaxed) {
            for j in 0..self.nonce_len {
                buf[self.nonce_offset + j] = (nonce >> (j * 8)) as u8;
            }
            let digest = sha256d(&buf);
            if self.target.matches(&limbs_from_be(&digest)) {
                let _ = self.tx.send(MatchRecord {
                    thread_id: self.thread_id,
                    base_key: Scalar::ZERO,
                    incr: 0,
                    endo: 0,
                    compressed: true,
                    kind: MatchKind::Txid {
                        txid: digest,
                        nonce: nonce as u32,
                    },
                });
            }
            self.handle.counter.fetch_add(1, Ordering::Relaxed);
            nonce += self.stride;
        }

        self.handle.set_phase(WorkerPhase::Stopping);
        self.handle.set_phase(WorkerPhase::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::mask::prefix_mask;
    use std::sync::mpsc;

    #[test]
    fn phase_transitions() {
        let h = WorkerHandle::new();
        assert_eq!(h.phase(), WorkerPhase::Idle);
        assert!(!h.has_started());
        h.set_phase(WorkerPhase::Running);
        assert!(h.has_started());
        assert!(!h.is_done());
        h.set_phase(WorkerPhase::Done);
        assert!(h.is_done());
    }

    #[test]
    fn fresh_keys_are_valid_and_distinct() {
        let a = fresh_random_key();
        let b = fresh_random_key();
        assert!(a.is_valid_key());
        assert!(b.is_valid_key());
        assert_ne!(a, b);
    }

    #[test]
    fn txid_worker_finds_nonce() {
        // one-byte nonce window, target = TXID of nonce 0x5A
        let mut tx_bytes = vec![0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC];
        let nonce_offset = 4;
        tx_bytes[nonce_offset] = 0x5A;
        let digest = sha256d(&tx_bytes);
        let mut value = [0u64; 4];
        value.copy_from_slice(&limbs_from_be(&digest));
        let target = MaskTarget::new(value, prefix_mask(32));

        let (sender, receiver) = mpsc::channel();
        let worker = TxidWorker {
            thread_id: 0,
            handle: Arc::new(WorkerHandle::new()),
            end_of_search: Arc::new(AtomicBool::new(false)),
            raw_tx: tx_bytes.clone(),
            nonce_offset,
            nonce_len: 1,
            start_nonce: 0,
            stride: 1,
            target,
            tx: sender,
        };
        let handle = Arc::clone(&worker.handle);
        worker.run();
        assert!(handle.is_done());

        let records: Vec<MatchRecord> = receiver.try_iter().collect();
        assert_eq!(records.len(), 1);
        match records[0].kind {
            MatchKind::Txid { nonce, txid } => {
                assert_eq!(nonce, 0x5A);
                assert_eq!(txid, digest);
            }
            _ => panic!("wrong record kind"),
        }
    }
}
