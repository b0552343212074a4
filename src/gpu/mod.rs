//! GPU worker plumbing.
//!
//! The kernel itself is an external collaborator; this module defines
//! the launcher contract and the host-side driver loop that feeds slot
//! keys in and match records out. One driver thread runs per device and
//! shares the CPU workers' match queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::engine::{fresh_random_key, MatchKind, MatchRecord, WorkerHandle, WorkerPhase};
use crate::secp::{Point, Scalar, SecpContext};
use crate::target::{CompactLookup, TargetSet};

/// One SIMT lane's worth of state: the base key and the group-center
/// start point derived from it.
pub struct GpuSlot {
    pub key: Scalar,
    pub start: Point,
}

/// What a kernel matched, in the form the kernel produces it.
pub enum RawGpuPayload {
    /// hash160 of the candidate (address kernels).
    Hash160([u8; 20]),
    /// Raw X limbs (mask kernels).
    X([u64; 4]),
}

/// A match reported by one kernel launch. `incr` is the signed offset
/// from the slot's base key at the moment of the launch.
pub struct RawGpuMatch {
    pub slot: usize,
    pub incr: i32,
    pub endo: u8,
    pub compressed: bool,
    pub payload: RawGpuPayload,
}

/// The kernel-launcher contract. Matches returned by [`launch`] must
/// refer to the keys most recently written with [`set_keys`] (or the
/// advanced keys the driver mirrors) - no deferred results, so the
/// driver can snapshot the exact base key into every record.
///
/// [`launch`]: KernelLauncher::launch
/// [`set_keys`]: KernelLauncher::set_keys
pub trait KernelLauncher: Send {
    fn device_name(&self) -> String;
    fn nb_slots(&self) -> usize;
    /// Candidate scalars covered per slot per launch.
    fn step_size(&self) -> u64;
    fn set_lookup(&mut self, lookup: &CompactLookup) -> Result<(), String>;
    fn set_keys(&mut self, slots: &[GpuSlot]) -> Result<(), String>;
    /// Run one step over every slot; slot keys advance by
    /// [`step_size`](KernelLauncher::step_size) internally.
    fn launch(&mut self) -> Result<Vec<RawGpuMatch>, String>;
}

fn slot_keys(
    secp: &SecpContext,
    base: &Option<Scalar>,
    device_id: usize,
    nb: usize,
    half: u64,
    start_pubkey: &Option<Point>,
) -> Vec<GpuSlot> {
    (0..nb)
        .map(|i| {
            let key = match base {
                Some(b) => {
                    // slot << 80, device << 112
                    let slot_off = Scalar::new([0, (i as u64) << 16, 0, 0]);
                    let dev_off = Scalar::new([0, (device_id as u64) << 48, 0, 0]);
                    b.add(&slot_off).add(&dev_off)
                }
                None => fresh_random_key(),
            };
            let centered = key.add(&Scalar::from_u64(half));
            let mut start = secp.compute_public_key(&centered);
            if let Some(p) = start_pubkey {
                start = start.add_direct(p);
            }
            GpuSlot { key, start }
        })
        .collect()
}

/// Drive one device until the search ends or the launcher fails. A
/// launch failure ends this driver only; CPU workers continue.
#[allow(clippy::too_many_arguments)]
pub fn drive(
    mut launcher: Box<dyn KernelLauncher>,
    secp: Arc<SecpContext>,
    targets: Option<Arc<TargetSet>>,
    handle: Arc<WorkerHandle>,
    end_of_search: Arc<AtomicBool>,
    base_key: Option<Scalar>,
    start_pubkey: Option<Point>,
    device_id: usize,
    thread_id: usize,
    stop_when_found: bool,
    tx: Sender<MatchRecord>,
) {
    handle.set_phase(WorkerPhase::Starting);
    println!("GPU: {}", launcher.device_name());

    let half = secp.group.half as u64;
    let nb = launcher.nb_slots();
    let step = launcher.step_size();

    if let Some(set) = &targets {
        if let Err(e) = launcher.set_lookup(&set.compact_lookup()) {
            eprintln!("GPU lookup upload failed: {e}");
            handle.set_phase(WorkerPhase::Done);
            return;
        }
    }

    let mut keys = slot_keys(&secp, &base_key, device_id, nb, half, &start_pubkey);
    if let Err(e) = launcher.set_keys(&keys) {
        eprintln!("GPU key upload failed: {e}");
        handle.set_phase(WorkerPhase::Done);
        return;
    }

    handle.set_phase(WorkerPhase::Running);

    while !end_of_search.load(Ordering::Relaxed) {
        if handle.rekey_request.swap(false, Ordering::Relaxed) {
            handle.set_phase(WorkerPhase::RekeyPending);
            keys = slot_keys(&secp, &None, device_id, nb, half, &start_pubkey);
            if launcher.set_keys(&keys).is_err() {
                break;
            }
            handle.set_phase(WorkerPhase::Running);
        }

        let found = match launcher.launch() {
            Ok(found) => found,
            Err(e) => {
                eprintln!("GPU launch failed: {e}");
                break;
            }
        };

        for m in found {
            let base = keys[m.slot].key;
            let kind = match m.payload {
                RawGpuPayload::Hash160(h160) => {
                    // precise CPU recheck of the kernel's coarse hit
                    let Some(set) = &targets else { continue };
                    let matched = set.probe(&h160, stop_when_found);
                    if matched.is_empty() {
                        continue;
                    }
                    MatchKind::Address {
                        h160,
                        target: matched[0],
                    }
                }
                RawGpuPayload::X(x) => MatchKind::Mask { x },
            };
            let _ = tx.send(MatchRecord {
                thread_id,
                base_key: base,
                incr: m.incr as i64,
                endo: m.endo,
                compressed: m.compressed,
                kind,
            });
        }

        // Mirror the kernel's internal advance
        for slot in keys.iter_mut() {
            slot.key = slot.key.add(&Scalar::from_u64(step));
        }
        handle
            .counter
            .fetch_add(6 * step * nb as u64, Ordering::Relaxed);
    }

    handle.set_phase(WorkerPhase::Stopping);
    handle.set_phase(WorkerPhase::Done);
}
