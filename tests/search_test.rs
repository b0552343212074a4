//! End-to-end engine scenarios: prefix search over one pass, mask
//! search over a small scalar range, taproot reconstruction, and the
//! full orchestrator with a trivial target.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keygrind::config::{SearchConfig, SearchMode};
use keygrind::engine::{
    run_pass, BatchBuffers, Checker, MatchKind, MatchRecord, Predicate, TaprootWorker,
    WorkerHandle,
};
use keygrind::hashing::tagged_hash;
use keygrind::search::reconstruct::{Reconstructed, Reconstructor};
use keygrind::search::Search;
use keygrind::secp::{Scalar, SecpContext};
use keygrind::target::mask::prefix_mask;
use keygrind::target::{MaskTarget, TargetSet};

fn small_checker(
    predicate: Predicate,
    stop_when_found: bool,
) -> (Checker, mpsc::Receiver<MatchRecord>) {
    let (tx, rx) = mpsc::channel();
    (
        Checker {
            predicate,
            check_compressed: true,
            check_uncompressed: false,
            stop_when_found,
            thread_id: 0,
            tx,
        },
        rx,
    )
}

/// A full address nobody has the key for must not hit in a pass.
#[test]
fn eater_address_does_not_hit() {
    let half = 8;
    let ctx = SecpContext::new(half);
    let mut bufs = BatchBuffers::new(half);

    let set = Arc::new(
        TargetSet::build(
            &["1BitcoinEaterAddressDontSendf59kuE".to_string()],
            true,
        )
        .unwrap(),
    );
    let (checker, rx) = small_checker(Predicate::for_targets(set), false);

    let base = Scalar::ONE;
    let center = base.add(&Scalar::from_u64(half as u64));
    let mut start = ctx.compute_public_key(&center);
    let stop = AtomicBool::new(false);

    // 256 groups of 16 = 4096 candidates, 6 probes each
    run_pass(&ctx, &mut start, &base, 256, &checker, &mut bufs, &stop).unwrap();
    assert_eq!(rx.try_iter().count(), 0, "eater address must not match");
}

/// The singular prefix "1" matches any P2PKH address: the very first
/// visited candidate hits.
#[test]
fn singular_prefix_hits_immediately() {
    let half = 8;
    let ctx = SecpContext::new(half);
    let mut bufs = BatchBuffers::new(half);

    let set = Arc::new(TargetSet::build(&["1".to_string()], true).unwrap());
    let (checker, rx) = small_checker(Predicate::for_targets(set), false);

    let base = Scalar::from_u64(1000);
    let center = base.add(&Scalar::from_u64(half as u64));
    let mut start = ctx.compute_public_key(&center);
    let stop = AtomicBool::new(false);

    run_pass(&ctx, &mut start, &base, 1, &checker, &mut bufs, &stop).unwrap();
    let records: Vec<MatchRecord> = rx.try_iter().collect();
    // every candidate matches six ways
    assert_eq!(records.len(), 6 * 2 * half);

    // and each record reconstructs to a real key
    let reconstructor = Reconstructor {
        secp: Arc::new(SecpContext::new(half)),
        kind: keygrind::address::AddressKind::P2pkh,
        start_pubkey: None,
        mask: None,
        sig: None,
        txid: None,
    };
    for rec in records.iter().take(12) {
        assert!(
            reconstructor.reconstruct(rec).is_some(),
            "record incr {} endo {} failed",
            rec.incr,
            rec.endo
        );
    }
}

/// Mask search: a zero high byte of X shows up within ~2^12 candidates.
#[test]
fn mask_high_byte_zero_hits_in_small_range() {
    let half = 8;
    let ctx = SecpContext::new(half);
    let mut bufs = BatchBuffers::new(half);

    let target = MaskTarget::new([0u64; 4], prefix_mask(1));
    let (checker, rx) = small_checker(Predicate::Mask(target), false);

    let base = Scalar::ONE;
    let center = base.add(&Scalar::from_u64(half as u64));
    let mut start = ctx.compute_public_key(&center);
    let stop = AtomicBool::new(false);

    run_pass(&ctx, &mut start, &base, 256, &checker, &mut bufs, &stop).unwrap();
    let records: Vec<MatchRecord> = rx.try_iter().collect();
    assert!(
        !records.is_empty(),
        "expected ~96 hits over 4096 candidates x 6 probes"
    );

    // reconstruct one and verify its X really has a zero high byte
    let reconstructor = Reconstructor {
        secp: Arc::new(SecpContext::new(half)),
        kind: keygrind::address::AddressKind::P2pkh,
        start_pubkey: None,
        mask: Some(target),
        sig: None,
        txid: None,
    };
    let rec = &records[0];
    match reconstructor.reconstruct(rec) {
        Some(Reconstructed::Mask { x_hex, .. }) => {
            assert!(x_hex.starts_with("00"), "x = {x_hex}");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// Taproot scenario: target Q.x of a known d with a full mask, start a
/// few keys below d, expect the worker to find and reconstruct d.
#[test]
fn taproot_roundtrip_reconstructs_private_key() {
    let half = 8;
    let secp = Arc::new(SecpContext::new(half));

    let d = Scalar::from_u64(0xDEADBEEF);
    let p = secp.compute_public_key(&d);
    let tweak = tagged_hash("TapTweak", &p.x.to_bytes());
    let t = Scalar::from_bytes_reduced(&tweak);
    let q = p.add_direct(&secp.compute_public_key(&t));
    let target = MaskTarget::new(q.x.d, [u64::MAX; 4]);

    let (tx, rx) = mpsc::channel();
    let end = Arc::new(AtomicBool::new(false));
    let handle = Arc::new(WorkerHandle::new());
    let worker = TaprootWorker {
        thread_id: 0,
        secp: Arc::clone(&secp),
        handle: Arc::clone(&handle),
        end_of_search: Arc::clone(&end),
        initial_key: Some(d.sub(&Scalar::from_u64(3))),
        start_pubkey: None,
        target,
        tx,
    };
    let join = thread::spawn(move || worker.run());

    let rec = rx
        .recv_timeout(Duration::from_secs(60))
        .expect("taproot worker should find the target within 4 steps");
    end.store(true, Ordering::Relaxed);
    join.join().unwrap();

    assert!(matches!(rec.kind, MatchKind::Taproot { .. }));
    let reconstructor = Reconstructor {
        secp,
        kind: keygrind::address::AddressKind::P2pkh,
        start_pubkey: None,
        mask: Some(target),
        sig: None,
        txid: None,
    };
    match reconstructor.reconstruct(&rec) {
        Some(Reconstructed::Taproot { priv_hex, .. }) => {
            assert_eq!(priv_hex, d.to_hex());
        }
        other => panic!("unexpected: {other:?}"),
    }
}

/// Full orchestrator: the "1" target with stop-when-found terminates
/// with at least one verified match.
#[test]
fn orchestrator_trivial_target_stops() {
    let config = SearchConfig {
        mode: SearchMode::Compressed,
        targets: vec!["1".to_string()],
        seed: Some("orchestrator test".to_string()),
        stop_when_found: true,
        nb_cpu_threads: 1,
        ..Default::default()
    };
    let search = Search::new(config).unwrap();

    // Watchdog: never hang the suite if something breaks
    let stop = search.stop_flag();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(120));
        stop.store(true, Ordering::Relaxed);
    });

    let stats = search.run().unwrap();
    assert!(stats.found >= 1, "trivial target must be found");
    assert!(stats.keys > 0);
}
