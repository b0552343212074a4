//! Per-candidate predicate evaluation and match records.
//!
//! The batch engine hands every visited point to [`Checker`], which
//! expands it into the six derived candidates (two endomorphisms and the
//! y-negated twin of each) and evaluates the active predicate. A hit
//! becomes a [`MatchRecord`] on the match queue; reconstruction happens
//! later, off the hot path.

use std::sync::mpsc::Sender;

use crate::address::AddressKind;
use crate::hashing::{hash160_compressed, hash160_nested, hash160_uncompressed};
use crate::secp::{FieldElement, Point, Scalar, BETA, BETA2};
use crate::target::{MaskTarget, TargetSet};
use std::sync::Arc;

/// What a match was found against, plus what reconstruction needs.
#[derive(Clone, Debug)]
pub enum MatchKind {
    /// Prefix-lookup hit: the hash and the target index it satisfied.
    Address { h160: [u8; 20], target: u32 },
    /// Wildcard hit: the hash and the pattern index.
    Pattern { h160: [u8; 20], pattern: u32 },
    /// Raw X-coordinate bitmask hit.
    Mask { x: [u64; 4] },
    /// Signature R.x bitmask hit (the scalar is the nonce k).
    SigR { x: [u64; 4] },
    /// Tweaked output key Q.x hit (the scalar is the internal key).
    Taproot { qx: [u64; 4] },
    /// Transaction-id hit: the full TXID and the nonce that produced it.
    Txid { txid: [u8; 32], nonce: u32 },
}

/// One reported hit. Carries the exact base-key snapshot of the pass the
/// hit was found in, so reconstruction never has to reason about how far
/// the worker has advanced since.
#[derive(Clone, Debug)]
pub struct MatchRecord {
    pub thread_id: usize,
    pub base_key: Scalar,
    /// Signed candidate index within the pass: the scalar is
    /// base_key + incr, negated when incr < 0.
    pub incr: i64,
    /// 0 = identity, 1 = lambda, 2 = lambda^2.
    pub endo: u8,
    pub compressed: bool,
    pub kind: MatchKind,
}

/// The predicate a search runs.
pub enum Predicate {
    Prefix(Arc<TargetSet>),
    Pattern(Arc<TargetSet>),
    Mask(MaskTarget),
    SigR(MaskTarget),
    Taproot(MaskTarget),
    Txid(MaskTarget),
}

impl Predicate {
    /// Build the right variant for a target set.
    pub fn for_targets(set: Arc<TargetSet>) -> Self {
        if set.is_pattern_search() {
            Predicate::Pattern(set)
        } else {
            Predicate::Prefix(set)
        }
    }

    /// P2SH targets match the nested witness-script hash, not the raw
    /// pubkey hash.
    fn nested(&self) -> bool {
        match self {
            Predicate::Prefix(set) | Predicate::Pattern(set) => {
                set.kind == AddressKind::P2sh
            }
            _ => false,
        }
    }
}

/// Per-worker checker: owns the predicate handle, the serialization
/// modes to test and the match queue sender.
pub struct Checker {
    pub predicate: Predicate,
    pub check_compressed: bool,
    pub check_uncompressed: bool,
    pub stop_when_found: bool,
    pub thread_id: usize,
    pub tx: Sender<MatchRecord>,
}

impl Checker {
    /// Evaluate every derived candidate of one visited group point.
    /// `incr` is the signed offset of `p` from the pass base key.
    pub fn check_point(&self, base_key: &Scalar, incr: i64, p: &Point) {
        match &self.predicate {
            Predicate::Prefix(_) | Predicate::Pattern(_) => {
                if self.check_compressed {
                    self.check_hashes(base_key, incr, p, true);
                }
                if self.check_uncompressed {
                    self.check_hashes(base_key, incr, p, false);
                }
            }
            Predicate::Mask(t) | Predicate::SigR(t) => {
                self.check_mask_all(base_key, incr, p, *t);
            }
            // Taproot and TXID candidates never come through the batch
            // engine; their workers evaluate the mask directly.
            Predicate::Taproot(_) | Predicate::Txid(_) => {}
        }
    }

    /// Six hash probes: (x, beta x, beta^2 x) for y and -y. The x bytes
    /// are serialized once per variant and shared between both signs.
    fn check_hashes(&self, base_key: &Scalar, incr: i64, p: &Point, compressed: bool) {
        let nested = self.predicate.nested();
        let wrap = |h: [u8; 20]| if nested { hash160_nested(&h) } else { h };

        let x_bytes = p.x.to_bytes();
        let beta_x = p.x.mul(&BETA).to_bytes();
        let beta2_x = p.x.mul(&BETA2).to_bytes();

        if compressed {
            let odd = p.y.is_odd();
            for (endo, xb) in [(0u8, &x_bytes), (1, &beta_x), (2, &beta2_x)] {
                self.probe_hash(base_key, incr, endo, compressed,
                    wrap(hash160_compressed(xb, odd)));
                self.probe_hash(base_key, -incr, endo, compressed,
                    wrap(hash160_compressed(xb, !odd)));
            }
        } else {
            let y_bytes = p.y.to_bytes();
            let neg_y_bytes = p.y.neg().to_bytes();
            for (endo, xb) in [(0u8, &x_bytes), (1, &beta_x), (2, &beta2_x)] {
                self.probe_hash(base_key, incr, endo, compressed,
                    wrap(hash160_uncompressed(xb, &y_bytes)));
                self.probe_hash(base_key, -incr, endo, compressed,
                    wrap(hash160_uncompressed(xb, &neg_y_bytes)));
            }
        }
    }

    fn probe_hash(
        &self,
        base_key: &Scalar,
        incr: i64,
        endo: u8,
        compressed: bool,
        h160: [u8; 20],
    ) {
        match &self.predicate {
            Predicate::Prefix(set) => {
                for target in set.probe(&h160, self.stop_when_found) {
                    self.emit(base_key, incr, endo, compressed,
                        MatchKind::Address { h160, target });
                }
            }
            Predicate::Pattern(set) => {
                let addr = crate::address::encode(set.kind, &h160);
                for pattern in set.probe_pattern(&addr) {
                    self.emit(base_key, incr, endo, compressed,
                        MatchKind::Pattern { h160, pattern });
                }
            }
            _ => {}
        }
    }

    /// Six mask probes on raw X. Negating y leaves x unchanged, but both
    /// signed incrs are emitted so each maps back to a distinct scalar.
    fn check_mask_all(
        &self,
        base_key: &Scalar,
        incr: i64,
        p: &Point,
        target: MaskTarget,
    ) {
        let variants: [(u8, FieldElement); 3] = [
            (0, p.x),
            (1, p.x.mul(&BETA)),
            (2, p.x.mul(&BETA2)),
        ];
        let sig_mode = matches!(self.predicate, Predicate::SigR(_));
        for (endo, x) in variants {
            if target.matches(&x.d) {
                let kind = |x: [u64; 4]| {
                    if sig_mode {
                        MatchKind::SigR { x }
                    } else {
                        MatchKind::Mask { x }
                    }
                };
                self.emit(base_key, incr, endo, true, kind(x.d));
                self.emit(base_key, -incr, endo, true, kind(x.d));
            }
        }
    }

    pub fn emit(
        &self,
        base_key: &Scalar,
        incr: i64,
        endo: u8,
        compressed: bool,
        kind: MatchKind,
    ) {
        let _ = self.tx.send(MatchRecord {
            thread_id: self.thread_id,
            base_key: *base_key,
            incr,
            endo,
            compressed,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn checker(predicate: Predicate) -> (Checker, mpsc::Receiver<MatchRecord>) {
        let (tx, rx) = mpsc::channel();
        (
            Checker {
                predicate,
                check_compressed: true,
                check_uncompressed: false,
                stop_when_found: false,
                thread_id: 0,
                tx,
            },
            rx,
        )
    }

    #[test]
    fn singular_prefix_hits_all_six_variants() {
        let set = Arc::new(
            TargetSet::build(&["1".to_string()], true).unwrap(),
        );
        let (c, rx) = checker(Predicate::for_targets(set));
        let k = Scalar::from_u64(5);
        let p = Point::G.mul(&k);
        c.check_point(&Scalar::from_u64(3), 2, &p);
        let records: Vec<MatchRecord> = rx.try_iter().collect();
        assert_eq!(records.len(), 6);
        let endos: Vec<u8> = records.iter().map(|r| r.endo).collect();
        assert_eq!(endos.iter().filter(|&&e| e == 0).count(), 2);
        assert_eq!(endos.iter().filter(|&&e| e == 1).count(), 2);
        assert_eq!(endos.iter().filter(|&&e| e == 2).count(), 2);
        assert_eq!(records.iter().filter(|r| r.incr < 0).count(), 3);
    }

    #[test]
    fn full_mask_hits_only_matching_x() {
        let k = Scalar::from_u64(1234);
        let p = Point::G.mul(&k);
        let target = MaskTarget::new(p.x.d, [u64::MAX; 4]);
        let (c, rx) = checker(Predicate::Mask(target));
        c.check_point(&Scalar::from_u64(1000), 234, &p);
        let records: Vec<MatchRecord> = rx.try_iter().collect();
        // endo 0 matches for both signs; beta variants do not
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.endo == 0));
        assert_eq!(records[0].incr, 234);
        assert_eq!(records[1].incr, -234);
    }

    #[test]
    fn mask_hits_endomorphic_x() {
        let k = Scalar::from_u64(999);
        let p = Point::G.mul(&k);
        let beta_x = p.x.mul(&BETA);
        let target = MaskTarget::new(beta_x.d, [u64::MAX; 4]);
        let (c, rx) = checker(Predicate::Mask(target));
        c.check_point(&Scalar::from_u64(999), 0, &p);
        let records: Vec<MatchRecord> = rx.try_iter().collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.endo == 1));
    }
}
