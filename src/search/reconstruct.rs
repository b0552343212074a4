//! Match reconstruction: recover the exact private scalar behind a
//! match record, re-derive the matched quantity end to end and verify
//! it. A record that fails verification is a bug indicator; it is
//! reported once on stderr and suppressed from the results.

use std::sync::Arc;

use crate::address::{self, AddressKind};
use crate::config::{SigParams, TxidParams};
use crate::engine::{MatchKind, MatchRecord};
use crate::hashing::{
    hash160_compressed, hash160_nested, hash160_uncompressed, serialize_compressed, sha256d,
    tagged_hash,
};
use crate::secp::{Point, Scalar, SecpContext, LAMBDA, LAMBDA2};
use crate::target::mask::{limbs_from_be, limbs_to_hex};
use crate::target::MaskTarget;

/// A verified, display-ready result.
#[derive(Clone, Debug)]
pub enum Reconstructed {
    Address {
        addr: String,
        wif: String,
        key_hex: String,
        /// Offset search: the key is partial (full key = partial + offset
        /// secret), rendered as `PartialPriv`.
        partial: bool,
        wif_label: &'static str,
        /// Pattern index to mark found, when the hit came from a glob.
        pattern: Option<u32>,
    },
    Mask {
        x_hex: String,
        wif: String,
        key_hex: String,
    },
    Sig {
        schnorr: bool,
        k_hex: String,
        rx_hex: String,
        r_hex: String,
        s_hex: String,
        ry_odd: bool,
    },
    Taproot {
        priv_hex: String,
        internal_x_hex: String,
        tweak_hex: String,
        output_x_hex: String,
        wif: String,
    },
    Txid {
        txid_hex: String,
        nonce: u32,
        tx_hex: String,
    },
}

pub struct Reconstructor {
    pub secp: Arc<SecpContext>,
    pub kind: AddressKind,
    pub start_pubkey: Option<Point>,
    pub mask: Option<MaskTarget>,
    pub sig: Option<SigParams>,
    pub txid: Option<TxidParams>,
}

impl Reconstructor {
    /// Recover (key, pubkey) from the record: apply the signed offset,
    /// then the endomorphism multiplier, then the start-pubkey offset
    /// with the matching transforms.
    fn recover(&self, rec: &MatchRecord, negate: bool) -> (Scalar, Point) {
        let mut k = rec.base_key;
        let mut sp = self.start_pubkey;

        if rec.incr < 0 {
            k = k.add(&Scalar::from_u64(rec.incr.unsigned_abs()));
            k = k.neg();
            if let Some(p) = sp.as_mut() {
                *p = p.neg();
            }
        } else {
            k = k.add(&Scalar::from_u64(rec.incr as u64));
        }

        match rec.endo {
            1 => {
                k = k.mul(&LAMBDA);
                if let Some(p) = sp.as_mut() {
                    *p = p.endomorphism(1);
                }
            }
            2 => {
                k = k.mul(&LAMBDA2);
                if let Some(p) = sp.as_mut() {
                    *p = p.endomorphism(2);
                }
            }
            _ => {}
        }

        // The symmetric case: the matched point may belong to -k
        if negate {
            k = k.neg();
            if let Some(p) = sp.as_mut() {
                *p = p.neg();
            }
        }

        let mut pubkey = self.secp.compute_public_key(&k);
        if let Some(p) = &sp {
            pubkey = pubkey.add_direct(p);
        }
        (k, pubkey)
    }

    /// Independent oracle: re-derive the public key with the secp256k1
    /// crate and compare serializations. Only possible without a
    /// start-pubkey offset.
    fn cross_check(&self, key: &Scalar, pubkey: &Point) -> bool {
        if self.start_pubkey.is_some() {
            return true;
        }
        match secp256k1::SecretKey::from_slice(&key.to_bytes()) {
            Ok(sk) => {
                let pk = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &sk);
                pk.serialize() == serialize_compressed(pubkey)
            }
            Err(_) => false,
        }
    }

    pub fn reconstruct(&self, rec: &MatchRecord) -> Option<Reconstructed> {
        match &rec.kind {
            MatchKind::Address { h160, target: _ } => self.reconstruct_address(rec, h160, None),
            MatchKind::Pattern { h160, pattern } => {
                self.reconstruct_address(rec, h160, Some(*pattern))
            }
            MatchKind::Mask { x } => self.reconstruct_mask(rec, x),
            MatchKind::SigR { x } => self.reconstruct_sig(rec, x),
            MatchKind::Taproot { qx } => self.reconstruct_taproot(rec, qx),
            MatchKind::Txid { txid, nonce } => self.reconstruct_txid(txid, *nonce),
        }
    }

    fn derived_hash(&self, pubkey: &Point, compressed: bool) -> [u8; 20] {
        let h = if compressed {
            hash160_compressed(&pubkey.x.to_bytes(), pubkey.y.is_odd())
        } else {
            hash160_uncompressed(&pubkey.x.to_bytes(), &pubkey.y.to_bytes())
        };
        if self.kind == AddressKind::P2sh {
            hash160_nested(&h)
        } else {
            h
        }
    }

    fn reconstruct_address(
        &self,
        rec: &MatchRecord,
        h160: &[u8; 20],
        pattern: Option<u32>,
    ) -> Option<Reconstructed> {
        let (mut key, mut pubkey) = self.recover(rec, false);
        if self.derived_hash(&pubkey, rec.compressed) != *h160 {
            let (k2, p2) = self.recover(rec, true);
            if self.derived_hash(&p2, rec.compressed) != *h160 {
                self.warn_mismatch(rec, &address::encode(self.kind, h160));
                return None;
            }
            key = k2;
            pubkey = p2;
        }
        if !self.cross_check(&key, &pubkey) {
            self.warn_mismatch(rec, &address::encode(self.kind, h160));
            return None;
        }

        let partial = self.start_pubkey.is_some();
        Some(Reconstructed::Address {
            addr: address::encode(self.kind, h160),
            wif: address::wif(&key, rec.compressed),
            key_hex: key.to_hex(),
            partial,
            wif_label: self.kind.wif_label(),
            pattern,
        })
    }

    fn reconstruct_mask(&self, rec: &MatchRecord, x: &[u64; 4]) -> Option<Reconstructed> {
        let (mut key, mut pubkey) = self.recover(rec, false);
        if pubkey.x.d != *x {
            let (k2, p2) = self.recover(rec, true);
            if p2.x.d != *x {
                self.warn_mismatch(rec, &limbs_to_hex(x));
                return None;
            }
            key = k2;
            pubkey = p2;
        }
        if !self.cross_check(&key, &pubkey) {
            self.warn_mismatch(rec, &limbs_to_hex(x));
            return None;
        }
        Some(Reconstructed::Mask {
            x_hex: limbs_to_hex(x),
            wif: address::wif(&key, true),
            key_hex: key.to_hex(),
        })
    }

    /// The matched scalar is the signature nonce; complete the ECDSA or
    /// BIP-340 Schnorr signature over the configured message and key.
    fn reconstruct_sig(&self, rec: &MatchRecord, x: &[u64; 4]) -> Option<Reconstructed> {
        let sig = self.sig.as_ref()?;

        let (mut k, mut r_point) = self.recover(rec, false);
        if r_point.x.d != *x {
            let (k2, p2) = self.recover(rec, true);
            if p2.x.d != *x {
                self.warn_mismatch(rec, &limbs_to_hex(x));
                return None;
            }
            k = k2;
            r_point = p2;
        }

        if sig.schnorr {
            // BIP-340 wants an even R.y; negating k flips the parity
            // without moving R.x
            if r_point.y.is_odd() {
                k = k.neg();
                r_point = self.secp.compute_public_key(&k);
            }
            // e = H_challenge(R.x || P.x || m)
            let mut challenge = [0u8; 96];
            challenge[0..32].copy_from_slice(&r_point.x.to_bytes());
            challenge[32..64].copy_from_slice(&sig.pubkey_x.to_bytes());
            challenge[64..96].copy_from_slice(&sig.msg_hash.to_bytes());
            let e = Scalar::from_bytes_reduced(&tagged_hash("BIP0340/challenge", &challenge));

            // s = k + e*d, no inversion needed
            let s = k.add(&e.mul(&sig.priv_key));
            let r = Scalar::from_bytes_reduced(&r_point.x.to_bytes());
            Some(Reconstructed::Sig {
                schnorr: true,
                k_hex: k.to_hex(),
                rx_hex: hex::encode(r_point.x.to_bytes()),
                r_hex: r.to_hex(),
                s_hex: s.to_hex(),
                ry_odd: r_point.y.is_odd(),
            })
        } else {
            // ECDSA: s = k^-1 * (z + r*d), then BIP-146 low-s
            let r = Scalar::from_bytes_reduced(&r_point.x.to_bytes());
            let mut s = k
                .inverse()
                .mul(&sig.msg_hash.add(&r.mul(&sig.priv_key)));
            if s.is_high() {
                s = s.neg();
            }
            Some(Reconstructed::Sig {
                schnorr: false,
                k_hex: k.to_hex(),
                rx_hex: hex::encode(r_point.x.to_bytes()),
                r_hex: r.to_hex(),
                s_hex: s.to_hex(),
                ry_odd: r_point.y.is_odd(),
            })
        }
    }

    fn reconstruct_taproot(&self, rec: &MatchRecord, qx: &[u64; 4]) -> Option<Reconstructed> {
        let (key, internal) = self.recover(rec, false);

        // Q = P + H_TapTweak(P.x)*G must land exactly on the matched x
        let tweak_bytes = tagged_hash("TapTweak", &internal.x.to_bytes());
        let tweak = Scalar::from_bytes_reduced(&tweak_bytes);
        let q = internal.add_direct(&self.secp.compute_public_key(&tweak));
        if q.is_infinity() || q.x.d != *qx {
            self.warn_mismatch(rec, &limbs_to_hex(qx));
            return None;
        }
        if let Some(mask) = &self.mask {
            if !mask.matches(&q.x.d) {
                self.warn_mismatch(rec, &limbs_to_hex(qx));
                return None;
            }
        }
        if !self.cross_check(&key, &internal) {
            self.warn_mismatch(rec, &limbs_to_hex(qx));
            return None;
        }

        Some(Reconstructed::Taproot {
            priv_hex: key.to_hex(),
            internal_x_hex: hex::encode(internal.x.to_bytes()),
            tweak_hex: tweak.to_hex(),
            output_x_hex: hex::encode(q.x.to_bytes()),
            wif: address::wif(&key, true),
        })
    }

    fn reconstruct_txid(&self, txid: &[u8; 32], nonce: u32) -> Option<Reconstructed> {
        let params = self.txid.as_ref()?;
        let mut tx_bytes = params.raw_tx.clone();
        for j in 0..params.nonce_len {
            tx_bytes[params.nonce_offset + j] = (nonce >> (j * 8)) as u8;
        }
        let digest = sha256d(&tx_bytes);
        if digest != *txid {
            eprintln!("\nWarning, TXID record does not reproduce: nonce 0x{nonce:08x}");
            return None;
        }
        if let Some(mask) = &self.mask {
            if !mask.matches(&limbs_from_be(&digest)) {
                eprintln!("\nWarning, TXID record misses the target: nonce 0x{nonce:08x}");
                return None;
            }
        }
        Some(Reconstructed::Txid {
            txid_hex: hex::encode(digest),
            nonce,
            tx_hex: hex::encode(&tx_bytes),
        })
    }

    fn warn_mismatch(&self, rec: &MatchRecord, what: &str) {
        eprintln!("\nWarning, wrong private key generated !");
        eprintln!("  Match:{what}");
        eprintln!(
            "  Endo:{} incr:{} comp:{}",
            rec.endo, rec.incr, rec.compressed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchRecord;
    use crate::secp::FieldElement;

    fn reconstructor(secp: Arc<SecpContext>) -> Reconstructor {
        Reconstructor {
            secp,
            kind: AddressKind::P2pkh,
            start_pubkey: None,
            mask: None,
            sig: None,
            txid: None,
        }
    }

    fn record_for(
        secp: &SecpContext,
        base: u64,
        incr: i64,
        endo: u8,
        compressed: bool,
    ) -> MatchRecord {
        // Derive the hash the engine would have matched for this record
        let base_key = Scalar::from_u64(base);
        let mut k = base_key.offset(incr.abs());
        if incr < 0 {
            k = k.neg();
        }
        match endo {
            1 => k = k.mul(&LAMBDA),
            2 => k = k.mul(&LAMBDA2),
            _ => {}
        }
        let p = secp.compute_public_key(&k);
        let h160 = if compressed {
            hash160_compressed(&p.x.to_bytes(), p.y.is_odd())
        } else {
            hash160_uncompressed(&p.x.to_bytes(), &p.y.to_bytes())
        };
        MatchRecord {
            thread_id: 0,
            base_key,
            incr,
            endo,
            compressed,
            kind: MatchKind::Address { h160, target: 0 },
        }
    }

    #[test]
    fn address_matrix_reconstructs() {
        let secp = Arc::new(SecpContext::new(8));
        let r = reconstructor(Arc::clone(&secp));
        for incr in [5i64, -5] {
            for endo in [0u8, 1, 2] {
                for compressed in [true, false] {
                    let rec = record_for(&secp, 1_000_000, incr, endo, compressed);
                    let out = r.reconstruct(&rec);
                    assert!(
                        matches!(out, Some(Reconstructed::Address { .. })),
                        "incr {incr} endo {endo} compressed {compressed}"
                    );
                }
            }
        }
    }

    #[test]
    fn corrupt_record_is_rejected() {
        let secp = Arc::new(SecpContext::new(8));
        let r = reconstructor(Arc::clone(&secp));
        let mut rec = record_for(&secp, 42, 3, 0, true);
        rec.incr = 4; // wrong offset: hash no longer matches
        assert!(r.reconstruct(&rec).is_none());
    }

    #[test]
    fn mask_record_reconstructs() {
        let secp = Arc::new(SecpContext::new(8));
        let r = reconstructor(Arc::clone(&secp));
        let k = Scalar::from_u64(777);
        let p = secp.compute_public_key(&k);
        let rec = MatchRecord {
            thread_id: 0,
            base_key: Scalar::from_u64(700),
            incr: 77,
            endo: 0,
            compressed: true,
            kind: MatchKind::Mask { x: p.x.d },
        };
        match r.reconstruct(&rec) {
            Some(Reconstructed::Mask { key_hex, .. }) => {
                assert_eq!(key_hex, k.to_hex());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ecdsa_sig_verifies_algebraically() {
        let secp = Arc::new(SecpContext::new(8));
        let d = Scalar::from_u64(0x1234567);
        let z = Scalar::from_u64(0xABCDEF);
        let mut r = reconstructor(Arc::clone(&secp));
        r.sig = Some(SigParams {
            schnorr: false,
            msg_hash: z,
            priv_key: d,
            pubkey_x: FieldElement::ZERO,
        });

        let k = Scalar::from_u64(99991);
        let rp = secp.compute_public_key(&k);
        let rec = MatchRecord {
            thread_id: 0,
            base_key: k,
            incr: 0,
            endo: 0,
            compressed: true,
            kind: MatchKind::SigR { x: rp.x.d },
        };
        match r.reconstruct(&rec) {
            Some(Reconstructed::Sig {
                r_hex, s_hex, ..
            }) => {
                // verify s*k = z + r*d mod n (undoing any low-s flip)
                let r_scalar =
                    Scalar::from_bytes_reduced(&hex::decode(&r_hex).unwrap().try_into().unwrap());
                let s_scalar =
                    Scalar::from_bytes_reduced(&hex::decode(&s_hex).unwrap().try_into().unwrap());
                let rhs = z.add(&r_scalar.mul(&d));
                let lhs = s_scalar.mul(&k);
                assert!(lhs == rhs || lhs.neg() == rhs);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
