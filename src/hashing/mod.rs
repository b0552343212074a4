//! Hash adapters: SHA-256, double SHA-256, RIPEMD-160, hash160 in its
//! P2PKH / P2SH flavors, and the BIP-340 tagged hash.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::secp::Point;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA256(SHA256(data)), the TXID hash.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// BIP-340/341 tagged hash: SHA256(SHA256(tag) || SHA256(tag) || data)
pub fn tagged_hash(tag: &str, data: &[u8]) -> [u8; 32] {
    let tag_hash = Sha256::digest(tag.as_bytes());
    let mut engine = Sha256::new();
    engine.update(tag_hash);
    engine.update(tag_hash);
    engine.update(data);
    engine.finalize().into()
}

/// 33-byte compressed SEC1 encoding (02/03 || x).
#[inline]
pub fn serialize_compressed(p: &Point) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = if p.y.is_odd() { 0x03 } else { 0x02 };
    out[1..33].copy_from_slice(&p.x.to_bytes());
    out
}

/// 65-byte uncompressed SEC1 encoding (04 || x || y).
#[inline]
pub fn serialize_uncompressed(p: &Point) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[0] = 0x04;
    out[1..33].copy_from_slice(&p.x.to_bytes());
    out[33..65].copy_from_slice(&p.y.to_bytes());
    out
}

/// hash160 of the compressed pubkey (P2PKH / native segwit payload).
///
/// Takes x bytes separately so the batch engine can reuse one `to_bytes`
/// across the endomorphism variants of a point.
#[inline]
pub fn hash160_compressed(x_bytes: &[u8; 32], y_odd: bool) -> [u8; 20] {
    let mut pubkey = [0u8; 33];
    pubkey[0] = if y_odd { 0x03 } else { 0x02 };
    pubkey[1..33].copy_from_slice(x_bytes);
    hash160(&pubkey)
}

/// hash160 of the uncompressed pubkey.
#[inline]
pub fn hash160_uncompressed(x_bytes: &[u8; 32], y_bytes: &[u8; 32]) -> [u8; 20] {
    let mut pubkey = [0u8; 65];
    pubkey[0] = 0x04;
    pubkey[1..33].copy_from_slice(x_bytes);
    pubkey[33..65].copy_from_slice(y_bytes);
    hash160(&pubkey)
}

/// P2SH-P2WPKH: hash160 of the witness script 0014<h160>.
#[inline]
pub fn hash160_nested(h160: &[u8; 20]) -> [u8; 20] {
    let mut script = [0u8; 22];
    script[0] = 0x00;
    script[1] = 0x14;
    script[2..22].copy_from_slice(h160);
    hash160(&script)
}
