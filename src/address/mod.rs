//! Address and key rendering: Base58Check (P2PKH, P2SH, WIF) and bech32
//! segwit v0/v1.

use crate::secp::Scalar;

/// The address family a search targets. Targets of different kinds
/// cannot be mixed in one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
    Bech32,
}

impl AddressKind {
    /// Label used in the `Priv (WIF):` output line.
    pub fn wif_label(&self) -> &'static str {
        match self {
            AddressKind::P2pkh => "p2pkh",
            AddressKind::P2sh => "p2wpkh-p2sh",
            AddressKind::Bech32 => "p2wpkh",
        }
    }
}

/// Render a hash160 as an address of the given kind.
pub fn encode(kind: AddressKind, h160: &[u8; 20]) -> String {
    match kind {
        AddressKind::P2pkh => base58check(0x00, h160),
        AddressKind::P2sh => base58check(0x05, h160),
        AddressKind::Bech32 => {
            let hrp = bech32::Hrp::parse("bc").unwrap();
            bech32::segwit::encode(hrp, bech32::segwit::VERSION_0, h160).unwrap()
        }
    }
}

/// Taproot (segwit v1) address of a 32-byte output key.
pub fn encode_taproot(output_key: &[u8; 32]) -> String {
    let hrp = bech32::Hrp::parse("bc").unwrap();
    bech32::segwit::encode(hrp, bech32::segwit::VERSION_1, output_key).unwrap()
}

fn base58check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(&data).with_check().into_string()
}

/// Wallet Import Format of a private key.
pub fn wif(key: &Scalar, compressed: bool) -> String {
    let mut data = Vec::with_capacity(34);
    data.push(0x80);
    data.extend_from_slice(&key.to_bytes());
    if compressed {
        data.push(0x01);
    }
    bs58::encode(&data).with_check().into_string()
}
