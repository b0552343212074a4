//! Search configuration and validation. Configuration errors are fatal
//! at startup; nothing here is consulted on the hot path.

use anyhow::{bail, Result};

use crate::hashing::sha256;
use crate::secp::{FieldElement, Point, Scalar};
use crate::target::MaskTarget;

/// What quantity is being matched, and in which serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// hash160 of the compressed pubkey against address targets.
    Compressed,
    /// hash160 of the uncompressed pubkey.
    Uncompressed,
    /// Both serializations per candidate.
    Both,
    /// Raw X coordinate against a bitmask.
    Mask,
    /// Signature R.x against a bitmask; reconstruction emits (r, s).
    Sig,
    /// Tweaked taproot output key Q.x against a bitmask.
    Taproot,
    /// SHA256d of a raw transaction with a nonce window.
    Txid,
}

impl SearchMode {
    pub fn is_address_search(&self) -> bool {
        matches!(
            self,
            SearchMode::Compressed | SearchMode::Uncompressed | SearchMode::Both
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchMode::Compressed => "Compressed",
            SearchMode::Uncompressed => "Uncompressed",
            SearchMode::Both => "Compressed or Uncompressed",
            SearchMode::Mask => "Mask",
            SearchMode::Sig => "Signature R",
            SearchMode::Taproot => "Taproot",
            SearchMode::Txid => "TXID",
        }
    }
}

/// Inputs for signature R-value grinding: the externally supplied
/// message hash and signing key.
#[derive(Clone, Debug)]
pub struct SigParams {
    pub schnorr: bool,
    pub msg_hash: Scalar,
    pub priv_key: Scalar,
    pub pubkey_x: FieldElement,
}

/// Inputs for TXID grinding.
#[derive(Clone, Debug)]
pub struct TxidParams {
    pub raw_tx: Vec<u8>,
    pub nonce_offset: usize,
    pub nonce_len: usize,
}

pub struct SearchConfig {
    pub mode: SearchMode,
    /// Address prefixes, full addresses or wildcard patterns.
    pub targets: Vec<String>,
    pub case_sensitive: bool,
    /// The bitmask target for the non-address modes.
    pub mask: Option<MaskTarget>,
    pub seed: Option<String>,
    /// Rekey threshold in Mkeys; 0 disables rekeying.
    pub rekey_mkeys: u64,
    pub stop_when_found: bool,
    /// Cap on reported matches; 0 means unlimited.
    pub max_found: u64,
    pub output_file: Option<String>,
    /// 0 selects the machine's CPU count.
    pub nb_cpu_threads: usize,
    /// Offset search: candidates are k*G + start_pubkey.
    pub start_pubkey: Option<Point>,
    pub sig: Option<SigParams>,
    pub txid: Option<TxidParams>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Compressed,
            targets: Vec::new(),
            case_sensitive: true,
            mask: None,
            seed: None,
            rekey_mkeys: 0,
            stop_when_found: false,
            max_found: 0,
            output_file: None,
            nb_cpu_threads: 0,
            start_pubkey: None,
            sig: None,
            txid: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mode.is_address_search() {
            if self.targets.is_empty() {
                bail!("nothing to search: no address target given");
            }
        } else {
            if self.mask.is_none() {
                bail!("{} mode needs a target value and mask", self.mode.label());
            }
            if let Some(m) = &self.mask {
                if m.num_bits() == 0 {
                    bail!("empty mask would match everything");
                }
            }
        }

        if self.mode == SearchMode::Sig && self.sig.is_none() {
            bail!("signature mode needs a message hash and signing key");
        }
        if let Some(sig) = &self.sig {
            if !sig.priv_key.is_valid_key() {
                bail!("signing key out of range");
            }
        }

        if self.mode == SearchMode::Txid {
            let Some(txid) = &self.txid else {
                bail!("txid mode needs a raw transaction");
            };
            if txid.raw_tx.is_empty() {
                bail!("raw transaction is empty");
            }
            if txid.nonce_len == 0 || txid.nonce_len > 4 {
                bail!("nonce length must be 1..=4 bytes");
            }
            if txid.nonce_offset + txid.nonce_len > txid.raw_tx.len() {
                bail!("nonce window outside the raw transaction");
            }
        }

        Ok(())
    }

    pub fn threads(&self) -> usize {
        if self.nb_cpu_threads == 0 {
            num_cpus::get()
        } else {
            self.nb_cpu_threads
        }
    }
}

/// Base-key derivation: a seed maps through SHA-256, otherwise a fresh
/// random scalar. Stronger stretching belongs to the caller.
pub fn derive_start_key(seed: Option<&str>) -> Scalar {
    match seed {
        Some(s) => {
            let digest = sha256(s.as_bytes());
            let key = Scalar::from_bytes_reduced(&digest);
            if key.is_valid_key() {
                key
            } else {
                Scalar::ONE
            }
        }
        None => crate::engine::fresh_random_key(),
    }
}
