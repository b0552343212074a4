//! Search targets: address-prefix parsing, the two-level prefix lookup
//! consumed by the hot loop, wildcard patterns and bitmask targets.

pub mod mask;
pub mod pattern;

pub use mask::MaskTarget;
pub use pattern::Pattern;

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::address::AddressKind;

const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// One registered prefix target. Case-insensitive searches register one
/// target per letter-case variant, all sharing a `found` flag.
pub struct PrefixTarget {
    pub text: String,
    /// First 16 bits of the hash160 range this target lives in,
    /// little-endian read - the primary lookup index.
    pub s_prefix: u16,
    /// First 32 bits for full-address targets (secondary lookup).
    pub l_prefix: u32,
    /// Exact hash160 when the input was a complete address.
    pub full_hash: Option<[u8; 20]>,
    /// Matches every address of its kind (a run of leading '1's).
    pub singular: bool,
    pub difficulty: f64,
    pub found: Arc<AtomicBool>,
}

/// JSON bulk target file: `{"addresses": ["1...", "1...", ...]}`
#[derive(Deserialize)]
struct TargetFile {
    addresses: Vec<String>,
}

pub fn load_targets_json(path: &str) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("cannot open target file {path}"))?;
    let data: TargetFile =
        serde_json::from_reader(file).with_context(|| format!("bad target file {path}"))?;
    Ok(data.addresses)
}

/// The full target state shared read-only by every worker (the per-target
/// `found` flags are monotonic false->true and may race harmlessly).
pub struct TargetSet {
    pub kind: AddressKind,
    pub case_sensitive: bool,
    targets: Vec<PrefixTarget>,
    // 65536-slot primary table; each slot lists target indices
    slots: Vec<Vec<u32>>,
    pub only_full: bool,
    // wildcard mode: patterns replace the lookup entirely
    patterns: Vec<Pattern>,
    pattern_found: Vec<AtomicBool>,
}

impl TargetSet {
    /// Parse target strings into a lookup set. Fails when nothing useful
    /// remains - an empty search is a configuration error.
    pub fn build(inputs: &[String], case_sensitive: bool) -> Result<Self> {
        if inputs.is_empty() {
            bail!("no targets given");
        }

        let has_pattern = inputs
            .iter()
            .any(|s| s.contains('*') || s.contains('?'));

        if has_pattern {
            return Self::build_patterns(inputs, case_sensitive);
        }

        let mut kind: Option<AddressKind> = None;
        let mut targets: Vec<PrefixTarget> = Vec::new();
        let mut only_full = true;

        for input in inputs {
            let variants = if case_sensitive {
                vec![input.clone()]
            } else {
                enum_case_variants(input)
            };

            let found = Arc::new(AtomicBool::new(false));
            let mut group: Vec<PrefixTarget> = Vec::new();
            for v in &variants {
                match init_prefix(v, &mut kind) {
                    Ok(Some(mut t)) => {
                        t.found = Arc::clone(&found);
                        group.push(t);
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("Ignoring target \"{v}\": {e}"),
                }
            }
            if group.is_empty() {
                continue;
            }

            if !case_sensitive {
                adjust_case_difficulty(&mut group);
            }
            for t in &group {
                only_full &= t.full_hash.is_some();
            }
            targets.extend(group);
        }

        let kind = match kind {
            Some(k) => k,
            None => bail!("nothing to search: no valid target"),
        };
        if !case_sensitive && kind == AddressKind::Bech32 {
            bail!("case-insensitive search is not possible with bech32 targets");
        }

        // Primary table
        let mut slots: Vec<Vec<u32>> = vec![Vec::new(); 65536];
        for (idx, t) in targets.iter().enumerate() {
            if t.singular {
                for slot in slots.iter_mut() {
                    slot.push(idx as u32);
                }
            } else {
                slots[t.s_prefix as usize].push(idx as u32);
            }
        }

        Ok(Self {
            kind,
            case_sensitive,
            targets,
            slots,
            only_full,
            patterns: Vec::new(),
            pattern_found: Vec::new(),
        })
    }

    fn build_patterns(inputs: &[String], case_sensitive: bool) -> Result<Self> {
        let kind = match inputs[0].as_bytes().first() {
            Some(b'1') => AddressKind::P2pkh,
            Some(b'3') => AddressKind::P2sh,
            Some(b'b') | Some(b'B') => AddressKind::Bech32,
            _ => bail!("pattern must start with 1, 3 or b"),
        };
        let patterns: Vec<Pattern> = inputs
            .iter()
            .map(|s| Pattern::new(s, case_sensitive))
            .collect();
        let pattern_found = inputs.iter().map(|_| AtomicBool::new(false)).collect();
        Ok(Self {
            kind,
            case_sensitive,
            targets: Vec::new(),
            slots: Vec::new(),
            only_full: false,
            patterns,
            pattern_found,
        })
    }

    #[inline]
    pub fn is_pattern_search(&self) -> bool {
        !self.patterns.is_empty()
    }

    pub fn num_targets(&self) -> usize {
        if self.is_pattern_search() {
            self.patterns.len()
        } else {
            self.targets.len()
        }
    }

    pub fn target(&self, idx: u32) -> &PrefixTarget {
        &self.targets[idx as usize]
    }

    /// Hot-path probe: primary slot, then the precise per-target check.
    /// Matching targets get their `found` flag raised and their indices
    /// returned; the address is rendered at most once.
    pub fn probe(&self, h160: &[u8; 20], stop_when_found: bool) -> Vec<u32> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        let q = u16::from_le_bytes([h160[0], h160[1]]) as usize;
        let items = &self.slots[q];
        if items.is_empty() {
            return Vec::new();
        }

        let mut matched = Vec::new();
        let mut rendered: Option<String> = None;
        for &idx in items {
            let t = &self.targets[idx as usize];
            if stop_when_found && t.found.load(Ordering::Relaxed) {
                continue;
            }
            let hit = match &t.full_hash {
                Some(full) => full == h160,
                None => {
                    let addr = rendered
                        .get_or_insert_with(|| crate::address::encode(self.kind, h160));
                    addr.starts_with(&t.text)
                }
            };
            if hit {
                t.found.store(true, Ordering::Relaxed);
                matched.push(idx);
            }
        }
        matched
    }

    /// Pattern-mode probe over the rendered address.
    pub fn probe_pattern(&self, addr: &str) -> Vec<u32> {
        let mut matched = Vec::new();
        for (i, p) in self.patterns.iter().enumerate() {
            if p.matches(addr) {
                matched.push(i as u32);
            }
        }
        matched
    }

    pub fn mark_pattern_found(&self, idx: u32) {
        self.pattern_found[idx as usize].store(true, Ordering::Relaxed);
    }

    /// Every registered target has at least one hit.
    pub fn all_found(&self) -> bool {
        if self.is_pattern_search() {
            self.pattern_found
                .iter()
                .all(|f| f.load(Ordering::Relaxed))
        } else {
            self.targets
                .iter()
                .all(|t| t.found.load(Ordering::Relaxed))
        }
    }

    /// Difficulty of the most probable still-unfound target.
    pub fn difficulty(&self) -> f64 {
        let full = 2f64.powi(160);
        if self.only_full || self.is_pattern_search() {
            return full;
        }
        self.targets
            .iter()
            .filter(|t| !t.found.load(Ordering::Relaxed))
            .map(|t| t.difficulty)
            .fold(full, f64::min)
    }

    /// The compact two-level form handed to GPU kernels: per-slot
    /// {offset, count} plus ascending 32-bit extensions (full-address
    /// searches only; prefix searches carry counts alone).
    pub fn compact_lookup(&self) -> CompactLookup {
        let mut slots = vec![
            LookupSlot {
                offset: 0,
                count: 0
            };
            65536
        ];
        let mut extensions = Vec::new();
        for (q, items) in self.slots.iter().enumerate() {
            if items.is_empty() {
                continue;
            }
            slots[q].offset = extensions.len() as u32;
            slots[q].count = items.len() as u32;
            if self.only_full {
                let mut exts: Vec<u32> = items
                    .iter()
                    .map(|&i| self.targets[i as usize].l_prefix)
                    .collect();
                exts.sort_unstable();
                extensions.extend(exts);
            }
        }
        CompactLookup {
            slots,
            extensions,
            with_extensions: self.only_full,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LookupSlot {
    pub offset: u32,
    pub count: u32,
}

/// GPU-shaped lookup: 16-bit primary hit table plus a sorted 32-bit
/// secondary searched by binary section.
pub struct CompactLookup {
    pub slots: Vec<LookupSlot>,
    pub extensions: Vec<u32>,
    pub with_extensions: bool,
}

impl CompactLookup {
    pub fn contains(&self, h160: &[u8; 20]) -> bool {
        let q = u16::from_le_bytes([h160[0], h160[1]]) as usize;
        let slot = self.slots[q];
        if slot.count == 0 {
            return false;
        }
        if !self.with_extensions {
            // 16-bit hit is enough; the caller re-checks precisely
            return true;
        }
        let l32 = u32::from_le_bytes([h160[0], h160[1], h160[2], h160[3]]);
        let range =
            &self.extensions[slot.offset as usize..(slot.offset + slot.count) as usize];
        range.binary_search(&l32).is_ok()
    }
}

/// Enumerate every letter-case combination of the characters after the
/// leading version character.
fn enum_case_variants(s: &str) -> Vec<String> {
    let bytes = s.as_bytes();
    let letters: Vec<usize> = (1..bytes.len())
        .filter(|&i| bytes[i].is_ascii_alphabetic())
        .collect();
    let total = 1usize << letters.len().min(20);
    let mut out = Vec::with_capacity(total);
    for i in 0..total {
        let mut v = bytes.to_vec();
        for (j, &pos) in letters.iter().enumerate() {
            if i & (1 << j) != 0 {
                v[pos] = v[pos].to_ascii_uppercase();
            } else {
                v[pos] = v[pos].to_ascii_lowercase();
            }
        }
        out.push(String::from_utf8(v).unwrap());
    }
    out
}

/// Case-insensitive difficulty: the min among variants divided by how
/// many variants share it. Good enough when the difficulty is large.
fn adjust_case_difficulty(group: &mut [PrefixTarget]) {
    let mut d_min = f64::MAX;
    let mut nb_min = 0u32;
    for t in group.iter() {
        if t.difficulty < d_min {
            d_min = t.difficulty;
            nb_min = 1;
        } else if t.difficulty == d_min {
            nb_min += 1;
        }
    }
    let adjusted = d_min / nb_min as f64;
    for t in group.iter_mut() {
        t.difficulty = adjusted;
    }
}

fn is_singular(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.bytes().all(|c| c == b'1')
}

/// Parse one prefix string into a target, classifying its address kind.
/// `Ok(None)` means "ignore but keep going" (the original lookup prints
/// and skips); `Err` carries the reason.
fn init_prefix(prefix: &str, kind: &mut Option<AddressKind>) -> Result<Option<PrefixTarget>> {
    let a_kind = match prefix.as_bytes().first() {
        Some(b'1') => AddressKind::P2pkh,
        Some(b'3') => AddressKind::P2sh,
        Some(b'b') | Some(b'B') => AddressKind::Bech32,
        _ => bail!("must start with 1, 3 or bc1q"),
    };
    match kind {
        None => *kind = Some(a_kind),
        Some(k) if *k != a_kind => {
            bail!("only one of P2PKH, P2SH or bech32 per search")
        }
        _ => {}
    }

    if a_kind == AddressKind::Bech32 {
        return init_bech32_prefix(prefix);
    }

    // Singular '1...' prefixes match every address of the kind
    if a_kind == AddressKind::P2pkh && is_singular(prefix) {
        if prefix.len() > 21 {
            bail!("too many leading 1s");
        }
        return Ok(Some(PrefixTarget {
            text: prefix.to_string(),
            s_prefix: 0,
            l_prefix: 0,
            full_hash: None,
            singular: true,
            difficulty: 256f64.powi(prefix.len() as i32 - 1),
            found: Arc::new(AtomicBool::new(false)),
        }));
    }

    if prefix.len() < 2 {
        bail!("too short");
    }

    let decoded = bs58::decode(prefix)
        .into_vec()
        .map_err(|_| anyhow::anyhow!("0, I, O and l are not base58"))?;

    // A complete address decodes to version + hash160 + checksum
    if decoded.len() > 21 {
        let mut h = [0u8; 20];
        h.copy_from_slice(&decoded[1..21]);
        return Ok(Some(PrefixTarget {
            text: prefix.to_string(),
            s_prefix: u16::from_le_bytes([h[0], h[1]]),
            l_prefix: u32::from_le_bytes([h[0], h[1], h[2], h[3]]),
            full_hash: Some(h),
            singular: false,
            difficulty: 2f64.powi(160),
            found: Arc::new(AtomicBool::new(false)),
        }));
    }

    // Pad with '1' until the decode reaches a full 25-byte payload, which
    // pins down the most probable 16-bit hash prefix for this text.
    let mut dummy = prefix.to_string();
    let mut nb_digit = 0;
    let mut padded = bs58::decode(&dummy).into_vec().unwrap_or_default();
    while padded.len() < 25 {
        dummy.push('1');
        nb_digit += 1;
        padded = bs58::decode(&dummy)
            .into_vec()
            .map_err(|_| anyhow::anyhow!("invalid base58"))?;
    }
    if padded.len() != 25 {
        bail!("unusable prefix (decode size {})", padded.len());
    }
    if a_kind == AddressKind::P2sh && padded[0] != 5 {
        bail!("unreachable P2SH prefix (31h1 to 3R2c only)");
    }
    let mut s_prefix = u16::from_le_bytes([padded[1], padded[2]]);

    dummy.push('1');
    if let Ok(next) = bs58::decode(&dummy).into_vec() {
        if next.len() == 25 {
            s_prefix = u16::from_le_bytes([next[1], next[2]]);
            nb_digit += 1;
        }
    }

    Ok(Some(PrefixTarget {
        text: prefix.to_string(),
        s_prefix,
        l_prefix: 0,
        full_hash: None,
        singular: false,
        difficulty: 2f64.powi(192) / 58f64.powi(nb_digit),
        found: Arc::new(AtomicBool::new(false)),
    }))
}

fn init_bech32_prefix(prefix: &str) -> Result<Option<PrefixTarget>> {
    let lower = prefix.to_ascii_lowercase();
    if !lower.starts_with("bc1q") {
        bail!("bech32 targets must start with bc1q");
    }

    // Complete address?
    if let Ok((hrp, version, program)) = bech32::segwit::decode(&lower) {
        let bc = bech32::Hrp::parse("bc").unwrap();
        if hrp == bc && version == bech32::segwit::VERSION_0 && program.len() == 20 {
            let mut h = [0u8; 20];
            h.copy_from_slice(&program);
            return Ok(Some(PrefixTarget {
                text: lower,
                s_prefix: u16::from_le_bytes([h[0], h[1]]),
                l_prefix: u32::from_le_bytes([h[0], h[1], h[2], h[3]]),
                full_hash: Some(h),
                singular: false,
                difficulty: 2f64.powi(160),
                found: Arc::new(AtomicBool::new(false)),
            }));
        }
    }

    if lower.len() < 5 {
        bail!("too short (need at least one data character)");
    }
    if lower.len() >= 36 {
        bail!("too long");
    }

    // Repack the 5-bit data characters into hash bytes, MSB first
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut packed = [0u8; 8];
    let mut n = 0;
    for ch in lower[4..].bytes() {
        let v = BECH32_CHARSET
            .bytes()
            .position(|c| c == ch)
            .ok_or_else(|| {
                anyhow::anyhow!("only \"023456789acdefghjklmnpqrstuvwxyz\" allowed")
            })? as u32;
        acc = (acc << 5) | v;
        bits += 5;
        while bits >= 8 && n < packed.len() {
            bits -= 8;
            packed[n] = ((acc >> bits) & 0xFF) as u8;
            n += 1;
        }
    }
    if bits > 0 && n < packed.len() {
        packed[n] = ((acc << (8 - bits)) & 0xFF) as u8;
    }

    Ok(Some(PrefixTarget {
        text: lower.clone(),
        s_prefix: u16::from_le_bytes([packed[0], packed[1]]),
        l_prefix: 0,
        full_hash: None,
        singular: false,
        difficulty: 2f64.powi(5 * (lower.len() as i32 - 4)),
        found: Arc::new(AtomicBool::new(false)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(inputs: &[&str]) -> TargetSet {
        let v: Vec<String> = inputs.iter().map(|s| s.to_string()).collect();
        TargetSet::build(&v, true).unwrap()
    }

    #[test]
    fn full_p2pkh_address_target() {
        // hash160 of key 1 (compressed)
        let ts = set(&["1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"]);
        assert!(ts.only_full);
        let h: [u8; 20] = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6")
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(ts.probe(&h, false), vec![0]);
        assert!(ts.all_found());
        let miss = [0u8; 20];
        assert!(ts.probe(&miss, false).is_empty());
    }

    #[test]
    fn full_bech32_address_target() {
        let ts = set(&["bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"]);
        assert!(ts.only_full);
        let h: [u8; 20] = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6")
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(ts.probe(&h, false), vec![0]);
    }

    #[test]
    fn singular_target_matches_everything() {
        let ts = set(&["1"]);
        assert!(!ts.only_full);
        for h in [[0u8; 20], [0xFFu8; 20], [0x42u8; 20]] {
            assert_eq!(ts.probe(&h, false).len(), 1, "h {:02x?}", &h[..4]);
        }
    }

    #[test]
    fn stop_when_found_skips_found_targets() {
        let ts = set(&["1"]);
        let h = [7u8; 20];
        assert_eq!(ts.probe(&h, true).len(), 1);
        assert!(ts.probe(&h, true).is_empty());
        // without the flag duplicates are allowed
        assert_eq!(ts.probe(&h, false).len(), 1);
    }

    #[test]
    fn mixed_kinds_rejected() {
        let v = vec!["1Test".to_string(), "3Test".to_string()];
        // the second target is ignored with a warning, the set still builds
        let ts = TargetSet::build(&v, true).unwrap();
        assert_eq!(ts.kind, AddressKind::P2pkh);
        assert_eq!(ts.num_targets(), 1);
    }

    #[test]
    fn no_valid_targets_is_an_error() {
        let v = vec!["xyz".to_string()];
        assert!(TargetSet::build(&v, true).is_err());
        assert!(TargetSet::build(&[], true).is_err());
    }

    #[test]
    fn bech32_case_insensitive_rejected() {
        let v = vec!["bc1qtest".to_string()];
        assert!(TargetSet::build(&v, false).is_err());
    }

    #[test]
    fn pattern_mode() {
        let v = vec!["1Test*".to_string()];
        let ts = TargetSet::build(&v, true).unwrap();
        assert!(ts.is_pattern_search());
        assert_eq!(ts.probe_pattern("1TestXYZ"), vec![0]);
        assert!(ts.probe_pattern("1NopeXYZ").is_empty());
        assert!(!ts.all_found());
        ts.mark_pattern_found(0);
        assert!(ts.all_found());
    }

    #[test]
    fn case_variants_enumerate() {
        let variants = enum_case_variants("1ab");
        assert_eq!(variants.len(), 4);
        assert!(variants.contains(&"1ab".to_string()));
        assert!(variants.contains(&"1AB".to_string()));
    }

    #[test]
    fn compact_lookup_full_targets() {
        let ts = set(&["1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH"]);
        let compact = ts.compact_lookup();
        assert!(compact.with_extensions);
        let h: [u8; 20] = hex::decode("751e76e8199196d454941c45d1b3a323f1433bd6")
            .unwrap()
            .try_into()
            .unwrap();
        assert!(compact.contains(&h));
        // same 16-bit slot, different extension -> miss
        let mut near = h;
        near[2] ^= 0xFF;
        assert!(!compact.contains(&near));
        assert!(!compact.contains(&[0u8; 20]));
    }

    #[test]
    fn compact_lookup_prefix_targets() {
        let ts = set(&["1Test"]);
        let compact = ts.compact_lookup();
        assert!(!compact.with_extensions);
        // find the registered slot
        let q = ts.targets[0].s_prefix;
        let mut h = [0u8; 20];
        h[0..2].copy_from_slice(&q.to_le_bytes());
        assert!(compact.contains(&h));
    }

    #[test]
    fn bech32_prefix_slot_matches_hash_bits() {
        // "w508" in 5-bit: w=14, 5=20, 0=15, 8=7 -> 01110 10100 01111 00111
        // packed bytes: 01110101 00011110 .... = 0x75 0x1E
        let v = vec!["bc1qw508".to_string()];
        let ts = TargetSet::build(&v, true).unwrap();
        assert_eq!(ts.targets[0].s_prefix, u16::from_le_bytes([0x75, 0x1E]));
    }
}
