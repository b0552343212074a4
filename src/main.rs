use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use keygrind::config::{SearchConfig, SearchMode, SigParams, TxidParams};
use keygrind::search::Search;
use keygrind::secp::{FieldElement, Point, Scalar};
use keygrind::target::{load_targets_json, MaskTarget};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Compressed,
    Uncompressed,
    Both,
    Mask,
    Sig,
    Taproot,
    Txid,
}

impl From<ModeArg> for SearchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Compressed => SearchMode::Compressed,
            ModeArg::Uncompressed => SearchMode::Uncompressed,
            ModeArg::Both => SearchMode::Both,
            ModeArg::Mask => SearchMode::Mask,
            ModeArg::Sig => SearchMode::Sig,
            ModeArg::Taproot => SearchMode::Taproot,
            ModeArg::Txid => SearchMode::Txid,
        }
    }
}

/// Brute-force search over secp256k1: vanity address prefixes,
/// X-coordinate masks, signature R grinding, taproot output keys, TXIDs.
#[derive(Parser, Debug)]
#[command(name = "keygrind", version)]
struct Args {
    /// Address prefixes, full addresses or wildcard patterns
    targets: Vec<String>,

    /// JSON file of bulk targets: {"addresses": ["1...", ...]}
    #[arg(long)]
    targets_file: Option<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Compressed)]
    mode: ModeArg,

    /// Case-insensitive prefix search (P2PKH/P2SH only)
    #[arg(short = 'c', long)]
    case_insensitive: bool,

    /// Stop once every target has a hit
    #[arg(long)]
    stop: bool,

    /// Append results to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Stop after this many matches (0 = unlimited)
    #[arg(short = 'm', long, default_value_t = 0)]
    max_found: u64,

    /// Rekey every N Mkeys with fresh random base keys (0 = off)
    #[arg(short, long, default_value_t = 0)]
    rekey: u64,

    /// Deterministic base-key seed
    #[arg(short, long)]
    seed: Option<String>,

    /// CPU worker threads (0 = all cores)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Offset search: SEC1 public key (33 or 65 bytes, hex)
    #[arg(long)]
    start_pubkey: Option<String>,

    /// Mask modes: leading bytes of the target, hex (even length)
    #[arg(long)]
    prefix_hex: Option<String>,

    /// Mask modes: explicit 256-bit target value, hex
    #[arg(long)]
    mask_value: Option<String>,

    /// Mask modes: explicit 256-bit bitmask, hex
    #[arg(long)]
    mask: Option<String>,

    /// Sig mode: BIP-340 Schnorr instead of ECDSA
    #[arg(long)]
    schnorr: bool,

    /// Sig mode: 32-byte message hash, hex
    #[arg(long)]
    sig_msg: Option<String>,

    /// Sig mode: signing private key, hex
    #[arg(long)]
    sig_key: Option<String>,

    /// Txid mode: raw transaction, hex
    #[arg(long)]
    raw_tx: Option<String>,

    /// Txid mode: byte offset of the nonce window
    #[arg(long, default_value_t = 0)]
    nonce_offset: usize,

    /// Txid mode: nonce window length in bytes (1..=4)
    #[arg(long, default_value_t = 4)]
    nonce_len: usize,
}

fn parse_scalar(hex_str: &str, what: &str) -> Result<Scalar> {
    let bytes = hex::decode(format!("{:0>64}", hex_str.trim_start_matches("0x")))
        .with_context(|| format!("bad hex for {what}"))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{what} must be at most 32 bytes"))?;
    Ok(Scalar::from_bytes_reduced(&arr))
}

fn build_mask(args: &Args) -> Result<Option<MaskTarget>> {
    if let Some(prefix) = &args.prefix_hex {
        return Ok(Some(MaskTarget::from_prefix(prefix)?));
    }
    match (&args.mask_value, &args.mask) {
        (Some(v), Some(m)) => Ok(Some(MaskTarget::from_value_mask(v, m)?)),
        (None, None) => Ok(None),
        _ => bail!("--mask-value and --mask must be given together"),
    }
}

fn build_config(args: &Args) -> Result<SearchConfig> {
    let mut targets = args.targets.clone();
    if let Some(path) = &args.targets_file {
        targets.extend(load_targets_json(path)?);
    }

    let start_pubkey = match &args.start_pubkey {
        Some(hex_str) => {
            let bytes = hex::decode(hex_str).context("bad start pubkey hex")?;
            Some(
                Point::from_sec1(&bytes)
                    .ok_or_else(|| anyhow::anyhow!("start pubkey is not a curve point"))?,
            )
        }
        None => None,
    };

    let sig = match (&args.sig_msg, &args.sig_key) {
        (Some(msg), Some(key)) => {
            let priv_key = parse_scalar(key, "signing key")?;
            // Pubkey X for the BIP-340 challenge, via the secp256k1 crate
            let sk = secp256k1::SecretKey::from_slice(&priv_key.to_bytes())
                .context("signing key out of range")?;
            let pk = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &sk);
            let pubkey_x =
                FieldElement::from_bytes(pk.serialize()[1..33].try_into().unwrap());
            Some(SigParams {
                schnorr: args.schnorr,
                msg_hash: parse_scalar(msg, "message hash")?,
                priv_key,
                pubkey_x,
            })
        }
        (None, None) => None,
        _ => bail!("--sig-msg and --sig-key must be given together"),
    };

    let txid = match &args.raw_tx {
        Some(tx_hex) => Some(TxidParams {
            raw_tx: hex::decode(tx_hex).context("bad raw transaction hex")?,
            nonce_offset: args.nonce_offset,
            nonce_len: args.nonce_len,
        }),
        None => None,
    };

    Ok(SearchConfig {
        mode: args.mode.into(),
        targets,
        case_sensitive: !args.case_insensitive,
        mask: build_mask(args)?,
        seed: args.seed.clone(),
        rekey_mkeys: args.rekey,
        stop_when_found: args.stop,
        max_found: args.max_found,
        output_file: args.output.clone(),
        nb_cpu_threads: args.threads,
        start_pubkey,
        sig,
        txid,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;
    let search = Search::new(config)?;
    let stop = search.stop_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        stop.store(true, Ordering::Relaxed);
    })
    .context("signal handler")?;

    let stats = search.run()?;
    println!("Found {} match(es) over {} keys", stats.found, stats.keys);
    Ok(())
}
