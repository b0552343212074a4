//! The match output sink: one mutex, stdout or file append, bounded
//! critical section. Detailed blocks for the non-address modes go to
//! stdout; the machine-readable lines go wherever the sink points.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use super::reconstruct::Reconstructed;

pub struct OutputSink {
    path: Option<String>,
    lock: Mutex<()>,
}

impl OutputSink {
    pub fn new(path: Option<String>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Report one verified result.
    pub fn record(&self, result: &Reconstructed) {
        match result {
            Reconstructed::Address {
                addr,
                wif,
                key_hex,
                partial,
                wif_label,
                ..
            } => {
                if *partial {
                    self.write_lines(&[
                        format!("PubAddress: {addr}"),
                        format!("PartialPriv: {wif}"),
                    ]);
                } else {
                    self.write_lines(&[
                        format!("PubAddress: {addr}"),
                        format!("Priv (WIF): {wif_label}:{wif}"),
                        format!("Priv (HEX): 0x{key_hex}"),
                    ]);
                }
            }
            Reconstructed::Mask {
                x_hex,
                wif,
                key_hex,
            } => {
                self.write_lines(&[
                    format!("PubAddress: MASK:{x_hex}"),
                    format!("Priv (WIF): p2pkh:{wif}"),
                    format!("Priv (HEX): 0x{key_hex}"),
                ]);
            }
            Reconstructed::Sig {
                schnorr,
                k_hex,
                rx_hex,
                r_hex,
                s_hex,
                ry_odd,
            } => {
                println!("\n=== SIGNATURE FOUND ===");
                println!("Nonce (k):  {k_hex}");
                println!("R.x:        {rx_hex}");
                println!("R.y parity: {}", if *ry_odd { "odd" } else { "even" });
                println!("sig.r:      {r_hex}");
                println!("sig.s:      {s_hex}");
                println!(
                    "Mode:       {}",
                    if *schnorr { "BIP340 Schnorr" } else { "ECDSA" }
                );
                println!("========================");
                self.write_lines(&[
                    format!("PubAddress: SIG:r={r_hex},s={s_hex}"),
                    format!("Priv (WIF): p2pkh:{k_hex}"),
                    format!("Priv (HEX): 0x{r_hex}"),
                ]);
            }
            Reconstructed::Taproot {
                priv_hex,
                internal_x_hex,
                tweak_hex,
                output_x_hex,
                wif,
            } => {
                println!("\n=== TAPROOT KEY FOUND ===");
                println!("Private key (d):     {priv_hex}");
                println!("Internal key (P.x):  {internal_x_hex}");
                println!("Tweak (t):           {tweak_hex}");
                println!("Output key (Q.x):    {output_x_hex}");
                println!("=========================");
                self.write_lines(&[
                    format!("PubAddress: TAPROOT:Q={output_x_hex},P={internal_x_hex}"),
                    format!("Priv (WIF): p2pkh:{wif}"),
                    format!("Priv (HEX): 0x{priv_hex}"),
                ]);
            }
            Reconstructed::Txid {
                txid_hex,
                nonce,
                tx_hex,
            } => {
                println!("\n=== TXID MATCH FOUND ===");
                println!("Nonce:      0x{nonce:08x} ({nonce})");
                println!("TXID:       {txid_hex}");
                println!("========================");
                self.write_lines(&[
                    format!("PubAddress: TXID:{txid_hex}"),
                    format!("Priv (WIF): nonce:0x{nonce:08x}"),
                    format!("Priv (HEX): 0x{tx_hex}"),
                ]);
            }
        }
    }

    fn write_lines(&self, lines: &[String]) {
        let _guard = self.lock.lock().unwrap();
        match &self.path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path);
                match file {
                    Ok(mut f) => {
                        for line in lines {
                            let _ = writeln!(f, "{line}");
                        }
                    }
                    Err(e) => {
                        eprintln!("Cannot open {path} for writing: {e}");
                        for line in lines {
                            println!("{line}");
                        }
                    }
                }
            }
            None => {
                println!();
                for line in lines {
                    println!("{line}");
                }
            }
        }
    }
}
