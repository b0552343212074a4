//! Search orchestration: spawns the CPU workers, polls their counters,
//! smooths the key rate, dispatches rekeys and drives shutdown.
//!
//! GPU devices are external collaborators: implementors of the
//! `gpu::KernelLauncher` contract are driven by `gpu::drive` on their
//! own thread and feed the same match queue.

pub mod output;
pub mod reconstruct;

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::address::AddressKind;
use crate::config::{SearchConfig, SearchMode};
use crate::engine::{
    BatchWorker, Checker, MatchRecord, Predicate, TaprootWorker, TxidWorker, WorkerHandle,
    CPU_GROUP_HALF, CPU_ITERS,
};
use crate::secp::{Scalar, SecpContext};
use crate::target::TargetSet;

use output::OutputSink;
use reconstruct::{Reconstructed, Reconstructor};

/// Samples in the key-rate moving average.
const FILTER_SIZE: usize = 8;
/// Counter poll cadence.
const POLL_MS: u64 = 500;
/// Status line cadence, in polls.
const POLLS_PER_STATUS: u32 = 4;

pub struct SearchStats {
    pub found: u64,
    pub keys: u64,
}

pub struct Search {
    config: SearchConfig,
    secp: Arc<SecpContext>,
    targets: Option<Arc<TargetSet>>,
    end_of_search: Arc<AtomicBool>,
}

impl Search {
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;
        let targets = if config.mode.is_address_search() {
            Some(Arc::new(
                TargetSet::build(&config.targets, config.case_sensitive)
                    .context("target parsing failed")?,
            ))
        } else {
            None
        };
        Ok(Self {
            config,
            secp: Arc::new(SecpContext::new(CPU_GROUP_HALF)),
            targets,
            end_of_search: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The cooperative cancellation flag; set it (e.g. from a SIGINT
    /// handler) and every worker returns at its next pass boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.end_of_search)
    }

    fn difficulty(&self) -> f64 {
        match (&self.targets, &self.config.mask) {
            (Some(t), _) => t.difficulty(),
            (None, Some(m)) => 2f64.powi(m.num_bits() as i32),
            _ => 2f64.powi(160),
        }
    }

    fn print_banner(&self, threads: usize, start_key: &Option<Scalar>) {
        println!(
            "Search: {} [{}{}]",
            match &self.targets {
                Some(t) if t.num_targets() == 1 => self.config.targets[0].clone(),
                Some(t) => format!("{} targets", t.num_targets()),
                None => self
                    .config
                    .mask
                    .map(|m| format!("{} bits", m.num_bits()))
                    .unwrap_or_default(),
            },
            self.config.mode.label(),
            if self.config.start_pubkey.is_some() {
                ", with public key"
            } else {
                ""
            }
        );
        println!("Difficulty: {:.0}", self.difficulty());
        println!("Number of CPU thread: {threads}");
        match start_key {
            Some(k) => println!("Base Key: {}", k.to_hex()),
            None => println!(
                "Base Key: Randomly changed every {} Mkeys",
                self.config.rekey_mkeys
            ),
        }
    }

    pub fn run(&self) -> Result<SearchStats> {
        let threads = self.config.threads();
        let start_key = if self.config.rekey_mkeys > 0 {
            None
        } else {
            Some(crate::config::derive_start_key(self.config.seed.as_deref()))
        };
        self.print_banner(threads, &start_key);

        let (tx, rx) = mpsc::channel::<MatchRecord>();
        let handles: Vec<Arc<WorkerHandle>> =
            (0..threads).map(|_| Arc::new(WorkerHandle::new())).collect();
        let found_count = Arc::new(AtomicU64::new(0));

        let collector = self.spawn_collector(rx, Arc::clone(&found_count));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("worker pool")?;

        for tid in 0..threads {
            // Each worker owns a disjoint 2^64-aligned slice of the
            // scalar line
            let initial_key =
                start_key.map(|k| k.add(&Scalar::new([0, tid as u64, 0, 0])));
            self.spawn_worker(&pool, tid, initial_key, Arc::clone(&handles[tid]), tx.clone());
        }
        drop(tx);

        self.monitor(&handles, &found_count);

        let keys: u64 = handles
            .iter()
            .map(|h| h.counter.load(Ordering::Relaxed))
            .sum();
        collector.join().ok();
        println!();

        Ok(SearchStats {
            found: found_count.load(Ordering::Relaxed),
            keys,
        })
    }

    fn spawn_worker(
        &self,
        pool: &rayon::ThreadPool,
        tid: usize,
        initial_key: Option<Scalar>,
        handle: Arc<WorkerHandle>,
        tx: mpsc::Sender<MatchRecord>,
    ) {
        let secp = Arc::clone(&self.secp);
        let end = Arc::clone(&self.end_of_search);
        let start_pubkey = self.config.start_pubkey;
        let stop_when_found = self.config.stop_when_found;

        match self.config.mode {
            SearchMode::Compressed | SearchMode::Uncompressed | SearchMode::Both => {
                let set = Arc::clone(self.targets.as_ref().expect("address search"));
                let worker = BatchWorker {
                    secp,
                    handle,
                    end_of_search: end,
                    initial_key,
                    start_pubkey,
                    iters: CPU_ITERS,
                    checker: Checker {
                        predicate: Predicate::for_targets(set),
                        check_compressed: self.config.mode != SearchMode::Uncompressed,
                        check_uncompressed: self.config.mode != SearchMode::Compressed,
                        stop_when_found,
                        thread_id: tid,
                        tx,
                    },
                };
                pool.spawn(move || worker.run());
            }
            SearchMode::Mask | SearchMode::Sig => {
                let target = self.config.mask.expect("validated");
                let predicate = if self.config.mode == SearchMode::Sig {
                    Predicate::SigR(target)
                } else {
                    Predicate::Mask(target)
                };
                let worker = BatchWorker {
                    secp,
                    handle,
                    end_of_search: end,
                    initial_key,
                    start_pubkey,
                    iters: CPU_ITERS,
                    checker: Checker {
                        predicate,
                        check_compressed: true,
                        check_uncompressed: false,
                        stop_when_found,
                        thread_id: tid,
                        tx,
                    },
                };
                pool.spawn(move || worker.run());
            }
            SearchMode::Taproot => {
                let worker = TaprootWorker {
                    thread_id: tid,
                    secp,
                    handle,
                    end_of_search: end,
                    initial_key,
                    start_pubkey,
                    target: self.config.mask.expect("validated"),
                    tx,
                };
                pool.spawn(move || worker.run());
            }
            SearchMode::Txid => {
                let params = self.config.txid.as_ref().expect("validated");
                let worker = TxidWorker {
                    thread_id: tid,
                    handle,
                    end_of_search: end,
                    raw_tx: params.raw_tx.clone(),
                    nonce_offset: params.nonce_offset,
                    nonce_len: params.nonce_len,
                    start_nonce: tid as u64,
                    stride: self.config.threads() as u64,
                    target: self.config.mask.expect("validated"),
                    tx,
                };
                pool.spawn(move || worker.run());
            }
        }
    }

    fn spawn_collector(
        &self,
        rx: mpsc::Receiver<MatchRecord>,
        found_count: Arc<AtomicU64>,
    ) -> thread::JoinHandle<()> {
        let reconstructor = Reconstructor {
            secp: Arc::clone(&self.secp),
            kind: self
                .targets
                .as_ref()
                .map(|t| t.kind)
                .unwrap_or(AddressKind::P2pkh),
            start_pubkey: self.config.start_pubkey,
            mask: self.config.mask,
            sig: self.config.sig.clone(),
            txid: self.config.txid.clone(),
        };
        let sink = OutputSink::new(self.config.output_file.clone());
        let targets = self.targets.clone();
        let end = Arc::clone(&self.end_of_search);
        let stop_when_found = self.config.stop_when_found;
        let max_found = self.config.max_found;

        thread::spawn(move || {
            for rec in rx {
                let Some(result) = reconstructor.reconstruct(&rec) else {
                    continue;
                };
                if let Reconstructed::Address {
                    pattern: Some(idx), ..
                } = &result
                {
                    if let Some(t) = &targets {
                        t.mark_pattern_found(*idx);
                    }
                }
                sink.record(&result);

                let found = found_count.fetch_add(1, Ordering::Relaxed) + 1;
                if max_found > 0 && found >= max_found {
                    end.store(true, Ordering::Relaxed);
                }
                if stop_when_found {
                    let all = match &targets {
                        Some(t) => t.all_found(),
                        None => true,
                    };
                    if all {
                        end.store(true, Ordering::Relaxed);
                    }
                }
            }
        })
    }

    fn monitor(&self, handles: &[Arc<WorkerHandle>], found_count: &AtomicU64) {
        // Let every worker come up before measuring
        while !handles.iter().all(|h| h.has_started())
            && !self.end_of_search.load(Ordering::Relaxed)
        {
            thread::sleep(Duration::from_millis(100));
        }

        let mut filter = [0f64; FILTER_SIZE];
        let mut filter_pos = 0usize;
        let mut last_count = 0u64;
        let mut last_rekey = 0u64;
        let mut last_t = Instant::now();
        let mut polls = 0u32;

        loop {
            if handles.iter().all(|h| h.is_done()) {
                break;
            }
            thread::sleep(Duration::from_millis(POLL_MS));
            polls += 1;

            let count: u64 = handles
                .iter()
                .map(|h| h.counter.load(Ordering::Relaxed))
                .sum();

            // Rekey dispatch on the global count
            if self.config.rekey_mkeys > 0
                && count.saturating_sub(last_rekey) > 1_000_000 * self.config.rekey_mkeys
            {
                for h in handles {
                    h.rekey_request.store(true, Ordering::Relaxed);
                }
                last_rekey = count;
            }

            if polls % POLLS_PER_STATUS != 0 {
                continue;
            }

            let now = Instant::now();
            let dt = now.duration_since(last_t).as_secs_f64();
            let rate = if dt > 0.0 {
                (count - last_count) as f64 / dt
            } else {
                0.0
            };
            filter[filter_pos % FILTER_SIZE] = rate;
            filter_pos += 1;
            let samples = filter_pos.min(FILTER_SIZE);
            let avg_rate: f64 = filter[..samples].iter().sum::<f64>() / samples as f64;

            print!(
                "\r[{:.2} Mkey/s][Total 2^{:.2}]{}[Found {}]  ",
                avg_rate / 1_000_000.0,
                if count > 0 { (count as f64).log2() } else { 0.0 },
                self.expected_time(avg_rate, count as f64),
                found_count.load(Ordering::Relaxed)
            );
            let _ = std::io::stdout().flush();

            last_count = count;
            last_t = now;
        }
    }

    /// `[Prob x%][y% in time]` readout from the current difficulty.
    fn expected_time(&self, key_rate: f64, key_count: f64) -> String {
        if self.targets.as_ref().is_some_and(|t| t.is_pattern_search()) {
            return String::new();
        }
        let difficulty = self.difficulty();
        if key_rate <= 0.0 || difficulty <= 0.0 {
            return String::new();
        }

        let p = 1.0 / difficulty;
        let cp = 1.0 - (1.0 - p).powf(key_count);
        let mut ret = format!("[Prob {:.1}%]", cp * 100.0);

        let mut desired = 0.5;
        while desired < cp {
            desired += 0.1;
        }
        if desired >= 0.99 {
            desired = 0.99;
        }
        let mut k = (1.0 - desired).ln() / (1.0 - p).ln();
        if k.is_infinite() {
            // ln(1-p) underflows for tiny p; use the taylor series
            k = (1.0 - desired).ln() / log1_taylor(p);
        }
        let d_time = ((k - key_count) / key_rate).max(0.0);

        let nb_day = d_time / 86400.0;
        if nb_day >= 1.0 {
            let nb_year = nb_day / 365.0;
            if nb_year > 1.0 {
                ret += &format!("[{:.0}% in {:.1}y]", desired * 100.0, nb_year);
            } else {
                ret += &format!("[{:.0}% in {:.1}d]", desired * 100.0, nb_day);
            }
        } else {
            let it = d_time as u64;
            ret += &format!(
                "[{:.0}% in {:02}:{:02}:{:02}]",
                desired * 100.0,
                (it % 86400) / 3600,
                (it % 3600) / 60,
                it % 60
            );
        }
        ret
    }
}

/// Taylor series for ln(1-x), used where ln underflows.
fn log1_taylor(x: f64) -> f64 {
    -x - x * x / 2.0 - x * x * x / 3.0 - x * x * x * x / 4.0
}
