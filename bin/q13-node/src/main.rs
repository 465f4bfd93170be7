use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use log::{info, warn};
use rand::Rng;

use q13_cipher::{decrypt, encrypt, KeyBits, KeySealer, SessionKey, SESSION_KEY_BITS};
use q13_core::DEFAULT_QUBIT_COUNT;
use q13_session::{Session, SessionConfig};
use q13_sim::{run_exchange, ExchangeReport, IdealPhotons, Interceptor, MemoryLink, NoisyPhotons};

#[derive(Parser)]
#[command(about = "Run one simulated BB84 key exchange between two nodes")]
struct Cli {
    #[arg(long, default_value_t = DEFAULT_QUBIT_COUNT)] qubits: usize,
    #[arg(long, default_value_t = 1500)] mtu: usize,
    /// Shared positions disclosed for the error check.
    #[arg(long, default_value_t = 8)] sample: usize,
    /// Bit-flip probability on the receiver's measurements.
    #[arg(long, default_value_t = 0.0)] noise: f64,
    /// Fraction of qubits intercepted and resent by an eavesdropper.
    #[arg(long, default_value_t = 0.0)] eve: f64,
    #[arg(long)] seed: Option<u64>,
    /// Abort when the measured error rate is above this.
    #[arg(long, default_value_t = 0.11)] threshold: f64,
    #[arg(long, default_value = "hello from alice")] message: String,
    /// Deliver fragments last-to-first.
    #[arg(long)] reorder: bool,
}

fn photons(seed: Option<u64>) -> IdealPhotons {
    seed.map_or_else(IdealPhotons::new, IdealPhotons::seeded)
}

fn config(local: &str, peer: &str, seed: Option<u64>) -> SessionConfig {
    let cfg = SessionConfig::new(local, peer);
    match seed {
        Some(s) => cfg.with_seed(s),
        None => cfg,
    }
}

fn print_report(r: &ExchangeReport) {
    println!("{}", "=== BB84 exchange ===".bold());
    println!("qubits sent      : {}", r.qubits);
    println!("shared positions : {} ({:.1}%)", r.shared, r.efficiency * 100.0);
    println!("sampled          : {}", r.sampled);
    println!("fragments        : {}", r.fragments_sent);
    println!("key length       : {} bits", r.responder_key.len());
    let agree = if r.keys_match() {
        "yes".green()
    } else {
        format!("no ({} differ)", r.mismatches()).red()
    };
    println!("keys agree       : {}", agree);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!(">>> Q13 NODE: {} qubits, mtu {}, sample {} <<<", cli.qubits, cli.mtu, cli.sample);

    let seed_at = |k: u64| cli.seed.map(|s| s.wrapping_add(k));

    let (mut link_a, mut link_b) = MemoryLink::pair("alice", "bob", cli.mtu);
    link_a.set_reorder(cli.reorder);
    link_b.set_reorder(cli.reorder);

    let noisy = NoisyPhotons::new(photons(seed_at(2)), cli.noise, seed_at(3)).context("invalid --noise")?;
    let receiver = Interceptor::new(noisy, cli.eve, seed_at(4)).context("invalid --eve")?;

    let mut alice = Session::new(photons(seed_at(0)), link_a, config("alice", "bob", seed_at(0)));
    let mut bob = Session::new(receiver, link_b, config("bob", "alice", seed_at(1)));

    let report = run_exchange(&mut alice, &mut bob, cli.qubits, cli.sample)?;
    print_report(&report);

    let qber = format!("{:.3}", report.error_rate);
    if report.error_rate > cli.threshold {
        println!("error rate       : {}", qber.red().bold());
        bail!("error rate {} above threshold {}, discarding key", qber, cli.threshold);
    }
    println!("error rate       : {}", qber.green());
    if bob.provider_mut().intercepted() > 0 {
        warn!("{} qubits were intercepted but the error rate stayed under threshold", bob.provider_mut().intercepted());
    }

    let alice_key = KeyBits::new(report.initiator_key.clone());
    let bob_key = KeyBits::new(report.responder_key.clone());
    if alice_key.is_empty() {
        bail!("no key material left after sampling; send more qubits");
    }

    let ciphertext = encrypt(cli.message.as_bytes(), &alice_key);
    let recovered = decrypt(&ciphertext, &bob_key);
    println!("{}", "--- one-time pad ---".bold());
    println!("ciphertext       : {}", hex(&ciphertext));
    println!("bob reads        : {}", String::from_utf8_lossy(&recovered));

    if alice_key.len() >= SESSION_KEY_BITS {
        let nonce: [u8; 12] = rand::thread_rng().gen();
        let sealed = KeySealer::new(&SessionKey::from_bits(&alice_key)?).seal(&nonce, cli.message.as_bytes())?;
        match KeySealer::new(&SessionKey::from_bits(&bob_key)?).open(&nonce, &sealed) {
            Ok(pt) => println!("sealed           : {} bytes, opened as {:?}", sealed.len(), String::from_utf8_lossy(&pt)),
            Err(e) => println!("sealed           : {}", format!("open failed: {}", e).red()),
        }
    } else {
        info!("key shorter than {} bits, skipping AEAD demo", SESSION_KEY_BITS);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
