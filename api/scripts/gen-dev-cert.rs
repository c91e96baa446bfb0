//! Dev certificate generator - run with `cargo run --manifest-path scripts/Cargo.toml`
//!
//! Writes a self-signed localhost certificate to certs/ and prints the
//! CERT_HASH a viewer needs to pin it. Pass `--force` to replace an existing
//! certificate (they expire after 14 days).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

const CERT_DIR: &str = "../certs";
const CERT_FILE: &str = "../certs/cert.pem";
const KEY_FILE: &str = "../certs/key.pem";

/// Longest validity a browser accepts for a hash-pinned certificate
const VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let force = std::env::args().any(|arg| arg == "--force");

    if !force && Path::new(CERT_FILE).exists() && Path::new(KEY_FILE).exists() {
        println!("Certificates already exist at {}/ (use --force to replace)", CERT_DIR);
        print_hash()?;
        return Ok(());
    }

    println!("Generating development certificate for localhost...\n");
    fs::create_dir_all(CERT_DIR)?;

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Reaction Ring Dev");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + VALIDITY).into();

    // ECDSA P-256, the key type hash pinning requires
    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    fs::write(CERT_FILE, cert.pem())?;
    fs::write(KEY_FILE, key_pair.serialize_pem())?;
    println!("Certificate saved to {}", CERT_FILE);
    println!("Private key saved to {}\n", KEY_FILE);

    print_hash()
}

fn print_hash() -> Result<(), Box<dyn std::error::Error>> {
    let cert_pem = fs::read_to_string(CERT_FILE)?;
    let pem = pem::parse(&cert_pem)?;
    let cert_hash = STANDARD.encode(digest(&SHA256, pem.contents()).as_ref());

    println!("Certificate hash (SHA-256 of DER):");
    println!("  CERT_HASH={}\n", cert_hash);
    println!("Run a viewer against the local server with:");
    println!("  CERT_HASH={} cargo run --bin reaction-ring-viewer", cert_hash);
    Ok(())
}
