//! Host normalization utility for Tenantry
//!
//! Prints the cache key and lookup candidates a host normalizes to, using
//! the normalization settings from the environment (STRIP_WWW,
//! SUFFIX_REDUCTION, WILDCARD_ALIASES, EXTRA_HOSTS).
//!
//! Usage:
//!   cargo run --bin normalize-host -- Shop.Example.co.uk:8443
//!   echo www.example.com | cargo run --bin normalize-host
//!
//! Example output:
//!   shop.example.co.uk
//!     1. shop.example.co.uk  (exact_host)
//!     2. example.co.uk       (registrable_domain)

use std::env;
use std::io::{self, BufRead};

use tenantry_api::config::normalizer_config_from_env;
use tenantry_api::routing::{DomainNormalizer, NormalizedHost};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let normalizer = DomainNormalizer::new(normalizer_config_from_env()?);

    let hosts: Vec<String> = if env::args().len() > 1 {
        env::args().skip(1).collect()
    } else {
        io::stdin().lock().lines().collect::<Result<_, _>>()?
    };

    if hosts.iter().all(|h| h.trim().is_empty()) {
        eprintln!("Error: no host given");
        eprintln!("Usage: normalize-host <host> [<host>...]");
        std::process::exit(1);
    }

    for host in hosts.iter().filter(|h| !h.trim().is_empty()) {
        print_host(host, &normalizer.normalize(host));
    }

    Ok(())
}

fn print_host(raw: &str, normalized: &NormalizedHost) {
    if normalized.key.is_empty() {
        println!("{:?} -> (empty; never resolves)", raw);
        return;
    }

    println!("{}", normalized.key);
    let width = normalized
        .candidates
        .iter()
        .map(|c| c.key.as_str().len())
        .max()
        .unwrap_or(0);
    for (i, candidate) in normalized.candidates.iter().enumerate() {
        let kind = serde_json::to_value(candidate.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!("  {}. {:<width$}  ({})", i + 1, candidate.key.as_str(), kind, width = width);
    }
}
