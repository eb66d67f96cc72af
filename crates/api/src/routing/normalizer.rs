//! Host header normalization
//!
//! Turns a raw `Host` header value into the cache key for that host plus the
//! ordered list of lookup candidates. Precedence is fixed:
//!
//! 1. `extra_hosts` alias table (full host, then the `www.`-stripped host)
//! 2. Exact normalized host
//! 3. Registrable domain (public suffix + one label)
//! 4. Wildcard expansions (`*.example.com`, `*.com`, `*`) when enabled

use std::collections::HashMap;
use std::net::IpAddr;

use tenantry_shared::DomainKey;

/// How a candidate key was derived from the requested host
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    /// Matched an entry in the static `extra_hosts` alias table
    ExtraHost,
    /// Matched the normalized host itself
    ExactHost,
    /// Matched the registrable domain of the host (e.g. acme.co.uk)
    RegistrableDomain,
    /// Matched a wildcard alias (e.g. *.acme.com)
    Wildcard,
}

/// One lookup candidate, in precedence order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: DomainKey,
    pub kind: ResolutionType,
}

/// Result of normalizing a raw host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHost {
    /// Cache key for this host (the first candidate)
    pub key: DomainKey,
    /// Keys to try against the tenant lookup, most specific first
    pub candidates: Vec<Candidate>,
}

impl NormalizedHost {
    /// True if the host was folded through the alias table
    pub fn is_extra_host(&self) -> bool {
        self.candidates
            .first()
            .is_some_and(|c| c.kind == ResolutionType::ExtraHost)
    }
}

/// Normalizer settings
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Strip a single leading `www.` label
    pub strip_www: bool,
    /// Try the registrable domain after the exact host
    pub suffix_reduction: bool,
    /// Try `*.parent` wildcard keys after the registrable domain
    pub wildcard_aliases: bool,
    /// Alias host -> canonical key
    pub extra_hosts: HashMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strip_www: true,
            suffix_reduction: true,
            wildcard_aliases: false,
            extra_hosts: HashMap::new(),
        }
    }
}

impl NormalizerConfig {
    pub fn with_strip_www(mut self, enabled: bool) -> Self {
        self.strip_www = enabled;
        self
    }

    pub fn with_suffix_reduction(mut self, enabled: bool) -> Self {
        self.suffix_reduction = enabled;
        self
    }

    pub fn with_wildcard_aliases(mut self, enabled: bool) -> Self {
        self.wildcard_aliases = enabled;
        self
    }

    pub fn with_extra_host(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.extra_hosts.insert(alias.into(), target.into());
        self
    }
}

/// Pure, total host normalizer
#[derive(Debug, Clone)]
pub struct DomainNormalizer {
    strip_www: bool,
    suffix_reduction: bool,
    wildcard_aliases: bool,
    /// Cleaned alias host -> canonical key
    extra_hosts: HashMap<String, DomainKey>,
}

impl Default for DomainNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl DomainNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let mut normalizer = Self {
            strip_www: config.strip_www,
            suffix_reduction: config.suffix_reduction,
            wildcard_aliases: config.wildcard_aliases,
            extra_hosts: HashMap::with_capacity(config.extra_hosts.len()),
        };

        for (alias, target) in config.extra_hosts {
            let alias = clean_host(&alias);
            let target = normalizer.canonical(&target);
            if !alias.is_empty() && !target.is_empty() {
                normalizer.extra_hosts.insert(alias, target);
            }
        }

        normalizer
    }

    /// Normalize a raw host into its cache key and lookup candidates
    pub fn normalize(&self, raw_host: &str) -> NormalizedHost {
        let host = clean_host(raw_host);

        if let Some(target) = self.extra_host(&host) {
            return NormalizedHost::single(target, ResolutionType::ExtraHost);
        }

        let host = self.strip_www(&host);
        if let Some(target) = self.extra_host(host) {
            return NormalizedHost::single(target, ResolutionType::ExtraHost);
        }

        let key = DomainKey::new(host);
        let mut candidates = vec![Candidate {
            key: key.clone(),
            kind: ResolutionType::ExactHost,
        }];

        // IPs and single-label hosts (localhost) have nothing to reduce
        if host.is_empty() || host.parse::<IpAddr>().is_ok() || !host.contains('.') {
            return NormalizedHost { key, candidates };
        }

        if self.suffix_reduction {
            if let Some(registrable) = psl::domain_str(host) {
                if registrable != host {
                    push_unique(&mut candidates, registrable, ResolutionType::RegistrableDomain);
                }
            }
        }

        if self.wildcard_aliases {
            let labels: Vec<&str> = host.split('.').collect();
            for i in 1..labels.len() {
                let wildcard = format!("*.{}", labels[i..].join("."));
                push_unique(&mut candidates, &wildcard, ResolutionType::Wildcard);
            }
            push_unique(&mut candidates, "*", ResolutionType::Wildcard);
        }

        NormalizedHost { key, candidates }
    }

    /// Cache key only; used to derive invalidation keys from tenant domains
    pub fn normalize_key(&self, raw_host: &str) -> DomainKey {
        self.normalize(raw_host).key
    }

    /// Canonical form of a stored domain, ignoring the alias table.
    /// Wildcard domains keep their `*.` prefix.
    pub fn canonical(&self, domain: &str) -> DomainKey {
        let host = clean_host(domain);
        DomainKey::new(self.strip_www(&host))
    }

    fn extra_host(&self, host: &str) -> Option<DomainKey> {
        self.extra_hosts.get(host).cloned()
    }

    fn strip_www<'a>(&self, host: &'a str) -> &'a str {
        if !self.strip_www {
            return host;
        }
        match host.strip_prefix("www.") {
            Some(rest) if !rest.is_empty() => rest,
            _ => host,
        }
    }
}

impl NormalizedHost {
    fn single(key: DomainKey, kind: ResolutionType) -> Self {
        Self {
            candidates: vec![Candidate {
                key: key.clone(),
                kind,
            }],
            key,
        }
    }
}

fn push_unique(candidates: &mut Vec<Candidate>, key: &str, kind: ResolutionType) {
    if candidates.iter().all(|c| c.key.as_str() != key) {
        candidates.push(Candidate {
            key: DomainKey::new(key),
            kind,
        });
    }
}

/// Strip port and trailing dots, lower-case
fn clean_host(raw: &str) -> String {
    let host = strip_port(raw.trim());
    host.trim_end_matches('.').to_lowercase()
}

fn strip_port(host: &str) -> &str {
    // [2001:db8::1]:8080 or [2001:db8::1]
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
    }

    match host.rfind(':') {
        // Bare IPv6 literal, no port to strip
        Some(idx) if host[..idx].contains(':') => host,
        Some(idx) => &host[..idx],
        None => host,
    }
}
