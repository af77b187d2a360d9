// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Target authorization policy.
//!
//! Decides whether a target string may be scanned at all. Authorized forms:
//!
//! - an IPv4 address that is RFC1918-private or loopback;
//! - an IPv4 CIDR wholly contained in the private/loopback blocks, with a
//!   per-tool cap on the number of addresses it covers;
//! - a hostname whose labels satisfy the DNS label grammar and whose suffix
//!   is `.lab.internal`;
//! - for URL-target tools only, an `http(s)://` URL whose host satisfies one
//!   of the above.
//!
//! Tie-break: a string containing `/` (and no scheme) is evaluated as a CIDR;
//! otherwise address parse is attempted; hostname grammar applies only when
//! no IP parse succeeds.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use ipnet::Ipv4Net;
use regex::Regex;
use url::Url;

use crate::domain::errors::ValidationError;

/// Required suffix for lab hostnames.
pub const LAB_DOMAIN_SUFFIX: &str = ".lab.internal";

/// Whether a tool accepts URLs as targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlTargets {
    /// Target must be an address, CIDR, or lab hostname.
    Forbidden,
    /// Either a plain target or an authorized http(s) URL.
    Allowed,
    /// Target must be an authorized http(s) URL.
    Required,
}

/// A successfully authorized target, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Address(Ipv4Addr),
    Network(Ipv4Net),
    Hostname(String),
    HttpUrl { scheme: String, host: String },
}

impl TargetKind {
    pub fn is_url(&self) -> bool {
        matches!(self, TargetKind::HttpUrl { .. })
    }

    /// Number of addresses a network target covers; 1 otherwise.
    pub fn network_size(&self) -> u64 {
        match self {
            TargetKind::Network(net) => 1u64 << (32 - net.prefix_len()),
            _ => 1,
        }
    }
}

/// Target authorization policy with a per-tool network-size cap.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    max_network_size: u64,
    url_targets: UrlTargets,
}

impl TargetPolicy {
    pub fn new(max_network_size: u64, url_targets: UrlTargets) -> Self {
        Self {
            max_network_size,
            url_targets,
        }
    }

    /// Spec contract: plain yes/no authorization decision.
    pub fn is_authorized(&self, target: &str) -> bool {
        self.authorize(target).is_ok()
    }

    /// Classify and authorize a target string.
    pub fn authorize(&self, target: &str) -> Result<TargetKind, ValidationError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ValidationError::TargetNotAuthorized("<empty>".to_string()));
        }

        if looks_like_url(target) {
            if self.url_targets == UrlTargets::Forbidden {
                return Err(ValidationError::TargetNotAuthorized(target.to_string()));
            }
            return self.authorize_url(target);
        }
        if self.url_targets == UrlTargets::Required {
            return Err(ValidationError::Policy(format!(
                "target must be an http(s) URL, got {}",
                target
            )));
        }

        // CIDR before address, hostname only if no IP parse succeeds.
        if target.contains('/') {
            return self.authorize_network(target);
        }
        if let Ok(addr) = target.parse::<Ipv4Addr>() {
            return if is_private_or_loopback(addr) {
                Ok(TargetKind::Address(addr))
            } else {
                Err(ValidationError::TargetNotAuthorized(target.to_string()))
            };
        }
        self.authorize_hostname(target)
    }

    fn authorize_network(&self, target: &str) -> Result<TargetKind, ValidationError> {
        let net: Ipv4Net = target
            .parse()
            .map_err(|_| ValidationError::TargetNotAuthorized(target.to_string()))?;
        let net = net.trunc();

        // A CIDR is wholly private/loopback iff both aligned endpoints are:
        // the blocks themselves are aligned power-of-two ranges, so a
        // contiguous aligned range with both ends inside one block lies
        // entirely within it.
        if !is_private_or_loopback(net.network()) || !is_private_or_loopback(net.broadcast()) {
            return Err(ValidationError::TargetNotAuthorized(target.to_string()));
        }

        let size = 1u64 << (32 - net.prefix_len());
        if size > self.max_network_size {
            return Err(ValidationError::NetworkTooLarge {
                size,
                cap: self.max_network_size,
            });
        }
        Ok(TargetKind::Network(net))
    }

    fn authorize_hostname(&self, target: &str) -> Result<TargetKind, ValidationError> {
        if is_lab_hostname(target) {
            Ok(TargetKind::Hostname(target.to_string()))
        } else {
            Err(ValidationError::TargetNotAuthorized(target.to_string()))
        }
    }

    fn authorize_url(&self, target: &str) -> Result<TargetKind, ValidationError> {
        let url = Url::parse(target)
            .map_err(|_| ValidationError::TargetNotAuthorized(target.to_string()))?;
        let scheme = url.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ValidationError::Policy(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ValidationError::TargetNotAuthorized(target.to_string()))?
            .to_string();

        let host_ok = match host.parse::<Ipv4Addr>() {
            Ok(addr) => is_private_or_loopback(addr),
            Err(_) => is_lab_hostname(&host),
        };
        if !host_ok {
            return Err(ValidationError::TargetNotAuthorized(target.to_string()));
        }
        Ok(TargetKind::HttpUrl { scheme, host })
    }
}

/// RFC1918 (10/8, 172.16/12, 192.168/16) or loopback (127/8).
pub fn is_private_or_loopback(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback()
}

fn looks_like_url(target: &str) -> bool {
    target.contains("://")
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("label regex")
    })
}

/// Hostname with valid label grammar ending in `.lab.internal`.
pub fn is_lab_hostname(host: &str) -> bool {
    if host.len() > 253 || !host.to_ascii_lowercase().ends_with(LAB_DOMAIN_SUFFIX) {
        return false;
    }
    host.split('.').all(|label| label_regex().is_match(label))
}
