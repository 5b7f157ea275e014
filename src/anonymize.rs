//! Display-safe client identities.
//!
//! The dashboard never shows a raw address. It shows the network
//! neighborhood (two most significant octets) plus a 4-hex fingerprint of
//! the full address salted with the calendar date, so repeat visits can be
//! correlated within one day but not across days.

use std::net::IpAddr;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Anonymize `address` for display on `day`.
pub fn anonymize(address: &str, day: NaiveDate) -> String {
    format!("{} {}", coarsen(address), fingerprint(address, day))
}

/// Keep only the network neighborhood of an address.
pub fn coarsen(address: &str) -> String {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, _, _] = v4.octets();
            format!("{a}.{b}.*.*")
        }
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => {
                let [a, b, _, _] = v4.octets();
                format!("{a}.{b}.*.*")
            }
            None => {
                let segments = v6.segments();
                format!("{:x}:{:x}:*", segments[0], segments[1])
            }
        },
        Err(_) => "*".to_string(),
    }
}

/// First 4 hex chars of SHA-256(address ++ YYYY-MM-DD).
pub fn fingerprint(address: &str, day: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(day.format("%Y-%m-%d").to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..4].to_string()
}
