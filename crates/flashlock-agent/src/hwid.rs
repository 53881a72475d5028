//! Hardware identity probe.
//!
//! Derives the stable fingerprint the server binds every session to. Reads
//! three host attributes (processor identity, baseboard serial, firmware
//! serial), joins them with `|`, hashes with SHA-256, and renders uppercase
//! hex. A failed probe degrades to a named constant so the fingerprint stays
//! deterministic for the host; only when every probe fails does the
//! (explicitly weaker) hostname + username fallback kick in.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const CPU_FALLBACK: &str = "CPU-UNKNOWN";
const BOARD_FALLBACK: &str = "BOARD-UNKNOWN";
const FIRMWARE_FALLBACK: &str = "FW-UNKNOWN";

static FINGERPRINT: OnceLock<String> = OnceLock::new();

/// The hardware fingerprint for this host, computed once per process.
pub fn fingerprint() -> &'static str {
    FINGERPRINT.get_or_init(compute)
}

fn compute() -> String {
    let cpu = probe_cpu();
    let board = probe_board();
    let firmware = probe_firmware();

    if cpu.is_none() && board.is_none() && firmware.is_none() {
        tracing::warn!(
            "no hardware attribute could be probed; falling back to host/user identity"
        );
        let host = read_trimmed("/etc/hostname")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "HOST-UNKNOWN".into());
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "USER-UNKNOWN".into());
        return digest_hex(&format!("{host}|{user}"));
    }

    fingerprint_from_parts(
        cpu.as_deref().unwrap_or(CPU_FALLBACK),
        board.as_deref().unwrap_or(BOARD_FALLBACK),
        firmware.as_deref().unwrap_or(FIRMWARE_FALLBACK),
    )
}

/// SHA-256 of `cpu|board|firmware`, uppercase hex.
fn fingerprint_from_parts(cpu: &str, board: &str, firmware: &str) -> String {
    digest_hex(&format!("{cpu}|{board}|{firmware}"))
}

fn digest_hex(material: &str) -> String {
    hex::encode_upper(Sha256::digest(material.as_bytes()))
}

/// Processor identity: the `Serial` field where the platform exposes one
/// (common on ARM boards), otherwise the model name.
fn probe_cpu() -> Option<String> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    for prefix in ["Serial", "model name"] {
        for line in cpuinfo.lines() {
            if let Some(rest) = line.strip_prefix(prefix) {
                if let Some(value) = rest.split(':').nth(1) {
                    let value = value.trim();
                    if !value.is_empty() {
                        return Some(value.to_owned());
                    }
                }
            }
        }
    }
    None
}

fn probe_board() -> Option<String> {
    read_trimmed("/sys/class/dmi/id/board_serial")
}

fn probe_firmware() -> Option<String> {
    read_trimmed("/sys/class/dmi/id/product_serial")
        .or_else(|| read_trimmed("/sys/class/dmi/id/bios_version"))
}

fn read_trimmed(path: &str) -> Option<String> {
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    // Some firmware ships literal placeholder serials.
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_join_with_pipe_before_hashing() {
        let expected = hex::encode_upper(Sha256::digest(b"cpu1|mb1|bios1"));
        assert_eq!(fingerprint_from_parts("cpu1", "mb1", "bios1"), expected);
    }

    #[test]
    fn fingerprint_is_uppercase_hex_of_fixed_width() {
        let fp = fingerprint_from_parts("a", "b", "c");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn different_hosts_differ() {
        assert_ne!(
            fingerprint_from_parts("cpu1", "mb1", "bios1"),
            fingerprint_from_parts("cpu2", "mb1", "bios1")
        );
    }

    #[test]
    fn process_lifetime_cache_is_stable() {
        assert_eq!(fingerprint(), fingerprint());
    }
}
