//! Small helpers shared by the sender and receiver paths

use blake3::Hasher;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::net::IpAddr;
use std::time::Duration;

/// Longest file name written to disk, in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Inputs at least this large are hashed across the rayon pool
const PARALLEL_HASH_THRESHOLD: usize = 128 * 1024;

/// Name used when the announced one is unusable
pub const FALLBACK_FILE_NAME: &str = "received_file";

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// BLAKE3 hex digest of an in-memory buffer. Blocking; call from `spawn_blocking`.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    if data.len() >= PARALLEL_HASH_THRESHOLD {
        hasher.update_rayon(data);
    } else {
        hasher.update(data);
    }
    hasher.finalize().to_hex().to_string()
}

/// Reduce an untrusted, announced file name to a single safe path component.
///
/// Directory parts (either separator) are dropped, control characters removed,
/// Windows device names and dot-only names rejected, and the result truncated
/// to [`MAX_FILENAME_LENGTH`] on a char boundary, keeping a short extension.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = last.chars().filter(|c| !c.is_control()).collect();
    let trimmed = clean.trim();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return FALLBACK_FILE_NAME.to_string();
    }

    // Windows maps `CON`, `nul.tar.gz` etc. to devices whatever the extension
    let stem = trimmed.split('.').next().unwrap_or_default().trim_end();
    let reserved = RESERVED_NAMES.iter().any(|r| stem.eq_ignore_ascii_case(r));
    if reserved && stem.len() == trimmed.len() {
        return FALLBACK_FILE_NAME.to_string();
    }
    let owned;
    let trimmed = if reserved {
        owned = format!("_{}", trimmed);
        owned.as_str()
    } else {
        trimmed
    };

    if trimmed.len() <= MAX_FILENAME_LENGTH {
        return trimmed.to_string();
    }

    match trimmed.rfind('.') {
        Some(idx) if trimmed.len() - idx < 20 => {
            let ext = &trimmed[idx..];
            let mut base = truncate_on_boundary(&trimmed[..idx], MAX_FILENAME_LENGTH - ext.len());
            base.push_str(ext);
            base
        }
        _ => truncate_on_boundary(trimmed, MAX_FILENAME_LENGTH),
    }
}

fn truncate_on_boundary(s: &str, max: usize) -> String {
    let mut cutoff = max.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}

/// Format throughput from bytes and elapsed time
pub fn format_transfer_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }

    let speed_bps = bytes as f64 / secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// Random alphanumeric password for `send --secure`
pub fn generate_password(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// LAN address to advertise, preferring 192.168/16, then 10/8, then 172.16/12.
/// Falls back to loopback when no interface qualifies.
pub fn preferred_lan_ip() -> IpAddr {
    let candidates = local_ip_address::list_afinet_netifas()
        .map(|ifs| ifs.into_iter().map(|(_, ip)| ip).collect::<Vec<_>>())
        .unwrap_or_default();

    pick_lan_ip(&candidates).unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn pick_lan_ip(candidates: &[IpAddr]) -> Option<IpAddr> {
    let rank = |ip: &IpAddr| match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            if o[0] == 192 && o[1] == 168 {
                0
            } else if o[0] == 10 {
                1
            } else if o[0] == 172 && (16..=31).contains(&o[1]) {
                2
            } else {
                3
            }
        }
        IpAddr::V6(_) => 4,
    };

    candidates
        .iter()
        .filter(|ip| ip.is_ipv4() && !ip.is_loopback())
        .min_by_key(|ip| rank(ip))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_hash_matches_serial() {
        let data: Vec<u8> = (0..PARALLEL_HASH_THRESHOLD * 3).map(|i| (i % 251) as u8).collect();
        assert_eq!(hash_bytes(&data), blake3::hash(&data).to_hex().to_string());
        assert_eq!(hash_bytes(b"abc"), blake3::hash(b"abc").to_hex().to_string());
    }

    #[test]
    fn test_generated_password_shape() {
        let a = generate_password(8);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, generate_password(8));
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("/abs/path/report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("..\\..\\Windows\\calc.exe"), "calc.exe");
        assert_eq!(sanitize_file_name("folder\\../file.txt"), "file.txt");
    }

    #[test]
    fn test_sanitize_rejects_unusable_names() {
        for name in ["", ".", "..", "/", "\\", "   ", "CON", "nul", "com1"] {
            assert_eq!(sanitize_file_name(name), FALLBACK_FILE_NAME, "name {:?}", name);
        }
        assert_eq!(sanitize_file_name("concert.txt"), "concert.txt");
        assert_eq!(sanitize_file_name("a\u{0}b\nc.txt"), "abc.txt");
    }

    #[test]
    fn test_sanitize_prefixes_reserved_stems() {
        assert_eq!(sanitize_file_name("CON.txt"), "_CON.txt");
        assert_eq!(sanitize_file_name("nul.tar.gz"), "_nul.tar.gz");
        assert_eq!(sanitize_file_name("dir/Com1 .log"), "_Com1 .log");
        assert_eq!(sanitize_file_name("console.txt"), "console.txt");
        assert_eq!(sanitize_file_name("lpt10.txt"), "lpt10.txt");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long_unicode = "🦀".repeat(100) + ".txt";
        let sanitized = sanitize_file_name(&long_unicode);
        assert!(sanitized.len() <= MAX_FILENAME_LENGTH);
        assert!(sanitized.ends_with("🦀.txt"));

        let long_plain = "a".repeat(300);
        assert_eq!(sanitize_file_name(&long_plain).len(), MAX_FILENAME_LENGTH);
    }

    #[test]
    fn test_format_transfer_speed() {
        assert_eq!(format_transfer_speed(10, Duration::ZERO), "n/a");
        assert_eq!(format_transfer_speed(500, Duration::from_secs(1)), "500 B/s");
        assert_eq!(format_transfer_speed(10_485_760, Duration::from_secs(2)), "5.24 MB/s");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(10_485_760), "10.00 MB");
    }

    #[test]
    fn test_pick_lan_ip_prefers_home_ranges() {
        let ips: Vec<IpAddr> = ["127.0.0.1", "172.20.0.5", "10.1.2.3", "192.168.1.7"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(pick_lan_ip(&ips), Some("192.168.1.7".parse().unwrap()));
        assert_eq!(pick_lan_ip(&ips[..3]), Some("10.1.2.3".parse().unwrap()));
        assert_eq!(pick_lan_ip(&ips[..1]), None);
    }
}
