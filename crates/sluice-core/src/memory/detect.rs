//! Host memory detection for budget sizing.

/// Fallback when total host memory cannot be determined.
const FALLBACK_HOST_MEMORY: u64 = 16 * 1024 * 1024 * 1024;

/// Returns total host memory in bytes.
///
/// Reads `/proc/meminfo` on Linux; other platforms (and unreadable
/// meminfo) fall back to a fixed 16 GiB so budget sizing stays defined.
#[must_use]
pub fn host_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/meminfo") {
            if let Some(bytes) = parse_mem_total(&contents) {
                return bytes;
            }
        }
    }
    FALLBACK_HOST_MEMORY
}

/// Parses the `MemTotal:` line of `/proc/meminfo` (value is in kB).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mem_total(contents: &str) -> Option<u64> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
