// src/hw/topology.rs
//! CPU topology snapshot
//!
//! Captures core counts, cache sizes and the huge-page budget once at
//! startup. The snapshot is read-only afterwards and passed by reference
//! through constructors; nothing in the crate reads hardware state through
//! ambient globals.

use std::fs;
use std::path::Path;
use sysinfo::System;

/// Default huge page size on x86-64 Linux, in KiB.
pub const DEFAULT_HUGE_PAGE_SIZE_KB: usize = 2048;

/// Read-only description of the machine the miner is running on.
///
/// Constructed via [`HardwareTopology::detect`] in production, or as a
/// plain struct literal in tests where a specific shape is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareTopology {
    /// Logical core count, hyper-threads included
    pub logical_cores: usize,
    /// Physical core count
    pub physical_cores: usize,
    /// Total L3 cache in bytes, summed over cache domains
    pub l3_bytes: usize,
    /// Per-core L2 cache in bytes
    pub l2_bytes: usize,
    /// Total system memory in bytes
    pub total_memory_bytes: u64,
    /// Free huge-page budget in bytes, 0 when unavailable
    pub huge_page_bytes: usize,
    /// Hardware AES support
    pub has_aes: bool,
    /// CPU model string, best effort
    pub cpu_brand: String,
}

impl HardwareTopology {
    /// Probes the host. Linux reads sysfs/procfs; elsewhere the cache and
    /// huge-page figures fall back to conservative defaults that keep the
    /// auto-configuration core-bound.
    pub fn detect() -> Self {
        let system = System::new_all();
        let logical_cores = num_cpus::get().max(1);
        let physical_cores = num_cpus::get_physical().max(1);

        let l3_bytes = detect_cache_bytes(3)
            .unwrap_or(logical_cores * 2 * 1024 * 1024);
        let l2_bytes = detect_cache_bytes(2).unwrap_or(512 * 1024);

        let cpu_brand = system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_else(|| format!("{}-core CPU", logical_cores));

        HardwareTopology {
            logical_cores,
            physical_cores,
            l3_bytes,
            l2_bytes,
            total_memory_bytes: system.total_memory(),
            huge_page_bytes: detect_huge_page_bytes().unwrap_or(0),
            has_aes: detect_aes(),
            cpu_brand,
        }
    }

    /// True when the free huge-page budget covers `bytes`.
    pub fn can_back_with_huge_pages(&self, bytes: usize) -> bool {
        self.huge_page_bytes >= bytes
    }
}

fn detect_aes() -> bool {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        std::arch::is_x86_feature_detected!("aes")
    }
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        false
    }
}

/// Sums the sysfs cache entries of the requested level across cpu0's
/// cache domains. Unified and data caches only.
fn detect_cache_bytes(level: u32) -> Option<usize> {
    if !cfg!(target_os = "linux") {
        return None;
    }

    let base = Path::new("/sys/devices/system/cpu/cpu0/cache");
    let entries = fs::read_dir(base).ok()?;
    let mut total = 0usize;

    for entry in entries.flatten() {
        let path = entry.path();
        // non-index entries (uevent etc.) have no level file; skip them
        let Some(entry_level) = fs::read_to_string(path.join("level"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
        else {
            continue;
        };
        if entry_level != level {
            continue;
        }

        let Ok(cache_type) = fs::read_to_string(path.join("type")) else {
            continue;
        };
        if !matches!(cache_type.trim(), "Unified" | "Data") {
            continue;
        }

        if let Some(bytes) = fs::read_to_string(path.join("size"))
            .ok()
            .and_then(|s| parse_cache_size(s.trim()))
        {
            total += bytes;
        }
    }

    (total > 0).then_some(total)
}

/// Parses sysfs cache size strings such as `32K` or `16M`.
fn parse_cache_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    if let Some(kb) = raw.strip_suffix(['K', 'k']) {
        return kb.parse::<usize>().ok().map(|v| v * 1024);
    }
    if let Some(mb) = raw.strip_suffix(['M', 'm']) {
        return mb.parse::<usize>().ok().map(|v| v * 1024 * 1024);
    }
    raw.parse::<usize>().ok()
}

/// Free huge-page budget from /proc/meminfo.
fn detect_huge_page_bytes() -> Option<usize> {
    if !cfg!(target_os = "linux") {
        return None;
    }

    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    let mut free_pages = 0usize;
    let mut page_kb = DEFAULT_HUGE_PAGE_SIZE_KB;

    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("HugePages_Free:") {
            free_pages = rest.trim().parse().ok()?;
        } else if let Some(rest) = line.strip_prefix("Hugepagesize:") {
            page_kb = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(DEFAULT_HUGE_PAGE_SIZE_KB);
        }
    }

    Some(free_pages * page_kb * 1024)
}

/// Fixed-shape topology for unit tests across the crate.
#[cfg(test)]
pub(crate) fn test_topology(cores: usize, l3_mib: usize) -> HardwareTopology {
    HardwareTopology {
        logical_cores: cores,
        physical_cores: cores,
        l3_bytes: l3_mib * 1024 * 1024,
        l2_bytes: 512 * 1024,
        total_memory_bytes: 16 * 1024 * 1024 * 1024,
        huge_page_bytes: 0,
        has_aes: true,
        cpu_brand: "test".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cache_size_units() {
        assert_eq!(parse_cache_size("32K"), Some(32 * 1024));
        assert_eq!(parse_cache_size("16M"), Some(16 * 1024 * 1024));
        assert_eq!(parse_cache_size("512"), Some(512));
        assert_eq!(parse_cache_size("junk"), None);
    }

    #[test]
    fn detect_reports_at_least_one_core() {
        let topo = HardwareTopology::detect();
        assert!(topo.logical_cores >= 1);
        assert!(topo.physical_cores >= 1);
        assert!(topo.l3_bytes > 0);
    }

    #[test]
    fn huge_page_budget_check() {
        let mut topo = test_topology(4, 8);
        topo.huge_page_bytes = 4 * 1024 * 1024;
        assert!(topo.can_back_with_huge_pages(2 * 1024 * 1024));
        assert!(!topo.can_back_with_huge_pages(8 * 1024 * 1024));
    }
}
