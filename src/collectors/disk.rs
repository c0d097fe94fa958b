use super::command::{parse_u64_loose, run_tool};
use super::SourceError;
use crate::snapshot::{DiskEntry, DiskReport, DiskTable};
use nix::sys::statvfs::statvfs;
use std::collections::HashMap;
use sysinfo::{DiskExt, System, SystemExt};
use tracing::debug;

const PSEUDO_FILESYSTEMS: &[&str] = &[
    "tmpfs", "devtmpfs", "overlay", "squashfs", "proc", "sysfs", "cgroup", "cgroup2", "devpts",
    "ramfs", "efivarfs",
];

pub trait DiskSource: Send + Sync {
    fn filesystems(&self) -> Result<DiskTable, SourceError>;
}

/// Mounts from sysinfo, sized with `statvfs` so reserved blocks count the
/// way `df` counts them.
pub struct NativeDisks;

impl DiskSource for NativeDisks {
    fn filesystems(&self) -> Result<DiskTable, SourceError> {
        let mut system = System::new();
        system.refresh_disks_list();

        let entries = system
            .disks()
            .iter()
            .filter_map(|d| {
                let device = d.name().to_string_lossy().to_string();
                let fs_type = String::from_utf8_lossy(d.file_system()).to_string();
                if !is_real_filesystem(&device, &fs_type) {
                    return None;
                }
                let mountpoint = d.mount_point();
                let stat = match statvfs(mountpoint) {
                    Ok(stat) => stat,
                    Err(errno) => {
                        debug!(mountpoint = %mountpoint.display(), error = %errno, "statvfs failed");
                        return None;
                    }
                };
                let usage = BlockUsage {
                    blocks: stat.blocks() as u64,
                    blocks_free: stat.blocks_free() as u64,
                    blocks_available: stat.blocks_available() as u64,
                    fragment_size: stat.fragment_size() as u64,
                };
                Some(usage.entry(device, mountpoint.to_string_lossy().to_string()))
            })
            .collect();

        Ok(DiskTable {
            entries: dedupe_devices(entries),
            reported_total_percent: None,
        })
    }
}

/// `statvfs` block counters of one filesystem.
#[derive(Debug, Clone, Copy)]
pub struct BlockUsage {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub fragment_size: u64,
}

impl BlockUsage {
    /// Used is everything not free; available excludes the root reserve, so
    /// used + avail can be less than size.
    pub fn entry(&self, device: String, mountpoint: String) -> DiskEntry {
        let to_kb = |blocks: u64| {
            (u128::from(blocks) * u128::from(self.fragment_size) / 1024).min(u128::from(u64::MAX))
                as u64
        };
        let size_kb = to_kb(self.blocks);
        let used_kb = to_kb(self.blocks.saturating_sub(self.blocks_free));
        let avail_kb = to_kb(self.blocks_available);
        DiskEntry {
            device,
            size_kb,
            used_kb,
            avail_kb,
            use_percent: df_use_percent(used_kb, avail_kb),
            mountpoint,
        }
    }
}

/// One row per device, keeping the shortest mountpoint. Bind mounts of the
/// same device would otherwise be summed more than once.
pub fn dedupe_devices(entries: Vec<DiskEntry>) -> Vec<DiskEntry> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<DiskEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match seen.get(&entry.device) {
            Some(&idx) => {
                if entry.mountpoint.len() < out[idx].mountpoint.len() {
                    out[idx] = entry;
                }
            }
            None => {
                seen.insert(entry.device.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}

pub struct DfDisks;

impl DiskSource for DfDisks {
    fn filesystems(&self) -> Result<DiskTable, SourceError> {
        let mut args = vec!["-P", "-k", "--total"];
        for fs in ["tmpfs", "devtmpfs", "overlay", "squashfs"] {
            args.extend(["-x", fs]);
        }
        let out = run_tool("df", &args)?;
        parse_df(&out)
    }
}

pub fn collect_disks(source: &dyn DiskSource) -> Result<DiskReport, SourceError> {
    Ok(disk_report(source.filesystems()?))
}

pub fn disk_report(table: DiskTable) -> DiskReport {
    let (size_kb, used_kb, avail_kb) = table.entries.iter().fold((0_u64, 0_u64, 0_u64), |acc, e| {
        (
            acc.0.saturating_add(e.size_kb),
            acc.1.saturating_add(e.used_kb),
            acc.2.saturating_add(e.avail_kb),
        )
    });

    DiskReport {
        total_gb: kb_to_gb(size_kb),
        used_gb: kb_to_gb(used_kb),
        avail_gb: kb_to_gb(avail_kb),
        use_percent: table
            .reported_total_percent
            .unwrap_or_else(|| df_use_percent(used_kb, avail_kb)),
        entries: table.entries,
    }
}

pub fn kb_to_gb(kb: u64) -> u64 {
    kb / 1024 / 1024
}

/// Use% the way `df` computes it: rounded up, over used + available.
pub fn df_use_percent(used_kb: u64, avail_kb: u64) -> String {
    let denom = u128::from(used_kb) + u128::from(avail_kb);
    if denom == 0 {
        return "-".to_string();
    }
    let pct = (u128::from(used_kb) * 100).div_ceil(denom);
    format!("{pct}%")
}

pub fn is_real_filesystem(device: &str, fs_type: &str) -> bool {
    device.starts_with("/dev/") && !PSEUDO_FILESYSTEMS.contains(&fs_type)
}

/// Parses `df -P -k --total`. Only `/dev/*` rows are kept; the `total`
/// row's capacity column is kept verbatim.
pub fn parse_df(text: &str) -> Result<DiskTable, SourceError> {
    let mut table = DiskTable::default();
    let mut lines = text.lines();
    match lines.next() {
        Some(header) if header.starts_with("Filesystem") => {}
        _ => return Err(SourceError::parse("df", "missing header row")),
    }

    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 6 {
            continue;
        }
        if cols[0] == "total" {
            table.reported_total_percent = Some(cols[4].to_string());
            continue;
        }
        if !cols[0].starts_with("/dev/") {
            continue;
        }
        let (Some(size_kb), Some(used_kb), Some(avail_kb)) = (
            parse_u64_loose(cols[1]),
            parse_u64_loose(cols[2]),
            parse_u64_loose(cols[3]),
        ) else {
            continue;
        };
        table.entries.push(DiskEntry {
            device: cols[0].to_string(),
            size_kb,
            used_kb,
            avail_kb,
            use_percent: cols[4].to_string(),
            mountpoint: cols[5..].join(" "),
        });
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF: &str = "Filesystem     1024-blocks     Used Available Capacity Mounted on\n\
udev               4001412        0   4001412       0% /dev\n\
/dev/nvme0n1p2   490617784 98765432 366867216      22% /\n\
/dev/nvme0n1p1      523248     6220    517028       2% /boot/efi\n\
/dev/sdb1       1921724676 45678912 1778347124      3% /mnt/Backup Drive\n\
total           2416866720 144450564 2149732780      7% -\n";

    #[test]
    fn df_keeps_block_devices_and_total_percent() {
        let table = parse_df(DF).unwrap();
        let devices: Vec<&str> = table.entries.iter().map(|e| e.device.as_str()).collect();
        assert_eq!(devices, ["/dev/nvme0n1p2", "/dev/nvme0n1p1", "/dev/sdb1"]);
        assert_eq!(table.entries[2].mountpoint, "/mnt/Backup Drive");
        assert_eq!(table.entries[0].use_percent, "22%");
        assert_eq!(table.reported_total_percent.as_deref(), Some("7%"));
    }

    #[test]
    fn aggregate_is_floored_gigabytes_with_verbatim_percent() {
        let report = disk_report(parse_df(DF).unwrap());
        let size: u64 = 490_617_784 + 523_248 + 1_921_724_676;
        assert_eq!(report.total_gb, size / 1024 / 1024);
        assert_eq!(report.total_gb, 2301);
        assert_eq!(report.use_percent, "7%");
    }

    #[test]
    fn gigabytes_floor() {
        assert_eq!(kb_to_gb(0), 0);
        assert_eq!(kb_to_gb(1_048_575), 0);
        assert_eq!(kb_to_gb(1_048_576), 1);
        assert_eq!(kb_to_gb(3 * 1_048_576 - 1), 2);
    }

    #[test]
    fn computed_percent_rounds_up_like_df() {
        assert_eq!(df_use_percent(1, 99), "1%");
        assert_eq!(df_use_percent(1, 199), "1%");
        assert_eq!(df_use_percent(0, 100), "0%");
        assert_eq!(df_use_percent(50, 50), "50%");
        assert_eq!(df_use_percent(0, 0), "-");
    }

    #[test]
    fn pseudo_filesystems_are_excluded() {
        assert!(is_real_filesystem("/dev/sda1", "ext4"));
        assert!(!is_real_filesystem("tmpfs", "tmpfs"));
        assert!(!is_real_filesystem("overlay", "overlay"));
        assert!(!is_real_filesystem("/dev/loop3", "squashfs"));
    }

    #[test]
    fn native_totals_are_computed_when_not_reported() {
        let report = disk_report(DiskTable {
            entries: vec![DiskEntry {
                device: "/dev/sda1".to_string(),
                size_kb: 2 * 1_048_576,
                used_kb: 1_048_576,
                avail_kb: 1_048_576,
                use_percent: "50%".to_string(),
                mountpoint: "/".to_string(),
            }],
            reported_total_percent: None,
        });
        assert_eq!(report.used_gb, 1);
        assert_eq!(report.use_percent, "50%");
    }

    #[test]
    fn reserved_blocks_are_neither_used_nor_available() {
        // 1000 blocks, 300 free, 250 available to users: 50 reserved for root.
        let usage = BlockUsage {
            blocks: 1000,
            blocks_free: 300,
            blocks_available: 250,
            fragment_size: 4096,
        };
        let entry = usage.entry("/dev/vda".to_string(), "/".to_string());
        assert_eq!(entry.size_kb, 4000);
        assert_eq!(entry.used_kb, 2800);
        assert_eq!(entry.avail_kb, 1000);
        // ceil(2800 * 100 / 3800) = 74, not the 75% of size - avail.
        assert_eq!(entry.use_percent, "74%");
    }

    #[test]
    fn bind_mounts_of_one_device_are_counted_once() {
        let row = |device: &str, mountpoint: &str| DiskEntry {
            device: device.to_string(),
            size_kb: 1_048_576,
            used_kb: 524_288,
            avail_kb: 524_288,
            use_percent: "50%".to_string(),
            mountpoint: mountpoint.to_string(),
        };
        let entries = dedupe_devices(vec![
            row("/dev/vda", "/etc/resolv.conf"),
            row("/dev/vdb", "/data"),
            row("/dev/vda", "/"),
            row("/dev/vda", "/etc/hosts"),
        ]);
        let mounts: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.device.as_str(), e.mountpoint.as_str()))
            .collect();
        assert_eq!(mounts, [("/dev/vda", "/"), ("/dev/vdb", "/data")]);

        let report = disk_report(DiskTable {
            entries,
            reported_total_percent: None,
        });
        assert_eq!(report.total_gb, 2);
    }

    #[test]
    fn df_without_header_is_rejected() {
        assert!(parse_df("").is_err());
    }
}
