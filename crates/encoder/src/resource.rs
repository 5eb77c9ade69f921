//! Transcoder device selection from sysfs telemetry.
//!
//! Candidate nodes are the `transcoder<N>` entries of the device root. For
//! each index `i` three files under
//! `<sysfs_root>/transcoder{i}/` are read: `power_state`, `enc_util` and
//! `mem_info`. A device is eligible when its power state is non-negative and
//! it has at least [`MEMORY_RESERVE_MB`] free across both memory islands; the
//! least utilized eligible device wins, ties going to the lowest index. A
//! `disabled_transcoder{i}` marker in the device root forces the power state
//! of device `i` to -1.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};
use vmi_common::VpeSettings;

use crate::error::SelectError;

/// Free memory (MB) a device must have to accept a new session.
pub const MEMORY_RESERVE_MB: i64 = 300;

const NODE_PREFIX: &str = "transcoder";
const POWER_STATE: &str = "power_state";
const ENC_UTIL: &str = "enc_util";
const MEM_INFO: &str = "mem_info";

/// One device's telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTelemetry {
    pub index: usize,
    /// Negative means disabled or powered off.
    pub power_state: i32,
    pub utilization: i32,
    pub used_memory_mb: i64,
    pub free_memory_mb: i64,
}

impl DeviceTelemetry {
    pub fn is_eligible(&self) -> bool {
        self.power_state >= 0 && self.free_memory_mb >= MEMORY_RESERVE_MB
    }
}

/// A device picked for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub index: usize,
    /// Device node to open, e.g. `/dev/transcoder2`.
    pub node: PathBuf,
}

/// Scores transcoder devices by load.
#[derive(Debug, Clone)]
pub struct ResourceSelector {
    dev_root: PathBuf,
    sysfs_root: PathBuf,
}

impl ResourceSelector {
    pub fn new(dev_root: impl Into<PathBuf>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            dev_root: dev_root.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    pub fn from_settings(settings: &VpeSettings) -> Self {
        Self::new(&settings.dev_root, &settings.sysfs_root)
    }

    /// Number of transcoder nodes under the device root.
    pub fn device_count(&self) -> Result<usize, SelectError> {
        let entries = fs::read_dir(&self.dev_root).map_err(|e| SelectError::Telemetry {
            path: self.dev_root.display().to_string(),
            reason: e.to_string(),
        })?;
        let count = entries
            .filter_map(Result::ok)
            .filter(|entry| is_device_node(&entry.file_name().to_string_lossy()))
            .count();
        Ok(count)
    }

    pub fn device_node(&self, index: usize) -> PathBuf {
        self.dev_root.join(format!("{NODE_PREFIX}{index}"))
    }

    /// Read the three telemetry files for one device.
    pub fn read_telemetry(&self, index: usize) -> Result<DeviceTelemetry, SelectError> {
        let dir = self.sysfs_root.join(format!("{NODE_PREFIX}{index}"));

        let mem_path = dir.join(MEM_INFO);
        let (used_memory_mb, free_memory_mb) = parse_mem_info(&read_text(&mem_path)?, &mem_path)?;

        let util_path = dir.join(ENC_UTIL);
        let utilization = parse_int(&read_text(&util_path)?, &util_path)?;

        let power_path = dir.join(POWER_STATE);
        let mut power_state = parse_int(&read_text(&power_path)?, &power_path)?;
        if self.dev_root.join(format!("disabled_{NODE_PREFIX}{index}")).exists() {
            power_state = -1;
        }

        let telemetry = DeviceTelemetry {
            index,
            power_state,
            utilization,
            used_memory_mb,
            free_memory_mb,
        };
        debug!(?telemetry, "Read transcoder telemetry");
        Ok(telemetry)
    }

    /// Pick the least loaded eligible device.
    ///
    /// Any unreadable telemetry fails the whole selection; callers treat the
    /// error as fatal to init and do not retry.
    pub fn select_device(&self) -> Result<SelectedDevice, SelectError> {
        let count = self.device_count()?;
        if count == 0 {
            error!(dev_root = %self.dev_root.display(), "No transcoder devices found, is the driver installed?");
            return Err(SelectError::NoDevices(self.dev_root.display().to_string()));
        }

        let telemetry = (0..count)
            .map(|index| self.read_telemetry(index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!(error = %e, "Reading transcoder telemetry failed");
                e
            })?;

        let index = pick_device(&telemetry).ok_or_else(|| {
            error!(count, "No transcoder device has capacity for a new session");
            SelectError::NoEligibleDevice { count }
        })?;
        let node = self.device_node(index);
        info!(index, node = %node.display(), "Selected transcoder device");
        Ok(SelectedDevice { index, node })
    }
}

/// Lowest utilization among eligible devices; the first one seen wins ties.
pub fn pick_device(devices: &[DeviceTelemetry]) -> Option<usize> {
    devices
        .iter()
        .filter(|d| d.is_eligible())
        .min_by_key(|d| (d.utilization, d.index))
        .map(|d| d.index)
}

/// `transcoder<N>`; disable markers and other nodes do not count.
fn is_device_node(name: &str) -> bool {
    name.strip_prefix(NODE_PREFIX)
        .is_some_and(|index| index.parse::<usize>().is_ok())
}

fn read_text(path: &Path) -> Result<String, SelectError> {
    fs::read_to_string(path).map_err(|e| SelectError::Telemetry {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn parse_int(text: &str, path: &Path) -> Result<i32, SelectError> {
    let token = text.split_whitespace().next().unwrap_or_default();
    token.parse().map_err(|_| SelectError::MalformedTelemetry {
        path: path.display().to_string(),
        line: text.trim().to_string(),
    })
}

/// Parse `S0: <used> MB used, <free> MB free, ...` followed by the same for
/// `S1:`. Returns the summed (used, free) in MB.
pub fn parse_mem_info(text: &str, path: &Path) -> Result<(i64, i64), SelectError> {
    let malformed = |line: &str| SelectError::MalformedTelemetry {
        path: path.display().to_string(),
        line: line.to_string(),
    };

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let mut used = 0;
    let mut free = 0;
    for island in ["S0:", "S1:"] {
        let line = lines.next().ok_or_else(|| malformed(""))?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 5 || tokens[0] != island {
            return Err(malformed(line));
        }
        let island_used: i64 = tokens[1].parse().map_err(|_| malformed(line))?;
        let island_free: i64 = tokens[4].parse().map_err(|_| malformed(line))?;
        used += island_used;
        free += island_free;
    }
    Ok((used, free))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, power_state: i32, free: i64, util: i32) -> DeviceTelemetry {
        DeviceTelemetry {
            index,
            power_state,
            utilization: util,
            used_memory_mb: 0,
            free_memory_mb: free,
        }
    }

    #[test]
    fn picks_lowest_utilization() {
        let devices = [device(0, -1, 900, 0), device(1, 0, 500, 40), device(2, 0, 500, 10)];
        assert_eq!(pick_device(&devices), Some(2));
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let devices = [device(0, 0, 500, 25), device(1, 0, 500, 25)];
        assert_eq!(pick_device(&devices), Some(0));
    }

    #[test]
    fn memory_below_reserve_is_ineligible() {
        let devices = [device(0, 0, 299, 0), device(1, 0, 300, 90)];
        assert_eq!(pick_device(&devices), Some(1));
        assert_eq!(pick_device(&devices[..1]), None);
    }

    #[test]
    fn mem_info_sums_both_islands() {
        let text = "S0: 1200 MB used, 250 MB free, 1450 MB total\nS1: 800 MB used, 150 MB free, 950 MB total\n";
        let (used, free) = parse_mem_info(text, Path::new("mem_info")).unwrap();
        assert_eq!(used, 2000);
        assert_eq!(free, 400);
    }

    const MEM_INFO_FREE: &str = "S0: 100 MB used, 400 MB free, 500 MB total\nS1: 100 MB used, 400 MB free, 500 MB total\n";

    /// Fake `/dev` and `/sys` with one node per `(power_state, enc_util)`.
    fn fake_devices(devices: &[(i32, i32)]) -> (tempfile::TempDir, ResourceSelector) {
        let root = tempfile::tempdir().unwrap();
        let dev = root.path().join("dev");
        let sys = root.path().join("sys");
        fs::create_dir_all(&dev).unwrap();
        for (index, (power, util)) in devices.iter().enumerate() {
            fs::write(dev.join(format!("transcoder{index}")), "").unwrap();
            let node = sys.join(format!("transcoder{index}"));
            fs::create_dir_all(&node).unwrap();
            fs::write(node.join(POWER_STATE), format!("{power}\n")).unwrap();
            fs::write(node.join(ENC_UTIL), format!("{util}\n")).unwrap();
            fs::write(node.join(MEM_INFO), MEM_INFO_FREE).unwrap();
        }
        let selector = ResourceSelector::new(&dev, &sys);
        (root, selector)
    }

    #[test]
    fn device_count_only_counts_numbered_nodes() {
        let (root, selector) = fake_devices(&[(0, 10), (0, 20)]);
        let dev = root.path().join("dev");
        fs::write(dev.join("disabled_transcoder0"), "").unwrap();
        fs::write(dev.join("transcoder_ctl"), "").unwrap();
        fs::write(dev.join("transcoder"), "").unwrap();
        assert_eq!(selector.device_count().unwrap(), 2);
    }

    #[test]
    fn disabled_marker_overrides_power_state() {
        let (root, selector) = fake_devices(&[(0, 5), (0, 50), (0, 30)]);
        assert_eq!(selector.select_device().unwrap().index, 0);

        fs::write(root.path().join("dev").join("disabled_transcoder0"), "").unwrap();
        assert_eq!(selector.read_telemetry(0).unwrap().power_state, -1);
        let selected = selector.select_device().unwrap();
        assert_eq!(selected.index, 2);
        assert_eq!(selected.node, root.path().join("dev").join("transcoder2"));
    }

    #[test]
    fn every_device_disabled_is_no_eligible_device() {
        let (root, selector) = fake_devices(&[(0, 5), (0, 50)]);
        let dev = root.path().join("dev");
        fs::write(dev.join("disabled_transcoder0"), "").unwrap();
        fs::write(dev.join("disabled_transcoder1"), "").unwrap();
        assert!(matches!(
            selector.select_device(),
            Err(SelectError::NoEligibleDevice { count: 2 })
        ));
    }

    #[test]
    fn mem_info_rejects_wrong_layout() {
        let swapped = "S1: 1 MB used, 2 MB free\nS0: 1 MB used, 2 MB free\n";
        assert!(matches!(
            parse_mem_info(swapped, Path::new("m")),
            Err(SelectError::MalformedTelemetry { .. })
        ));
        assert!(parse_mem_info("S0: 1 MB used, 2 MB free\n", Path::new("m")).is_err());
        assert!(parse_mem_info("S0: x MB used, 2 MB free\nS1: 1 MB used, 2 MB free", Path::new("m")).is_err());
    }
}
