use serde::{Deserialize, Serialize};

/// Immutable once read — the parsed output of `parted -s -m <dev> print`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInformation {
    pub path: String,
    pub size: String,
    pub transport: String,
    pub logical_sector_size: u64,
    pub physical_sector_size: u64,
    pub partition_table_type: String,
    pub model: String,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub number: u32,
    pub begin: String,
    pub end: String,
    pub size: String,
    pub fs: String,
    pub name: String,
    /// `/dev/mapper/...` node exposed while `kpartx -a` is active for the
    /// parent device. Populated from `kpartx -l -s` output at parse time.
    pub kpartx_name: String,
    pub flags: String,
}

impl DiskInformation {
    /// Find the single partition named `name`. `spec.md` §3's invariant:
    /// exactly one partition must carry the base/network name at the
    /// relevant point in the pipeline.
    pub fn find_partition<'a>(&'a self, name: &str) -> anyhow::Result<&'a PartitionInfo> {
        let matches: Vec<&PartitionInfo> =
            self.partitions.iter().filter(|p| p.name == name).collect();
        match matches.as_slice() {
            [single] => Ok(single),
            _ => Err(crate::error::CowError::invariant(format!(
                "expected exactly one partition named {name:?} on {}, got {} matches",
                self.path,
                matches.len()
            ))
            .into()),
        }
    }
}
