use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// `CowPartitionsConfig` (`spec.md` §6): the rename/overlay metadata baked
/// into `/etc/cow.conf` inside the chroot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionsConfig {
    pub base: String,
    pub network: String,
    pub local: String,
    pub cow: String,
    pub conf: String,
    pub sign: String,
    pub keyimage: String,
    pub place: String,
}

impl PartitionsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open partitions config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse partitions config {}", path.display()))
    }

    /// `(key, value)` pairs in declaration order, for the bash associative
    /// array written to `/etc/cow.conf` (`PARTITION_NAMES[<key>]=<value>`).
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("base", &self.base),
            ("network", &self.network),
            ("local", &self.local),
            ("cow", &self.cow),
            ("conf", &self.conf),
            ("sign", &self.sign),
            ("keyimage", &self.keyimage),
            ("place", &self.place),
        ]
    }
}

/// `CacheConfig` (`spec.md` §6): write-through cache placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub volume_group: String,
    pub non_volatile_pv: String,
    pub cache_pv: String,
    pub cache_volume_size: String,
    pub cached_volumes_path: String,
}

impl CacheConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open cache config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse cache config {}", path.display()))
    }

    /// Path of the zero-byte cache record for `volume` (`spec.md` §3).
    pub fn record_path(&self, volume: &str) -> std::path::PathBuf {
        Path::new(&self.cached_volumes_path).join(crate::naming::basename(volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_json(dir: &tempfile::TempDir, name: &str, json: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_partitions_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "base": "primary", "network": "net", "local": "local",
            "cow": "cow", "conf": "conf", "sign": "sign",
            "keyimage": "keyimage", "place": "place"
        }"#;
        let path = write_json(&dir, "partitions.json", json);
        let cfg = PartitionsConfig::load(&path).unwrap();
        assert_eq!(cfg.base, "primary");
        assert_eq!(cfg.network, "net");
        assert_eq!(cfg.entries().len(), 8);
        assert_eq!(cfg.entries()[0], ("base", "primary"));
    }

    #[test]
    fn test_cache_config_record_path() {
        let dir = tempfile::tempdir().unwrap();
        let json = format!(
            r#"{{
                "volume_group": "vg0", "non_volatile_pv": "/dev/sda",
                "cache_pv": "/dev/sdb", "cache_volume_size": "20G",
                "cached_volumes_path": "{}"
            }}"#,
            dir.path().display()
        );
        let path = write_json(&dir, "cache.json", &json);
        let cfg = CacheConfig::load(&path).unwrap();
        let record = cfg.record_path("/dev/vg0/vm1-snapshot");
        assert_eq!(record, dir.path().join("vm1-snapshot"));
    }

    #[test]
    fn test_partitions_config_missing_field_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(&dir, "bad.json", r#"{"base": "primary"}"#);
        assert!(PartitionsConfig::load(&path).is_err());
    }
}
