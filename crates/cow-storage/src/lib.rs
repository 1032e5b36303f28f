//! cow-storage: the block-device inspector (C5) and the LVM volume + cache
//! layer (C6).

pub mod cache;
pub mod disk_inspector;
pub mod volume;

pub use disk_inspector::{cleanup_kpartx, disk_info, expose_partitions, set_partition_name};
pub use cache::{configure_caching, disable_cache, enable_cache};
pub use volume::{
    copy_data, create_lvm_snapshot, create_lvm_volume, create_lvm_volume_sized,
    create_volume_copy, is_lv_open, lv_exists, remove_lv, volume_copy, SnapshotSize,
};
