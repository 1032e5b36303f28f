//! cow-publish: the chroot preparator (C9), block-target publisher (C10),
//! boot-config publisher (C11), test-boot verifier (C12), and their
//! composition into the end-to-end `add` pipeline.

pub mod chroot;
pub mod ipxe;
pub mod iscsi;
pub mod pipeline;
pub mod testboot;

pub use chroot::{seed_filesystem, ChrootHandle, SeedOptions};
pub use ipxe::{generate_ipxe_config, published_ipxe_config, IpxeParams};
pub use iscsi::publish_to_iscsi;
pub use pipeline::{add, AddOptions};
pub use testboot::reboot_and_check_test_vm;
