//! cow-vm: the abstract VM control interface (C7), its `virsh` backend, and
//! the shutdown/reboot fence (C8).

pub mod manager;
pub mod shutdown;
pub mod virsh;

pub use manager::VirtualMachineManager;
pub use shutdown::{is_accessible, no_dpkg_locks, shutdown, vm_shut_down};
pub use virsh::Virsh;
