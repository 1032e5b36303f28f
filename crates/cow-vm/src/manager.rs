use anyhow::Result;

/// Abstract VM control (`spec.md` §4.9 / design note "Polymorphic VM
/// manager"). `Virsh` is the one concrete backend; anything implementing
/// this trait is a drop-in replacement for tests or alternative
/// hypervisors.
pub trait VirtualMachineManager {
    fn is_vm_running(&self, name: &str) -> Result<bool>;
    fn start(&self, name: &str) -> Result<()>;
    fn reset(&self, name: &str) -> Result<()>;
    /// The VM's block-backed disk device paths. `spec.md` requires exactly
    /// one disk for the reference VM; callers enforce that, this just
    /// reports what it finds.
    fn disks(&self, name: &str) -> Result<Vec<String>>;
}
