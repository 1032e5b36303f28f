use std::collections::HashSet;

use anyhow::Result;
use cow_exec::{run, RunOptions};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::info;

use crate::manager::VirtualMachineManager;

/// `virsh`-backed implementation: `list --state-running --name`, `start`,
/// `reset`, `dumpxml` (subset consumed — `spec.md` §6).
#[derive(Debug, Default, Clone, Copy)]
pub struct Virsh;

impl VirtualMachineManager for Virsh {
    fn is_vm_running(&self, name: &str) -> Result<bool> {
        info!(name, "checking if vm is running");
        let out = run(
            &["virsh", "list", "--state-running", "--name"],
            RunOptions::default(),
        )?;
        let running: HashSet<&str> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        info!(running = ?running, "running domains");
        Ok(running.contains(name))
    }

    fn start(&self, name: &str) -> Result<()> {
        info!(name, "starting vm");
        run(&["virsh", "start", name], RunOptions::default())?;
        Ok(())
    }

    fn reset(&self, name: &str) -> Result<()> {
        info!(name, "resetting vm");
        run(&["virsh", "reset", name], RunOptions::default())?;
        Ok(())
    }

    fn disks(&self, name: &str) -> Result<Vec<String>> {
        let out = run(&["virsh", "dumpxml", name], RunOptions::default())?;
        parse_disk_sources(&out.stdout)
    }
}

/// Extract `./devices/disk/source/@dev` from a domain XML document, tracking
/// the element path as a stack so a `<source>` nested under `<interface>`
/// (network sources have no `dev` attribute anyway, but other devices might)
/// is never mistaken for a disk source.
fn parse_disk_sources(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut disks = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"source" && is_disk_source_path(&path) {
                    collect_dev_attr(e, &reader, &mut disks)?;
                }
                path.push(local);
            }
            Event::Empty(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                if local == b"source" && is_disk_source_path(&path) {
                    collect_dev_attr(e, &reader, &mut disks)?;
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(disks)
}

/// True if `path` (excluding the element about to be pushed) is
/// `domain/devices/disk`.
fn is_disk_source_path(path: &[Vec<u8>]) -> bool {
    path.len() >= 2
        && path[path.len() - 1] == b"disk"
        && path[path.len() - 2] == b"devices"
}

fn collect_dev_attr(
    e: &quick_xml::events::BytesStart,
    reader: &Reader<&[u8]>,
    disks: &mut Vec<String>,
) -> Result<()> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"dev" {
            let value = attr.decode_and_unescape_value(reader.decoder())?;
            disks.push(value.into_owned());
        }
    }
    Ok(())
}
