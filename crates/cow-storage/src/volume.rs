use std::path::{Path, PathBuf};

use anyhow::Result;
use cow_core::CowError;
use cow_exec::{run, RunOptions, ScopeStack};
use tracing::info;

/// `lvcreate -y -s -n <name> (-L <size> | -l <extents>) <origin> [<nvpv>]`.
#[derive(Debug, Clone)]
pub enum SnapshotSize {
    Bytes(String),
    Extents(String),
}

pub fn create_lvm_snapshot(
    origin: &str,
    name: &str,
    size: &SnapshotSize,
    non_volatile_pv: Option<&str>,
) -> Result<()> {
    info!(origin, name, "creating lvm snapshot");
    let mut argv: Vec<&str> = vec!["lvcreate", "-y", "-s", "-n", name];
    match size {
        SnapshotSize::Bytes(s) => {
            argv.push("-L");
            argv.push(s);
        }
        SnapshotSize::Extents(e) => {
            argv.push("-l");
            argv.push(e);
        }
    }
    argv.push(origin);
    if let Some(pv) = non_volatile_pv {
        argv.push(pv);
    }
    run(&argv, RunOptions::default())?;
    Ok(())
}

/// `lvcreate -y -L <size> -n <name> <vg> [<pv>]`, with `size` passed through
/// verbatim (lvcreate's own size-spec syntax, e.g. `20G`).
pub fn create_lvm_volume_sized(name: &str, size: &str, vg: &str, pv: Option<&str>) -> Result<()> {
    info!(name, vg, size, "creating lvm volume");
    let mut argv: Vec<&str> = vec!["lvcreate", "-y", "-L", size, "-n", name, vg];
    if let Some(pv) = pv {
        argv.push(pv);
    }
    run(&argv, RunOptions::default())?;
    Ok(())
}

/// `lvcreate -y -L <N>B -n <name> <vg> [<pv>]`.
pub fn create_lvm_volume(name: &str, size_bytes: u64, vg: &str, pv: Option<&str>) -> Result<()> {
    let size_arg = format!("{size_bytes}B");
    create_lvm_volume_sized(name, &size_arg, vg, pv)
}

/// `blockdev --getsize64 <src>`.
fn block_device_size(src: &str) -> Result<u64> {
    let out = run(&["blockdev", "--getsize64", src], RunOptions::default())?;
    out.stdout
        .trim()
        .parse()
        .map_err(|_| CowError::invariant(format!("unparseable blockdev size for {src}: {:?}", out.stdout)).into())
}

/// Create a byte-for-byte-sized sibling volume `dst` in the same volume
/// group as `src`, sized exactly to `src`'s current byte size. Returns the
/// new volume's path (`dirname(src)/dst`), as `spec.md` §4.5 specifies —
/// the caller still has to `copy_data` the bytes across.
pub fn create_volume_copy(src: &str, dst: &str, non_volatile_pv: Option<&str>) -> Result<PathBuf> {
    let size = block_device_size(src)?;
    let vg = Path::new(src)
        .parent()
        .ok_or_else(|| CowError::invariant(format!("{src} has no parent directory")))?;
    let vg_str = vg.to_string_lossy().into_owned();
    create_lvm_volume(dst, size, &vg_str, non_volatile_pv)?;
    Ok(vg.join(dst))
}

/// `dd if=<src> of=<dst> bs=<bs>`.
pub fn copy_data(src: &str, dst: &str, block_size: &str) -> Result<()> {
    info!(src, dst, block_size, "copying disk data");
    let if_arg = format!("if={src}");
    let of_arg = format!("of={dst}");
    let bs_arg = format!("bs={block_size}");
    run(&["dd", &if_arg, &of_arg, &bs_arg], RunOptions::default())?;
    Ok(())
}

const DEFAULT_DD_BLOCK_SIZE: &str = "128M";

/// `lvs -o lv_attr --noheadings <name>`, parsing character index 5 of the
/// single returned attribute token. `-` ⇒ closed, `o` ⇒ open, anything
/// else is an unparseable-output invariant violation (`spec.md` §8).
pub fn is_lv_open(name: &str) -> Result<bool> {
    info!(name, "checking if lv is open");
    let out = run(
        &["lvs", "-o", "lv_attr", "--noheadings", name],
        RunOptions::default(),
    )?;
    let attrs = out.stdout.trim();
    let flag = attrs
        .chars()
        .nth(5)
        .ok_or_else(|| CowError::invariant(format!("cannot parse LV attributes {attrs:?}")))?;
    match flag {
        '-' => Ok(false),
        'o' => Ok(true),
        _ => Err(CowError::invariant(format!("cannot parse LV attributes {attrs:?}")).into()),
    }
}

/// `lvs --noheadings <name>` succeeding ⇒ the LV exists.
pub fn lv_exists(name: &str) -> Result<bool> {
    let out = run(
        &["lvs", "--noheadings", name],
        RunOptions::probe(),
    )?;
    Ok(out.success())
}

/// `lvremove -f <name>`.
pub fn remove_lv(name: &str) -> Result<()> {
    info!(name, "removing lv");
    run(&["lvremove", "-f", name], RunOptions::default())?;
    Ok(())
}

/// Scoped `create_volume_copy` + `copy_data`: on rollback, the newly
/// created volume is removed again. Returns the new volume's path.
pub fn volume_copy(
    stack: &mut ScopeStack,
    src: &str,
    dst: &str,
    non_volatile_pv: Option<&str>,
) -> Result<PathBuf> {
    let path = create_volume_copy(src, dst, non_volatile_pv)?;
    let path_str = path.to_string_lossy().into_owned();
    stack.on_rollback(format!("remove volume copy {path_str}"), move || {
        remove_lv(&path_str)
    });
    copy_data(src, &path.to_string_lossy(), DEFAULT_DD_BLOCK_SIZE)?;
    Ok(path)
}
