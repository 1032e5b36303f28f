use std::collections::HashMap;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use cow_core::disk::{DiskInformation, PartitionInfo};
use cow_core::CowError;
use cow_exec::{run, RunOptions};
use tracing::{debug, info, warn};

/// Delays between `kpartx -d` retries, in order (`spec.md` §4.4). The final
/// retry has no trailing delay — failure after it is fatal.
const KPARTX_RETRY_DELAYS: &[f64] = &[0.1, 0.3, 0.5, 1.0, 2.0, 3.0];

/// Resolve symlinks the way Python's `os.path.realpath` does: best-effort,
/// never raising just because the path doesn't exist yet (device-mapper
/// nodes created moments earlier by `kpartx`/`lvcreate` may not be visible
/// to every syscall path, and tests exercise this against mocked devices
/// that were never actually created).
fn real_path(device: &Path) -> String {
    std::fs::canonicalize(device)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| device.to_string_lossy().into_owned())
}

/// `parted -s -m <realpath(dev)> print`, parsed into `DiskInformation`.
/// Resolves kpartx device-mapper names for every partition as a side
/// effect (`get_kpartx_names`), then always tears the mapping back down.
pub fn disk_info(device: &Path) -> Result<DiskInformation> {
    let real_device = real_path(device);

    let argv = ["parted", "-s", "-m", &real_device, "print"];
    let out = run(&argv, RunOptions::default())?;

    let lines: Vec<&str> = out.stdout.lines().map(str::trim).collect();
    if lines.len() < 2 {
        return Err(CowError::DiskConfig {
            device: device.display().to_string(),
            real_device,
            output: out.stdout.clone(),
            reason: "expected at least two lines in parted output".into(),
        }
        .into());
    }
    if lines[0] != "BYT;" {
        return Err(CowError::DiskConfig {
            device: device.display().to_string(),
            real_device,
            output: out.stdout.clone(),
            reason: "only \"Bytes\" units are supported".into(),
        }
        .into());
    }

    let fields: Vec<&str> = lines[1].split(':').collect();
    if fields.len() < 7 {
        return Err(CowError::DiskConfig {
            device: device.display().to_string(),
            real_device,
            output: out.stdout.clone(),
            reason: "malformed disk configuration line".into(),
        }
        .into());
    }
    if fields[0] != real_device {
        return Err(CowError::DiskConfig {
            device: device.display().to_string(),
            real_device,
            output: out.stdout.clone(),
            reason: "expected device spec as second line of parted output".into(),
        }
        .into());
    }

    let logical_sector_size: u64 = fields[3].parse().map_err(|_| CowError::DiskConfig {
        device: device.display().to_string(),
        real_device: real_device.clone(),
        output: out.stdout.clone(),
        reason: "unparseable logical sector size".into(),
    })?;
    let physical_sector_size: u64 = fields[4].parse().map_err(|_| CowError::DiskConfig {
        device: device.display().to_string(),
        real_device: real_device.clone(),
        output: out.stdout.clone(),
        reason: "unparseable physical sector size".into(),
    })?;

    let kpartx_names = get_kpartx_names(device)?;
    let partitions = parse_partitions(device, &lines[2..], &kpartx_names, &out.stdout)?;

    Ok(DiskInformation {
        path: fields[0].to_string(),
        size: fields[1].to_string(),
        transport: fields[2].to_string(),
        logical_sector_size,
        physical_sector_size,
        partition_table_type: fields[5].to_string(),
        model: fields[6].trim_end_matches(';').to_string(),
        partitions,
    })
}

fn parse_partitions(
    device: &Path,
    lines: &[&str],
    kpartx_names: &HashMap<u32, String>,
    raw_output: &str,
) -> Result<Vec<PartitionInfo>> {
    let mut partitions = Vec::with_capacity(lines.len());
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if !line.ends_with(';') {
            return Err(CowError::DiskConfig {
                device: device.display().to_string(),
                real_device: device.display().to_string(),
                output: raw_output.to_string(),
                reason: format!("partition line {line:?} does not end with ';'"),
            }
            .into());
        }
        let trimmed = &line[..line.len() - 1];
        let fields: Vec<&str> = trimmed.split(':').collect();
        if fields.len() != 7 {
            return Err(CowError::DiskConfig {
                device: device.display().to_string(),
                real_device: device.display().to_string(),
                output: raw_output.to_string(),
                reason: format!("partition line {line:?} has {} fields, expected 7", fields.len()),
            }
            .into());
        }
        let number: u32 = fields[0].parse().map_err(|_| CowError::DiskConfig {
            device: device.display().to_string(),
            real_device: device.display().to_string(),
            output: raw_output.to_string(),
            reason: format!("unparseable partition number in {line:?}"),
        })?;
        let kpartx_name = kpartx_names
            .get(&number)
            .cloned()
            .ok_or_else(|| CowError::invariant(format!(
                "no kpartx mapping found for partition {number} of {}",
                device.display()
            )))?;
        partitions.push(PartitionInfo {
            number,
            begin: fields[1].to_string(),
            end: fields[2].to_string(),
            size: fields[3].to_string(),
            fs: fields[4].to_string(),
            name: fields[5].to_string(),
            kpartx_name,
            flags: fields[6].to_string(),
        });
    }
    Ok(partitions)
}

/// `kpartx -l -s <device>`, mapping 1-based partition index (the order
/// partitions are listed in, matching the source's behaviour) to
/// `/dev/mapper/<name>`. Always tears the mapping back down afterwards —
/// listing exposes it the same way `-a` does.
fn get_kpartx_names(device: &Path) -> Result<HashMap<u32, String>> {
    let device_str = device.to_string_lossy().into_owned();
    let argv = ["kpartx", "-l", "-s", &device_str];
    let result = run(&argv, RunOptions::default());

    let cleanup_result = cleanup_kpartx(device);
    if let Err(e) = &cleanup_result {
        warn!(device = %device.display(), error = %e, "exception while cleaning up partitions");
    }

    let out = result?;
    let mut names = HashMap::new();
    for (index, line) in out.stdout.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let name = line.split(' ').next().unwrap_or_default();
        names.insert((index + 1) as u32, format!("/dev/mapper/{name}"));
    }
    Ok(names)
}

/// Expose a device's partitions as `/dev/mapper` nodes (`kpartx -a -s`).
/// Pair with `cleanup_kpartx` — `cow-publish`'s `partitions_exposed` scope
/// registers that as the rollback/final action.
pub fn expose_partitions(device: &Path) -> Result<()> {
    let device_str = device.to_string_lossy().into_owned();
    run(&["kpartx", "-a", "-s", &device_str], RunOptions::default())?;
    Ok(())
}

/// Retry `kpartx -d -v <device>` up to 7 attempts with the delays in
/// `spec.md` §4.4: if the output mentions "is in use", sleep and retry;
/// any other non-zero output is immediately fatal. Failure on the final
/// attempt is fatal.
pub fn cleanup_kpartx(device: &Path) -> Result<()> {
    let device_str = device.to_string_lossy().into_owned();
    let argv = ["kpartx", "-d", "-v", &device_str];

    let mut delays = KPARTX_RETRY_DELAYS.iter().map(Some).chain(std::iter::once(None));
    loop {
        let delay = delays.next();
        let out = run(&argv, RunOptions::probe())?;
        let combined = format!("{}{}", out.stdout, out.stderr);
        if out.success() {
            return Ok(());
        }
        if combined.contains("is in use") {
            warn!(device = %device.display(), output = %combined, "some partitions still in use");
            match delay {
                Some(Some(secs)) => {
                    info!(seconds = secs, "waiting before retrying kpartx cleanup");
                    sleep(Duration::from_secs_f64(*secs));
                    continue;
                }
                Some(None) => {
                    return Err(CowError::invariant(format!(
                        "failed to cleanup partitions for {} with kpartx",
                        device.display()
                    ))
                    .into());
                }
                None => unreachable!("delays iterator always has a final None"),
            }
        }
        return Err(CowError::invariant(format!(
            "unexpected error from kpartx: {combined}"
        ))
        .into());
    }
}

/// `parted -s <dev> name <number> <name>`.
pub fn set_partition_name(device: &Path, number: u32, name: &str) -> Result<()> {
    info!(%number, name, device = %device.display(), "setting partition name");
    let device_str = device.to_string_lossy().into_owned();
    let number_str = number.to_string();
    let argv = ["parted", "-s", &device_str, "name", &number_str, name];
    debug!(argv = ?argv, "running command");
    run(&argv, RunOptions::default())?;
    Ok(())
}
