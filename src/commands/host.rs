//! Opening a programmer and the progress display shared by the device commands

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use nandprog_core::chip::{ChipProfile, ChipRegistry};
use nandprog_serial::{ChipEntry, Connection, Control, Detection, HostConfig, OpEvent, Programmer, Transport};

use super::CmdResult;

/// Looked up in the working directory when no `--config` is given
const DEFAULT_CONFIG: &str = "nandprog.toml";

/// Built-in chips plus any RON definitions at `path`
pub fn load_registry(path: Option<&Path>) -> CmdResult<ChipRegistry> {
    let mut registry = ChipRegistry::builtin();
    if let Some(path) = path {
        let count = if path.is_dir() {
            registry.load_dir(path)?
        } else if path.is_file() {
            registry.load_file(path)?
        } else {
            return Err(format!("Chip database path not found: {}", path.display()).into());
        };
        log::debug!("Loaded {} chips from {}", count, path.display());
    }
    Ok(registry)
}

/// Host configuration from `path`, `./nandprog.toml`, or the defaults
pub fn host_config(path: Option<&Path>) -> CmdResult<HostConfig> {
    let default = Path::new(DEFAULT_CONFIG);
    let config = match path {
        Some(path) => HostConfig::load(path)?,
        None if default.is_file() => HostConfig::load(default)?,
        None => HostConfig::default(),
    };
    Ok(config)
}

/// Accept `dev=`/`ip=` strings as well as a bare serial port or `host:port`
pub fn connection(target: &str) -> Result<Connection, String> {
    if target.starts_with("dev=") || target.starts_with("ip=") {
        return Connection::parse(target);
    }
    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(['/', '\\']) && port.parse::<u16>().is_ok() => {
            Connection::parse(&format!("ip={}", target))
        }
        _ => Connection::parse(&format!("dev={}", target)),
    }
}

/// Connect to the programmer named in `config`
pub fn connect(config: &HostConfig, registry: ChipRegistry) -> CmdResult<Programmer<Box<dyn Transport>>> {
    let target = config
        .port
        .as_deref()
        .ok_or("No programmer given (use --programmer or set `port` in the configuration)")?;
    let connection = connection(target)?;
    log::info!("Connecting to {:?} ({:?} protocol)", connection, config.protocol);
    Ok(nandprog_serial::open(&connection, config)?.with_registry(registry))
}

/// Make sure the device has a chip selected, detecting or falling back to `fallback`
pub fn ensure_chip<T: Transport>(programmer: &mut Programmer<T>, fallback: Option<&str>) -> CmdResult<ChipProfile> {
    let status = programmer.status()?;
    if let Some(offer) = status.resume {
        log::info!(
            "Device holds a resumable {:?} at block {} (use --resume to continue it)",
            offer.kind,
            offer.next_block
        );
    }
    match status.model {
        Some(model) => println!("Found: {}", model),
        None => match programmer.redetect()? {
            Detection::Detected(model) => println!("Found: {}", model),
            Detection::Unknown(entries) => {
                let Some(name) = fallback else {
                    print_listing(&entries);
                    return Err("Chip not identified; pick one with --chip".into());
                };
                let model = programmer.select_name(name)?;
                println!("Selected: {}", model);
            }
        },
    }
    programmer
        .profile()
        .cloned()
        .ok_or_else(|| "The device reports a chip this host does not know (see --chip-db)".into())
}

/// Manual-selection listing as the device sent it
pub fn print_listing(entries: &[ChipEntry]) {
    println!("Known chips:");
    for entry in entries {
        println!("  {:>3}  {}", entry.index, entry.name);
    }
}

/// Progress bar counting `unit`s
pub fn progress_bar(unit: &'static str) -> CmdResult<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_prefix(unit);
    Ok(pb)
}

/// Feed operation events into `pb`
pub fn track(pb: &ProgressBar) -> impl FnMut(OpEvent) -> Control + '_ {
    move |event| match event {
        OpEvent::Progress(p) => {
            pb.set_length(p.total as u64);
            pb.set_position(p.completed as u64);
            Control::Continue
        }
        OpEvent::Paused => {
            pb.println("Device paused; asking it to continue");
            Control::Resume
        }
        OpEvent::PowerWarning(mv) => {
            pb.println(format!("Warning: programmer supply is low ({} mV)", mv));
            Control::Continue
        }
    }
}

/// Blocks covered by `start`/`count` on `profile`
pub fn block_span(profile: &ChipProfile, start: u32, count: u32) -> u32 {
    let end = match count {
        0 => profile.block_count,
        n => start.saturating_add(n).min(profile.block_count),
    };
    end.saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_forms() {
        assert_eq!(
            connection("localhost:4455").unwrap(),
            Connection::Tcp {
                host: "localhost".into(),
                port: 4455
            }
        );
        assert_eq!(
            connection("/dev/ttyACM0").unwrap(),
            Connection::Serial {
                device: "/dev/ttyACM0".into(),
                baud: None
            }
        );
        assert_eq!(
            connection("COM3").unwrap(),
            Connection::Serial {
                device: "COM3".into(),
                baud: None
            }
        );
        assert_eq!(
            connection("dev=/dev/ttyUSB1:921600").unwrap(),
            Connection::Serial {
                device: "/dev/ttyUSB1".into(),
                baud: Some(921_600)
            }
        );
    }

    #[test]
    fn test_block_span() {
        let profile = ChipProfile::new("Dummy", "NAND64", &[0xDA, 0x64], 64, 4, 16);
        assert_eq!(block_span(&profile, 0, 0), 16);
        assert_eq!(block_span(&profile, 4, 0), 12);
        assert_eq!(block_span(&profile, 4, 2), 2);
        assert_eq!(block_span(&profile, 15, 8), 1);
        assert_eq!(block_span(&profile, 20, 0), 0);
    }

    #[test]
    fn test_registry_without_extras() {
        assert_eq!(load_registry(None).unwrap().len(), 18);
        assert!(load_registry(Some(Path::new("/nonexistent/chips"))).is_err());
    }
}
