use anyhow::{ensure, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use protocol_nvme::{DeviceSession, NamespaceSummary, SessionConfig, Transport, NSID_ALL};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sim_nvme::{SimController, SimControllerConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("NVME_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        // stdout carries the JSON report
        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_writer(std::io::stderr)
                .with_target(true)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
    });
}

#[derive(Debug, Parser)]
#[command(name = "nvmectl")]
#[command(about = "NVMe passthrough control utility", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["device", "sim"])))]
struct Cli {
    /// NVMe device node, e.g. /dev/nvme0 or /dev/nvme0n1
    #[arg(long)]
    device: Option<PathBuf>,
    /// Use the in-memory simulated controller
    #[arg(long)]
    sim: bool,
    /// YAML file with optional `session` and `sim` sections.
    /// A `session` section replaces the NVME_*_TIMEOUT_MS environment values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Identify the controller
    IdCtrl,
    /// Identify a namespace
    IdNs {
        #[arg(long, default_value_t = 1)]
        nsid: u32,
    },
    /// Report the logical block size of a namespace
    BlockSize {
        #[arg(long, default_value_t = 1)]
        nsid: u32,
    },
    /// SMART / health information
    SmartLog,
    /// Firmware slot information
    FwLog,
    /// Fetch a log page and dump it as hex
    Log {
        /// Log page identifier, decimal or 0x-prefixed
        #[arg(long, value_parser = parse_u8)]
        lid: u8,
        /// Bytes to fetch (multiple of 4, 4..=16384)
        #[arg(long)]
        len: usize,
        #[arg(long, default_value_t = NSID_ALL)]
        nsid: u32,
    },
    /// Read blocks from the namespace behind the device node
    Read {
        #[arg(long)]
        lba: u64,
        #[arg(long)]
        blocks: u16,
        /// Namespace used to size the transfer
        #[arg(long, default_value_t = 1)]
        nsid: u32,
        /// Write the data here instead of hex in the report
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Write blocks from a local file, zero padded to whole blocks
    Write {
        #[arg(long)]
        lba: u64,
        #[arg(long)]
        blocks: u16,
        #[arg(long, default_value_t = 1)]
        nsid: u32,
        #[arg(short, long)]
        file: PathBuf,
        /// Stream identifier passed as a write hint (0 = none)
        #[arg(long, default_value_t = 0)]
        hint: u16,
    },
}

impl Commands {
    /// Namespace that simple I/O should land on.
    fn io_namespace(&self) -> Option<u32> {
        match self {
            Commands::Read { nsid, .. } | Commands::Write { nsid, .. } => Some(*nsid),
            _ => None,
        }
    }
}

fn parse_u8(value: &str) -> std::result::Result<u8, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|err| format!("invalid log page id {value:?}: {err}"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    session: Option<SessionConfig>,
    sim: SimControllerConfig,
}

fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn open_transport(cli: &Cli, sim: SimControllerConfig) -> Result<Box<dyn Transport>> {
    if cli.sim {
        let mut controller = SimController::new(sim).context("building simulated controller")?;
        if let Some(nsid) = cli.command.io_namespace() {
            controller.bind_io_namespace(nsid)?;
        }
        tracing::debug!(
            namespaces = controller.config().namespaces.len(),
            "using simulated controller"
        );
        return Ok(Box::new(controller));
    }
    let path = cli
        .device
        .as_deref()
        .context("either --device or --sim is required")?;
    tracing::debug!(device = %path.display(), "opening device");
    open_device(path)
}

#[cfg(target_os = "linux")]
fn open_device(path: &Path) -> Result<Box<dyn Transport>> {
    let transport = protocol_nvme::IoctlTransport::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn open_device(path: &Path) -> Result<Box<dyn Transport>> {
    anyhow::bail!("{}: ioctl passthrough is only available on Linux", path.display())
}

fn transfer_len(blocks: u16, block_size: u64) -> Result<usize> {
    u64::from(blocks)
        .checked_mul(block_size)
        .and_then(|len| usize::try_from(len).ok())
        .context("transfer length overflows")
}

fn to_json<S: Serialize>(report: &S) -> Result<String> {
    serde_json::to_string_pretty(report).context("serializing report")
}

/// Execute one subcommand and render its JSON report.
fn run<T: Transport>(session: &mut DeviceSession<T>, command: &Commands) -> Result<String> {
    match command {
        Commands::IdCtrl => {
            let ctrl = session
                .identify_controller()
                .context("identify controller")?;
            to_json(&ctrl.summary())
        }
        Commands::IdNs { nsid } => {
            let ns = session
                .identify_namespace(*nsid)
                .with_context(|| format!("identify namespace {nsid}"))?;
            to_json(&NamespaceSummary::new(*nsid, &ns)?)
        }
        Commands::BlockSize { nsid } => {
            let block_size = session
                .logical_block_size(*nsid)
                .with_context(|| format!("block size of namespace {nsid}"))?;
            to_json(&json!({ "nsid": nsid, "block_size": block_size }))
        }
        Commands::SmartLog => {
            let smart = session.smart_log().context("SMART log")?;
            to_json(&smart.summary())
        }
        Commands::FwLog => {
            let info = session.firmware_slot_info().context("firmware slot log")?;
            to_json(&info.summary())
        }
        Commands::Log { lid, len, nsid } => {
            let mut page = vec![0u8; *len];
            session
                .read_log_page(*nsid, *lid, &mut page)
                .with_context(|| format!("log page {lid:#04x}"))?;
            to_json(&json!({
                "lid": lid,
                "nsid": nsid,
                "len": len,
                "data": hex::encode(&page),
            }))
        }
        Commands::Read {
            lba,
            blocks,
            nsid,
            out,
        } => {
            let block_size = session
                .bind_namespace(*nsid)
                .with_context(|| format!("block size of namespace {nsid}"))?;
            let mut data = vec![0u8; transfer_len(*blocks, block_size)?];
            session
                .read(*lba, *blocks, &mut data)
                .with_context(|| format!("read {blocks} blocks at lba {lba}"))?;
            tracing::info!(lba, blocks, bytes = data.len(), "read blocks");
            match out {
                Some(path) => {
                    fs::write(path, &data)
                        .with_context(|| format!("writing {}", path.display()))?;
                    to_json(&json!({
                        "lba": lba,
                        "blocks": blocks,
                        "bytes": data.len(),
                        "out": path.display().to_string(),
                    }))
                }
                None => to_json(&json!({
                    "lba": lba,
                    "blocks": blocks,
                    "bytes": data.len(),
                    "data": hex::encode(&data),
                })),
            }
        }
        Commands::Write {
            lba,
            blocks,
            nsid,
            file,
            hint,
        } => {
            let block_size = session
                .bind_namespace(*nsid)
                .with_context(|| format!("block size of namespace {nsid}"))?;
            let len = transfer_len(*blocks, block_size)?;
            let mut data =
                fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            ensure!(
                data.len() <= len,
                "{} holds {} bytes, more than {} blocks of {} bytes",
                file.display(),
                data.len(),
                blocks,
                block_size
            );
            data.resize(len, 0);
            session
                .write(*lba, *blocks, *hint, &data)
                .with_context(|| format!("write {blocks} blocks at lba {lba}"))?;
            tracing::info!(lba, blocks, bytes = len, hint, "wrote blocks");
            to_json(&json!({
                "lba": lba,
                "blocks": blocks,
                "bytes": len,
                "hint": hint,
            }))
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let file = load_config(cli.config.as_deref())?;
    let session_config = file.session.unwrap_or_else(SessionConfig::from_env);
    let transport = open_transport(&cli, file.sim)?;
    let mut session = DeviceSession::with_config(transport, session_config);

    let report = run(&mut session, &cli.command)?;
    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tracing_test::traced_test;

    fn sim_session(cli: &Cli) -> DeviceSession<Box<dyn Transport>> {
        let transport = open_transport(cli, SimControllerConfig::default()).unwrap();
        DeviceSession::new(transport)
    }

    fn report(session: &mut DeviceSession<Box<dyn Transport>>, command: &Commands) -> Value {
        serde_json::from_str(&run(session, command).unwrap()).unwrap()
    }

    #[test]
    fn test_target_is_required_and_exclusive() {
        assert!(Cli::try_parse_from(["nvmectl", "id-ctrl"]).is_err());
        assert!(
            Cli::try_parse_from(["nvmectl", "--sim", "--device", "/dev/nvme0", "id-ctrl"]).is_err()
        );
        let cli = Cli::try_parse_from(["nvmectl", "--device", "/dev/nvme0", "smart-log"]).unwrap();
        assert_eq!(cli.device.as_deref(), Some(Path::new("/dev/nvme0")));
        assert!(matches!(cli.command, Commands::SmartLog));
    }

    #[test]
    fn test_log_arguments() {
        let cli =
            Cli::try_parse_from(["nvmectl", "--sim", "log", "--lid", "0x02", "--len", "512"])
                .unwrap();
        match cli.command {
            Commands::Log { lid, len, nsid } => {
                assert_eq!(lid, 2);
                assert_eq!(len, 512);
                assert_eq!(nsid, NSID_ALL);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["nvmectl", "--sim", "log", "--lid", "0x1ff", "--len", "4"])
            .is_err());
    }

    #[test]
    fn test_id_ctrl_against_simulator() {
        let cli = Cli::try_parse_from(["nvmectl", "--sim", "id-ctrl"]).unwrap();
        let mut session = sim_session(&cli);
        let value = report(&mut session, &cli.command);
        assert_eq!(value["model"], "SIM NVMe Ctrl");
        assert_eq!(value["serial"], "SIMNVME0001");
        assert_eq!(value["max_data_transfer_size"], 32);
    }

    #[test]
    fn test_log_page_validation_is_reported() {
        let cli =
            Cli::try_parse_from(["nvmectl", "--sim", "log", "--lid", "2", "--len", "6"]).unwrap();
        let mut session = sim_session(&cli);
        let err = run(&mut session, &cli.command).unwrap_err();
        assert!(format!("{err:#}").contains("log page 0x02"));
    }

    #[traced_test]
    #[test]
    fn test_write_then_read_through_simulator() {
        let path = std::env::temp_dir().join(format!("nvmectl-test-{}.bin", std::process::id()));
        fs::write(&path, b"hello block").unwrap();

        let cli = Cli::try_parse_from([
            "nvmectl",
            "--sim",
            "write",
            "--lba",
            "3",
            "--blocks",
            "1",
            "--file",
            path.to_str().unwrap(),
            "--hint",
            "2",
        ])
        .unwrap();
        let mut session = sim_session(&cli);
        let value = report(&mut session, &cli.command);
        assert_eq!(value["bytes"], 512);
        assert_eq!(value["hint"], 2);

        let read = Commands::Read {
            lba: 3,
            blocks: 1,
            nsid: 1,
            out: None,
        };
        let value = report(&mut session, &read);
        let data = hex::decode(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(&data[..11], b"hello block");
        assert!(data[11..].iter().all(|&b| b == 0));
        assert!(logs_contain("wrote blocks"));
        assert!(logs_contain("read blocks"));
        assert!(logs_contain("using simulated controller"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_rejects_oversized_file() {
        let path = std::env::temp_dir().join(format!("nvmectl-big-{}.bin", std::process::id()));
        fs::write(&path, vec![7u8; 600]).unwrap();
        let command = Commands::Write {
            lba: 0,
            blocks: 1,
            nsid: 1,
            file: path.clone(),
            hint: 0,
        };
        let cli = Cli::try_parse_from(["nvmectl", "--sim", "fw-log"]).unwrap();
        let mut session = sim_session(&cli);
        let err = run(&mut session, &command).unwrap_err();
        assert!(err.to_string().contains("more than 1 blocks"));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_config_file_sections() {
        let yaml = r#"
session:
  admin_timeout_ms: 2000
sim:
  model: "Lab Drive"
  namespaces:
    - nsid: 1
      blocks: 32
      lbads: 12
"#;
        let config: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let session = config.session.unwrap();
        assert_eq!(session.admin_timeout_ms, 2000);
        assert_eq!(session.io_timeout_ms, 0);
        assert_eq!(config.sim.model, "Lab Drive");
        assert_eq!(config.sim.namespaces[0].lbads, 12);

        let empty = load_config(None).unwrap();
        assert!(empty.session.is_none());
        assert_eq!(empty.sim, SimControllerConfig::default());
    }
}
