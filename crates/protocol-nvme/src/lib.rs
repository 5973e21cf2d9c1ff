//! NVMe command encoding and response decoding over a raw device handle.
//!
//! The crate builds the kernel passthrough command blocks, packs command
//! dwords from named sub-fields, and decodes the Identify, SMART and firmware
//! slot pages the controller returns. Submission itself sits behind the
//! [`Transport`] trait; on Linux [`IoctlTransport`] issues the NVMe ioctls
//! against an open `/dev/nvme*` node.
//!
//! ```no_run
//! # #[cfg(target_os = "linux")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use protocol_nvme::{DeviceSession, IoctlTransport};
//!
//! let mut session = DeviceSession::new(IoctlTransport::open("/dev/nvme0")?);
//! session.identify_controller()?;
//! let smart = session.smart_log()?;
//! println!("{:?} {}C", session.controller(), smart.temperature_celsius());
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```

pub mod bitfield;
pub mod command;
pub mod config;
pub mod error;
pub mod identify;
pub mod layout;
pub mod logpage;
pub mod session;
pub mod transport;
pub mod wide;

pub use command::{block_io, AdminOpcode, CommandBuilder, IoOpcode, PassthruCommand, UserIo};
pub use config::SessionConfig;
pub use error::{NvmeError, Result, TransportError};
pub use identify::{
    Cns, ControllerSummary, IdentifyController, IdentifyNamespace, IdentifyParams, LbaFormat,
    NamespaceSummary, PowerStateDescriptor,
};
pub use layout::FixedLayout;
pub use logpage::{
    FirmwareSlotInfo, FirmwareSummary, LogPageId, LogPageRequest, SmartLog, SmartSummary, NSID_ALL,
    NSID_NONE,
};
pub use session::DeviceSession;
pub use transport::{CommandBlock, DataBuffer, SubmitMode, Submission, Transport};
#[cfg(target_os = "linux")]
pub use transport::IoctlTransport;
pub use wide::{data_units_to_bytes, decode_le128, format_human_bytes};
