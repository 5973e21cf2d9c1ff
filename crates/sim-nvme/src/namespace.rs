use crate::config::SimNamespaceConfig;
use crate::status;
use protocol_nvme::identify::LbaFormat;
use protocol_nvme::IdentifyNamespace;
use zerocopy::FromZeros;

/// LBA formats every simulated namespace advertises, as data size exponents.
const STANDARD_FORMATS: [u8; 2] = [9, 12];

/// RAM-backed namespace.
pub struct SimNamespace {
    nsid: u32,
    lbads: u8,
    metadata_size: u16,
    blocks: u64,
    data: Vec<u8>,
}

impl std::fmt::Debug for SimNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNamespace")
            .field("nsid", &self.nsid)
            .field("lbads", &self.lbads)
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

impl SimNamespace {
    /// Sizes were checked by `SimControllerConfig::validate`.
    pub(crate) fn new(config: &SimNamespaceConfig) -> Self {
        let len = (config.blocks << config.lbads) as usize;
        Self {
            nsid: config.nsid,
            lbads: config.lbads,
            metadata_size: config.metadata_size,
            blocks: config.blocks,
            data: vec![0; len],
        }
    }

    pub fn nsid(&self) -> u32 {
        self.nsid
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    pub fn block_size(&self) -> usize {
        1 << self.lbads
    }

    pub fn capacity_bytes(&self) -> u128 {
        u128::from(self.blocks) << self.lbads
    }

    /// Byte range for `count` blocks at `slba`, checked against the namespace
    /// and the host buffer.
    fn span(&self, slba: u64, count: u64, buf_len: usize) -> Result<std::ops::Range<usize>, u16> {
        let end = slba.checked_add(count).ok_or(status::LBA_OUT_OF_RANGE)?;
        if end > self.blocks {
            return Err(status::LBA_OUT_OF_RANGE);
        }
        let start = (slba << self.lbads) as usize;
        let len = (count << self.lbads) as usize;
        if buf_len < len {
            return Err(status::INVALID_FIELD);
        }
        Ok(start..start + len)
    }

    /// Copy `count` blocks into `buf`; returns the bytes moved.
    pub(crate) fn read(&self, slba: u64, count: u64, buf: &mut [u8]) -> Result<usize, u16> {
        let span = self.span(slba, count, buf.len())?;
        let len = span.len();
        buf[..len].copy_from_slice(&self.data[span]);
        Ok(len)
    }

    pub(crate) fn write(&mut self, slba: u64, count: u64, buf: &[u8]) -> Result<usize, u16> {
        let span = self.span(slba, count, buf.len())?;
        let len = span.len();
        self.data[span].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    pub fn identify(&self) -> IdentifyNamespace {
        let mut formats = STANDARD_FORMATS.to_vec();
        let index = match formats.iter().position(|&lbads| lbads == self.lbads) {
            Some(index) => index,
            None => {
                formats.push(self.lbads);
                formats.len() - 1
            }
        };

        let mut ns = IdentifyNamespace::new_zeroed();
        ns.nsze = self.blocks.into();
        ns.ncap = self.blocks.into();
        ns.nuse = self.blocks.into();
        ns.nlbaf = (formats.len() - 1) as u8;
        ns.flbas = index as u8;
        for (slot, lbads) in ns.lbaf.iter_mut().zip(&formats) {
            *slot = LbaFormat {
                ms: self.metadata_size.into(),
                lbads: *lbads,
                rp: 0,
            };
        }
        ns.nvmcap = self.capacity_bytes().to_le_bytes();
        ns.eui64[..4].copy_from_slice(b"SIMN");
        ns.eui64[4..].copy_from_slice(&self.nsid.to_be_bytes());
        ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(lbads: u8, blocks: u64) -> SimNamespace {
        SimNamespace::new(&SimNamespaceConfig {
            nsid: 3,
            blocks,
            lbads,
            metadata_size: 8,
        })
    }

    #[test]
    fn test_identify_reports_active_format() {
        let ns = namespace(12, 16).identify();
        assert_eq!(ns.nsze.get(), 16);
        assert_eq!(ns.flbas, 1);
        assert_eq!(ns.nlbaf, 1);
        assert_eq!(ns.logical_block_size().unwrap(), 4096);
        assert_eq!(ns.lbaf[1].ms.get(), 8);
        assert_eq!(&ns.eui64[4..], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_identify_appends_custom_format() {
        let ns = namespace(10, 4).identify();
        assert_eq!(ns.nlbaf, 2);
        assert_eq!(ns.flbas, 2);
        assert_eq!(ns.logical_block_size().unwrap(), 1024);
    }

    #[test]
    fn test_read_write_round_trip() {
        let mut ns = namespace(9, 8);
        let data = vec![0xa5u8; 1024];
        assert_eq!(ns.write(2, 2, &data), Ok(1024));

        let mut out = vec![0u8; 1536];
        assert_eq!(ns.read(1, 3, &mut out), Ok(1536));
        assert!(out[..512].iter().all(|&b| b == 0));
        assert!(out[512..].iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn test_out_of_range_and_short_buffer() {
        let mut ns = namespace(9, 8);
        let mut buf = vec![0u8; 512];
        assert_eq!(ns.read(8, 1, &mut buf), Err(status::LBA_OUT_OF_RANGE));
        assert_eq!(ns.read(u64::MAX, 1, &mut buf), Err(status::LBA_OUT_OF_RANGE));
        assert_eq!(ns.read(0, 2, &mut buf), Err(status::INVALID_FIELD));
        assert_eq!(ns.write(7, 2, &buf), Err(status::LBA_OUT_OF_RANGE));
    }
}
