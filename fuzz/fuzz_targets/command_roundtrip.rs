#![no_main]

use protocol_nvme::{FixedLayout, PassthruCommand, UserIo};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= PassthruCommand::SIZE {
        let bytes = &data[..PassthruCommand::SIZE];
        if let Ok(cmd) = PassthruCommand::decode(bytes) {
            assert_eq!(cmd.encode(), bytes);
        }
    }

    if data.len() >= UserIo::SIZE {
        let bytes = &data[..UserIo::SIZE];
        if let Ok(io) = UserIo::decode(bytes) {
            let mut out = [0u8; UserIo::SIZE];
            io.encode_into(&mut out).expect("exact size");
            assert_eq!(&out[..], bytes);
        }
    }
});
