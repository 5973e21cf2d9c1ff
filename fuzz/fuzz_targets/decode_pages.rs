#![no_main]

use protocol_nvme::{
    FirmwareSlotInfo, FixedLayout, IdentifyController, IdentifyNamespace, SmartLog,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut page = vec![0u8; IdentifyController::SIZE];
    let n = data.len().min(page.len());
    page[..n].copy_from_slice(&data[..n]);

    if let Ok(ctrl) = IdentifyController::decode(&page) {
        let _ = ctrl.summary();
        let _ = ctrl.power_states().len();
    }

    if let Ok(ns) = IdentifyNamespace::decode(&page) {
        let _ = ns.logical_block_size();
        let _ = ns.capacity();
    }

    if let Ok(smart) = SmartLog::decode(&page[..SmartLog::SIZE]) {
        let _ = smart.summary();
    }

    if let Ok(info) = FirmwareSlotInfo::decode(&page[..FirmwareSlotInfo::SIZE]) {
        let summary = info.summary();
        if let Some(slot) = summary.active_slot {
            assert!((1..=7).contains(&slot));
        }
    }

    // Short and oversized buffers are rejected, never truncated
    if data.len() != SmartLog::SIZE {
        assert!(SmartLog::decode(data).is_err());
    }
});
