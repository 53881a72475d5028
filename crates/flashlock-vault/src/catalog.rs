//! Device-type catalog.
//!
//! The set of flashable device families is closed: each entry fixes the
//! ordered artifact manifest and the credit cost of a flash. The client keeps
//! its own table of which native tool drives each family; the server only
//! cares about what must be delivered and what it charges.

/// Catalog entry for one device family.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub device_type: &'static str,
    /// Ordered artifact manifest; delivery and flashing follow this order.
    pub firmware_files: &'static [&'static str],
    pub credit_cost: u32,
}

const PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        device_type: "MTK6580",
        firmware_files: &["system.bin", "usbloader-5577.bin"],
        credit_cost: 1,
    },
    DeviceProfile {
        device_type: "QC9008",
        firmware_files: &["firehose.mbn", "rawprogram.xml", "patch.xml"],
        credit_cost: 2,
    },
];

/// Look up a device family by its wire name. `None` means the device type is
/// unknown to this deployment.
pub fn profile(device_type: &str) -> Option<&'static DeviceProfile> {
    PROFILES.iter().find(|p| p.device_type == device_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_profiles_resolve() {
        let mtk = profile("MTK6580").unwrap();
        assert_eq!(mtk.firmware_files, ["system.bin", "usbloader-5577.bin"]);
        assert_eq!(mtk.credit_cost, 1);

        let qc = profile("QC9008").unwrap();
        assert_eq!(qc.firmware_files.len(), 3);
        assert_eq!(qc.credit_cost, 2);
    }

    #[test]
    fn unknown_device_type_is_none() {
        assert!(profile("SPD7731").is_none());
        assert!(profile("").is_none());
        assert!(profile("mtk6580").is_none(), "lookup is case-sensitive");
    }
}
