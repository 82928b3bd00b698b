/// Which scan modality a device uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Swipe,
    Press,
}

/// Per-device-family constants the activation/capture engines need:
/// whether the press challenge/response pipeline is required, and the
/// output image geometry.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub name: &'static str,
    pub scan_type: ScanType,
    pub auth_cr: bool,
    pub width: usize,
    /// `None` means variable height (swipe).
    pub height: Option<usize>,
}

pub const SWIPE_PROFILE: Profile = Profile {
    name: "upeksonly",
    scan_type: ScanType::Swipe,
    auth_cr: false,
    width: 288,
    height: None,
};

const PRESS_PROFILE_PLAIN: Profile = Profile {
    name: "uru4000",
    scan_type: ScanType::Press,
    auth_cr: false,
    width: 384,
    height: Some(289),
};

const PRESS_PROFILE_AUTH: Profile = Profile {
    name: "uru4000-auth",
    scan_type: ScanType::Press,
    auth_cr: true,
    width: 384,
    height: Some(289),
};

/// One row of the device ID table: USB vendor/product plus the
/// profile it selects.
struct IdEntry {
    vendor: u16,
    product: u16,
    profile: &'static Profile,
}

const ID_TABLE: &[IdEntry] = &[
    IdEntry {
        vendor: 0x147E,
        product: 0x2016,
        profile: &SWIPE_PROFILE,
    },
    IdEntry {
        vendor: 0x045E,
        product: 0x00BB,
        profile: &PRESS_PROFILE_PLAIN,
    },
    IdEntry {
        vendor: 0x045E,
        product: 0x00BC,
        profile: &PRESS_PROFILE_PLAIN,
    },
    IdEntry {
        vendor: 0x045E,
        product: 0x00BD,
        profile: &PRESS_PROFILE_PLAIN,
    },
    IdEntry {
        vendor: 0x045E,
        product: 0x00CA,
        profile: &PRESS_PROFILE_PLAIN,
    },
    IdEntry {
        vendor: 0x05BA,
        product: 0x0007,
        profile: &PRESS_PROFILE_AUTH,
    },
    IdEntry {
        vendor: 0x05BA,
        product: 0x0008,
        profile: &PRESS_PROFILE_AUTH,
    },
    IdEntry {
        vendor: 0x05BA,
        product: 0x000A,
        profile: &PRESS_PROFILE_AUTH,
    },
];

pub fn lookup(vendor: u16, product: u16) -> Option<&'static Profile> {
    ID_TABLE
        .iter()
        .find(|e| e.vendor == vendor && e.product == product)
        .map(|e| e.profile)
}

/// All vendor/product pairs recognized for a given scan type, for device
/// enumeration.
pub fn ids_for(scan_type: ScanType) -> Vec<(u16, u16)> {
    ID_TABLE
        .iter()
        .filter(|e| e.profile.scan_type == scan_type)
        .map(|e| (e.vendor, e.product))
        .collect()
}

/// Every known `(vendor, product)` pair with its profile, in device-table
/// order, for a manual exerciser that probes the bus for any recognized
/// sensor.
pub fn all_ids() -> Vec<(u16, u16, &'static Profile)> {
    ID_TABLE
        .iter()
        .map(|e| (e.vendor, e.product, e.profile))
        .collect()
}

/// `(vendor, product)` pairs whose profile is named `name`, for a CLI that
/// lets a caller pin down a specific sensor family.
pub fn ids_named(name: &str) -> Vec<(u16, u16, &'static Profile)> {
    ID_TABLE
        .iter()
        .filter(|e| e.profile.name == name)
        .map(|e| (e.vendor, e.product, e.profile))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swipe_id_maps_to_swipe_profile() {
        let profile = lookup(0x147E, 0x2016).unwrap();
        assert_eq!(profile.scan_type, ScanType::Swipe);
        assert!(!profile.auth_cr);
    }

    #[test]
    fn auth_press_ids_require_challenge_response() {
        let profile = lookup(0x05BA, 0x0007).unwrap();
        assert_eq!(profile.scan_type, ScanType::Press);
        assert!(profile.auth_cr);
    }

    #[test]
    fn unknown_id_is_none() {
        assert!(lookup(0xdead, 0xbeef).is_none());
    }
}
