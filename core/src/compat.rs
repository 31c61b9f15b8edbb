//! # Device Compatibility
//!
//! Per-device control-plane constants, keyed by the (model, build id)
//! identity the platform reports. The addresses in here are firmware
//! facts; a lookup miss means the device is simply not supported, and the
//! pipeline must stop before it touches the device node.

use std::process::Command;

use crate::error::{Error, Result};

/// How the device node exposes its physical window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// The driver's base register must be redirected before mapping
    /// (newer generation)
    Redirected,
    /// The node maps a fixed large extent directly, no redirection
    /// (older generation)
    Direct {
        /// Virtual address the mapping is fixed at
        virtual_base: usize,
        /// Mapping length in bytes
        length: usize,
    },
}

/// Control-plane constants for one supported firmware build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// `ro.product.model` value
    pub model: &'static str,
    /// `ro.build.display.id` value
    pub build_id: &'static str,
    /// Register rewritten to move the exposed physical base
    pub redirect_addr: u32,
    /// Auxiliary transport address, for generations that need one
    pub delayed_rsp_id_addr: Option<u32>,
    /// Base address the driver ships with; restored on release
    pub production_base: u32,
    /// Mapping generation
    pub map_mode: MapMode,
}

/// Every (model, build) pair with known-good constants
pub const SUPPORTED_DEVICES: [DeviceProfile; 1] = [DeviceProfile {
    model: "IS17SH",
    build_id: "01.00.03",
    redirect_addr: 0xC0FE_848C,
    delayed_rsp_id_addr: None,
    production_base: 0x8B00_0000,
    map_mode: MapMode::Redirected,
}];

/// Where the (model, build id) identity comes from.
///
/// On the device this is the Android property store; tests substitute a
/// fixed identity.
pub trait DeviceIdentity {
    /// `ro.product.model`, empty when unavailable
    fn model(&self) -> String;
    /// `ro.build.display.id`, empty when unavailable
    fn build_id(&self) -> String;
}

/// Identity backed by the platform property store, via `getprop`
#[derive(Debug, Default)]
pub struct SystemProperties;

impl DeviceIdentity for SystemProperties {
    fn model(&self) -> String {
        getprop("ro.product.model")
    }

    fn build_id(&self) -> String {
        getprop("ro.build.display.id")
    }
}

fn getprop(key: &str) -> String {
    Command::new("getprop")
        .arg(key)
        .output()
        .ok()
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_owned())
        .unwrap_or_default()
}

/// Select the constants for the running device, or refuse it.
pub fn detect(identity: &dyn DeviceIdentity) -> Result<&'static DeviceProfile> {
    let model = identity.model();
    let build_id = identity.build_id();

    match SUPPORTED_DEVICES
        .iter()
        .find(|profile| profile.model == model && profile.build_id == build_id)
    {
        Some(profile) => {
            log::debug!("Compat: matched profile for {model} ({build_id})");
            Ok(profile)
        }
        None => Err(Error::UnsupportedDevice { model, build_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct FixedIdentity {
        pub model: &'static str,
        pub build_id: &'static str,
    }

    impl DeviceIdentity for FixedIdentity {
        fn model(&self) -> String {
            self.model.to_owned()
        }

        fn build_id(&self) -> String {
            self.build_id.to_owned()
        }
    }

    #[test]
    fn detect_matches_the_known_handset() {
        let identity = FixedIdentity {
            model: "IS17SH",
            build_id: "01.00.03",
        };
        let profile = detect(&identity).unwrap();
        assert_eq!(profile.redirect_addr, 0xC0FE_848C);
        assert_eq!(profile.production_base, 0x8B00_0000);
        assert_eq!(profile.map_mode, MapMode::Redirected);
    }

    #[test]
    fn detect_refuses_unknown_builds() {
        // Same model, different firmware: constants would be wrong, so the
        // lookup must miss rather than guess.
        let identity = FixedIdentity {
            model: "IS17SH",
            build_id: "02.00.00",
        };
        match detect(&identity) {
            Err(Error::UnsupportedDevice { model, build_id }) => {
                assert_eq!(model, "IS17SH");
                assert_eq!(build_id, "02.00.00");
            }
            other => panic!("expected UnsupportedDevice, got {other:?}"),
        }
    }

    #[test]
    fn detect_refuses_empty_identity() {
        let identity = FixedIdentity {
            model: "",
            build_id: "",
        };
        assert!(matches!(
            detect(&identity),
            Err(Error::UnsupportedDevice { .. })
        ));
    }
}
