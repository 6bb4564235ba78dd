//! Platform connection settings.
//!
//! Injected into each activity at construction; the orchestrator keeps no
//! ambient process-level configuration.

use serde::{Deserialize, Serialize};

/// Provider plugin the platform programs compile against.
pub const PLATFORM_PLUGIN: (&str, &str) = ("openstack", "v4.0.0");
/// Provider plugin for engine-generated secrets.
pub const RANDOM_PLUGIN: (&str, &str) = ("random", "v3.1.0");

pub const CONFIG_AUTH_URL: &str = "openstack:authUrl";
pub const CONFIG_REGION: &str = "openstack:region";
pub const CONFIG_TENANT: &str = "openstack:tenantName";

/// Connection settings for the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub auth_url: String,
    pub region: String,
    pub tenant: String,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            auth_url: "http://openstack.local:5000/v3".to_string(),
            region: "RegionOne".to_string(),
            tenant: "default".to_string(),
        }
    }
}
