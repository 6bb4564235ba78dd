//! Declarative programs as data.
//!
//! A program is a pure description of the resources a stack should hold.
//! Building one never talks to the engine, so graph shape is unit-testable
//! without a live provisioning backend. The two templates here are the
//! shared networking program and the per-VM webserver program.

use serde::{Deserialize, Serialize};

/// Export name for the shared network's ID.
pub const OUTPUT_NETWORK_ID: &str = "networkID";
/// Export name for the shared subnet's ID.
pub const OUTPUT_SUBNET_ID: &str = "subnetID";
/// Export name for a VM's reachable address.
pub const OUTPUT_IP: &str = "ip";

/// A value in a resource graph: a literal, or a reference to an attribute
/// of another resource declared in the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Literal(String),
    Ref { resource: String, attribute: String },
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Value::Literal(value.into())
    }

    pub fn reference(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::Ref {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    /// Engine-generated secret, referenced by other resources as
    /// `Ref { attribute: "result" }`.
    RandomPassword {
        name: String,
        length: usize,
        special: bool,
    },
    Network {
        name: String,
        network_name: String,
        admin_state_up: bool,
    },
    Subnet {
        name: String,
        network_id: Value,
        cidr: String,
        ip_version: u8,
    },
    Port {
        name: String,
        network_id: Value,
        admin_state_up: bool,
        security_groups: Vec<String>,
    },
    FloatingIp {
        name: String,
        pool: Option<String>,
    },
    ComputeInstance {
        name: String,
        flavor: String,
        image: String,
        network_id: Value,
        port: Value,
        fixed_ip: Value,
        admin_user: Value,
        admin_password: Value,
        user_data: Option<String>,
        security_groups: Vec<String>,
        key_pair: Option<String>,
    },
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Resource::RandomPassword { name, .. }
            | Resource::Network { name, .. }
            | Resource::Subnet { name, .. }
            | Resource::Port { name, .. }
            | Resource::FloatingIp { name, .. }
            | Resource::ComputeInstance { name, .. } => name,
        }
    }
}

/// A named stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub value: Value,
}

/// The full declarative program for one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub resources: Vec<Resource>,
    pub exports: Vec<Export>,
}

impl ResourceGraph {
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name() == name)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}

/// Parameters for the per-VM webserver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTemplate {
    /// Login user for the VM.
    pub username: String,
    /// Boot script run on first start.
    pub boot_script: String,
    /// Instance flavor.
    pub flavor: String,
    /// Base image.
    pub image: String,
    /// Pool from which to allocate the public IP address.
    pub pool: Option<String>,
    pub security_groups: Vec<String>,
    pub key_pair: Option<String>,
}

impl Default for InstanceTemplate {
    fn default() -> Self {
        Self {
            username: "vmgr".to_string(),
            boot_script: "#!/bin/bash\n\
                          echo \"Hello, from VMGR!\" > index.html\n\
                          nohup python -m SimpleHTTPServer 80 &\n"
                .to_string(),
            flavor: "m1.small".to_string(),
            image: "Ubuntu-18.04".to_string(),
            pool: None,
            security_groups: Vec::new(),
            key_pair: None,
        }
    }
}

/// The shared networking program: one network, one IPv4 subnet, with the
/// IDs exported for every VM stack to attach to.
pub fn network_program() -> ResourceGraph {
    ResourceGraph {
        resources: vec![
            Resource::Network {
                name: "server-network".to_string(),
                network_name: "vm-network".to_string(),
                admin_state_up: true,
            },
            Resource::Subnet {
                name: "server-subnet".to_string(),
                network_id: Value::reference("server-network", "id"),
                cidr: "192.168.1.0/24".to_string(),
                ip_version: 4,
            },
        ],
        exports: vec![
            Export {
                name: OUTPUT_NETWORK_ID.to_string(),
                value: Value::reference("server-network", "id"),
            },
            Export {
                name: OUTPUT_SUBNET_ID.to_string(),
                value: Value::reference("server-subnet", "id"),
            },
        ],
    }
}

/// The per-VM program: a generated login secret, a port and floating IP on
/// the shared network, and a webserver instance, with the reachable address
/// exported as `ip`.
pub fn virtual_machine_program(
    vm_name: &str,
    network_id: &str,
    template: &InstanceTemplate,
) -> ResourceGraph {
    let ip_name = format!("{}-ip", vm_name);
    let port_name = format!("{}-port", vm_name);
    let instance_name = format!("{}-vm", vm_name);

    ResourceGraph {
        resources: vec![
            Resource::RandomPassword {
                name: "password".to_string(),
                length: 16,
                special: false,
            },
            Resource::FloatingIp {
                name: ip_name.clone(),
                pool: template.pool.clone(),
            },
            Resource::Port {
                name: port_name.clone(),
                network_id: Value::literal(network_id),
                admin_state_up: true,
                security_groups: template.security_groups.clone(),
            },
            Resource::ComputeInstance {
                name: instance_name,
                flavor: template.flavor.clone(),
                image: template.image.clone(),
                network_id: Value::literal(network_id),
                port: Value::reference(port_name, "id"),
                fixed_ip: Value::reference(ip_name.clone(), "fixed_ip"),
                admin_user: Value::literal(template.username.clone()),
                admin_password: Value::reference("password", "result"),
                user_data: Some(template.boot_script.clone()),
                security_groups: template.security_groups.clone(),
                key_pair: template.key_pair.clone(),
            },
        ],
        exports: vec![Export {
            name: OUTPUT_IP.to_string(),
            value: Value::reference(ip_name, "address"),
        }],
    }
}
