//! Meter and flow rule payloads

use crate::models::{FlowDirection, MeterPolicy};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// EtherType of IPv4
const ETHERTYPE_IPV4: u16 = 0x0800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub fn ip_protocol(&self) -> u8 {
        match self {
            TransportProtocol::Tcp => 6,
            TransportProtocol::Udp => 17,
        }
    }

    fn port_fields(&self) -> (&'static str, &'static str) {
        match self {
            TransportProtocol::Tcp => ("tcp-source-port", "tcp-destination-port"),
            TransportProtocol::Udp => ("udp-source-port", "udp-destination-port"),
        }
    }
}

/// One side of a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub mac: Option<String>,
    pub port: u16,
}

/// Everything needed to install both directions of a metered flow
#[derive(Debug, Clone)]
pub struct FlowSpec {
    pub controller: String,
    pub switch_id: String,
    pub category: String,
    pub cookie: u64,
    pub meter_id: u32,
    pub protocol: TransportProtocol,
    pub client: Endpoint,
    pub server: Endpoint,
    /// Switch port that leads toward the server
    pub server_side_port: u32,
    /// Switch port that leads toward the client
    pub client_side_port: u32,
}

impl FlowSpec {
    /// Stable id so repeated requests for one flow replace the same rule.
    /// Format: `{cookie}-{conversation}-{client_port}-{server_port}-{fwd|rev}`.
    pub fn flow_id(&self, direction: FlowDirection) -> String {
        let suffix = match direction {
            FlowDirection::ClientToServer => "fwd",
            FlowDirection::ServerToClient => "rev",
        };
        format!(
            "{}-{}-{}-{}-{}",
            self.cookie,
            self.conversation_tag(),
            self.client.port,
            self.server.port,
            suffix
        )
    }

    /// Short digest of protocol, both addresses and the client MAC, so two
    /// clients reusing one port toward one server never share a rule
    fn conversation_tag(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.protocol.ip_protocol()]);
        hasher.update(self.client.ip.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.client.mac.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(self.server.ip.to_string().as_bytes());
        hex::encode(&hasher.finalize()[..4])
    }

    fn ends(&self, direction: FlowDirection) -> (&Endpoint, &Endpoint, u32) {
        match direction {
            FlowDirection::ClientToServer => (&self.client, &self.server, self.server_side_port),
            FlowDirection::ServerToClient => (&self.server, &self.client, self.client_side_port),
        }
    }

    /// RESTCONF flow body for one direction
    pub fn flow_payload(&self, direction: FlowDirection, table_id: u8, priority: u16) -> Value {
        let (source, destination, output_port) = self.ends(direction);

        let mut ethernet = json!({
            "ethernet-type": { "type": ETHERTYPE_IPV4 }
        });
        if let Some(mac) = &source.mac {
            ethernet["ethernet-source"] = json!({ "address": mac });
        }
        if let Some(mac) = &destination.mac {
            ethernet["ethernet-destination"] = json!({ "address": mac });
        }

        let (src_field, dst_field) = self.protocol.port_fields();
        let mut matcher = json!({
            "ethernet-match": ethernet,
            "ip-match": { "ip-protocol": self.protocol.ip_protocol() },
        });
        matcher[src_field] = json!(source.port);
        matcher[dst_field] = json!(destination.port);

        json!({
            "flow-node-inventory:flow": [{
                "id": self.flow_id(direction),
                "table_id": table_id,
                "priority": priority,
                "cookie": self.cookie,
                "flow-name": format!("{}-{}", self.category, direction.as_str()),
                "match": matcher,
                "instructions": {
                    "instruction": [
                        {
                            "order": 0,
                            "apply-actions": {
                                "action": [{
                                    "order": 0,
                                    "output-action": {
                                        "output-node-connector": output_port.to_string(),
                                        "max-length": 65535
                                    }
                                }]
                            }
                        },
                        {
                            "order": 1,
                            "meter": { "meter-id": self.meter_id }
                        }
                    ]
                }
            }]
        })
    }
}

/// RESTCONF meter body for a policy: one drop band at the policy rate
pub fn meter_payload(policy: &MeterPolicy) -> Value {
    let flags = if policy.burst_size.is_some() {
        "meter-kbps meter-burst"
    } else {
        "meter-kbps"
    };

    let mut band = json!({
        "band-id": 0,
        "drop-rate": policy.rate_kbps,
        "meter-band-types": { "flags": "ofpmbt-drop" }
    });
    if let Some(burst) = policy.burst_size {
        band["drop-burst-size"] = json!(burst);
    }

    json!({
        "flow-node-inventory:meter": [{
            "meter-id": policy.meter_id,
            "meter-name": format!("flowmeter-{}", policy.meter_id),
            "flags": flags,
            "meter-band-headers": {
                "meter-band-header": [band]
            }
        }]
    })
}
