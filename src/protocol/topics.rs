//! Topic layout under a configurable prefix.
//!
//! ```text
//! <prefix>/setpoints/<deviceType>/<deviceId>   inbound commands
//! <prefix>/telemetry/<deviceType>/<deviceId>   outbound readings
//! <prefix>/simulation/profile                  day/night override
//! ```

use crate::devices::DeviceKind;

pub const DEFAULT_PREFIX: &str = "der";

/// A topic the control loops know how to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    Setpoint { kind: DeviceKind, device_id: String },
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Topics {
    /// Trailing slashes on `prefix` are dropped.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn setpoint(&self, kind: DeviceKind, device_id: &str) -> String {
        format!("{}/setpoints/{}/{}", self.prefix, kind, device_id)
    }

    pub fn telemetry(&self, kind: DeviceKind, device_id: &str) -> String {
        format!("{}/telemetry/{}/{}", self.prefix, kind, device_id)
    }

    pub fn profile(&self) -> String {
        format!("{}/simulation/profile", self.prefix)
    }

    /// Subscription filter covering every device's setpoint topic.
    pub fn setpoint_filter(&self) -> String {
        format!("{}/setpoints/+/+", self.prefix)
    }

    /// Classifies an inbound topic; `None` when it is not ours.
    pub fn parse(&self, topic: &str) -> Option<InboundTopic> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        if rest == "simulation/profile" {
            return Some(InboundTopic::Profile);
        }
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("setpoints"), Some(kind), Some(id), None) if !id.is_empty() => {
                Some(InboundTopic::Setpoint {
                    kind: kind.parse().ok()?,
                    device_id: id.to_string(),
                })
            }
            _ => None,
        }
    }
}
