//! Identity and message envelopes exchanged between the cloud, the bridge and nodes

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Free-form JSON object carried in command arguments and reply data
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Identity of a node, established once per handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub node_id: Uuid,
    pub organization_id: Uuid,
}

/// Command delivered by the cloud through the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudRequest {
    pub node_id: String,
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: JsonMap,
}

impl CloudRequest {
    /// Build the wire request for a node, carrying the broker correlation id
    #[must_use]
    pub fn to_node(&self, request_id: &str) -> NodeRequest {
        NodeRequest {
            request_id: request_id.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}

/// Wire frame sent to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    pub request_id: String,
    pub command: String,
    pub args: JsonMap,
}

/// Wire frame received from a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    pub request_id: String,
    #[serde(default)]
    pub data: Option<JsonMap>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
}

impl NodeResponse {
    /// Convert a node reply into the broker publication for the cloud
    #[must_use]
    pub fn to_cloud(&self) -> CloudResponse {
        CloudResponse {
            request_error: String::new(),
            command_error: self.error.clone(),
            data: self.data.clone(),
        }
    }
}

/// Reply published back to the cloud
///
/// `request_error` reports bridge-side failures, `command_error` carries the
/// error reported by the node itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudResponse {
    #[serde(default)]
    pub request_error: String,
    #[serde(default)]
    pub command_error: String,
    #[serde(default)]
    pub data: Option<JsonMap>,
}

impl CloudResponse {
    /// A bridge-side failure with no data
    #[must_use]
    pub fn request_error(message: impl Into<String>) -> Self {
        Self {
            request_error: message.into(),
            ..Self::default()
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_request_uses_camel_case_keys() {
        let req: CloudRequest = serde_json::from_str(
            r#"{"nodeId": "abc", "command": "wifi.scan", "args": {"band": 5}}"#,
        )
        .unwrap();
        assert_eq!(req.node_id, "abc");
        assert_eq!(req.command, "wifi.scan");
        assert_eq!(req.args["band"], 5);
    }

    #[test]
    fn cloud_request_args_may_be_missing_or_null() {
        let missing: CloudRequest =
            serde_json::from_str(r#"{"nodeId": "a", "command": "c"}"#).unwrap();
        assert!(missing.args.is_empty());

        let null: CloudRequest =
            serde_json::from_str(r#"{"nodeId": "a", "command": "c", "args": null}"#).unwrap();
        assert!(null.args.is_empty());
    }

    #[test]
    fn cloud_request_without_command_is_rejected() {
        assert!(serde_json::from_str::<CloudRequest>(r#"{"nodeId": "a"}"#).is_err());
    }

    #[test]
    fn to_node_carries_correlation_id_unchanged() {
        let req = CloudRequest {
            node_id: "n".to_string(),
            command: "reboot".to_string(),
            args: JsonMap::new(),
        };
        let wire = serde_json::to_value(req.to_node("R1")).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({"requestId": "R1", "command": "reboot", "args": {}})
        );
    }

    #[test]
    fn node_response_maps_error_to_command_error() {
        let resp: NodeResponse = serde_json::from_str(
            r#"{"requestId": "R1", "data": {"ok": true}, "error": "busy"}"#,
        )
        .unwrap();
        let cloud = resp.to_cloud();
        assert_eq!(cloud.command_error, "busy");
        assert!(cloud.request_error.is_empty());
        assert_eq!(cloud.data.unwrap()["ok"], true);
    }

    #[test]
    fn node_response_tolerates_missing_data_and_error() {
        let resp: NodeResponse = serde_json::from_str(r#"{"requestId": "R2"}"#).unwrap();
        assert!(resp.data.is_none());
        assert!(resp.error.is_empty());
    }

    #[test]
    fn request_error_response_serializes_null_data() {
        let json = serde_json::to_value(CloudResponse::request_error("node not connected")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"requestError": "node not connected", "commandError": "", "data": null})
        );
    }
}
