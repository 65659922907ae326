use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Which lifecycle transition the orchestrator is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// A CloudFormation custom-resource request, generic over the property bag.
///
/// `old_resource_properties` is only present on Update; `physical_resource_id`
/// is absent on Create. Unknown fields from the orchestrator are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", bound = "P: DeserializeOwned")]
pub struct CustomResourceEvent<P> {
    pub request_type: RequestType,
    #[serde(default)]
    pub service_token: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    pub resource_properties: P,
    #[serde(default)]
    pub old_resource_properties: Option<P>,
}

/// The reply handed back to the provider framework.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_echo: bool,
}

impl CustomResourceResponse {
    pub fn new(physical_resource_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            physical_resource_id: Some(physical_resource_id.into()),
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// A reply with a reason only, used on Delete where the physical id is
    /// already known to the orchestrator.
    pub fn reason_only(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Props {
        name: String,
    }

    #[test]
    fn deserializes_create_event_without_optionals() {
        let event: CustomResourceEvent<Props> = serde_json::from_value(serde_json::json!({
            "RequestType": "Create",
            "LogicalResourceId": "MyResource",
            "ResourceProperties": { "Name": "alpha", "ServiceToken": "arn:aws:lambda:..." },
        }))
        .unwrap();

        assert_eq!(event.request_type, RequestType::Create);
        assert_eq!(event.logical_resource_id, "MyResource");
        assert!(event.physical_resource_id.is_none());
        assert!(event.old_resource_properties.is_none());
        assert_eq!(event.resource_properties.name, "alpha");
    }

    #[test]
    fn deserializes_update_event_with_old_properties() {
        let event: CustomResourceEvent<Props> = serde_json::from_value(serde_json::json!({
            "RequestType": "Update",
            "LogicalResourceId": "MyResource",
            "PhysicalResourceId": "resource-1",
            "StackId": "arn:aws:cloudformation:eu-west-1:123456789012:stack/s/abc",
            "RequestId": "11d3ee30",
            "ResourceProperties": { "Name": "beta" },
            "OldResourceProperties": { "Name": "alpha" },
        }))
        .unwrap();

        assert_eq!(event.request_type, RequestType::Update);
        assert_eq!(event.physical_resource_id.as_deref(), Some("resource-1"));
        assert_eq!(event.old_resource_properties.unwrap().name, "alpha");
    }

    #[test]
    fn response_serializes_in_pascal_case() {
        let response = CustomResourceResponse::new("resource-1", "created");
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "PhysicalResourceId": "resource-1",
                "Reason": "created",
            })
        );
    }

    #[test]
    fn reason_only_response_omits_physical_id() {
        let json = serde_json::to_value(CustomResourceResponse::reason_only("deleted")).unwrap();
        assert_eq!(json, serde_json::json!({ "Reason": "deleted" }));
    }
}
