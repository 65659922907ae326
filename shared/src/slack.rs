use lambda_runtime::Error;
use serde::Serialize;

/// A Slack incoming-webhook message with legacy attachments.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlackMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// Maps a pipeline/build/job status onto a Slack attachment color. Anything
/// unrecognized is treated as a failure.
pub fn status_color(status: &str) -> &'static str {
    match status {
        "BOOTSTRAPPING" | "CANCEL_PENDING" | "COMPLETED" | "DELAYED" | "IN_PROGRESS"
        | "INPROGRESS" | "PENDING" | "QUEUED" | "RUNNING" | "STARTED" | "STARTING" | "SUCCESS"
        | "SUCCEEDED" | "TERMINATED" | "TERMINATING" | "WAITING" => "good",
        "CANCELED" | "CANCELLING" | "STOPPED" => "warning",
        _ => "danger",
    }
}

/// Posts messages to a Slack incoming webhook, with optional default and
/// error channels.
#[derive(Clone)]
pub struct SlackWebhook {
    http: reqwest::Client,
    webhook_url: String,
    default_channel: Option<String>,
    error_channel: Option<String>,
}

impl SlackWebhook {
    pub fn new(
        webhook_url: String,
        default_channel: Option<String>,
        error_channel: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
            default_channel,
            error_channel,
        }
    }

    /// Reads `SLACK_WEBHOOK_URL`, `SLACK_CHANNEL` and `SLACK_ERROR_CHANNEL`.
    /// Empty channel values count as unset.
    pub fn from_env() -> Result<Self, Error> {
        let webhook_url =
            std::env::var("SLACK_WEBHOOK_URL").map_err(|_| "SLACK_WEBHOOK_URL must be set")?;

        Ok(Self::new(
            webhook_url,
            env_channel("SLACK_CHANNEL"),
            env_channel("SLACK_ERROR_CHANNEL"),
        ))
    }

    pub fn error_channel(&self) -> Option<&str> {
        self.error_channel.as_deref()
    }

    /// Sends the message; a message without an explicit channel goes to the
    /// default channel when one is configured.
    pub async fn post(&self, mut message: SlackMessage) -> Result<(), Error> {
        if message.channel.is_none() {
            message.channel = self.default_channel.clone();
        }

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Slack webhook returned {status}: {body}").into());
        }

        Ok(())
    }
}

fn env_channel(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_color_matches_table() {
        assert_eq!(status_color("SUCCEEDED"), "good");
        assert_eq!(status_color("IN_PROGRESS"), "good");
        assert_eq!(status_color("TERMINATED"), "good");
        assert_eq!(status_color("STOPPED"), "warning");
        assert_eq!(status_color("CANCELED"), "warning");
        assert_eq!(status_color("FAILED"), "danger");
        assert_eq!(status_color("TIMED_OUT"), "danger");
        assert_eq!(status_color("TERMINATED_WITH_ERRORS"), "danger");
        assert_eq!(status_color("SOMETHING_NEW"), "danger");
    }

    #[test]
    fn message_serialization_omits_empty_parts() {
        let message = SlackMessage {
            text: "Pipeline `site` is SUCCEEDED".to_string(),
            channel: None,
            attachments: vec![Attachment {
                title: Some("Pipeline `site` is SUCCEEDED".to_string()),
                color: Some("good".to_string()),
                ts: Some(1_714_000_000),
                ..Attachment::default()
            }],
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "Pipeline `site` is SUCCEEDED",
                "attachments": [{
                    "title": "Pipeline `site` is SUCCEEDED",
                    "color": "good",
                    "ts": 1_714_000_000,
                }],
            })
        );
    }

    #[test]
    fn fields_serialize_with_short_flag() {
        let field = Field {
            title: "Phase".to_string(),
            value: "BUILD".to_string(),
            short: true,
        };

        assert_eq!(
            serde_json::to_value(&field).unwrap(),
            serde_json::json!({ "title": "Phase", "value": "BUILD", "short": true })
        );
    }
}
