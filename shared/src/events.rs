use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use aws_sdk_cloudwatchlogs::Client as LogsClient;
use lambda_runtime::Error;
use serde::Deserialize;
use serde_json::Value;

use crate::log_groups;
use crate::slack::{status_color, Attachment, Field, SlackMessage, SlackWebhook};

/// How many log events are attached to a failed-build notification.
const FAILURE_LOG_LIMIT: i32 = 100;

/// A formatted notification plus its routing hints.
#[derive(Debug)]
pub struct Notification {
    pub message: SlackMessage,
    /// Route to the error channel when one is configured.
    pub error_traffic: bool,
    /// Log stream to tail and attach before posting.
    pub failure_logs: Option<LogLocation>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LogLocation {
    pub group: String,
    pub stream: String,
}

#[derive(Debug, Deserialize)]
struct CodePipelineDetail {
    pipeline: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CodeBuildDetail {
    build_status: String,
    project_name: String,
    build_id: String,
    current_phase: String,
    additional_information: CodeBuildInformation,
}

#[derive(Debug, Deserialize)]
struct CodeBuildInformation {
    logs: CodeBuildLogs,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CodeBuildLogs {
    group_name: String,
    stream_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlueDetail {
    job_name: String,
    state: String,
    job_run_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SsmDetail {
    command_id: String,
    document_name: String,
    instance_id: String,
    status: String,
}

/// Formats one deployment event, fetches failure logs when asked for, and
/// posts the result to Slack. Unsupported sources are skipped.
pub async fn handle_event(
    webhook: &SlackWebhook,
    logs: &LogsClient,
    event: EventBridgeEvent<Value>,
) -> Result<(), Error> {
    let Some(mut notification) = format_event(&event)? else {
        return Ok(());
    };

    if let Some(location) = &notification.failure_logs {
        let lines =
            log_groups::tail_log_events(logs, &location.group, &location.stream, FAILURE_LOG_LIMIT)
                .await?;

        notification.message.attachments.push(Attachment {
            color: Some("danger".to_string()),
            text: Some(lines.join("\n")),
            ..Attachment::default()
        });
    }

    if notification.error_traffic {
        if let Some(channel) = webhook.error_channel() {
            notification.message.channel = Some(channel.to_string());
        }
    }

    webhook.post(notification.message).await
}

/// Builds the notification for a deployment event; `None` means the event is
/// dropped (unsupported source or an uninteresting build phase).
pub fn format_event(event: &EventBridgeEvent<Value>) -> Result<Option<Notification>, Error> {
    match event.source.as_str() {
        "aws.codepipeline" => codepipeline_notification(event).map(Some),
        "aws.codebuild" => codebuild_notification(event),
        "aws.glue" => glue_notification(event).map(Some),
        "aws.ssm" => ssm_notification(event).map(Some),
        other => {
            tracing::info!("event source {other:?} is not supported");
            Ok(None)
        }
    }
}

fn codepipeline_notification(event: &EventBridgeEvent<Value>) -> Result<Notification, Error> {
    let detail: CodePipelineDetail = serde_json::from_value(event.detail.clone())?;
    let region = event_region(event);

    let title = format!("Pipeline `{}` is {}", detail.pipeline, detail.state);

    Ok(Notification {
        message: SlackMessage {
            text: title.clone(),
            channel: None,
            attachments: vec![Attachment {
                title: Some(title),
                title_link: Some(format!(
                    "https://{region}.console.aws.amazon.com/codesuite/codepipeline/pipelines/{}/view",
                    detail.pipeline
                )),
                color: Some(status_color(&detail.state).to_string()),
                ts: event_timestamp(event),
                ..Attachment::default()
            }],
        },
        error_traffic: false,
        failure_logs: None,
    })
}

fn codebuild_notification(event: &EventBridgeEvent<Value>) -> Result<Option<Notification>, Error> {
    let detail: CodeBuildDetail = serde_json::from_value(event.detail.clone())?;
    let region = event_region(event);

    // Intermediate phases are only reported while the build is healthy; the
    // terminal state arrives with the SUBMITTED/COMPLETED phases anyway.
    if detail.current_phase != "SUBMITTED" && detail.current_phase != "COMPLETED" {
        if detail.build_status != "IN_PROGRESS" && detail.build_status != "SUCCEEDED" {
            return Ok(None);
        }
    }

    // The console route wants the `build/...` suffix of the build ARN.
    let build_resource = detail
        .build_id
        .find("build/")
        .map(|index| &detail.build_id[index..])
        .unwrap_or(detail.build_id.as_str());

    let title = format!("{}: Build `{}`", detail.build_status, detail.project_name);
    let failed = detail.build_status == "FAILED";

    Ok(Some(Notification {
        message: SlackMessage {
            text: title.clone(),
            channel: None,
            attachments: vec![Attachment {
                title: Some(title),
                title_link: Some(format!(
                    "https://{region}.console.aws.amazon.com/codesuite/codebuild/projects/{}/{build_resource}/log",
                    detail.project_name
                )),
                color: Some(status_color(&detail.build_status).to_string()),
                ts: event_timestamp(event),
                fields: vec![Field {
                    title: "Phase".to_string(),
                    value: detail.current_phase,
                    short: true,
                }],
                ..Attachment::default()
            }],
        },
        error_traffic: failed,
        failure_logs: failed.then(|| LogLocation {
            group: detail.additional_information.logs.group_name,
            stream: detail.additional_information.logs.stream_name,
        }),
    }))
}

fn glue_notification(event: &EventBridgeEvent<Value>) -> Result<Notification, Error> {
    let detail: GlueDetail = serde_json::from_value(event.detail.clone())?;
    let region = event_region(event);

    let title = format!("{}: Glue job `{}`", detail.state, detail.job_name);

    Ok(Notification {
        message: SlackMessage {
            text: title.clone(),
            channel: None,
            attachments: vec![Attachment {
                title: Some(title),
                title_link: Some(format!(
                    "https://{region}.console.aws.amazon.com/glue/home#jobRun:jobName={};jobRunId={}",
                    detail.job_name, detail.job_run_id
                )),
                color: Some(status_color(&detail.state).to_string()),
                ts: event_timestamp(event),
                fields: vec![Field {
                    title: "Message".to_string(),
                    value: detail.message,
                    short: false,
                }],
                ..Attachment::default()
            }],
        },
        error_traffic: detail.state != "SUCCEEDED",
        failure_logs: None,
    })
}

fn ssm_notification(event: &EventBridgeEvent<Value>) -> Result<Notification, Error> {
    let detail: SsmDetail = serde_json::from_value(event.detail.clone())?;
    let region = event_region(event);

    let title = format!("{}: SSM Run Command `{}`", detail.status, detail.document_name);

    Ok(Notification {
        message: SlackMessage {
            text: title.clone(),
            channel: None,
            attachments: vec![Attachment {
                title: Some(title),
                title_link: Some(format!(
                    "https://{region}.console.aws.amazon.com/systems-manager/run-command/{}/{}",
                    detail.command_id, detail.instance_id
                )),
                color: Some(status_color(&detail.status.to_uppercase()).to_string()),
                ts: event_timestamp(event),
                ..Attachment::default()
            }],
        },
        error_traffic: false,
        failure_logs: None,
    })
}

fn event_region(event: &EventBridgeEvent<Value>) -> String {
    event
        .region
        .clone()
        .or_else(|| std::env::var("AWS_REGION").ok())
        .unwrap_or_default()
}

fn event_timestamp(event: &EventBridgeEvent<Value>) -> Option<i64> {
    event.time.map(|time| time.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(source: &str, detail: Value) -> EventBridgeEvent<Value> {
        serde_json::from_value(serde_json::json!({
            "version": "0",
            "id": "4d0c6fbd-09e0-4e14-bd88-4ee8a4ed1dd8",
            "detail-type": "state change",
            "source": source,
            "account": "123456789012",
            "time": "2026-03-02T11:22:33Z",
            "region": "eu-west-1",
            "resources": [],
            "detail": detail,
        }))
        .unwrap()
    }

    #[test]
    fn unsupported_source_is_dropped() {
        let notification = format_event(&event("aws.ec2", serde_json::json!({}))).unwrap();
        assert!(notification.is_none());
    }

    #[test]
    fn codepipeline_event_links_to_the_pipeline() {
        let notification = format_event(&event(
            "aws.codepipeline",
            serde_json::json!({ "pipeline": "site", "state": "SUCCEEDED" }),
        ))
        .unwrap()
        .unwrap();

        assert_eq!(notification.message.text, "Pipeline `site` is SUCCEEDED");
        assert!(!notification.error_traffic);

        let attachment = &notification.message.attachments[0];
        assert_eq!(
            attachment.title_link.as_deref(),
            Some("https://eu-west-1.console.aws.amazon.com/codesuite/codepipeline/pipelines/site/view")
        );
        assert_eq!(attachment.color.as_deref(), Some("good"));
        assert!(attachment.ts.is_some());
    }

    fn codebuild_detail(status: &str, phase: &str) -> Value {
        serde_json::json!({
            "build-status": status,
            "project-name": "site-build",
            "build-id": "arn:aws:codebuild:eu-west-1:123456789012:build/site-build:7b59e17d",
            "current-phase": phase,
            "additional-information": {
                "logs": {
                    "group-name": "/aws/codebuild/site-build",
                    "stream-name": "7b59e17d",
                },
            },
        })
    }

    #[test]
    fn codebuild_intermediate_failure_phases_are_dropped() {
        let notification = format_event(&event(
            "aws.codebuild",
            codebuild_detail("STOPPED", "DOWNLOAD_SOURCE"),
        ))
        .unwrap();

        assert!(notification.is_none());
    }

    #[test]
    fn codebuild_in_progress_phases_are_reported() {
        let notification = format_event(&event(
            "aws.codebuild",
            codebuild_detail("IN_PROGRESS", "BUILD"),
        ))
        .unwrap()
        .unwrap();

        assert_eq!(notification.message.text, "IN_PROGRESS: Build `site-build`");
        assert!(!notification.error_traffic);
        assert!(notification.failure_logs.is_none());
        assert_eq!(
            notification.message.attachments[0].fields[0].value,
            "BUILD"
        );
    }

    #[test]
    fn codebuild_failure_requests_log_tail_and_error_channel() {
        let notification = format_event(&event(
            "aws.codebuild",
            codebuild_detail("FAILED", "COMPLETED"),
        ))
        .unwrap()
        .unwrap();

        assert!(notification.error_traffic);
        assert_eq!(
            notification.failure_logs,
            Some(LogLocation {
                group: "/aws/codebuild/site-build".to_string(),
                stream: "7b59e17d".to_string(),
            })
        );

        let link = notification.message.attachments[0]
            .title_link
            .as_deref()
            .unwrap();
        assert!(link.ends_with("/projects/site-build/build/site-build:7b59e17d/log"));
    }

    #[test]
    fn glue_failure_routes_to_error_channel() {
        let notification = format_event(&event(
            "aws.glue",
            serde_json::json!({
                "jobName": "nightly-etl",
                "state": "FAILED",
                "jobRunId": "jr_8c9c5f",
                "message": "OutOfMemoryError",
            }),
        ))
        .unwrap()
        .unwrap();

        assert!(notification.error_traffic);
        assert_eq!(notification.message.text, "FAILED: Glue job `nightly-etl`");
        assert_eq!(
            notification.message.attachments[0].fields[0].value,
            "OutOfMemoryError"
        );
    }

    #[test]
    fn ssm_status_is_uppercased_for_the_color_lookup() {
        let notification = format_event(&event(
            "aws.ssm",
            serde_json::json!({
                "command-id": "7ff54a27",
                "document-name": "AWS-RunShellScript",
                "instance-id": "i-0123456789abcdef0",
                "status": "Success",
            }),
        ))
        .unwrap()
        .unwrap();

        assert_eq!(
            notification.message.attachments[0].color.as_deref(),
            Some("good")
        );
        assert_eq!(
            notification.message.attachments[0].title_link.as_deref(),
            Some("https://eu-west-1.console.aws.amazon.com/systems-manager/run-command/7ff54a27/i-0123456789abcdef0")
        );
    }
}
