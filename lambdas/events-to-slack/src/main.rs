use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use aws_sdk_cloudwatchlogs::Client as LogsClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use stackops_shared::events;
use stackops_shared::slack::SlackWebhook;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let webhook = SlackWebhook::from_env()?;

    let config = aws_config::load_from_env().await;
    let logs = LogsClient::new(&config);

    run(service_fn(
        move |event: LambdaEvent<EventBridgeEvent<Value>>| {
            let webhook = webhook.clone();
            let logs = logs.clone();
            async move {
                match events::handle_event(&webhook, &logs, event.payload).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        tracing::error!("notification failed: {err}");
                        Err(err)
                    }
                }
            }
        },
    ))
    .await
}
