use aws_sdk_cloudwatchlogs::Client as LogsClient;
use lambda_runtime::Error;

/// Creates the log group ahead of the function's first invocation and pins
/// its retention. An already-existing group is fine; the retention policy is
/// applied either way.
pub async fn prepare_log_group(
    client: &LogsClient,
    log_group_name: &str,
    retention_days: i32,
) -> Result<(), Error> {
    let created = client
        .create_log_group()
        .log_group_name(log_group_name)
        .send()
        .await;

    if let Err(err) = created {
        let service = err.into_service_error();
        if !service.is_resource_already_exists_exception() {
            return Err(service.into());
        }
        tracing::info!("log group {log_group_name} already exists");
    }

    client
        .put_retention_policy()
        .log_group_name(log_group_name)
        .retention_in_days(retention_days)
        .send()
        .await?;

    Ok(())
}

/// Deletes the log group; a group that no longer exists counts as deleted.
pub async fn delete_log_group(client: &LogsClient, log_group_name: &str) -> Result<(), Error> {
    let result = client
        .delete_log_group()
        .log_group_name(log_group_name)
        .send()
        .await;

    if let Err(err) = result {
        let service = err.into_service_error();
        if !service.is_resource_not_found_exception() {
            return Err(service.into());
        }
        tracing::info!("log group {log_group_name} was already absent");
    }

    Ok(())
}

/// Fetches up to `limit` messages from one log stream, oldest first.
pub async fn tail_log_events(
    client: &LogsClient,
    log_group_name: &str,
    log_stream_name: &str,
    limit: i32,
) -> Result<Vec<String>, Error> {
    let output = client
        .get_log_events()
        .log_group_name(log_group_name)
        .log_stream_name(log_stream_name)
        .limit(limit)
        .send()
        .await?;

    Ok(output
        .events()
        .iter()
        .filter_map(|event| event.message().map(str::to_string))
        .collect())
}
