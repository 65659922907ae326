use aws_sdk_lambda::Client as LambdaClient;
use aws_sdk_s3::Client as S3Client;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use stackops_shared::custom_resource::CustomResourceEvent;
use stackops_shared::layers::{self, LayerClients, LayerVersionProperties};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = aws_config::load_from_env().await;
    let clients = LayerClients {
        s3: S3Client::new(&config),
        lambda: LambdaClient::new(&config),
    };

    run(service_fn(
        move |event: LambdaEvent<CustomResourceEvent<LayerVersionProperties>>| {
            let clients = clients.clone();
            async move {
                match layers::handle(&clients, event.payload).await {
                    Ok(response) => Ok(response),
                    Err(err) => {
                        tracing::error!("layer provisioning failed: {err}");
                        Err(err)
                    }
                }
            }
        },
    ))
    .await
}
