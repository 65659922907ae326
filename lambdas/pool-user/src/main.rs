use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_secretsmanager::Client as SecretsClient;
use aws_sdk_ssm::Client as SsmClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use stackops_shared::custom_resource::CustomResourceEvent;
use stackops_shared::pool_users::{self, PoolUserClients, PoolUserProperties};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = aws_config::load_from_env().await;
    let clients = PoolUserClients {
        cognito: CognitoClient::new(&config),
        secrets: SecretsClient::new(&config),
        ssm: SsmClient::new(&config),
    };

    run(service_fn(
        move |event: LambdaEvent<CustomResourceEvent<PoolUserProperties>>| {
            let clients = clients.clone();
            async move {
                match pool_users::handle(&clients, event.payload).await {
                    Ok(response) => Ok(response),
                    Err(err) => {
                        tracing::error!("user provisioning failed: {err}");
                        Err(err)
                    }
                }
            }
        },
    ))
    .await
}
