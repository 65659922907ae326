use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_secretsmanager::Client as SecretsClient;
use aws_sdk_ssm::types::ParameterType;
use aws_sdk_ssm::Client as SsmClient;
use lambda_runtime::Error;
use serde::Deserialize;

use crate::custom_resource::{CustomResourceEvent, CustomResourceResponse, RequestType};
use crate::error::ProvisionError;

/// Characters excluded from generated passwords so they survive shell quoting
/// and URL embedding.
const PASSWORD_EXCLUDE_CHARACTERS: &str = "+-=";

#[derive(Clone)]
pub struct PoolUserClients {
    pub cognito: CognitoClient,
    pub secrets: SecretsClient,
    pub ssm: SsmClient,
}

/// Property bag of the user-pool user custom resource.
///
/// Numbers arrive stringified through the resource-property bag, so
/// `PasswordLength` is kept as a string and parsed at the point of use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PoolUserProperties {
    pub user_pool_id: String,
    pub username: String,
    pub password_length: Option<String>,
    pub secret_id: Option<String>,
    pub password_parameter_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredSecret {
    password: String,
}

impl PoolUserProperties {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.user_pool_id.is_empty() {
            return Err(ProvisionError::MissingProperty("UserPoolId"));
        }
        if self.username.is_empty() {
            return Err(ProvisionError::MissingProperty("Username"));
        }
        if self
            .username
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ProvisionError::InvalidUsername(self.username.clone()));
        }
        Ok(())
    }

    /// The physical id covers both coordinates so that moving the user to
    /// another pool triggers a replacement.
    pub fn physical_id(&self) -> String {
        format!("{}/{}", self.user_pool_id, self.username)
    }

    pub fn same_user(&self, old: &Self) -> bool {
        self.user_pool_id == old.user_pool_id && self.username == old.username
    }

    fn password_length(&self) -> Option<i64> {
        self.password_length.as_deref().and_then(|s| s.parse().ok())
    }
}

pub async fn handle(
    clients: &PoolUserClients,
    event: CustomResourceEvent<PoolUserProperties>,
) -> Result<CustomResourceResponse, Error> {
    let props = &event.resource_properties;

    match event.request_type {
        RequestType::Create => {
            let physical_id = create_user(clients, props).await?;

            Ok(CustomResourceResponse::new(
                physical_id,
                format!("The user {} has been created", props.username),
            ))
        }

        RequestType::Update => {
            props.validate()?;

            if let Some(old) = &event.old_resource_properties {
                if props.same_user(old) {
                    return Ok(CustomResourceResponse::new(
                        event.physical_resource_id.unwrap_or_default(),
                        format!("The user {} has not been modified", props.username),
                    ));
                }
            }

            // New coordinates: create the replacement; the orchestrator
            // deletes the old user once the stack update settles.
            let physical_id = create_user(clients, props).await?;

            Ok(CustomResourceResponse::new(
                physical_id,
                format!("The user {} has been updated", props.username),
            ))
        }

        RequestType::Delete => {
            // No validation here: a rollback of a failed create sends the
            // same property bag back, and the delete must still go through.
            delete_user(&clients.cognito, &props.user_pool_id, &props.username).await?;

            Ok(CustomResourceResponse::reason_only(format!(
                "The user {} has been deleted",
                props.username
            )))
        }
    }
}

/// Creates the user and, when a password source is configured, sets it as
/// permanent. If setting the password fails the half-created user is removed
/// and the original error is surfaced.
async fn create_user(
    clients: &PoolUserClients,
    props: &PoolUserProperties,
) -> Result<String, Error> {
    props.validate()?;

    let password = resolve_password(clients, props).await?;

    clients
        .cognito
        .admin_create_user()
        .user_pool_id(&props.user_pool_id)
        .username(&props.username)
        .send()
        .await?;

    if let Some(password) = password {
        let set = clients
            .cognito
            .admin_set_user_password()
            .user_pool_id(&props.user_pool_id)
            .username(&props.username)
            .password(password)
            .permanent(true)
            .send()
            .await;

        if let Err(err) = set {
            if let Err(cleanup) =
                delete_user(&clients.cognito, &props.user_pool_id, &props.username).await
            {
                tracing::error!("failed to remove user after password error: {cleanup}");
            }
            return Err(err.into());
        }
    }

    Ok(props.physical_id())
}

/// Deletes the user; a user that no longer exists counts as already deleted.
pub async fn delete_user(
    cognito: &CognitoClient,
    user_pool_id: &str,
    username: &str,
) -> Result<(), Error> {
    let result = cognito
        .admin_delete_user()
        .user_pool_id(user_pool_id)
        .username(username)
        .send()
        .await;

    if let Err(err) = result {
        let service = err.into_service_error();
        if !service.is_user_not_found_exception() {
            return Err(service.into());
        }
        tracing::info!("user {username} was already absent");
    }

    Ok(())
}

/// Resolves the password for the new user.
///
/// A stored secret wins; otherwise a password is generated and written to the
/// named SSM parameter; with neither source configured, no password is set and
/// Cognito issues its temporary one.
async fn resolve_password(
    clients: &PoolUserClients,
    props: &PoolUserProperties,
) -> Result<Option<String>, Error> {
    if let Some(secret_id) = &props.secret_id {
        let value = clients
            .secrets
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await?;

        let secret_string = value
            .secret_string()
            .ok_or_else(|| ProvisionError::EmptySecret(secret_id.clone()))?;

        let stored: StoredSecret = serde_json::from_str(secret_string)
            .map_err(|err| ProvisionError::MalformedSecret(secret_id.clone(), err))?;

        return Ok(Some(stored.password));
    }

    if let Some(parameter_name) = &props.password_parameter_name {
        let generated = clients
            .secrets
            .get_random_password()
            .exclude_characters(PASSWORD_EXCLUDE_CHARACTERS)
            .set_password_length(props.password_length())
            .send()
            .await?;

        let password = generated
            .random_password()
            .ok_or("GetRandomPassword returned an empty password")?
            .to_string();

        clients
            .ssm
            .put_parameter()
            .name(parameter_name)
            .value(&password)
            .r#type(ParameterType::String)
            .overwrite(true)
            .send()
            .await?;

        return Ok(Some(password));
    }

    Ok(None)
}
