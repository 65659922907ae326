use aws_sdk_iam::Client as IamClient;
use lambda_runtime::Error;

/// The AWS-managed policy that lets an instance register with Systems
/// Manager.
pub const SSM_MANAGED_INSTANCE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore";

pub async fn attach_managed_policy(
    client: &IamClient,
    role_name: &str,
    policy_arn: &str,
) -> Result<(), Error> {
    client
        .attach_role_policy()
        .role_name(role_name)
        .policy_arn(policy_arn)
        .send()
        .await?;

    Ok(())
}

/// Grants the role Systems Manager managed-instance access.
pub async fn grant_ssm_managed_instance(client: &IamClient, role_name: &str) -> Result<(), Error> {
    attach_managed_policy(client, role_name, SSM_MANAGED_INSTANCE_POLICY_ARN).await
}

pub async fn set_role_permissions_boundary(
    client: &IamClient,
    role_name: &str,
    policy_arn: &str,
) -> Result<(), Error> {
    client
        .put_role_permissions_boundary()
        .role_name(role_name)
        .permissions_boundary(policy_arn)
        .send()
        .await?;

    Ok(())
}

pub async fn set_user_permissions_boundary(
    client: &IamClient,
    user_name: &str,
    policy_arn: &str,
) -> Result<(), Error> {
    client
        .put_user_permissions_boundary()
        .user_name(user_name)
        .permissions_boundary(policy_arn)
        .send()
        .await?;

    Ok(())
}

/// Stamps the permissions boundary onto every role and user under the path
/// prefix. Returns how many principals were updated.
pub async fn apply_permissions_boundary(
    client: &IamClient,
    path_prefix: &str,
    policy_arn: &str,
) -> Result<usize, Error> {
    let mut updated = 0;
    let mut marker: Option<String> = None;

    loop {
        let output = client
            .list_roles()
            .path_prefix(path_prefix)
            .set_marker(marker.take())
            .send()
            .await?;

        for role in output.roles() {
            set_role_permissions_boundary(client, role.role_name(), policy_arn).await?;
            tracing::info!("applied permissions boundary to role {}", role.role_name());
            updated += 1;
        }

        if !output.is_truncated() {
            break;
        }
        marker = output.marker().map(String::from);
    }

    let mut marker: Option<String> = None;
    loop {
        let output = client
            .list_users()
            .path_prefix(path_prefix)
            .set_marker(marker.take())
            .send()
            .await?;

        for user in output.users() {
            set_user_permissions_boundary(client, user.user_name(), policy_arn).await?;
            tracing::info!("applied permissions boundary to user {}", user.user_name());
            updated += 1;
        }

        if !output.is_truncated() {
            break;
        }
        marker = output.marker().map(String::from);
    }

    Ok(updated)
}
