use std::io::{Cursor, Read};
use std::path::Path;

use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{LayerVersionContentInput, Runtime};
use aws_sdk_lambda::Client as LambdaClient;
use aws_sdk_s3::Client as S3Client;
use lambda_runtime::Error;
use serde::Deserialize;
use tokio::process::Command;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::custom_resource::{CustomResourceEvent, CustomResourceResponse, RequestType};
use crate::error::ProvisionError;

/// Manifests extracted from the package zip and fed to npm. They describe the
/// dependency set and are excluded from the published layer content.
const MANIFEST_FILES: [&str; 2] = ["package.json", "package-lock.json"];

/// The directory npm runs in; the Lambda runtime expects layer content under
/// this prefix.
const LAYER_PREFIX: &str = "nodejs";

#[derive(Clone)]
pub struct LayerClients {
    pub s3: S3Client,
    pub lambda: LambdaClient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PackageLocation {
    pub bucket: String,
    pub key: String,
}

/// Property bag of the layer-version custom resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LayerVersionProperties {
    pub package: Option<PackageLocation>,
    pub npm_args: Vec<String>,
}

impl LayerVersionProperties {
    /// Checks the required properties before any AWS call is made.
    pub fn validate(&self) -> Result<&PackageLocation, ProvisionError> {
        let package = self
            .package
            .as_ref()
            .ok_or(ProvisionError::MissingProperty("Package"))?;

        if package.bucket.is_empty() {
            return Err(ProvisionError::MissingProperty("Package.Bucket"));
        }
        if package.key.is_empty() {
            return Err(ProvisionError::MissingProperty("Package.Key"));
        }
        if self.npm_args.is_empty() {
            return Err(ProvisionError::MissingProperty("NpmArgs"));
        }

        Ok(package)
    }

    /// True when a rebuild would produce the same artifact: same package
    /// coordinates and the same npm arguments.
    pub fn same_build(&self, old: &Self) -> bool {
        self.package == old.package && self.npm_args == old.npm_args
    }
}

pub async fn handle(
    clients: &LayerClients,
    event: CustomResourceEvent<LayerVersionProperties>,
) -> Result<CustomResourceResponse, Error> {
    let layer_name = event.logical_resource_id.clone();

    match event.request_type {
        RequestType::Create => {
            let arn = build_and_publish(clients, &layer_name, &event.resource_properties).await?;

            Ok(CustomResourceResponse::new(
                arn,
                format!("The layer {layer_name} has been created"),
            ))
        }

        RequestType::Update => {
            let props = &event.resource_properties;
            props.validate()?;

            if let Some(old) = &event.old_resource_properties {
                if props.same_build(old) {
                    return Ok(CustomResourceResponse::new(
                        event.physical_resource_id.unwrap_or_default(),
                        format!("The layer {layer_name} has not been modified"),
                    ));
                }
            }

            let arn = build_and_publish(clients, &layer_name, props).await?;

            Ok(CustomResourceResponse::new(
                arn,
                format!("The layer {layer_name} has been updated"),
            ))
        }

        RequestType::Delete => {
            let deleted = delete_all_versions(clients, &layer_name).await?;
            tracing::info!("deleted {deleted} versions of layer {layer_name}");

            Ok(CustomResourceResponse::reason_only(format!(
                "The layer {layer_name} has been deleted"
            )))
        }
    }
}

/// Fetches the package manifests from S3, installs dependencies with npm in a
/// fresh scratch directory, zips the result and publishes it as a new layer
/// version. Returns the new version's ARN.
async fn build_and_publish(
    clients: &LayerClients,
    layer_name: &str,
    props: &LayerVersionProperties,
) -> Result<String, Error> {
    let package = props.validate()?;

    let scratch = tempfile::tempdir()?;
    let staging = scratch.path().join(LAYER_PREFIX);
    tokio::fs::create_dir_all(&staging).await?;

    tracing::info!("fetching s3://{}/{}", package.bucket, package.key);
    let object = clients
        .s3
        .get_object()
        .bucket(&package.bucket)
        .key(&package.key)
        .send()
        .await?;
    let package_zip = object.body.collect().await?.into_bytes();

    if package_zip.is_empty() {
        return Err(ProvisionError::EmptyPackage {
            bucket: package.bucket.clone(),
            key: package.key.clone(),
        }
        .into());
    }

    extract_manifests(&package_zip, &staging)?;

    run_npm(&props.npm_args, &staging, scratch.path()).await?;

    let content = zip_layer_content(scratch.path())?;

    tracing::info!("publishing layer version {layer_name}");
    let published = clients
        .lambda
        .publish_layer_version()
        .layer_name(layer_name)
        .compatible_runtimes(Runtime::Nodejs)
        .content(
            LayerVersionContentInput::builder()
                .zip_file(Blob::new(content))
                .build(),
        )
        .send()
        .await?;

    published
        .layer_version_arn()
        .map(str::to_string)
        .ok_or_else(|| "PublishLayerVersion returned no LayerVersionArn".into())
}

/// Deletes every version of the named layer. A layer that no longer exists
/// counts as already deleted.
async fn delete_all_versions(clients: &LayerClients, layer_name: &str) -> Result<usize, Error> {
    let mut deleted = 0;
    let mut marker: Option<String> = None;

    loop {
        let listed = clients
            .lambda
            .list_layer_versions()
            .layer_name(layer_name)
            .set_marker(marker.take())
            .send()
            .await;

        let output = match listed {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_resource_not_found_exception() {
                    return Ok(deleted);
                }
                return Err(service.into());
            }
        };

        for version in output.layer_versions() {
            let result = clients
                .lambda
                .delete_layer_version()
                .layer_name(layer_name)
                .version_number(version.version())
                .send()
                .await;

            if let Err(err) = result {
                let service = err.into_service_error();
                if !service.is_resource_not_found_exception() {
                    return Err(service.into());
                }
            }
            deleted += 1;
        }

        marker = output.next_marker().map(String::from);
        if marker.is_none() {
            break;
        }
    }

    Ok(deleted)
}

/// Writes `package.json` and `package-lock.json` from the package zip into the
/// staging directory.
fn extract_manifests(package_zip: &[u8], staging: &Path) -> Result<(), Error> {
    let mut archive = ZipArchive::new(Cursor::new(package_zip))?;

    for name in MANIFEST_FILES {
        let mut entry = archive
            .by_name(name)
            .map_err(|_| ProvisionError::ManifestMissing(name.to_string()))?;

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        std::fs::write(staging.join(name), contents)?;
    }

    Ok(())
}

async fn run_npm(args: &[String], workdir: &Path, home: &Path) -> Result<(), Error> {
    tracing::info!("spawn: npm {}", args.join(" "));

    let status = Command::new("npm")
        .args(args)
        .current_dir(workdir)
        .env("HOME", home)
        .status()
        .await?;

    if !status.success() {
        return Err(ProvisionError::CommandFailed {
            command: format!("npm {}", args.join(" ")),
            status: status.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Zips everything under `<root>/nodejs` with deflate compression, excluding
/// the npm manifests themselves.
fn zip_layer_content(root: &Path) -> Result<Vec<u8>, Error> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_directory(&mut writer, root, &root.join(LAYER_PREFIX), options)?;

    Ok(writer.finish()?.into_inner())
}

fn add_directory(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> Result<(), Error> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();

        if entry.file_type()?.is_dir() {
            add_directory(writer, root, &path, options)?;
            continue;
        }

        let name = path
            .strip_prefix(root)?
            .to_string_lossy()
            .replace('\\', "/");

        if MANIFEST_FILES
            .iter()
            .any(|manifest| name == format!("{LAYER_PREFIX}/{manifest}"))
        {
            continue;
        }

        writer.start_file(name, options)?;
        let mut file = std::fs::File::open(&path)?;
        std::io::copy(&mut file, writer)?;
    }

    Ok(())
}
