use std::collections::BTreeMap;

use aws_sdk_apigateway::types::IntegrationType;
use aws_sdk_apigateway::Client as ApiGatewayClient;
use lambda_runtime::Error;

use crate::error::ProvisionError;

/// Request headers forwarded to S3 on GET proxy routes (conditional requests
/// and ranged reads).
const GET_FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Unmodified-Since",
    "Range",
];

/// Response headers surfaced from S3 on successful GET proxy responses.
const GET_RESPONSE_HEADERS: &[&str] = &[
    "Accept-Ranges",
    "Cache-Control",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Range",
    "Content-Type",
    "ETag",
    "Expires",
    "Last-Modified",
];

/// Request headers forwarded to S3 on PUT proxy routes.
const PUT_FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "Cache-Control",
    "Content-Disposition",
    "Content-Language",
    "Expires",
];

/// Response headers surfaced from S3 on successful PUT proxy responses.
const PUT_RESPONSE_HEADERS: &[&str] = &["ETag"];

/// Response headers surfaced on 4xx/5xx proxy responses.
const ERROR_RESPONSE_HEADERS: &[&str] = &["Content-Type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Head,
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Any,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Head => "HEAD",
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Any => "ANY",
        }
    }
}

/// Settings for an S3 proxy route.
#[derive(Debug, Clone, Default)]
pub struct S3IntegrationProps {
    /// The bucket integration requests are sent to.
    pub bucket: String,
    /// The object path, defaulting to the route path. May reference `{param}`
    /// placeholders declared in the route path.
    pub path: Option<String>,
    /// The role API Gateway assumes for the S3 call; falls back to the
    /// builder's default role.
    pub role_arn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub method: HttpMethod,
    /// Method-level request parameters, keyed by `method.request.*`, with
    /// their required flag.
    pub request_parameters: BTreeMap<String, bool>,
    pub method_responses: Vec<MethodResponse>,
    pub integration: Option<S3Integration>,
}

#[derive(Debug, Clone)]
pub struct MethodResponse {
    pub status_code: &'static str,
    /// Keyed by `method.response.header.*`.
    pub response_parameters: BTreeMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct S3Integration {
    pub http_method: &'static str,
    pub bucket: String,
    pub path: String,
    pub credentials_role_arn: String,
    /// `integration.request.*` destination mapped to its `method.request.*`
    /// source.
    pub request_parameters: BTreeMap<String, String>,
    pub responses: Vec<IntegrationResponse>,
}

#[derive(Debug, Clone)]
pub struct IntegrationResponse {
    pub status_code: &'static str,
    pub selection_pattern: Option<&'static str>,
    /// `method.response.*` destination mapped to its `integration.response.*`
    /// source.
    pub response_parameters: BTreeMap<String, String>,
}

/// One route path or several; builder methods that take a path accept either.
pub trait IntoPaths {
    fn into_paths(self) -> Vec<String>;
}

impl IntoPaths for &str {
    fn into_paths(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoPaths for String {
    fn into_paths(self) -> Vec<String> {
        vec![self]
    }
}

impl<const N: usize> IntoPaths for [&str; N] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|path| path.to_string()).collect()
    }
}

impl IntoPaths for &[&str] {
    fn into_paths(self) -> Vec<String> {
        self.iter().map(|path| path.to_string()).collect()
    }
}

impl IntoPaths for Vec<String> {
    fn into_paths(self) -> Vec<String> {
        self
    }
}

/// Accumulates REST API routes and applies them to an API Gateway REST API.
///
/// Routes are validated as they are added; `apply` only performs SDK calls.
#[derive(Debug, Default)]
pub struct RestApiBuilder {
    default_role_arn: Option<String>,
    routes: Vec<Route>,
}

impl RestApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the role used for AWS integrations that do not name their own.
    pub fn default_role(mut self, role_arn: impl Into<String>) -> Self {
        self.default_role_arn = Some(role_arn.into());
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Defines the method on each given path. With an integration, the
    /// method-level parameter and response tables are derived from it.
    pub fn add_route(
        mut self,
        paths: impl IntoPaths,
        method: HttpMethod,
        integration: Option<S3Integration>,
    ) -> Self {
        for path in paths.into_paths() {
            let route = match integration.clone() {
                Some(integration) => integration_route(path, method, integration),
                None => Route {
                    path,
                    method,
                    request_parameters: BTreeMap::new(),
                    method_responses: Vec::new(),
                    integration: None,
                },
            };
            self.routes.push(route);
        }
        self
    }

    pub fn head(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Head, None)
    }

    pub fn get(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Get, None)
    }

    pub fn post(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Post, None)
    }

    pub fn put(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Put, None)
    }

    pub fn delete(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Delete, None)
    }

    pub fn patch(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Patch, None)
    }

    pub fn options(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Options, None)
    }

    pub fn any(self, paths: impl IntoPaths) -> Self {
        self.add_route(paths, HttpMethod::Any, None)
    }

    /// Defines GET routes whose integrations forward to S3 GetObject.
    pub fn get_s3_integration(
        mut self,
        paths: impl IntoPaths,
        props: &S3IntegrationProps,
    ) -> Result<Self, ProvisionError> {
        for path in paths.into_paths() {
            self = self.get_s3_route(&path, props)?;
        }
        Ok(self)
    }

    fn get_s3_route(
        mut self,
        path: &str,
        props: &S3IntegrationProps,
    ) -> Result<Self, ProvisionError> {
        let (integration_path, role_arn) = self.validate_s3(path, props)?;

        let request_parameters =
            request_parameter_map(GET_FORWARDED_REQUEST_HEADERS, &path_parameters(path));
        let normal = response_parameter_map(GET_RESPONSE_HEADERS);
        let error = response_parameter_map(ERROR_RESPONSE_HEADERS);

        let responses = vec![
            IntegrationResponse {
                status_code: "200",
                selection_pattern: None,
                response_parameters: normal.clone(),
            },
            IntegrationResponse {
                status_code: "206",
                selection_pattern: Some("206"),
                response_parameters: normal.clone(),
            },
            IntegrationResponse {
                status_code: "304",
                selection_pattern: Some("304"),
                response_parameters: normal,
            },
            IntegrationResponse {
                status_code: "400",
                selection_pattern: Some(r"4\d{2}"),
                response_parameters: error.clone(),
            },
            IntegrationResponse {
                status_code: "500",
                selection_pattern: Some(r"5\d{2}"),
                response_parameters: error,
            },
        ];

        self.routes.push(integration_route(
            path.to_string(),
            HttpMethod::Get,
            S3Integration {
                http_method: "GET",
                bucket: props.bucket.clone(),
                path: integration_path,
                credentials_role_arn: role_arn,
                request_parameters,
                responses,
            },
        ));
        Ok(self)
    }

    /// Defines PUT routes whose integrations forward to S3 PutObject.
    pub fn put_s3_integration(
        mut self,
        paths: impl IntoPaths,
        props: &S3IntegrationProps,
    ) -> Result<Self, ProvisionError> {
        for path in paths.into_paths() {
            self = self.put_s3_route(&path, props)?;
        }
        Ok(self)
    }

    fn put_s3_route(
        mut self,
        path: &str,
        props: &S3IntegrationProps,
    ) -> Result<Self, ProvisionError> {
        let (integration_path, role_arn) = self.validate_s3(path, props)?;

        let request_parameters =
            request_parameter_map(PUT_FORWARDED_REQUEST_HEADERS, &path_parameters(path));
        let normal = response_parameter_map(PUT_RESPONSE_HEADERS);
        let error = response_parameter_map(ERROR_RESPONSE_HEADERS);

        let responses = vec![
            IntegrationResponse {
                status_code: "200",
                selection_pattern: None,
                response_parameters: normal,
            },
            IntegrationResponse {
                status_code: "400",
                selection_pattern: Some(r"4\d{2}"),
                response_parameters: error.clone(),
            },
            IntegrationResponse {
                status_code: "500",
                selection_pattern: Some(r"5\d{2}"),
                response_parameters: error,
            },
        ];

        self.routes.push(integration_route(
            path.to_string(),
            HttpMethod::Put,
            S3Integration {
                http_method: "PUT",
                bucket: props.bucket.clone(),
                path: integration_path,
                credentials_role_arn: role_arn,
                request_parameters,
                responses,
            },
        ));
        Ok(self)
    }

    fn validate_s3(
        &self,
        path: &str,
        props: &S3IntegrationProps,
    ) -> Result<(String, String), ProvisionError> {
        if path.contains("+}") {
            return Err(ProvisionError::GreedyPath(path.to_string()));
        }

        let integration_path = props.path.clone().unwrap_or_else(|| path.to_string());

        let role_arn = props
            .role_arn
            .clone()
            .or_else(|| self.default_role_arn.clone())
            .ok_or(ProvisionError::MissingRole)?;

        let route_parameters = path_parameters(path);
        for param in path_parameters(&integration_path) {
            if !route_parameters.contains(&param) {
                return Err(ProvisionError::UnknownPathParameter {
                    param: param.to_string(),
                    path: path.to_string(),
                });
            }
        }

        Ok((integration_path, role_arn))
    }

    /// Materializes the accumulated routes on the REST API, creating path
    /// resources as needed and reusing existing ones.
    pub async fn apply(
        &self,
        client: &ApiGatewayClient,
        rest_api_id: &str,
        region: &str,
    ) -> Result<(), Error> {
        let mut resources = load_resources(client, rest_api_id).await?;

        for route in &self.routes {
            let resource_id = ensure_resource(client, rest_api_id, &mut resources, &route.path).await?;

            let mut put_method = client
                .put_method()
                .rest_api_id(rest_api_id)
                .resource_id(&resource_id)
                .http_method(route.method.as_str())
                .authorization_type("NONE");
            for (name, required) in &route.request_parameters {
                put_method = put_method.request_parameters(name, *required);
            }
            put_method.send().await?;

            if let Some(integration) = &route.integration {
                let uri = format!(
                    "arn:aws:apigateway:{region}:{}.s3:path/{}",
                    integration.bucket,
                    integration.path.trim_start_matches('/')
                );

                let mut put_integration = client
                    .put_integration()
                    .rest_api_id(rest_api_id)
                    .resource_id(&resource_id)
                    .http_method(route.method.as_str())
                    .r#type(IntegrationType::Aws)
                    .integration_http_method(integration.http_method)
                    .uri(uri)
                    .credentials(&integration.credentials_role_arn);
                for (destination, source) in &integration.request_parameters {
                    put_integration = put_integration.request_parameters(destination, source);
                }
                put_integration.send().await?;

                for response in &integration.responses {
                    let mut put_response = client
                        .put_integration_response()
                        .rest_api_id(rest_api_id)
                        .resource_id(&resource_id)
                        .http_method(route.method.as_str())
                        .status_code(response.status_code)
                        .set_selection_pattern(response.selection_pattern.map(String::from));
                    for (destination, source) in &response.response_parameters {
                        put_response = put_response.response_parameters(destination, source);
                    }
                    put_response.send().await?;
                }
            }

            for response in &route.method_responses {
                let mut put_response = client
                    .put_method_response()
                    .rest_api_id(rest_api_id)
                    .resource_id(&resource_id)
                    .http_method(route.method.as_str())
                    .status_code(response.status_code);
                for (name, required) in &response.response_parameters {
                    put_response = put_response.response_parameters(name, *required);
                }
                put_response.send().await?;
            }
        }

        Ok(())
    }
}

/// Builds a route whose method-level parameter and response tables mirror
/// the integration tables.
fn integration_route(path: String, method: HttpMethod, integration: S3Integration) -> Route {
    let method_responses = integration
        .responses
        .iter()
        .map(|response| MethodResponse {
            status_code: response.status_code,
            response_parameters: required_flags(response.response_parameters.keys()),
        })
        .collect();

    Route {
        path,
        method,
        request_parameters: required_flags(integration.request_parameters.values()),
        method_responses,
        integration: Some(integration),
    }
}

/// Extracts `{param}` placeholders in order of appearance.
fn path_parameters(path: &str) -> Vec<&str> {
    let mut parameters = Vec::new();
    let mut rest = path;

    while let Some(start) = rest.find('{') {
        rest = &rest[start + 1..];
        match rest.find('}') {
            Some(end) => {
                parameters.push(&rest[..end]);
                rest = &rest[end + 1..];
            }
            None => break,
        }
    }

    parameters
}

/// Maps forwarded headers and path parameters onto their
/// `integration.request.*` destinations.
fn request_parameter_map(headers: &[&str], parameters: &[&str]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for header in headers {
        map.insert(
            format!("integration.request.header.{header}"),
            format!("method.request.header.{header}"),
        );
    }
    for parameter in parameters {
        map.insert(
            format!("integration.request.path.{parameter}"),
            format!("method.request.path.{parameter}"),
        );
    }
    map
}

fn response_parameter_map(headers: &[&str]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|header| {
            (
                format!("method.response.header.{header}"),
                format!("integration.response.header.{header}"),
            )
        })
        .collect()
}

/// Marks every named parameter as required, mirroring the string map.
fn required_flags<'a>(names: impl Iterator<Item = &'a String>) -> BTreeMap<String, bool> {
    names.map(|name| (name.clone(), true)).collect()
}

async fn load_resources(
    client: &ApiGatewayClient,
    rest_api_id: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let mut resources = BTreeMap::new();
    let mut position: Option<String> = None;

    loop {
        let output = client
            .get_resources()
            .rest_api_id(rest_api_id)
            .limit(500)
            .set_position(position.take())
            .send()
            .await?;

        for item in output.items() {
            if let (Some(path), Some(id)) = (item.path(), item.id()) {
                resources.insert(path.to_string(), id.to_string());
            }
        }

        position = output.position().map(String::from);
        if position.is_none() {
            break;
        }
    }

    Ok(resources)
}

/// Returns the resource id for the path, creating intermediate resources top
/// down as needed.
async fn ensure_resource(
    client: &ApiGatewayClient,
    rest_api_id: &str,
    resources: &mut BTreeMap<String, String>,
    path: &str,
) -> Result<String, Error> {
    let mut parent_id = resources
        .get("/")
        .cloned()
        .ok_or("the REST API has no root resource")?;
    let mut current = String::new();

    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        current.push('/');
        current.push_str(segment);

        if let Some(id) = resources.get(&current) {
            parent_id = id.clone();
            continue;
        }

        let created = client
            .create_resource()
            .rest_api_id(rest_api_id)
            .parent_id(&parent_id)
            .path_part(segment)
            .send()
            .await?;

        let id = created
            .id()
            .ok_or("CreateResource returned no id")?
            .to_string();
        resources.insert(current.clone(), id.clone());
        parent_id = id;
    }

    Ok(parent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_props() -> S3IntegrationProps {
        S3IntegrationProps {
            bucket: "site-assets".to_string(),
            path: None,
            role_arn: Some("arn:aws:iam::123456789012:role/api-s3".to_string()),
        }
    }

    #[test]
    fn path_parameters_are_extracted_in_order() {
        assert_eq!(
            path_parameters("/files/{folder}/{name}"),
            vec!["folder", "name"]
        );
        assert!(path_parameters("/health").is_empty());
    }

    #[test]
    fn verb_sugar_records_routes() {
        let builder = RestApiBuilder::new()
            .get("/health")
            .post("/jobs")
            .any("/debug");

        let methods: Vec<HttpMethod> = builder.routes().iter().map(|r| r.method).collect();
        assert_eq!(
            methods,
            vec![HttpMethod::Get, HttpMethod::Post, HttpMethod::Any]
        );
        assert!(builder.routes().iter().all(|r| r.integration.is_none()));
    }

    #[test]
    fn verb_sugar_accepts_several_paths() {
        let builder = RestApiBuilder::new()
            .get(["/v1/files/{name}", "/v2/files/{name}"])
            .delete("/v2/files/{name}");

        let routes: Vec<(&str, HttpMethod)> = builder
            .routes()
            .iter()
            .map(|r| (r.path.as_str(), r.method))
            .collect();
        assert_eq!(
            routes,
            vec![
                ("/v1/files/{name}", HttpMethod::Get),
                ("/v2/files/{name}", HttpMethod::Get),
                ("/v2/files/{name}", HttpMethod::Delete),
            ]
        );
    }

    #[test]
    fn add_route_threads_a_prebuilt_integration() {
        let responses = vec![IntegrationResponse {
            status_code: "200",
            selection_pattern: None,
            response_parameters: response_parameter_map(&["ETag"]),
        }];
        let integration = S3Integration {
            http_method: "GET",
            bucket: "site-assets".to_string(),
            path: "/files/{name}".to_string(),
            credentials_role_arn: "arn:aws:iam::123456789012:role/api-s3".to_string(),
            request_parameters: request_parameter_map(&["Range"], &["name"]),
            responses,
        };

        let builder =
            RestApiBuilder::new().add_route("/files/{name}", HttpMethod::Get, Some(integration));

        let route = &builder.routes()[0];
        assert!(route.integration.is_some());
        assert_eq!(
            route.request_parameters.get("method.request.path.name"),
            Some(&true)
        );
        assert_eq!(route.method_responses[0].status_code, "200");
        assert!(route.method_responses[0]
            .response_parameters
            .contains_key("method.response.header.ETag"));
    }

    #[test]
    fn s3_integration_applies_to_each_path() {
        let builder = RestApiBuilder::new()
            .get_s3_integration(["/files/{name}", "/archive/{name}"], &bucket_props())
            .unwrap();

        assert_eq!(builder.routes().len(), 2);
        for route in builder.routes() {
            let integration = route.integration.as_ref().unwrap();
            // Without an explicit object path each route proxies its own path.
            assert_eq!(integration.path, route.path);
            assert_eq!(route.method, HttpMethod::Get);
        }
    }

    #[test]
    fn greedy_paths_are_rejected_for_s3_integrations() {
        let err = RestApiBuilder::new()
            .get_s3_integration("/files/{proxy+}", &bucket_props())
            .unwrap_err();

        assert!(matches!(err, ProvisionError::GreedyPath(_)));
    }

    #[test]
    fn integration_path_parameters_must_exist_in_the_route() {
        let props = S3IntegrationProps {
            path: Some("/archive/{version}/{name}".to_string()),
            ..bucket_props()
        };

        let err = RestApiBuilder::new()
            .get_s3_integration("/files/{name}", &props)
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::UnknownPathParameter { ref param, .. } if param == "version"
        ));
    }

    #[test]
    fn s3_integration_requires_a_role() {
        let props = S3IntegrationProps {
            role_arn: None,
            ..bucket_props()
        };

        let err = RestApiBuilder::new()
            .get_s3_integration("/files/{name}", &props)
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingRole));

        // The builder default role fills the gap.
        let builder = RestApiBuilder::new()
            .default_role("arn:aws:iam::123456789012:role/default")
            .get_s3_integration("/files/{name}", &props)
            .unwrap();
        let integration = builder.routes()[0].integration.as_ref().unwrap();
        assert_eq!(
            integration.credentials_role_arn,
            "arn:aws:iam::123456789012:role/default"
        );
    }

    #[test]
    fn get_integration_forwards_conditional_headers_and_path_parameters() {
        let builder = RestApiBuilder::new()
            .get_s3_integration("/files/{folder}/{name}", &bucket_props())
            .unwrap();

        let route = &builder.routes()[0];
        let integration = route.integration.as_ref().unwrap();

        assert_eq!(
            integration.request_parameters.get("integration.request.header.Range"),
            Some(&"method.request.header.Range".to_string())
        );
        assert_eq!(
            integration.request_parameters.get("integration.request.path.folder"),
            Some(&"method.request.path.folder".to_string())
        );
        assert_eq!(
            route.request_parameters.get("method.request.path.name"),
            Some(&true)
        );
        assert_eq!(integration.path, "/files/{folder}/{name}");
    }

    #[test]
    fn get_integration_response_table_covers_success_and_errors() {
        let builder = RestApiBuilder::new()
            .get_s3_integration("/files/{name}", &bucket_props())
            .unwrap();

        let integration = builder.routes()[0].integration.as_ref().unwrap();
        let codes: Vec<(&str, Option<&str>)> = integration
            .responses
            .iter()
            .map(|r| (r.status_code, r.selection_pattern))
            .collect();

        assert_eq!(
            codes,
            vec![
                ("200", None),
                ("206", Some("206")),
                ("304", Some("304")),
                ("400", Some(r"4\d{2}")),
                ("500", Some(r"5\d{2}")),
            ]
        );

        let ok = &integration.responses[0];
        assert!(ok
            .response_parameters
            .contains_key("method.response.header.ETag"));
        assert!(ok
            .response_parameters
            .contains_key("method.response.header.Content-Range"));

        let error = &integration.responses[3];
        assert_eq!(
            error.response_parameters.keys().collect::<Vec<_>>(),
            vec!["method.response.header.Content-Type"]
        );
    }

    #[test]
    fn put_integration_surfaces_etag_only_on_success() {
        let builder = RestApiBuilder::new()
            .put_s3_integration("/files/{name}", &bucket_props())
            .unwrap();

        let route = &builder.routes()[0];
        assert_eq!(route.method, HttpMethod::Put);

        let integration = route.integration.as_ref().unwrap();
        assert!(integration
            .request_parameters
            .contains_key("integration.request.header.Cache-Control"));
        assert!(!integration
            .request_parameters
            .contains_key("integration.request.header.Range"));

        assert_eq!(
            integration.responses[0]
                .response_parameters
                .keys()
                .collect::<Vec<_>>(),
            vec!["method.response.header.ETag"]
        );

        let method_codes: Vec<&str> = route
            .method_responses
            .iter()
            .map(|r| r.status_code)
            .collect();
        assert_eq!(method_codes, vec!["200", "400", "500"]);
    }
}
