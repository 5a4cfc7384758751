//! The non-streaming query/mutation handler.
//!
//! Extracts `{query, variables, operationName}` from the request (query
//! string, form body, JSON body or raw `application/graphql` body), renders
//! the configured IDE when the client prefers HTML, and otherwise executes
//! the operation once and writes the result as JSON.

use actix_web::http::header;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use graphsock_commons::ExecutionResult;
use graphsock_core::{ExecutionParams, GraphQLEngine, Metadata, OperationOutcome};

use crate::ide;
use crate::options::ServerOptions;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_GRAPHQL: &str = "application/graphql";
const CONTENT_TYPE_FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// A GraphQL request extracted from an HTTP request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: String,
    pub variables: Option<Map<String, Value>>,
    pub operation_name: Option<String>,
}

/// Form-shaped parameters: `variables` arrives as a JSON string.
#[derive(Debug, Default, Deserialize)]
struct FormParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    variables: Option<String>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

/// JSON body shape.
#[derive(Debug, Default, Deserialize)]
struct JsonParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

/// JSON body with `variables` sent as a quoted JSON string.
#[derive(Debug, Default, Deserialize)]
struct JsonParamsCompat {
    #[serde(default)]
    query: String,
    #[serde(default)]
    variables: Option<String>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

impl RequestOptions {
    /// Extracts request options with the priority: URL query string, then
    /// the request body by content type.
    pub fn from_request(req: &HttpRequest, body: &[u8]) -> Self {
        if let Some(opts) = from_form(req.query_string()) {
            return opts;
        }

        if req.method() != actix_web::http::Method::POST || body.is_empty() {
            return Self::default();
        }

        match req.content_type() {
            CONTENT_TYPE_GRAPHQL => Self {
                query: String::from_utf8_lossy(body).into_owned(),
                ..Default::default()
            },

            CONTENT_TYPE_FORM_URL_ENCODED => {
                match std::str::from_utf8(body).ok().and_then(from_form) {
                    Some(opts) => opts,
                    None => Self::default(),
                }
            }

            // JSON is also the fallback for unknown content types
            _ => from_json(body),
        }
    }
}

fn from_form(encoded: &str) -> Option<RequestOptions> {
    let params: FormParams = serde_urlencoded::from_str(encoded).ok()?;
    let query = params.query.filter(|q| !q.is_empty())?;

    // variables arrive as a JSON string; parse failures leave them empty
    let variables = params
        .variables
        .as_deref()
        .and_then(|text| serde_json::from_str::<Map<String, Value>>(text).ok());

    Some(RequestOptions {
        query,
        variables,
        operation_name: params.operation_name.filter(|n| !n.is_empty()),
    })
}

fn from_json(body: &[u8]) -> RequestOptions {
    match serde_json::from_slice::<JsonParams>(body) {
        Ok(params) => RequestOptions {
            query: params.query,
            variables: params.variables,
            operation_name: params.operation_name,
        },
        Err(_) => {
            // probably `variables` was sent as a string instead of an
            // object, so try to parse it that way
            let compat: JsonParamsCompat = serde_json::from_slice(body).unwrap_or_default();
            RequestOptions {
                query: compat.query,
                variables: compat
                    .variables
                    .as_deref()
                    .and_then(|text| serde_json::from_str(text).ok()),
                operation_name: compat.operation_name,
            }
        }
    }
}

/// True when the client prefers HTML and did not ask for the raw endpoint.
fn wants_ide(req: &HttpRequest) -> bool {
    let accept = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !accept.contains("text/html") || accept.contains(CONTENT_TYPE_JSON) {
        return false;
    }

    !has_raw_param(req.query_string())
}

fn has_raw_param(query_string: &str) -> bool {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query_string)
        .map(|pairs| pairs.iter().any(|(key, _)| key == "raw"))
        .unwrap_or(false)
}

/// Executes a query or mutation once and writes the JSON response.
pub async fn handle_query(
    req: &HttpRequest,
    body: &web::Bytes,
    engine: Arc<dyn GraphQLEngine>,
    options: Arc<ServerOptions>,
) -> HttpResponse {
    if wants_ide(req) {
        if let Some(graphiql) = &options.graphiql {
            return ide::render_graphiql(graphiql, req);
        }
        if let Some(playground) = &options.playground {
            return ide::render_playground(playground, req);
        }
    }

    let request = RequestOptions::from_request(req, body);

    let context = match &options.context_fn {
        Some(seed) => seed(req),
        None => Arc::new(Metadata::new()),
    };

    let mut params = ExecutionParams::new(request.query);
    params.operation_name = request.operation_name;
    params.variables = request.variables;
    params.context = context;

    if let Some(roots) = &options.root_value_fn {
        params.root_value = roots(req);
    }
    if params.root_value.is_none() {
        params.root_value = Some(Map::new());
    }

    let mut result = match engine.execute(&params).await {
        OperationOutcome::Single(result) => result,
        OperationOutcome::Stream(_) => {
            warn!("engine returned a stream for an HTTP request");
            ExecutionResult::from_error_message(
                "subscription operations must use the WebSocket transport",
            )
        }
        OperationOutcome::Failure(reason) => ExecutionResult::from_error_message(reason),
    };

    if let Some(format) = &options.format_error_fn {
        if !result.errors.is_empty() {
            result.errors = result.errors.drain(..).map(|err| format(err)).collect();
        }
    }

    let body_bytes = if options.pretty {
        serde_json::to_vec_pretty(&result)
    } else {
        serde_json::to_vec(&result)
    }
    .unwrap_or_else(|_| b"{}".to_vec());

    let response = HttpResponse::Ok()
        .content_type("application/json; charset=utf-8")
        .body(body_bytes.clone());

    if let Some(callback) = &options.result_callback_fn {
        callback(&params, &result, &body_bytes);
    }

    response
}
