//! In-browser IDE renderers.
//!
//! Serves the GraphQL Playground or GraphiQL from CDN assets when the
//! client asks the GraphQL endpoint for HTML.

use actix_web::{HttpRequest, HttpResponse};

/// Default Playground release served from the CDN.
pub const PLAYGROUND_VERSION: &str = "1.7.28";

/// Default GraphiQL release served from the CDN.
pub const GRAPHIQL_VERSION: &str = "2.4.7";

#[derive(Debug, Clone)]
pub struct PlaygroundOptions {
    pub version: String,
    /// Use `wss:` for the subscription endpoint.
    pub ssl: bool,
    /// Overrides the HTTP endpoint; defaults to the request path.
    pub endpoint: Option<String>,
    /// Overrides the WebSocket endpoint; defaults to the request host and path.
    pub subscription_endpoint: Option<String>,
}

impl Default for PlaygroundOptions {
    fn default() -> Self {
        Self {
            version: PLAYGROUND_VERSION.to_string(),
            ssl: false,
            endpoint: None,
            subscription_endpoint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphiQLOptions {
    pub version: String,
    pub ssl: bool,
    pub endpoint: Option<String>,
    pub subscription_endpoint: Option<String>,
}

impl Default for GraphiQLOptions {
    fn default() -> Self {
        Self {
            version: GRAPHIQL_VERSION.to_string(),
            ssl: false,
            endpoint: None,
            subscription_endpoint: None,
        }
    }
}

fn endpoints(
    req: &HttpRequest,
    ssl: bool,
    endpoint: &Option<String>,
    subscription_endpoint: &Option<String>,
) -> (String, String) {
    let http_endpoint = endpoint.clone().unwrap_or_else(|| req.path().to_string());

    let ws_scheme = if ssl { "wss:" } else { "ws:" };
    let host = req.connection_info().host().to_string();
    let ws_endpoint = subscription_endpoint
        .clone()
        .unwrap_or_else(|| format!("{}//{}{}", ws_scheme, host, req.path()));

    (http_endpoint, ws_endpoint)
}

/// Renders the GraphQL Playground page.
pub fn render_playground(options: &PlaygroundOptions, req: &HttpRequest) -> HttpResponse {
    let (endpoint, subscription_endpoint) = endpoints(
        req,
        options.ssl,
        &options.endpoint,
        &options.subscription_endpoint,
    );

    let html = PLAYGROUND_TEMPLATE
        .replace("{{version}}", &options.version)
        .replace("{{endpoint}}", &endpoint)
        .replace("{{subscriptionEndpoint}}", &subscription_endpoint);

    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html)
}

/// Renders the GraphiQL page.
pub fn render_graphiql(options: &GraphiQLOptions, req: &HttpRequest) -> HttpResponse {
    let (endpoint, subscription_endpoint) = endpoints(
        req,
        options.ssl,
        &options.endpoint,
        &options.subscription_endpoint,
    );

    let html = GRAPHIQL_TEMPLATE
        .replace("{{version}}", &options.version)
        .replace("{{endpoint}}", &endpoint)
        .replace("{{subscriptionEndpoint}}", &subscription_endpoint);

    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html)
}

const PLAYGROUND_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>GraphQL Playground</title>
  <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/graphql-playground-react@{{version}}/build/static/css/index.css" />
  <link rel="shortcut icon" href="https://cdn.jsdelivr.net/npm/graphql-playground-react@{{version}}/build/favicon.png" />
  <script src="https://cdn.jsdelivr.net/npm/graphql-playground-react@{{version}}/build/static/js/middleware.js"></script>
</head>
<body>
  <div id="root"></div>
  <script>
    window.addEventListener('load', function () {
      GraphQLPlayground.init(document.getElementById('root'), {
        endpoint: '{{endpoint}}',
        subscriptionEndpoint: '{{subscriptionEndpoint}}'
      })
    })
  </script>
</body>
</html>
"#;

const GRAPHIQL_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <title>GraphiQL</title>
  <style>body { margin: 0; } #graphiql { height: 100vh; }</style>
  <link rel="stylesheet" href="https://unpkg.com/graphiql@{{version}}/graphiql.min.css" />
  <script crossorigin src="https://unpkg.com/react@18/umd/react.production.min.js"></script>
  <script crossorigin src="https://unpkg.com/react-dom@18/umd/react-dom.production.min.js"></script>
  <script crossorigin src="https://unpkg.com/graphiql@{{version}}/graphiql.min.js"></script>
</head>
<body>
  <div id="graphiql">Loading...</div>
  <script>
    const fetcher = GraphiQL.createFetcher({
      url: '{{endpoint}}',
      subscriptionUrl: '{{subscriptionEndpoint}}'
    });
    ReactDOM.createRoot(document.getElementById('graphiql')).render(
      React.createElement(GraphiQL, { fetcher: fetcher })
    );
  </script>
</body>
</html>
"#;
