//! `plinth dev` command implementation.
//!
//! Serves the orchestrator's last good output from memory:
//!
//! ```text
//! GET /__plinth/ws         notification socket ({type, detail} JSON)
//! GET /__plinth/client.js  reload + error overlay client
//! GET /<public path>/...   emitted artifacts
//!     otherwise            staticDir, then proxy, then history fallback
//! ```

use axum::{
    body::{to_bytes, Body},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use miette::{IntoDiagnostic, Result};
use plinth_core::bundler::ArtifactKind;
use plinth_core::dev::{
    ChangeStream, DevMessage, DevOrchestrator, DevSnapshot, IgnoreRules, MessageKind,
};
use plinth_core::options::{DevServerOptions, ProxyOptions};
use plinth_core::{Config, Mode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tower_http::compression::CompressionLayer;

/// Path of the notification socket.
pub const WS_PATH: &str = "/__plinth/ws";
/// Path of the injected client script.
pub const CLIENT_PATH: &str = "/__plinth/client.js";

/// Largest request body forwarded to a proxy target.
const MAX_PROXY_BODY: usize = 32 * 1024 * 1024;

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub config: Config,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: bool,
}

struct ServerState {
    snapshots: watch::Receiver<DevSnapshot>,
    notify: broadcast::Sender<DevMessage>,
    options: DevServerOptions,
    public_path: String,
    html_file: Option<String>,
    static_dir: Option<PathBuf>,
    client: reqwest::Client,
}

type AppState = Arc<ServerState>;

/// Run the dev server until interrupted.
pub fn run(action: DevAction) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(serve(action))
}

/// Configured server options with command-line overrides applied. The
/// configuration already falls back to `PORT` for an unset port.
fn server_options(mut options: DevServerOptions, action: &DevAction) -> Result<DevServerOptions> {
    if let Some(port) = action.port {
        options.port = port;
    }
    if let Some(host) = &action.host {
        options.host = host.clone();
    }
    options.open |= action.open;
    if options.port == 0 {
        return Err(miette::miette!("devServer.port must not be 0"));
    }
    Ok(options)
}

async fn serve(action: DevAction) -> Result<()> {
    let pipeline =
        super::load_pipeline(&action.config, Some(Mode::Development)).into_diagnostic()?;
    let options = server_options(pipeline.options().dev_server.clone(), &action)?;

    let root = pipeline.root().to_path_buf();
    let ignore = IgnoreRules::new(vec![pipeline.output_dir(), root.join("node_modules")]);
    let public_path = pipeline.options().output.public_path_for(pipeline.mode());
    let html_file = pipeline.options().html.as_ref().map(|h| h.filename.clone());
    let static_dir = options.static_dir.as_ref().map(|d| root.join(d));

    let mut orchestrator = DevOrchestrator::new(pipeline);
    let snapshots = orchestrator.snapshots();
    let notify = orchestrator.notifier();
    let orchestrator = tokio::task::spawn_blocking(move || {
        // A failed first build is reported to clients; keep serving.
        let _ = orchestrator.start();
        orchestrator
    })
    .await
    .into_diagnostic()?;

    let changes = ChangeStream::watch(&root, ignore).into_diagnostic()?;
    let debounce = Duration::from_millis(options.debounce_ms);
    tokio::spawn(async move {
        orchestrator.run(changes, debounce).await;
    });

    let state: AppState = Arc::new(ServerState {
        snapshots,
        notify,
        options: options.clone(),
        public_path,
        html_file,
        static_dir,
        client: reqwest::Client::new(),
    });

    let mut app = Router::new()
        .route(WS_PATH, get(notifications))
        .route(CLIENT_PATH, get(client_script))
        .fallback(serve_request)
        .with_state(state);
    if options.compress {
        app = app.layer(CompressionLayer::new());
    }

    let host_ip = if options.host == "localhost" {
        "127.0.0.1"
    } else {
        options.host.as_str()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", options.port)
        .parse()
        .into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;

    let url = format!("http://{}:{}", options.host, options.port);
    println!();
    println!("  Dev server running at {url}");
    println!("  Press Ctrl+C to stop");
    println!();
    if options.open {
        if let Err(e) = open::that(&url) {
            tracing::warn!(error = %e, "could not open browser");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn notifications(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Greet the client, replay the current error, then forward notifications.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.notify.subscribe();

    let current_error = state.snapshots.borrow().error.clone();
    let mut greeting = vec![DevMessage::new(MessageKind::Connected, "")];
    if let Some(error) = current_error {
        greeting.push(DevMessage::new(MessageKind::Error, error));
    }
    for msg in greeting {
        if sender.send(Message::Text(msg.to_json())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(msg) => {
                    if sender.send(Message::Text(msg.to_json())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "client lagged behind notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn client_script(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        client_source(&state.options),
    )
}

async fn serve_request(State(state): State<AppState>, request: Request) -> Response {
    let uri = request.uri().clone();
    let path = uri.path().to_string();

    if let Some(response) = serve_artifact(&state, &path) {
        return response;
    }
    if let Some(response) = serve_static(&state, &path).await {
        return response;
    }
    if let Some((prefix, target)) = proxy_for(&state.options, &path) {
        tracing::debug!(%prefix, %path, "proxying request");
        return proxy(&state, target, request).await;
    }
    if state.options.history_api_fallback
        && request.method() == Method::GET
        && accepts_html(request.headers())
    {
        if let Some(response) = serve_document(&state) {
            return response;
        }
    }
    not_found(&uri)
}

// ============================================================================
// Artifacts
// ============================================================================

/// Artifact name for a request path, relative to the public path.
fn artifact_name<'a>(public_path: &str, path: &'a str) -> Option<&'a str> {
    let prefix = if public_path.starts_with('/') {
        public_path
    } else {
        "/"
    };
    let rel = path.strip_prefix(prefix).or_else(|| {
        // `/static` for a public path of `/static/`.
        (path == prefix.trim_end_matches('/')).then_some("")
    })?;
    Some(rel.trim_start_matches('/'))
}

fn serve_artifact(state: &ServerState, path: &str) -> Option<Response> {
    let name = artifact_name(&state.public_path, path)?;
    if name.is_empty() || Some(name) == state.html_file.as_deref() {
        return serve_document(state);
    }
    let snapshot = state.snapshots.borrow();
    let output = snapshot.output.as_ref()?;
    let artifact = output.artifact(name)?;
    let mime = mime_guess::from_path(&artifact.name).first_or_octet_stream();
    Some(
        (
            [
                (header::CONTENT_TYPE, mime.essence_str().to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            artifact.bytes.clone(),
        )
            .into_response(),
    )
}

/// The HTML document with the client script injected. Without a document
/// (no `html` option or no successful build yet) a bare page carries the
/// client so errors still show.
fn serve_document(state: &ServerState) -> Option<Response> {
    let snapshot = state.snapshots.borrow();
    let html = state
        .html_file
        .as_deref()
        .and_then(|file| snapshot.output.as_ref()?.artifact(file))
        .filter(|a| a.kind == ArtifactKind::Html)
        .map(|a| String::from_utf8_lossy(&a.bytes).into_owned());
    if html.is_none() && snapshot.output.is_some() && state.html_file.is_none() {
        return None;
    }
    let html = html.unwrap_or_else(|| {
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"></head>\n<body></body>\n</html>\n"
            .to_string()
    });
    Some(
        (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            inject_client(&html),
        )
            .into_response(),
    )
}

fn inject_client(html: &str) -> String {
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>\n");
    let mut out = html.to_string();
    match out.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => out.insert_str(pos, &tag),
        None => out.push_str(&tag),
    }
    out
}

async fn serve_static(state: &ServerState, path: &str) -> Option<Response> {
    let dir = state.static_dir.as_ref()?;
    let rel = path.trim_start_matches('/');
    if rel.is_empty() || rel.split('/').any(|seg| seg == "..") {
        return None;
    }
    let file = dir.join(rel);
    let bytes = tokio::fs::read(&file).await.ok()?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();
    Some(([(header::CONTENT_TYPE, mime.essence_str().to_string())], bytes).into_response())
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html") || v.contains("*/*"))
}

fn not_found(uri: &Uri) -> Response {
    (StatusCode::NOT_FOUND, format!("Not found: {}", uri.path())).into_response()
}

// ============================================================================
// Proxy
// ============================================================================

/// Longest configured prefix matching `path`.
fn proxy_for<'a>(options: &'a DevServerOptions, path: &str) -> Option<(&'a str, &'a ProxyOptions)> {
    options
        .proxy
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, target)| (prefix.as_str(), target))
}

async fn proxy(state: &ServerState, target: &ProxyOptions, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", axum::http::uri::PathAndQuery::as_str);
    let url = format!("{}{path_and_query}", target.target.trim_end_matches('/'));

    let body = match to_bytes(body, MAX_PROXY_BODY).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let mut headers = parts.headers.clone();
    if target.change_origin {
        headers.remove(header::HOST);
        headers.remove(header::ORIGIN);
    }

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(upstream) => {
            let status = upstream.status();
            let headers = upstream.headers().clone();
            match upstream.bytes().await {
                Ok(bytes) => {
                    let mut response = Response::new(Body::from(bytes));
                    *response.status_mut() = status;
                    *response.headers_mut() = headers;
                    response.headers_mut().remove(header::TRANSFER_ENCODING);
                    response
                }
                Err(e) => bad_gateway(&url, &e),
            }
        }
        Err(e) => bad_gateway(&url, &e),
    }
}

fn bad_gateway(url: &str, error: &reqwest::Error) -> Response {
    tracing::warn!(%url, error = %error, "proxy request failed");
    (StatusCode::BAD_GATEWAY, format!("Proxy error for {url}: {error}")).into_response()
}

// ============================================================================
// Client
// ============================================================================

fn client_source(options: &DevServerOptions) -> String {
    CLIENT_TEMPLATE
        .replace("__WS_PATH__", &serde_json::to_string(WS_PATH).unwrap_or_default())
        .replace("__RELOAD__", if options.live_reload || options.hot { "true" } else { "false" })
        .replace("__SHOW_ERRORS__", if options.overlay.errors { "true" } else { "false" })
        .replace("__SHOW_WARNINGS__", if options.overlay.warnings { "true" } else { "false" })
}

const CLIENT_TEMPLATE: &str = r##"(function () {
  var reload = __RELOAD__;
  var showErrors = __SHOW_ERRORS__;
  var showWarnings = __SHOW_WARNINGS__;
  var overlay = null;

  function hide() {
    if (overlay) {
      overlay.remove();
      overlay = null;
    }
  }

  function show(kind, text) {
    hide();
    overlay = document.createElement("div");
    overlay.setAttribute("data-plinth-overlay", kind);
    overlay.style.cssText =
      "position:fixed;inset:0;z-index:2147483647;overflow:auto;padding:24px;" +
      "background:rgba(20,20,20,.92);color:" + (kind === "error" ? "#ff6b6b" : "#ffd166") +
      ";font:13px/1.5 ui-monospace,monospace;white-space:pre-wrap";
    overlay.textContent = text;
    overlay.onclick = hide;
    document.body.appendChild(overlay);
  }

  function connect() {
    var proto = location.protocol === "https:" ? "wss://" : "ws://";
    var socket = new WebSocket(proto + location.host + __WS_PATH__);
    socket.onmessage = function (event) {
      var msg = JSON.parse(event.data);
      if (msg.type === "reload") {
        hide();
        if (reload) location.reload();
      } else if (msg.type === "error") {
        console.error("[plinth] " + msg.detail);
        if (showErrors) show("error", msg.detail);
      } else if (msg.type === "warning") {
        console.warn("[plinth] " + msg.detail);
        if (showWarnings) show("warning", msg.detail);
      }
    };
    socket.onclose = function () {
      setTimeout(connect, 1000);
    };
  }

  connect();
})();
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_core::options::PORT_ENV;
    use serial_test::serial;

    fn action(port: Option<u16>) -> DevAction {
        DevAction {
            config: Config::new(".".into()),
            port,
            host: None,
            open: false,
        }
    }

    #[test]
    #[serial]
    fn test_port_precedence() {
        std::env::set_var(PORT_ENV, "4321");
        let options = server_options(DevServerOptions::default(), &action(None)).unwrap();
        assert_eq!(options.port, 4321);
        let options = server_options(DevServerOptions::default(), &action(Some(9000))).unwrap();
        assert_eq!(options.port, 9000);
        std::env::remove_var(PORT_ENV);

        let zero = DevServerOptions {
            port: 0,
            ..DevServerOptions::default()
        };
        assert!(server_options(zero, &action(None)).is_err());
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("/", "/js/main.js"), Some("js/main.js"));
        assert_eq!(artifact_name("./", "/js/main.js"), Some("js/main.js"));
        assert_eq!(artifact_name("/static/", "/static/js/main.js"), Some("js/main.js"));
        assert_eq!(artifact_name("/static/", "/static"), Some(""));
        assert_eq!(artifact_name("/static/", "/api/users"), None);
    }

    #[test]
    fn test_proxy_longest_prefix() {
        let mut options = DevServerOptions::default();
        for (prefix, target) in [("/api", "http://a"), ("/api/v2", "http://b")] {
            options.proxy.insert(
                prefix.to_string(),
                ProxyOptions {
                    target: target.to_string(),
                    change_origin: false,
                },
            );
        }
        assert_eq!(proxy_for(&options, "/api/v2/x").unwrap().1.target, "http://b");
        assert_eq!(proxy_for(&options, "/api/x").unwrap().1.target, "http://a");
        assert!(proxy_for(&options, "/other").is_none());
    }

    #[test]
    fn test_inject_client() {
        let html = inject_client("<html><body><p>x</p></body></html>");
        assert!(html.contains("<script src=\"/__plinth/client.js\"></script>\n</body>"));
    }

    #[test]
    fn test_client_flags() {
        let options = DevServerOptions {
            live_reload: false,
            hot: false,
            ..DevServerOptions::default()
        };
        let src = client_source(&options);
        assert!(src.contains("var reload = false;"));
        assert!(src.contains("var showErrors = true;"));
        assert!(src.contains("\"/__plinth/ws\""));
    }
}
