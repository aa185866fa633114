//! Development server.
//!
//! Serves a directory with extensionless paths answered by the root page, so
//! client-side routes survive a reload. With live reload enabled, HTML
//! responses get a small client script that listens on an SSE channel and
//! reloads the page whenever the watcher reports a finished run.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::stream::Stream;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

/// Prefix of every path the server answers itself.
const INTERNAL_PREFIX: &str = "/_assetflow/";
const LIVE_RELOAD_PATH: &str = "/_assetflow/live-reload";
const CLIENT_SCRIPT_PATH: &str = "/_assetflow/live-reload.js";

const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/_assetflow/live-reload");
  source.addEventListener("reload", function () {
    window.location.reload();
  });
})();
"#;

/// Largest HTML body that gets the client script injected.
const MAX_INJECT_BYTES: usize = 16 * 1024 * 1024;

/// Where and how to serve.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub root: PathBuf,
    pub hostname: String,
    pub port: u16,
    pub open: bool,
    pub live_reload: bool,
}

#[derive(Clone)]
struct ServerState {
    files: ServeDir,
    reload: broadcast::Sender<()>,
    live_reload: bool,
}

/// Build the router for a served directory.
pub fn router(options: &ServeOptions, reload: broadcast::Sender<()>) -> Router {
    let state = ServerState {
        files: ServeDir::new(&options.root).append_index_html_on_directories(true),
        reload,
        live_reload: options.live_reload,
    };

    let mut router = Router::new();
    if options.live_reload {
        router = router
            .route(LIVE_RELOAD_PATH, get(live_reload_handler))
            .route(CLIENT_SCRIPT_PATH, get(client_script));
    }
    router.fallback(serve_static).with_state(state)
}

/// Serve until the process is interrupted.
pub async fn serve(options: &ServeOptions, reload: broadcast::Sender<()>) -> Result<(), anyhow::Error> {
    let app = router(options, reload);

    let listener = tokio::net::TcpListener::bind((options.hostname.as_str(), options.port)).await?;
    let addr: SocketAddr = listener.local_addr()?;

    let display_host = if options.hostname == "0.0.0.0" {
        "localhost"
    } else {
        &options.hostname
    };
    let url = format!("http://{}:{}", display_host, addr.port());

    println!("\nServing {} at {}", options.root.display(), url);
    println!("Press Ctrl+C to stop\n");

    if options.open
        && let Err(e) = open::that(&url)
    {
        tracing::warn!("failed to open browser: {e}");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

/// SSE handler for live reload notifications.
async fn live_reload_handler(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.reload.subscribe();
    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(_) => {
                    yield Ok(Event::default().event("reload").data("reload"));
                }
                // Several runs finished at once; one reload covers them
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn client_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
}

async fn serve_static(State(state): State<ServerState>, mut req: Request) -> Response {
    if let Some(uri) = rewrite_uri(req.uri()) {
        tracing::debug!(from = %req.uri(), "serving root page");
        *req.uri_mut() = uri;
    }

    let mut files = state.files.clone();
    let response = match files.try_call(req).await {
        Ok(response) => response.map(Body::new),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    if state.live_reload && is_html(&response) {
        return inject_into_response(response).await;
    }
    response
}

/// The root URI for extensionless paths, keeping the query string.
///
/// `/about` and `/users/42/` are answered by `/`; `/css/site.css`, `/` itself
/// and the server's own paths are left alone.
fn rewrite_uri(uri: &Uri) -> Option<Uri> {
    let path = uri.path();
    if path == "/" || path.starts_with(INTERNAL_PREFIX) || has_extension(path) {
        return None;
    }
    let rewritten = match uri.query() {
        Some(query) => format!("/?{query}"),
        None => "/".to_string(),
    };
    rewritten.parse().ok()
}

/// Whether the last path segment ends in `.` followed by word characters.
fn has_extension(path: &str) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rsplit_once('.') {
        Some((_, ext)) => !ext.is_empty() && ext.chars().all(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}

fn is_html(response: &Response) -> bool {
    response.status().is_success()
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"))
}

async fn inject_into_response(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let html = String::from_utf8_lossy(&bytes);
    let injected = inject_script(&html);

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::ETAG);
    parts.headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Response::from_parts(parts, Body::from(injected))
}

/// Insert the client script tag before the last `</body>`, or append it.
fn inject_script(html: &str) -> String {
    let tag = format!(r#"<script src="{CLIENT_SCRIPT_PATH}"></script>"#);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], tag, &html[at..]),
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewritten(uri: &str) -> Option<String> {
        rewrite_uri(&uri.parse().unwrap()).map(|u| u.to_string())
    }

    #[test]
    fn test_extensionless_paths_get_root_page() {
        assert_eq!(rewritten("/about").as_deref(), Some("/"));
        assert_eq!(rewritten("/users/42/").as_deref(), Some("/"));
        assert_eq!(rewritten("/search?q=shoes").as_deref(), Some("/?q=shoes"));
        assert_eq!(rewritten("/v1.2/notes").as_deref(), Some("/"));
    }

    #[test]
    fn test_files_and_internal_paths_are_untouched() {
        assert_eq!(rewritten("/"), None);
        assert_eq!(rewritten("/index.html"), None);
        assert_eq!(rewritten("/css/site.min.css"), None);
        assert_eq!(rewritten("/data/menu.json?v=3"), None);
        assert_eq!(rewritten("/_assetflow/live-reload"), None);
    }

    #[test]
    fn test_inject_before_closing_body() {
        assert_eq!(
            inject_script("<html><body><p>hi</p></BODY></html>"),
            r#"<html><body><p>hi</p><script src="/_assetflow/live-reload.js"></script></BODY></html>"#
        );
    }

    #[test]
    fn test_inject_appends_without_body() {
        assert_eq!(
            inject_script("<p>fragment</p>"),
            r#"<p>fragment</p><script src="/_assetflow/live-reload.js"></script>"#
        );
    }

    #[tokio::test]
    async fn test_serves_root_page_with_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<body>home</body>").unwrap();
        let options = ServeOptions {
            root: dir.path().to_path_buf(),
            hostname: "localhost".to_string(),
            port: 0,
            open: false,
            live_reload: true,
        };
        let (tx, _rx) = broadcast::channel(4);
        let state = ServerState {
            files: ServeDir::new(&options.root).append_index_html_on_directories(true),
            reload: tx,
            live_reload: true,
        };

        let req = axum::http::Request::builder()
            .uri("/settings/profile")
            .body(Body::empty())
            .unwrap();
        let response = serve_static(State(state), req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            r#"<body>home<script src="/_assetflow/live-reload.js"></script></body>"#
        );
    }
}
