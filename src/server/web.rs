//! # HTTP-flavored session variant.
//!
//! A minimal GET-only surface sharing the session server's admission and
//! eviction logic (which is why it is hand-rolled over the same sessions
//! rather than a separate web stack). Two routes:
//!
//! - `GET /` — static status page;
//! - `GET /rest/<module>/<function>[/<args>...]` — dispatcher passthrough,
//!   JSON reply `{"result": ..., "state": true|false}`.
//!
//! Web sessions never enter configure mode or authentication.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ExecError;
use crate::server::session::Session;

/// Serves exactly one request on an admitted web session.
pub(crate) async fn drive_web(
    session: &Session,
    dispatcher: &Arc<Dispatcher>,
    cfg: &Config,
) -> Result<(), ExecError> {
    let Some(request) = session.read_chunk().await? else {
        return Ok(());
    };

    let (status, content_type, body) = route(&request, dispatcher, cfg).await;
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    session.send_raw(&response).await
}

async fn route(
    request: &str,
    dispatcher: &Arc<Dispatcher>,
    cfg: &Config,
) -> (&'static str, &'static str, String) {
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default();
    if method != "GET" {
        return ("405 Method Not Allowed", "text/plain", "GET only\n".into());
    }

    if path == "/" {
        return ("200 OK", "text/html", status_page(cfg));
    }

    if path == "/rest" || path == "/rest/" {
        let mut modules = dispatcher.registry().loaded();
        modules.push("task".into());
        let body = json!({ "result": { "modules": modules }, "state": true });
        return ("200 OK", "application/json", body.to_string());
    }

    if let Some(rest) = path.strip_prefix("/rest/") {
        let tokens: Vec<String> = rest
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(|seg| seg.replace("%20", " "))
            .collect();
        if tokens.len() < 2 {
            let body = json!({ "result": "expected /rest/<module>/<function>", "state": false });
            return ("400 Bad Request", "application/json", body.to_string());
        }
        let (state, reply) = dispatcher.run_inline(&tokens, true).await;
        // Structured handler output embeds as JSON, anything else as text.
        let result: JsonValue = serde_json::from_str(&reply)
            .unwrap_or_else(|_| JsonValue::String(reply));
        let body = json!({ "result": result, "state": state });
        return ("200 OK", "application/json", body.to_string());
    }

    ("404 Not Found", "text/plain", "not found\n".into())
}

fn status_page(cfg: &Config) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{id}</title></head>\
         <body><h1>{id}</h1><p>nodevisor {version}</p>\
         <p>REST: <code>/rest/&lt;module&gt;/&lt;function&gt;</code></p></body></html>",
        id = cfg.device_id,
        version = cfg.version,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CallArgs, CmdValue, CommandModule, ModuleRegistry};
    use crate::events::Bus;
    use crate::tasks::TaskManager;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Sys;

    #[async_trait]
    impl CommandModule for Sys {
        fn name(&self) -> &'static str {
            "system"
        }
        fn functions(&self) -> Vec<&'static str> {
            vec!["info"]
        }
        async fn call(&self, function: &str, args: &CallArgs) -> Result<CmdValue, ExecError> {
            match function {
                "info" => Ok(CmdValue::Map(vec![(
                    "args".into(),
                    args.len().to_string(),
                )])),
                other => Err(ExecError::NotFound {
                    target: format!("system.{other}"),
                }),
            }
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let mut registry = ModuleRegistry::new();
        registry.register("system", || Ok(Arc::new(Sys) as _));
        let tasks = TaskManager::new(Bus::new(16), CancellationToken::new(), 4);
        Dispatcher::new(Arc::new(registry), tasks, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_rest_passthrough_wraps_result_and_state() {
        let d = dispatcher();
        let cfg = Config::default();
        let (status, ctype, body) =
            route("GET /rest/system/info/a/b%20c HTTP/1.1", &d, &cfg).await;
        assert_eq!(status, "200 OK");
        assert_eq!(ctype, "application/json");
        let parsed: JsonValue = serde_json::from_str(&body).expect("json body");
        assert_eq!(parsed["state"], true);
        // "a" plus "b c" (decoded space re-tokenizes) bind as three args.
        assert_eq!(parsed["result"]["args"], "3", "path segments become args");
    }

    #[tokio::test]
    async fn test_rest_error_keeps_state_false() {
        let d = dispatcher();
        let cfg = Config::default();
        let (status, _, body) = route("GET /rest/ghost/fn HTTP/1.1", &d, &cfg).await;
        assert_eq!(status, "200 OK", "dispatch errors are payload, not http errors");
        let parsed: JsonValue = serde_json::from_str(&body).expect("json body");
        assert_eq!(parsed["state"], false);
        assert!(parsed["result"].as_str().unwrap_or_default().contains("[ERR]"));
    }

    #[tokio::test]
    async fn test_static_page_and_unknown_route() {
        let d = dispatcher();
        let cfg = Config::default();
        let (status, ctype, body) = route("GET / HTTP/1.1", &d, &cfg).await;
        assert_eq!(status, "200 OK");
        assert_eq!(ctype, "text/html");
        assert!(body.contains("node01"));

        let (status, _, _) = route("GET /favicon.ico HTTP/1.1", &d, &cfg).await;
        assert_eq!(status, "404 Not Found");

        let (status, _, _) = route("POST / HTTP/1.1", &d, &cfg).await;
        assert_eq!(status, "405 Method Not Allowed");
    }
}
