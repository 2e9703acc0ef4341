//! Shared HTTP resource server.
//!
//! One server serves every session. Each session registers a
//! [`ResourceProvider`] under its URL prefix (`/0/`, `/1/`, ...) and the server
//! hands each `GET` to the provider with the longest matching prefix.
//!
//! The [`ResourceRegistry`] can be used without a listening socket, which is
//! how the tests and the simulated host reach session resources.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};
use tiny_http::{Header, Method, Response, Server};
use tracing::{debug, trace, warn};

/// Answers requests for paths under one prefix.
pub trait ResourceProvider: Send + Sync {
    /// `request_path` is the full path including the prefix and any query.
    fn resource(&self, request_path: &str) -> Option<Vec<u8>>;
}

pub struct ResourceRegistry {
    origin: String,
    providers: RwLock<Vec<(String, Arc<dyn ResourceProvider>)>>,
}

impl ResourceRegistry {
    /// `origin` is the scheme and authority clients use, e.g. `http://127.0.0.1:4000`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            providers: RwLock::new(Vec::new()),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Absolute URL of `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.origin)
    }

    /// Register `provider` for `prefix`, replacing any previous one.
    pub fn add(&self, prefix: impl Into<String>, provider: Arc<dyn ResourceProvider>) {
        let prefix = prefix.into();
        let mut providers = self.providers.write();
        providers.retain(|(p, _)| *p != prefix);
        debug!(%prefix, "resource provider registered");
        providers.push((prefix, provider));
    }

    /// `true` when a provider was registered for `prefix`.
    pub fn remove(&self, prefix: &str) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|(p, _)| p != prefix);
        let removed = providers.len() != before;
        if removed {
            debug!(%prefix, "resource provider removed");
        }
        removed
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.providers.read().iter().any(|(p, _)| p == prefix)
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.providers.read().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Resolve a request path against the registered providers.
    pub fn resolve(&self, request_path: &str) -> Option<Vec<u8>> {
        let provider = {
            let providers = self.providers.read();
            providers
                .iter()
                .filter(|(prefix, _)| request_path.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, provider)| provider.clone())
        };
        // the provider may call back into the host, so no lock is held here
        provider?.resource(request_path)
    }
}

fn content_type(path: &str) -> &'static str {
    let path = path.split('?').next().unwrap_or(path);
    let extension = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// A listening server bound to a [`ResourceRegistry`].
pub struct ResourceServer {
    server: Arc<Server>,
    addr: SocketAddr,
    registry: Arc<ResourceRegistry>,
    worker: Option<JoinHandle<()>>,
}

impl ResourceServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let server = Server::http(addr).map_err(|e| Error::ServerBind {
            addr: addr.to_string(),
            message: e.to_string(),
        })?;
        let local = server.server_addr().to_ip().ok_or_else(|| Error::ServerBind {
            addr: addr.to_string(),
            message: "not an IP listener".to_string(),
        })?;

        let server = Arc::new(server);
        let registry = Arc::new(ResourceRegistry::new(format!("http://{local}")));
        let worker = {
            let server = server.clone();
            let registry = registry.clone();
            thread::Builder::new()
                .name("weft-resources".to_string())
                .spawn(move || serve(&server, &registry))
                .map_err(|e| Error::ServerBind {
                    addr: addr.to_string(),
                    message: e.to_string(),
                })?
        };
        debug!(%local, "resource server listening");

        Ok(Self {
            server,
            addr: local,
            registry,
            worker: Some(worker),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> Arc<ResourceRegistry> {
        self.registry.clone()
    }
}

fn serve(server: &Server, registry: &ResourceRegistry) {
    for request in server.incoming_requests() {
        let path = request.url().to_string();
        let response = if *request.method() != Method::Get {
            Response::from_data(Vec::new()).with_status_code(405)
        } else {
            match registry.resolve(&path) {
                Some(body) => {
                    trace!(%path, len = body.len(), "serving resource");
                    let response = Response::from_data(body);
                    match Header::from_bytes(&b"Content-Type"[..], content_type(&path).as_bytes()) {
                        Ok(header) => response.with_header(header),
                        Err(()) => response,
                    }
                },
                None => {
                    trace!(%path, "resource not found");
                    Response::from_data(Vec::new()).with_status_code(404)
                },
            }
        };
        if let Err(e) = request.respond(response) {
            warn!(%path, "Failed to send response: {e}");
        }
    }
}

impl Drop for ResourceServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("resource server thread panicked");
            }
        }
    }
}
