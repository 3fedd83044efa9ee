//! Encrypting WebDAV reverse proxy.
//!
//! Clients speak plain WebDAV to this server; every request is rewritten
//! by the [`director`] and forwarded upstream, with file payloads
//! transparently encrypted on the way up and decrypted on the way down by
//! the seekable ciphers in `cryptdav-cipher`. Names, directory listings,
//! and WebDAV metadata pass through untouched.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use cryptdav_cipher::CipherFactory;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use reqwest::Url;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub mod auth;
pub mod cli;
pub mod config;
mod content_streaming;
pub mod director;
mod filetype;
mod range;

use auth::BasicCredentials;
use config::Config;
use director::Director;

pub type ProxyBody = BoxBody<Bytes, Infallible>;

const ACCEPTED_METHODS: [&str; 12] = [
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "PROPFIND",
    "PROPPATCH",
    "MKCOL",
    "COPY",
    "MOVE",
    "LOCK",
    "UNLOCK",
];

/// How long in-flight requests get to finish on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

const CACHE_SWEEP_PERIOD: Duration = Duration::from_secs(3600);

/// Shared per-process state; one instance serves all connections.
pub struct Context {
    pub http: reqwest::Client,
    pub director: Director,
    pub proxy_auth: Option<BasicCredentials>,
    pub factory: CipherFactory,
    pub chunk_size: usize,
    pub timeout: Duration,
}

impl Context {
    pub fn new(config: &Config) -> Result<Self> {
        let backend: Url = config
            .backend_url
            .parse()
            .with_context(|| format!("invalid backend URL {:?}", config.backend_url))?;
        let backend_auth = (!config.backend_user.is_empty()).then(|| BasicCredentials {
            username: config.backend_user.clone(),
            password: config.backend_pass.clone(),
        });
        let proxy_auth = config.enable_auth.then(|| BasicCredentials {
            username: config.auth_user.clone(),
            password: config.auth_pass.clone(),
        });
        // Redirects are followed by hand in the download path, so the
        // client must not chase them on its own.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            director: Director::new(backend, backend_auth.as_ref())?,
            proxy_auth,
            factory: CipherFactory::new(&config.password, config.algorithm),
            chunk_size: config.chunk_size,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

pub async fn run(config: Config) -> Result<()> {
    let addr = config.listen_socket_addr()?;
    let ctx = Arc::new(Context::new(&config)?);
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {addr}");
    info!(
        backend = %config.backend_url,
        algorithm = %config.algorithm,
        chunk_size = config.chunk_size,
        auth_enabled = config.enable_auth,
        "proxy configured",
    );
    serve(listener, ctx).await
}

/// Accept loop with graceful shutdown. Exposed separately so tests can
/// bind their own listener.
pub async fn serve(listener: TcpListener, ctx: Arc<Context>) -> Result<()> {
    let sweeper = ctx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_PERIOD);
        loop {
            interval.tick().await;
            if let Some(evicted) = sweeper.factory.sweep() {
                debug!(evicted, "cipher parameter cache cleared");
            }
        }
    });

    let graceful = GracefulShutdown::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let ctx = ctx.clone();
                    let conn = http1::Builder::new().keep_alive(true).serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |req| handle_request(ctx.clone(), req)),
                    );
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            warn!(?err, "error while serving HTTP connection");
                        }
                    });
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            _ = &mut shutdown => break,
        }
    }

    info!("shutting down, draining in-flight requests");
    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(SHUTDOWN_DRAIN) => {
            warn!("drain timed out, closing remaining connections");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn handle_request(
    ctx: Arc<Context>,
    request: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    debug!(%method, %path, "incoming request");

    let response = match try_handle_request(ctx, request).await {
        Ok(response) => response,
        Err(err) => {
            let message = format!("{err:#}");
            error!(%method, %path, error = %message, "request failed");
            // An upstream that refuses our credentials surfaces as an
            // error string carrying its 401.
            if message.contains("401") {
                text_response(StatusCode::BAD_GATEWAY, "Backend authentication failed")
            } else {
                text_response(StatusCode::BAD_GATEWAY, "Gateway error")
            }
        }
    };
    debug!(%path, status = %response.status(), "response");
    Ok(response)
}

async fn try_handle_request(
    ctx: Arc<Context>,
    request: Request<Incoming>,
) -> Result<Response<ProxyBody>> {
    if let Some(credentials) = &ctx.proxy_auth {
        if !auth::check_basic_auth(request.headers(), credentials) {
            warn!(path = request.uri().path(), "client authentication failed");
            let mut response = text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"WebDAV Proxy\""),
            );
            return Ok(response);
        }
    }

    match request.method().as_str() {
        "PUT" | "POST" => content_streaming::upload(&ctx, request).await,
        "GET" | "HEAD" => content_streaming::download(&ctx, request).await,
        method if ACCEPTED_METHODS.contains(&method) => {
            content_streaming::forward(&ctx, request).await
        }
        method => {
            debug!(method, "method not allowed");
            Ok(text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed",
            ))
        }
    }
}

fn text_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .body(BodyExt::boxed(Full::new(Bytes::from_static(
            message.as_bytes(),
        ))))
        .expect("response builder failed")
}
