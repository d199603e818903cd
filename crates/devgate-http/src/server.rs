use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use axum::Router;

use tokio::net::TcpListener;

use tracing::info;

use devgate::backend::Backend;
use devgate::dispatcher::Dispatcher;

use crate::error::{Error, ErrorKind, Result};
use crate::routes::build_router;

// Default HTTP address.
//
// Devices may reach the gateway from the whole local network, so the Ipv4
// unspecified address is used.
const DEFAULT_HTTP_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// Default port.
const DEFAULT_SERVER_PORT: u16 = 8081;

// Default API root under which every device route is mounted.
const DEFAULT_API_ROOT: &str = "/api/v1";

/// Default time a request waits for the backend before failing.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct ServerData<'a, B>
where
    B: Backend,
{
    // HTTP address.
    http_address: Ipv4Addr,
    // Server port.
    port: u16,
    // API root.
    api_root: &'a str,
    // Time a request waits for its outcome.
    request_timeout: Duration,
    // Request dispatcher.
    dispatcher: Dispatcher<B>,
}

impl<B> ServerData<'_, B>
where
    B: Backend,
{
    fn router(self) -> Result<Router> {
        if !self.api_root.starts_with('/') {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("API root `{}` must start with `/`.", self.api_root),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "Request timeout must be greater than zero.",
            ));
        }

        Ok(build_router(
            self.api_root,
            self.dispatcher,
            self.request_timeout,
        ))
    }
}

/// A gateway server exposing device requests over HTTP.
#[derive(Debug)]
pub struct Server<'a, B>
where
    B: Backend,
{
    data: ServerData<'a, B>,
}

impl<'a, B> Server<'a, B>
where
    B: Backend,
{
    /// Creates a [`Server`] submitting requests through `dispatcher`.
    pub const fn new(dispatcher: Dispatcher<B>) -> Self {
        Self {
            data: ServerData {
                http_address: DEFAULT_HTTP_ADDRESS,
                port: DEFAULT_SERVER_PORT,
                api_root: DEFAULT_API_ROOT,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                dispatcher,
            },
        }
    }

    /// Sets the server `IPv4` address.
    #[must_use]
    pub const fn address(mut self, http_address: Ipv4Addr) -> Self {
        self.data.http_address = http_address;
        self
    }

    /// Sets the server port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.data.port = port;
        self
    }

    /// Sets the API root. i.e. `/api/v1`
    #[must_use]
    pub const fn api_root(mut self, api_root: &'a str) -> Self {
        self.data.api_root = api_root;
        self
    }

    /// Sets the time a request waits for the backend.
    ///
    /// Requests still unanswered after this time fail as upstream
    /// unavailable.
    #[must_use]
    pub const fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.data.request_timeout = request_timeout;
        self
    }

    /// Builds the [`Router`] serving device requests.
    ///
    /// Useful to mount the device routes inside another application.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn router(self) -> Result<Router> {
        self.data.router()
    }

    /// Transforms the server into a [`GracefulShutdownServer`].
    ///
    /// The [`Future`] passed as input manages the graceful shutdown of
    /// the server.
    #[must_use]
    #[inline]
    pub fn with_graceful_shutdown<F>(self, signal: F) -> GracefulShutdownServer<'a, B, F>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        GracefulShutdownServer {
            data: self.data,
            signal,
        }
    }

    /// Runs the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start.
    pub async fn run(self) -> Result<()> {
        self.with_graceful_shutdown(std::future::pending())
            .run()
            .await
    }
}

/// A server with graceful shutdown.
///
/// Aside from the graceful shutdown functionality, it behaves the same as
/// [`Server`].
#[derive(Debug)]
pub struct GracefulShutdownServer<'a, B, F>
where
    B: Backend,
{
    // Server data.
    data: ServerData<'a, B>,
    // Graceful shutdown signal.
    signal: F,
}

impl<B, F> GracefulShutdownServer<'_, B, F>
where
    B: Backend,
    F: Future<Output = ()> + Send + 'static,
{
    /// Runs the server with graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to start.
    pub async fn run(self) -> Result<()> {
        // Create listener bind.
        let listener_bind = format!("{}:{}", self.data.http_address, self.data.port);

        // Create a new TCP socket which responds to the specified HTTP address
        // and port.
        let listener = TcpListener::bind(listener_bind).await?;

        self.serve(listener).await
    }

    /// Runs the server with graceful shutdown on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server
    /// fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let request_timeout = self.data.request_timeout;
        let router = self.data.router()?;

        // Print server address and request timeout.
        info!(
            "Gateway reachable at this HTTP address: {}",
            listener.local_addr()?
        );
        info!("Request timeout: {} ms", request_timeout.as_millis());

        // Print server start message
        info!("Starting server...");

        // Start the server
        axum::serve(listener, router)
            .with_graceful_shutdown(self.signal)
            .await?;

        info!("Server stopped.");

        Ok(())
    }
}
