//! Serving a bootstrapped process.

use std::time::Duration;

use axum::Router;

use crate::control::spawn_control_plane;
use crate::http::server::Pipeline;
use crate::http::{default_routes, AppState, CsrfGuard, HttpServer, MaintenanceGate};
use crate::lifecycle::spawn_signal_listener;
use crate::runtime::{ServeError, Socle};

impl Socle {
    /// Default routes wired to this instance.
    pub fn default_routes(&self) -> Router {
        default_routes(AppState {
            app_name: self.app_name.clone(),
            version: self.version,
            entry: self.entry,
            root_path: self.root_path.clone(),
            render: self.render.clone(),
            maintenance: self.maintenance.clone(),
        })
    }

    /// Primary server for `routes`, wrapped in the entry's middleware stack.
    pub fn http_server(&self, routes: Router) -> Result<HttpServer, ServeError> {
        let descriptor = self
            .server
            .clone()
            .ok_or(ServeError::NotServed(self.entry))?;
        let pipeline = Pipeline {
            gate: MaintenanceGate::new(self.maintenance.clone(), &self.root_path),
            sessions: self.sessions.clone(),
            rate_limiter: self.rate_limiter.clone(),
            csrf: CsrfGuard::new(&self.settings.session.cookie),
            write_timeout: Duration::from_secs(self.settings.timeouts.write_secs),
        };
        Ok(HttpServer::new(
            descriptor,
            routes,
            pipeline,
            self.tls.clone(),
            self.settings.timeouts.clone(),
        ))
    }

    /// Serve `routes` until shutdown, running the control plane alongside,
    /// then release pooled resources.
    pub async fn listen_and_serve(self, routes: Router) -> Result<(), ServeError> {
        let server = self.http_server(routes)?;

        self.scheduler.start(&self.shutdown);
        let signals = spawn_signal_listener(self.shutdown.clone());
        let control = spawn_control_plane(
            self.settings.control.port,
            self.settings.control.token.clone(),
            self.maintenance.clone(),
            &self.shutdown,
        )
        .await;

        let grace = Duration::from_secs(self.settings.server.shutdown_grace_secs);
        let handle = self.handle.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            tracing::info!(grace_secs = grace.as_secs(), "Draining connections");
            handle.graceful_shutdown(Some(grace));
        });

        let result = server.run(self.handle.clone()).await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "Primary server failed");
        }

        self.shutdown.trigger();
        if let Some(control) = control {
            let _ = control.await;
        }
        let _ = signals.await;
        self.resources.release_all().await;
        tracing::info!("Shutdown complete");
        result
    }

    /// Run scheduled jobs and the mail loop until shutdown, then release
    /// pooled resources.
    pub async fn run_worker(self) {
        self.scheduler.start(&self.shutdown);
        let signals = spawn_signal_listener(self.shutdown.clone());
        tracing::info!(jobs = self.scheduler.job_count(), "Worker running");

        self.shutdown.wait().await;
        let _ = signals.await;
        self.resources.release_all().await;
        tracing::info!("Shutdown complete");
    }

    /// Stop background tasks and release pooled resources without serving.
    pub async fn close(self) {
        self.shutdown.trigger();
        self.resources.release_all().await;
    }
}
