use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use keptn_runner::api::ApiConnection;
use keptn_runner::config::RunnerConfig;
use keptn_runner::dispatch::{Dispatcher, TaskHandler, TaskRegistry};
use keptn_runner::event::{CloudEvent, TaskData};
use keptn_runner::poller::spawn_event_poller;
use keptn_runner::resources::ResourceClient;
use keptn_runner::sender::{TaskContext, TaskOutcome};
use keptn_runner::server::event_routes;

/// Sample `deployment.triggered` handler: reports started, pulls the
/// deployment resources, does the work, reports finished.
struct DeploymentHandler;

#[async_trait]
impl TaskHandler for DeploymentHandler {
    async fn handle(
        &self,
        ctx: &TaskContext,
        _event: &CloudEvent,
        data: &TaskData,
    ) -> keptn_runner::Result<()> {
        tracing::info!(
            project = %data.project,
            service = %data.service,
            stage = %data.stage,
            context = ctx.keptn_context().unwrap_or("-"),
            "Deployment triggered"
        );

        ctx.send_started(TaskOutcome::new().with_message("Deployment Started"))
            .await?;

        for (scope, resource) in [
            ("project", ctx.get_project_resource("project-resource.txt").await),
            ("stage", ctx.get_stage_resource("stage-resource.txt").await),
            (
                "service",
                ctx.get_service_resource("service-resource.txt").await,
            ),
        ] {
            match resource {
                Ok(Some(content)) => {
                    tracing::info!(scope, bytes = content.len(), "Fetched deployment resource");
                }
                Ok(None) => tracing::info!(scope, "No deployment resource"),
                Err(e) => tracing::debug!(scope, error = %e, "Deployment resource unavailable"),
            }
        }

        // Stand-in for the actual rollout.
        tokio::time::sleep(Duration::from_secs(5)).await;

        ctx.send_finished(TaskOutcome::new().with_message("Deployment finished"))
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RunnerConfig::from_env()?;

    let mut registry = TaskRegistry::new();
    registry.on("deployment.triggered", Arc::new(DeploymentHandler));

    let connection = Arc::new(ApiConnection::from_config(&config));

    eprintln!("🚀 Keptn Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Transport: {}",
        if connection.is_remote() { "remote control plane" } else { "local sidecar" }
    );
    eprintln!("   API base: {}", connection.base());
    eprintln!("   Event intake: http://0.0.0.0:{}{}", config.port, config.path);

    let mut dispatcher = Dispatcher::new(registry, Arc::clone(&connection));
    if let Some(base) = &config.configuration_service {
        eprintln!("   Configuration service: {}", base);
        dispatcher = dispatcher.with_resources(Arc::new(ResourceClient::new(base.clone())));
    }
    let dispatcher = Arc::new(dispatcher);

    // Remote runners pull their work; the control plane must answer the
    // health probe before the poller starts.
    let poller = if connection.is_remote() {
        match connection.health_check().await {
            Ok(()) => Some(spawn_event_poller(
                Arc::clone(&dispatcher),
                config.poll_interval,
            )),
            Err(e) => {
                tracing::error!(error = %e, "Control plane unreachable; polling disabled");
                None
            }
        }
    } else {
        None
    };

    let app = event_routes(&config.path, Arc::clone(&dispatcher));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, path = %config.path, "Event intake listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, Ordering::Relaxed);
        // The loop notices the flag on its next tick.
        let _ = tokio::time::timeout(config.poll_interval + Duration::from_secs(1), handle).await;
    }
    server.abort();

    Ok(())
}
