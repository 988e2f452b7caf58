use std::net::TcpListener;
use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, Responder, dev::Server, web};
use actix_web_httpauth::middleware::HttpAuthentication;
use anyhow::{Context, bail};
use base64::{Engine, prelude::BASE64_STANDARD};
use fleet_config::shared::PgConnectionConfig;
use fleet_config::{Environment, configuration_dir};
use fleet_telemetry::metrics::init_metrics_handle;
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::ExposeSecret;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi;

use crate::{
    authentication::auth_validator,
    clusters::{
        ActiveClusterFile, ClusterDetail, ClusterHealth, ClusterManager, ClusterSummary,
        HealthStatus,
    },
    config::{ApiConfig, ServerMode},
    db::{ClusterSource, ClusterStatus, ClusterStore, memory::MemoryClusterStore, postgres::PgClusterStore},
    k8s::{ClientFactory, ServerVersion, http::HttpClientFactory},
    routes::{
        ErrorMessage,
        active_cluster::{
            ReadActiveClusterResponse, SetActiveClusterRequest, read_active_cluster,
            set_active_cluster,
        },
        clusters::{
            CreateClusterRequest, ReadClustersResponse, UpdateClusterRequest, create_cluster,
            delete_cluster, read_all_clusters, read_cluster, read_cluster_version,
            refresh_cluster, update_cluster,
        },
        health_check::health_check,
        metrics::metrics,
    },
    vault::EncryptionKey,
};

pub struct Application {
    port: u16,
    server: Server,
    manager: web::Data<ClusterManager>,
    prober: JoinHandle<()>,
}

impl Application {
    /// Builds the service from `config`, persisting the active cluster to the configuration
    /// file of the current environment.
    pub async fn build(config: ApiConfig) -> Result<Self, anyhow::Error> {
        let environment = Environment::load()?;
        let active_file = ActiveClusterFile::for_environment(&configuration_dir()?, environment);

        Self::build_with(config, Arc::new(HttpClientFactory::new()), Some(active_file)).await
    }

    /// Builds the service with an explicit client factory and active cluster file.
    pub async fn build_with(
        config: ApiConfig,
        factory: Arc<dyn ClientFactory>,
        active_file: Option<ActiveClusterFile>,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let key = Arc::new(load_encryption_key(&config)?);
        let store: Arc<dyn ClusterStore> = match &config.database {
            Some(database) => {
                let store = PgClusterStore::new(get_connection_pool(database));
                store.migrate().await?;
                Arc::new(store)
            }
            None => {
                info!("no database configured, clusters are kept in memory");
                Arc::new(MemoryClusterStore::new())
            }
        };

        let manager = ClusterManager::new(
            store,
            key,
            factory,
            config.cluster_manager.clone(),
            active_file,
        );
        let report = manager
            .bootstrap(&config.clusters, config.configured_active_id())
            .await?;
        info!(
            inserted = report.inserted.len(),
            existing = report.existing.len(),
            failed = report.failed.len(),
            active_id = ?report.active_id,
            "loaded declared clusters"
        );

        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();

        let manager = web::Data::new(manager);
        let prober = manager.start_health_prober();
        let metrics_handle = init_metrics_handle()?;

        let server = run(config, listener, manager.clone(), metrics_handle).await?;

        Ok(Self {
            port,
            server,
            manager,
            prober,
        })
    }

    pub async fn migrate_database(config: PgConnectionConfig) -> Result<(), anyhow::Error> {
        let store = PgClusterStore::new(get_connection_pool(&config));
        store.migrate().await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves requests until the server stops, then stops the health prober.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let result = self.server.await;

        self.manager.shutdown();
        if let Err(err) = self.prober.await {
            warn!(error = %err, "health prober task failed");
        }

        result
    }
}

pub fn get_connection_pool(config: &PgConnectionConfig) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(config.with_db())
}

/// Decodes the configured key. Without one, the durable store refuses to start and the
/// volatile store runs with a throwaway key.
fn load_encryption_key(config: &ApiConfig) -> Result<EncryptionKey, anyhow::Error> {
    match config.encryption_key() {
        Some(key) => {
            let key_bytes = BASE64_STANDARD
                .decode(key.expose_secret().trim())
                .context("encryption_key is not valid base64")?;

            Ok(EncryptionKey::new(&key_bytes)?)
        }
        None if config.database.is_some() => {
            bail!("encryption_key must be set when a database is configured")
        }
        None => {
            warn!("no encryption_key configured, generating one that lives as long as the process");

            Ok(EncryptionKey::generate()?)
        }
    }
}

async fn openapi_json(openapi: web::Data<utoipa::openapi::OpenApi>) -> impl Responder {
    HttpResponse::Ok().json(openapi.as_ref())
}

pub async fn run(
    config: ApiConfig,
    listener: TcpListener,
    manager: web::Data<ClusterManager>,
    metrics_handle: PrometheusHandle,
) -> Result<Server, anyhow::Error> {
    #[derive(OpenApi)]
    #[openapi(
        paths(
            crate::routes::health_check::health_check,
            crate::routes::metrics::metrics,
            crate::routes::clusters::create_cluster,
            crate::routes::clusters::read_all_clusters,
            crate::routes::clusters::read_cluster,
            crate::routes::clusters::update_cluster,
            crate::routes::clusters::delete_cluster,
            crate::routes::clusters::refresh_cluster,
            crate::routes::clusters::read_cluster_version,
            crate::routes::active_cluster::read_active_cluster,
            crate::routes::active_cluster::set_active_cluster,
        ),
        components(schemas(
            ErrorMessage,
            CreateClusterRequest,
            UpdateClusterRequest,
            ReadClustersResponse,
            ClusterSummary,
            ClusterDetail,
            ClusterHealth,
            HealthStatus,
            ClusterStatus,
            ClusterSource,
            ServerVersion,
            ReadActiveClusterResponse,
            SetActiveClusterRequest,
        ))
    )]
    struct ApiDoc;

    let openapi = web::Data::new(ApiDoc::openapi());
    let mode = config.application.mode;
    let read_timeout = config.application.read_timeout();
    let write_timeout = config.application.write_timeout();
    let config = web::Data::new(config);

    let mut server = HttpServer::new(move || {
        let authentication = HttpAuthentication::bearer(auth_validator);
        App::new()
            .wrap(TracingLogger::default())
            .service(health_check)
            .service(metrics)
            .route("/api-docs/openapi.json", web::get().to(openapi_json))
            .service(
                web::scope("v1")
                    .wrap(authentication)
                    //clusters
                    .service(create_cluster)
                    .service(read_all_clusters)
                    .service(read_cluster)
                    .service(update_cluster)
                    .service(delete_cluster)
                    .service(refresh_cluster)
                    .service(read_cluster_version)
                    //active cluster
                    .service(read_active_cluster)
                    .service(set_active_cluster),
            )
            .app_data(config.clone())
            .app_data(manager.clone())
            .app_data(openapi.clone())
            .app_data(web::ThinData(metrics_handle.clone()))
    })
    .client_request_timeout(read_timeout)
    .client_disconnect_timeout(write_timeout);

    if mode == ServerMode::Debug {
        server = server.workers(1);
    }

    Ok(server.listen(listener)?.run())
}
