#![allow(dead_code)]

use std::path::Path;

use fleet_api::config::ApiConfig;
use fleet_api::db::postgres::PgClusterStore;
use fleet_config::shared::PgConnectionConfig;
use fleet_config::{Environment, load_config_from};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Connection settings of the development database, overridable with `APP_DATABASE__*`.
pub fn test_database_config() -> PgConnectionConfig {
    let configuration_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration");
    let config: ApiConfig = load_config_from(&configuration_dir, Environment::Dev)
        .expect("failed to read configuration");

    config
        .database
        .expect("the dev configuration must declare a database")
}

/// Creates an empty database and returns a pool connected to it.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("failed to connect to Postgres")
}

/// Terminates the connections of the database and drops it.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("failed to connect to Postgres");
    connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
        .expect("failed to terminate database connections");
    connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
        .expect("failed to drop database");
}

/// A freshly migrated database with a random name, dropped with the value.
pub struct TestDatabase {
    config: PgConnectionConfig,
    pool: PgPool,
}

impl TestDatabase {
    pub async fn create() -> Self {
        let mut config = test_database_config();
        config.name = format!("fleet_test_{}", Uuid::new_v4());

        let pool = create_pg_database(&config).await;
        PgClusterStore::new(pool.clone())
            .migrate()
            .await
            .expect("failed to migrate the database");

        Self { config, pool }
    }

    pub fn store(&self) -> PgClusterStore {
        PgClusterStore::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        // `block_in_place` needs the multi-threaded runtime.
        let config = self.config.clone();
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move { drop_pg_database(&config).await });
        });
    }
}
