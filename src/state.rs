use std::sync::Arc;

use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager as RedisConnectionManager;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sqlx::postgres::PgPool;

use crate::config::Config;
use crate::queue::{JobQueue, RedisQueue};
use crate::repositories::{DbCaseRepository, DbResultSink, DbVariableStore};
use crate::services::{ExecutionService, Orchestrator};

/// Shared handles for the worker and any embedding API layer
#[derive(Clone)]
pub struct AppState {
    /// SeaORM database connection (primary for queries)
    pub db: DatabaseConnection,
    /// SQLx pool for migrations only
    pub pg_pool: PgPool,
    /// Present only when `MONGODB_URL` is set
    pub mongo_client: Option<MongoClient>,
    pub redis: RedisConnectionManager,
    pub config: Config,
    pub job_queue: Arc<dyn JobQueue>,
    pub orchestrator: Arc<Orchestrator>,
    pub executions: Arc<ExecutionService>,
}

impl AppState {
    /// Create a new AppState by connecting to all databases
    pub async fn new(config: Config) -> Result<Self, AppStateError> {
        let redis = Self::connect_redis(&config).await?;
        let job_queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::new(redis.clone()));

        Self::build(config, redis, job_queue).await
    }

    /// Create AppState with a custom queue
    pub async fn with_queue(
        config: Config,
        job_queue: Arc<dyn JobQueue>,
    ) -> Result<Self, AppStateError> {
        let redis = Self::connect_redis(&config).await?;
        Self::build(config, redis, job_queue).await
    }

    async fn connect_redis(config: &Config) -> Result<RedisConnectionManager, AppStateError> {
        let redis_client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| AppStateError::Redis(e.to_string()))?;
        RedisConnectionManager::new(redis_client)
            .await
            .map_err(|e| AppStateError::Redis(e.to_string()))
    }

    async fn build(
        config: Config,
        redis: RedisConnectionManager,
        job_queue: Arc<dyn JobQueue>,
    ) -> Result<Self, AppStateError> {
        // Connect to PostgreSQL with SQLx (for migrations)
        let pg_pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pg_pool)
            .await
            .map_err(|e| AppStateError::Migration(e.to_string()))?;

        let mut opt = ConnectOptions::new(&config.database_url);
        opt.max_connections(100)
            .min_connections(5)
            .sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        let mongo_client = match &config.mongodb_url {
            Some(url) => Some(
                MongoClient::with_uri_str(url)
                    .await
                    .map_err(|e| AppStateError::Mongo(e.to_string()))?,
            ),
            None => None,
        };

        let variables = DbVariableStore::new(
            db.clone(),
            redis.clone(),
            config.temp_variable_ttl_seconds,
        );
        let cases = DbCaseRepository::new(db.clone());
        let mut results = DbResultSink::new(db.clone());
        if let Some(client) = &mongo_client {
            results = results.with_mongo(client.database(&config.mongodb_database));
        }

        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::new(variables),
                Arc::new(cases),
                Arc::new(results),
                config.engine.clone(),
            )
            .map_err(|e| AppStateError::HttpClient(e.to_string()))?,
        );
        let executions = Arc::new(ExecutionService::new(
            job_queue.clone(),
            orchestrator.clone(),
        ));

        Ok(Self {
            db,
            pg_pool,
            mongo_client,
            redis,
            config,
            job_queue,
            orchestrator,
            executions,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("PostgreSQL connection error: {0}")]
    Postgres(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("MongoDB connection error: {0}")]
    Mongo(String),

    #[error("Redis connection error: {0}")]
    Redis(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}
