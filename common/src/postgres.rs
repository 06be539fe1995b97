use crate::args::PostgresArgs;
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod};
use postgres::NoTls;
use std::env;

pub fn create_pool(pg_args: PostgresArgs) -> Pool {
    let mut pg_pool_cfg = PgConfig::new();
    pg_pool_cfg.dbname = Some(pg_args.postgres_database);
    pg_pool_cfg.host = Some(pg_args.postgres_host);
    pg_pool_cfg.port = Some(pg_args.postgres_port);
    pg_pool_cfg.user = Some(pg_args.postgres_user);
    pg_pool_cfg.password = pg_args
        .postgres_password
        .or_else(|| env::var("POSTGRES_PASSWORD").ok());
    pg_pool_cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pg_pool_cfg
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .expect("Failed to create Postgres pool")
}
