use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::ReservationError;

pub type DbPool = Pool<AsyncPgConnection>;

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_connections)
        .build(config)
        .await?;
    Ok(pool)
}

pub async fn checkout(pool: &DbPool) -> Result<PooledConnection<'_, AsyncPgConnection>, ReservationError> {
    pool.get()
        .await
        .map_err(|e| ReservationError::Connection(e.to_string()))
}
