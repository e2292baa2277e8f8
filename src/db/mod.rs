use std::time::Duration;

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool};

use crate::config::Config;
use crate::errors::{AppError, AppResult};

pub mod row_parsers;

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// How long a writer waits on another writer's lock before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens the pool without touching the schema.
pub async fn connect(config: &Config) -> anyhow::Result<SqlitePool> {
	let database_url = config.database_url()?;

	let options = database_url
		.parse::<SqliteConnectOptions>()
		.context("invalid DATABASE_URL")?
		.create_if_missing(true)
		.foreign_keys(true)
		.journal_mode(SqliteJournalMode::Wal)
		.busy_timeout(BUSY_TIMEOUT);

	SqlitePoolOptions::new()
		.max_connections(config.max_connections)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await
		.context("failed to connect to database")
}

pub async fn init(config: &Config) -> anyhow::Result<SqlitePool> {
	let pool = connect(config).await?;

	MIGRATOR
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}

/// A transaction opened with `BEGIN IMMEDIATE`.
///
/// The write lock is taken up front, so concurrent writers queue on the busy
/// timeout instead of failing when a read lock would need upgrading.
/// Dropping it without [`WriteTx::commit`] discards the connection, which
/// rolls the transaction back.
pub struct WriteTx {
	conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
	pub async fn begin(pool: &SqlitePool) -> AppResult<Self> {
		let mut conn = pool.acquire().await?;
		sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
		Ok(Self { conn: Some(conn) })
	}

	pub fn conn(&mut self) -> AppResult<&mut SqliteConnection> {
		self.conn
			.as_deref_mut()
			.ok_or_else(|| AppError::internal("write transaction already finished"))
	}

	pub async fn commit(mut self) -> AppResult<()> {
		let mut conn = self
			.conn
			.take()
			.ok_or_else(|| AppError::internal("write transaction already finished"))?;

		match sqlx::query("COMMIT").execute(&mut *conn).await {
			Ok(_) => Ok(()),
			Err(err) => {
				discard(conn).await;
				Err(err.into())
			}
		}
	}
}

impl Drop for WriteTx {
	fn drop(&mut self) {
		if let Some(conn) = self.conn.take() {
			tracing::debug!("write transaction dropped before commit, rolling back");
			drop(conn.detach());
		}
	}
}

async fn discard(conn: PoolConnection<Sqlite>) {
	if let Err(err) = conn.detach().close().await {
		tracing::warn!(error = %err, "failed to close connection after aborted commit");
	}
}
