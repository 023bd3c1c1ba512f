use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection,
};
use shared_types::ScanRecord;

use crate::models::NewScanRecord;
use crate::repository::{ScanRecordStore, StoreError};

pub type DbPool = Pool<AsyncPgConnection>;

const CREATE_SCANNED_EMAILS: &str =
    include_str!("../migrations/2024-06-01-000000_create_scanned_emails/up.sql");

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    // Parse the connection string and connect with TLS
    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    // Spawn the connection task
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str, require_tls: bool) -> anyhow::Result<DbPool> {
    let config = if require_tls {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        )
    } else {
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url)
    };

    let pool = Pool::builder(config).build()?;

    Ok(pool)
}

/// Create the `scanned_emails` table and its index if they do not exist yet.
///
/// Also serves as the startup connectivity check.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get().await?;
    conn.batch_execute(CREATE_SCANNED_EMAILS).await?;
    Ok(())
}

async fn get_conn(
    pool: &DbPool,
) -> Result<diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>, StoreError> {
    pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))
}

// Scanned email database operations
pub mod scanned_emails {
    use super::*;

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        record: NewScanRecord,
    ) -> QueryResult<ScanRecord> {
        use crate::schema::scanned_emails::dsl::*;

        diesel::insert_into(scanned_emails)
            .values(&record)
            .get_result::<ScanRecord>(conn)
            .await
    }

    pub async fn find_matching(
        conn: &mut AsyncPgConnection,
        record: &NewScanRecord,
    ) -> QueryResult<Option<ScanRecord>> {
        use crate::schema::scanned_emails::dsl::*;

        scanned_emails
            .filter(user_email.eq(&record.user_email))
            .filter(subject.eq(&record.subject))
            .filter(sender.eq(&record.sender))
            .filter(date.eq(&record.date))
            .order_by(id.asc())
            .first::<ScanRecord>(conn)
            .await
            .optional()
    }

    pub async fn set_status(
        conn: &mut AsyncPgConnection,
        record_id: i32,
        status_val: &str,
        created_at_val: Option<i64>,
    ) -> QueryResult<ScanRecord> {
        use crate::schema::scanned_emails::dsl::*;

        match created_at_val {
            Some(ts) => {
                diesel::update(scanned_emails.filter(id.eq(record_id)))
                    .set((status.eq(status_val), created_at.eq(ts)))
                    .get_result::<ScanRecord>(conn)
                    .await
            }
            None => {
                diesel::update(scanned_emails.filter(id.eq(record_id)))
                    .set(status.eq(status_val))
                    .get_result::<ScanRecord>(conn)
                    .await
            }
        }
    }

    pub async fn list_by_date(
        conn: &mut AsyncPgConnection,
        user: &str,
    ) -> QueryResult<Vec<ScanRecord>> {
        use crate::schema::scanned_emails::dsl::*;

        scanned_emails
            .filter(user_email.eq(user))
            .order_by(date.desc())
            .load::<ScanRecord>(conn)
            .await
    }

    pub async fn list_by_created(
        conn: &mut AsyncPgConnection,
        user: &str,
    ) -> QueryResult<Vec<ScanRecord>> {
        use crate::schema::scanned_emails::dsl::*;

        scanned_emails
            .filter(user_email.eq(user))
            .order_by((created_at.desc(), id.desc()))
            .load::<ScanRecord>(conn)
            .await
    }
}

/// Postgres-backed scan record store
#[derive(Clone)]
pub struct PgScanStore {
    pool: DbPool,
}

impl PgScanStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanRecordStore for PgScanStore {
    async fn insert(&self, record: NewScanRecord) -> Result<ScanRecord, StoreError> {
        let mut conn = get_conn(&self.pool).await?;
        Ok(scanned_emails::insert(&mut conn, record).await?)
    }

    async fn find_matching(
        &self,
        record: &NewScanRecord,
    ) -> Result<Option<ScanRecord>, StoreError> {
        let mut conn = get_conn(&self.pool).await?;
        Ok(scanned_emails::find_matching(&mut conn, record).await?)
    }

    async fn set_status(
        &self,
        id: i32,
        status: &str,
        created_at: Option<i64>,
    ) -> Result<ScanRecord, StoreError> {
        let mut conn = get_conn(&self.pool).await?;
        match scanned_emails::set_status(&mut conn, id, status, created_at).await {
            Ok(row) => Ok(row),
            Err(diesel::result::Error::NotFound) => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_date(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError> {
        let mut conn = get_conn(&self.pool).await?;
        Ok(scanned_emails::list_by_date(&mut conn, user_email).await?)
    }

    async fn list_by_created(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError> {
        let mut conn = get_conn(&self.pool).await?;
        Ok(scanned_emails::list_by_created(&mut conn, user_email).await?)
    }
}
