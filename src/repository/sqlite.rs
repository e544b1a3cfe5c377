//! src/repository/sqlite.rs
//!
//! SqliteRepository: the repository gateway backed by SQLite for object and
//! datastream metadata and local disk for content. A session is one SQLite
//! transaction. Content blobs are addressed by their SHA-1 digest and sharded
//! beneath `base_path/{aa}/{bb}/{digest}`, so a rolled-back session can only
//! leave behind an unreferenced blob, never a half-written one.

use super::{
    ContentStream, ObjectHandle, QueryMatches, RepositoryError, RepositoryGateway,
    RepositoryResult, RepositoryStats,
};
use crate::models::{
    datastream::{ContentHandle, DatastreamRecord, DatastreamState},
    digest::{ContentDigest, DigestAlgorithm},
    search::SearchRow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::{FromRow, SqlitePool, Transaction, sqlite::Sqlite};
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const MAX_IDENTIFIER_LEN: usize = 255;
const INCOMING_DIR: &str = ".incoming";
const DATASTREAM_COLUMNS: &str =
    "pid, dsid, mime_type, size_bytes, content_digest, created_at, last_modified";

#[derive(Debug, FromRow)]
struct DatastreamRow {
    pid: String,
    dsid: String,
    mime_type: String,
    size_bytes: i64,
    content_digest: String,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteRepository {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where content blobs are stored.
    pub base_path: PathBuf,
}

impl SqliteRepository {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema, one statement at a time.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Reject identifiers that are empty, oversized, or could escape a path
    /// segment.
    fn ensure_identifier_safe(id: &str) -> RepositoryResult<()> {
        let invalid = || RepositoryError::InvalidIdentifier(id.to_string());
        if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
            return Err(invalid());
        }
        if id == "." || id == ".." || id.contains('/') || id.contains('\\') {
            return Err(invalid());
        }
        if id.bytes().any(|b| b.is_ascii_control()) {
            return Err(invalid());
        }
        Ok(())
    }

    /// Physical path of the blob holding content with SHA-1 `hex`.
    fn blob_path(&self, hex: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(hex.get(0..2).unwrap_or("00"));
        path.push(hex.get(2..4).unwrap_or("00"));
        path.push(hex);
        path
    }

    fn record_from_row(&self, row: DatastreamRow) -> RepositoryResult<DatastreamRecord> {
        let digest = ContentDigest::parse(&row.content_digest)?;
        let content = ContentHandle {
            path: self.blob_path(digest.value()),
        };
        Ok(DatastreamRecord {
            pid: row.pid,
            dsid: row.dsid,
            mime_type: row.mime_type,
            size: row.size_bytes.max(0) as u64,
            created_date: row.created_at,
            last_modified_date: row.last_modified,
            content_digest: Some(digest),
            state: DatastreamState::Active,
            content,
        })
    }

    /// Stream `content` into a temp file, computing the SHA-1 address and,
    /// when requested, a second digest for verification.
    ///
    /// Returns the temp path, the byte count, the SHA-1 hex, and the hex of
    /// the verification digest.
    async fn spool(
        &self,
        mut content: ContentStream,
        verify: Option<DigestAlgorithm>,
    ) -> RepositoryResult<(PathBuf, u64, String, Option<String>)> {
        let incoming = self.base_path.join(INCOMING_DIR);
        fs::create_dir_all(&incoming).await?;
        let tmp_path = incoming.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut address = DigestAlgorithm::Sha1.hasher();
        let mut check = verify
            .filter(|alg| *alg != DigestAlgorithm::Sha1)
            .map(DigestAlgorithm::hasher);

        while let Some(chunk_res) = content.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(RepositoryError::Io(err));
                }
            };
            size += chunk.len() as u64;
            address.update(&chunk);
            if let Some(hasher) = check.as_mut() {
                hasher.update(&chunk);
            }
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RepositoryError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RepositoryError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RepositoryError::Io(err));
        }

        let sha1 = address.finish_hex();
        let verified = match (verify, check) {
            (_, Some(hasher)) => Some(hasher.finish_hex()),
            (Some(DigestAlgorithm::Sha1), None) => Some(sha1.clone()),
            _ => None,
        };
        Ok((tmp_path, size, sha1, verified))
    }

    /// Move a spooled temp file to its content address. Identical content may
    /// already be there, in which case the temp file is simply discarded.
    async fn publish_blob(&self, tmp_path: &Path, sha1: &str) -> RepositoryResult<PathBuf> {
        let blob_path = self.blob_path(sha1);
        if fs::try_exists(&blob_path).await.unwrap_or(false) {
            let _ = fs::remove_file(tmp_path).await;
            debug!("blob {} already present", blob_path.display());
            return Ok(blob_path);
        }

        let parent = blob_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            RepositoryError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        if let Err(err) = fs::rename(tmp_path, &blob_path).await {
            let _ = fs::remove_file(tmp_path).await;
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(RepositoryError::Io(err));
            }
        }
        Ok(blob_path)
    }

    /// Remove blobs that no datastream row references, and temp files left
    /// behind by interrupted uploads. Returns the number of blobs removed.
    ///
    /// Deleting or replacing a datastream only drops its row, so this is the
    /// cleanup path for unreferenced content. A blob published by an ingest
    /// whose session has not committed yet looks unreferenced, so run this
    /// only while no ingest is in flight (startup does).
    pub async fn sweep_unreferenced_blobs(&self) -> RepositoryResult<u64> {
        let referenced: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT DISTINCT content_digest FROM datastreams")
                .fetch_all(&*self.db)
                .await?
                .iter()
                .filter_map(|uri| ContentDigest::parse(uri).ok())
                .map(|digest| digest.value().to_ascii_lowercase())
                .collect();

        let mut roots = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(outer) = roots.next_entry().await? {
            if !outer.file_type().await?.is_dir() {
                continue;
            }
            if outer.file_name() == INCOMING_DIR {
                let mut stale = fs::read_dir(outer.path()).await?;
                while let Some(tmp) = stale.next_entry().await? {
                    if tmp.file_type().await?.is_file() {
                        debug!("removing stale upload {}", tmp.path().display());
                        fs::remove_file(tmp.path()).await?;
                    }
                }
                continue;
            }

            let mut shards = fs::read_dir(outer.path()).await?;
            while let Some(shard) = shards.next_entry().await? {
                if !shard.file_type().await?.is_dir() {
                    continue;
                }
                let mut blobs = fs::read_dir(shard.path()).await?;
                while let Some(blob) = blobs.next_entry().await? {
                    let name = blob.file_name();
                    let Some(hex) = name.to_str() else {
                        continue;
                    };
                    if !blob.file_type().await?.is_file() || referenced.contains(hex) {
                        continue;
                    }
                    debug!("removing unreferenced blob {}", blob.path().display());
                    fs::remove_file(blob.path()).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl RepositoryGateway for SqliteRepository {
    type Session = Transaction<'static, Sqlite>;

    async fn begin(&self) -> RepositoryResult<Self::Session> {
        Ok(self.db.begin().await?)
    }

    async fn get_object(
        &self,
        session: &mut Self::Session,
        pid: &str,
    ) -> RepositoryResult<ObjectHandle> {
        Self::ensure_identifier_safe(pid)?;
        sqlx::query_scalar::<_, String>("SELECT pid FROM objects WHERE pid = ?")
            .bind(pid)
            .fetch_optional(&mut **session)
            .await?
            .map(|pid| ObjectHandle { pid })
            .ok_or_else(|| RepositoryError::ObjectNotFound(pid.to_string()))
    }

    async fn get_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<DatastreamRecord> {
        Self::ensure_identifier_safe(pid)?;
        Self::ensure_identifier_safe(dsid)?;
        let row = sqlx::query_as::<_, DatastreamRow>(&format!(
            "SELECT {DATASTREAM_COLUMNS} FROM datastreams WHERE pid = ? AND dsid = ?"
        ))
        .bind(pid)
        .bind(dsid)
        .fetch_optional(&mut **session)
        .await?
        .ok_or_else(|| RepositoryError::DatastreamNotFound {
            pid: pid.to_string(),
            dsid: dsid.to_string(),
        })?;
        self.record_from_row(row)
    }

    async fn create_or_replace_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
        mime_type: &str,
        content: ContentStream,
        expected: Option<&ContentDigest>,
    ) -> RepositoryResult<DatastreamRecord> {
        Self::ensure_identifier_safe(pid)?;
        Self::ensure_identifier_safe(dsid)?;
        let verify = expected.map(ContentDigest::digest_algorithm).transpose()?;

        let (tmp_path, size, sha1, verified) = self.spool(content, verify).await?;

        if let (Some(expected), Some(algorithm), Some(computed)) = (expected, verify, verified) {
            if !expected.matches_hex(&computed) {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RepositoryError::InvalidChecksum {
                    expected: expected.clone(),
                    actual: ContentDigest::new(algorithm, computed),
                });
            }
        }

        self.publish_blob(&tmp_path, &sha1).await?;

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO objects (pid, identifier, title, created_at)
             VALUES (?, ?, NULL, ?)
             ON CONFLICT(pid) DO NOTHING",
        )
        .bind(pid)
        .bind(pid)
        .bind(now)
        .execute(&mut **session)
        .await?;

        let digest = ContentDigest::new(DigestAlgorithm::Sha1, sha1);
        let row = sqlx::query_as::<_, DatastreamRow>(&format!(
            r#"
            INSERT INTO datastreams ({DATASTREAM_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(pid, dsid) DO UPDATE SET
                mime_type = excluded.mime_type,
                size_bytes = excluded.size_bytes,
                content_digest = excluded.content_digest,
                last_modified = excluded.last_modified
            RETURNING {DATASTREAM_COLUMNS}
            "#
        ))
        .bind(pid)
        .bind(dsid)
        .bind(mime_type)
        .bind(size as i64)
        .bind(digest.to_string())
        .bind(now)
        .bind(now)
        .fetch_one(&mut **session)
        .await?;

        debug!("stored {}/{} as {}", pid, dsid, digest);
        self.record_from_row(row)
    }

    async fn delete_datastream(
        &self,
        session: &mut Self::Session,
        pid: &str,
        dsid: &str,
    ) -> RepositoryResult<()> {
        Self::ensure_identifier_safe(pid)?;
        Self::ensure_identifier_safe(dsid)?;
        let result = sqlx::query("DELETE FROM datastreams WHERE pid = ? AND dsid = ?")
            .bind(pid)
            .bind(dsid)
            .execute(&mut **session)
            .await?;
        if result.rows_affected() == 0 {
            debug!("datastream {}/{} already absent", pid, dsid);
        }
        Ok(())
    }

    async fn list_datastreams(
        &self,
        session: &mut Self::Session,
        pid: &str,
    ) -> RepositoryResult<Vec<DatastreamRecord>> {
        self.get_object(session, pid).await?;
        let rows = sqlx::query_as::<_, DatastreamRow>(&format!(
            "SELECT {DATASTREAM_COLUMNS} FROM datastreams WHERE pid = ? ORDER BY dsid ASC"
        ))
        .bind(pid)
        .fetch_all(&mut **session)
        .await?;
        rows.into_iter()
            .map(|row| self.record_from_row(row))
            .collect()
    }

    async fn execute_query<'a>(
        &'a self,
        session: &'a mut Self::Session,
        template: &'a str,
        parameter: &'a str,
    ) -> RepositoryResult<QueryMatches<'a>> {
        let count_sql = format!("SELECT COUNT(*) FROM ({template})");
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(parameter)
            .fetch_one(&mut **session)
            .await
            .map_err(|err| RepositoryError::Query(err.to_string()))?;

        let rows = sqlx::query_as::<_, SearchRow>(template)
            .bind(parameter)
            .fetch(&mut **session)
            .map(|row| row.map_err(|err| RepositoryError::Query(err.to_string())))
            .boxed();

        Ok(QueryMatches {
            total: total.max(0) as u64,
            rows,
        })
    }

    async fn stats(&self, session: &mut Self::Session) -> RepositoryResult<RepositoryStats> {
        let object_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects")
            .fetch_one(&mut **session)
            .await?;
        let content_size =
            sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(size_bytes), 0) FROM datastreams")
                .fetch_one(&mut **session)
                .await?;
        Ok(RepositoryStats {
            object_count: object_count.max(0) as u64,
            content_size: content_size.max(0) as u64,
        })
    }

    async fn commit(&self, session: Self::Session) -> RepositoryResult<()> {
        session.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::content_from_bytes;
    use bytes::Bytes;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    /// A migrated in-memory repository whose blobs live in a temp directory.
    pub(crate) async fn test_repository() -> (SqliteRepository, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRepository::new(Arc::new(pool), dir.path());
        repo.migrate().await.unwrap();
        (repo, dir)
    }

    pub(crate) async fn insert_object(repo: &SqliteRepository, pid: &str, title: Option<&str>) {
        sqlx::query("INSERT INTO objects (pid, identifier, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(pid)
            .bind(pid)
            .bind(title)
            .bind(Utc::now())
            .execute(&*repo.db)
            .await
            .unwrap();
    }

    async fn put(
        repo: &SqliteRepository,
        session: &mut Transaction<'static, Sqlite>,
        dsid: &str,
        body: &'static str,
        expected: Option<&ContentDigest>,
    ) -> RepositoryResult<DatastreamRecord> {
        repo.create_or_replace_datastream(
            session,
            "obj1",
            dsid,
            "text/plain",
            content_from_bytes(Bytes::from_static(body.as_bytes())),
            expected,
        )
        .await
    }

    #[tokio::test]
    async fn stores_and_reads_back_content() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        let created = put(&repo, &mut session, "ds1", "hello", None).await.unwrap();
        repo.commit(session).await.unwrap();

        assert_eq!(created.size, 5);
        assert_eq!(
            created.content_digest.unwrap().to_string(),
            "urn:sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );

        let mut session = repo.begin().await.unwrap();
        let fetched = repo.get_datastream(&mut session, "obj1", "ds1").await.unwrap();
        assert_eq!(fetched.mime_type, "text/plain");
        assert_eq!(&fetched.content.read_all().await.unwrap()[..], b"hello");
        repo.get_object(&mut session, "obj1").await.unwrap();
    }

    #[tokio::test]
    async fn checksum_mismatch_stores_nothing() {
        let (repo, _dir) = test_repository().await;
        let wrong = ContentDigest::compute(DigestAlgorithm::Sha1, b"world");
        let mut session = repo.begin().await.unwrap();
        let err = put(&repo, &mut session, "dsX", "hello", Some(&wrong))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidChecksum { .. }));
        repo.commit(session).await.unwrap();

        let mut session = repo.begin().await.unwrap();
        let err = repo.get_datastream(&mut session, "obj1", "dsX").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn verifies_non_default_algorithms() {
        let (repo, _dir) = test_repository().await;
        let md5 = ContentDigest::compute(DigestAlgorithm::Md5, b"hello");
        let mut session = repo.begin().await.unwrap();
        let record = put(&repo, &mut session, "ds1", "hello", Some(&md5)).await.unwrap();
        assert_eq!(record.content_digest.unwrap().algorithm(), "sha1");

        let unsupported = ContentDigest::parse("urn:crc32:abcd").unwrap();
        let err = put(&repo, &mut session, "ds2", "hello", Some(&unsupported))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Digest(_)));
    }

    #[tokio::test]
    async fn sweep_removes_only_unreferenced_blobs() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        let gone = put(&repo, &mut session, "ds1", "hello", None).await.unwrap();
        let kept = put(&repo, &mut session, "ds2", "bye", None).await.unwrap();
        repo.commit(session).await.unwrap();

        let mut session = repo.begin().await.unwrap();
        repo.delete_datastream(&mut session, "obj1", "ds1").await.unwrap();
        repo.commit(session).await.unwrap();

        let stale = repo.base_path.join(INCOMING_DIR).join(".tmp-interrupted");
        std::fs::write(&stale, b"partial").unwrap();

        assert!(gone.content.path.exists());
        assert_eq!(repo.sweep_unreferenced_blobs().await.unwrap(), 1);
        assert!(!gone.content.path.exists());
        assert!(kept.content.path.exists());
        assert!(!stale.exists());

        let mut session = repo.begin().await.unwrap();
        let fetched = repo.get_datastream(&mut session, "obj1", "ds2").await.unwrap();
        assert_eq!(&fetched.content.read_all().await.unwrap()[..], b"bye");
        drop(session);

        assert_eq!(repo.sweep_unreferenced_blobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_session_discards_changes() {
        let (repo, _dir) = test_repository().await;
        {
            let mut session = repo.begin().await.unwrap();
            put(&repo, &mut session, "ds1", "hello", None).await.unwrap();
        }
        let mut session = repo.begin().await.unwrap();
        assert!(matches!(
            repo.get_object(&mut session, "obj1").await,
            Err(RepositoryError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn replace_keeps_created_date() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        let first = put(&repo, &mut session, "ds1", "hello", None).await.unwrap();
        let second = put(&repo, &mut session, "ds1", "world", None).await.unwrap();
        assert_eq!(first.created_date, second.created_date);
        assert_eq!(
            second.content_digest.unwrap().value(),
            "7c211433f02071597741e6ff5a8ea34789abbf43"
        );
    }

    #[tokio::test]
    async fn delete_of_absent_datastream_is_noop() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        repo.delete_datastream(&mut session, "obj1", "missing")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lists_datastreams_of_object() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        put(&repo, &mut session, "ds2", "b", None).await.unwrap();
        put(&repo, &mut session, "ds1", "a", None).await.unwrap();
        let ids = repo.list_datastream_ids(&mut session, "obj1").await.unwrap();
        assert_eq!(ids, ["ds1", "ds2"]);

        let err = repo.list_datastreams(&mut session, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rejects_unsafe_identifiers() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        for bad in ["", "..", "a/b", "a\nb"] {
            assert!(matches!(
                repo.get_datastream(&mut session, "obj1", bad).await,
                Err(RepositoryError::InvalidIdentifier(_))
            ));
        }
    }

    #[tokio::test]
    async fn query_reports_full_count() {
        let (repo, _dir) = test_repository().await;
        insert_object(&repo, "foo:1", None).await;
        insert_object(&repo, "bar:1", Some("all about foo")).await;
        insert_object(&repo, "baz:1", Some("unrelated")).await;

        let mut session = repo.begin().await.unwrap();
        let matches = repo
            .execute_query(
                &mut session,
                "SELECT pid, '/objects/' || pid AS path FROM objects \
                 WHERE identifier LIKE ?1 OR title LIKE ?1",
                "%foo%",
            )
            .await
            .unwrap();
        assert_eq!(matches.total, 2);
        let rows: Vec<SearchRow> = matches.rows.try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.path == "/objects/bar:1"));
    }

    #[tokio::test]
    async fn stats_sum_content_sizes() {
        let (repo, _dir) = test_repository().await;
        let mut session = repo.begin().await.unwrap();
        put(&repo, &mut session, "ds1", "hello", None).await.unwrap();
        put(&repo, &mut session, "ds2", "hi", None).await.unwrap();
        let stats = repo.stats(&mut session).await.unwrap();
        assert_eq!(stats.object_count, 1);
        assert_eq!(stats.content_size, 7);
    }
}
