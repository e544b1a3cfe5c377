//! Keyword search over object metadata with offset/page-size windowing.

use crate::{
    models::search::SearchResult,
    repository::{RepositoryError, RepositoryGateway},
};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error};

/// Matches the bound pattern against the identifier and title fields.
/// `?1` is the only placeholder; only its bound value varies per call.
pub const SEARCH_QUERY: &str = "SELECT pid, '/objects/' || pid AS path FROM objects \
     WHERE identifier LIKE ?1 OR title LIKE ?1";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("page size must be greater than zero")]
    InvalidPageSize,
    #[error("search query failed: {0}")]
    Query(#[source] RepositoryError),
}

/// Wrap free-text terms in wildcards on both ends.
pub fn search_pattern(terms: &str) -> String {
    format!("%{terms}%")
}

pub struct SearchExecutor<'g, G: RepositoryGateway> {
    gateway: &'g G,
}

impl<'g, G: RepositoryGateway> SearchExecutor<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self { gateway }
    }

    /// Skip `offset` matches, then collect up to `page_size` more.
    ///
    /// `total_matches` always covers the full match set. A row that fails to
    /// load is logged and dropped but still occupies its slot in the window.
    pub async fn search(
        &self,
        session: &mut G::Session,
        terms: &str,
        offset: usize,
        page_size: usize,
    ) -> Result<SearchResult, SearchError> {
        if page_size == 0 {
            return Err(SearchError::InvalidPageSize);
        }

        let pattern = search_pattern(terms);
        debug!("Searching for {} (statement is {})", terms, SEARCH_QUERY);

        let matches = self
            .gateway
            .execute_query(session, SEARCH_QUERY, &pattern)
            .await
            .map_err(SearchError::Query)?;
        debug!("{} results found", matches.total);

        let mut window = matches.rows.skip(offset).take(page_size);
        let mut rows = Vec::with_capacity(page_size.min(matches.total as usize));
        while let Some(row) = window.next().await {
            match row {
                Ok(row) => rows.push(row),
                Err(err) => error!("skipping unreadable search match: {}", err),
            }
        }

        Ok(SearchResult {
            terms: terms.to_string(),
            offset,
            page_size,
            total_matches: matches.total,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{datastream::DatastreamRecord, digest::ContentDigest, search::SearchRow},
        repository::{
            ContentStream, ObjectHandle, QueryMatches, RepositoryResult, RepositoryStats,
            sqlite::tests::{insert_object, test_repository},
        },
    };
    use async_trait::async_trait;
    use futures::stream;

    /// Gateway that answers every query with a fixed script of rows; `None`
    /// entries produce row-level faults.
    struct ScriptedQuery {
        rows: Vec<Option<&'static str>>,
        fail: bool,
    }

    #[async_trait]
    impl RepositoryGateway for ScriptedQuery {
        type Session = ();

        async fn begin(&self) -> RepositoryResult<()> {
            Ok(())
        }

        async fn get_object(&self, _: &mut (), _: &str) -> RepositoryResult<ObjectHandle> {
            unimplemented!()
        }

        async fn get_datastream(
            &self,
            _: &mut (),
            _: &str,
            _: &str,
        ) -> RepositoryResult<DatastreamRecord> {
            unimplemented!()
        }

        async fn create_or_replace_datastream(
            &self,
            _: &mut (),
            _: &str,
            _: &str,
            _: &str,
            _: ContentStream,
            _: Option<&ContentDigest>,
        ) -> RepositoryResult<DatastreamRecord> {
            unimplemented!()
        }

        async fn delete_datastream(&self, _: &mut (), _: &str, _: &str) -> RepositoryResult<()> {
            unimplemented!()
        }

        async fn list_datastreams(
            &self,
            _: &mut (),
            _: &str,
        ) -> RepositoryResult<Vec<DatastreamRecord>> {
            unimplemented!()
        }

        async fn execute_query<'a>(
            &'a self,
            _: &'a mut (),
            template: &'a str,
            parameter: &'a str,
        ) -> RepositoryResult<QueryMatches<'a>> {
            assert_eq!(template, SEARCH_QUERY);
            assert!(parameter.starts_with('%') && parameter.ends_with('%'));
            if self.fail {
                return Err(RepositoryError::Query("syntax error".into()));
            }
            let rows = self.rows.iter().map(|row| match row {
                Some(pid) => Ok(SearchRow {
                    pid: pid.to_string(),
                    path: format!("/objects/{pid}"),
                }),
                None => Err(RepositoryError::Query("unreadable row".into())),
            });
            Ok(QueryMatches {
                total: self.rows.len() as u64,
                rows: stream::iter(rows.collect::<Vec<_>>()).boxed(),
            })
        }

        async fn stats(&self, _: &mut ()) -> RepositoryResult<RepositoryStats> {
            unimplemented!()
        }

        async fn commit(&self, _: ()) -> RepositoryResult<()> {
            Ok(())
        }
    }

    fn scripted(rows: Vec<Option<&'static str>>) -> ScriptedQuery {
        ScriptedQuery { rows, fail: false }
    }

    #[tokio::test]
    async fn window_length_matches_remaining_total() {
        let gateway = scripted(vec![Some("a"), Some("b"), Some("c"), Some("d"), Some("e")]);
        let executor = SearchExecutor::new(&gateway);
        for offset in 0..7 {
            for page_size in 1..7 {
                let result = executor.search(&mut (), "x", offset, page_size).await.unwrap();
                let expected = page_size.min(5usize.saturating_sub(offset));
                assert_eq!(result.rows.len(), expected, "offset={offset} size={page_size}");
                assert_eq!(result.total_matches, 5);
            }
        }
    }

    #[tokio::test]
    async fn offset_one_page_one_of_three() {
        let gateway = scripted(vec![Some("a"), Some("b"), Some("c")]);
        let result = SearchExecutor::new(&gateway)
            .search(&mut (), "foo", 1, 1)
            .await
            .unwrap();
        assert_eq!(result.total_matches, 3);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].pid, "b");
    }

    #[tokio::test]
    async fn row_faults_are_skipped() {
        let gateway = scripted(vec![Some("a"), None, Some("c"), Some("d")]);
        let result = SearchExecutor::new(&gateway)
            .search(&mut (), "x", 0, 3)
            .await
            .unwrap();
        let pids: Vec<_> = result.rows.iter().map(|r| r.pid.as_str()).collect();
        assert_eq!(pids, ["a", "c"]);
        assert_eq!(result.total_matches, 4);
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let gateway = scripted(vec![Some("a")]);
        let err = SearchExecutor::new(&gateway)
            .search(&mut (), "x", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidPageSize));
    }

    #[tokio::test]
    async fn query_failure_is_fatal() {
        let gateway = ScriptedQuery {
            rows: vec![],
            fail: true,
        };
        let err = SearchExecutor::new(&gateway)
            .search(&mut (), "x", 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Query(_)));
    }

    #[tokio::test]
    async fn searches_identifier_and_title_in_sqlite() {
        let (repo, _dir) = test_repository().await;
        insert_object(&repo, "foo:1", None).await;
        insert_object(&repo, "other:1", Some("A Foo Story")).await;
        insert_object(&repo, "other:2", Some("unrelated")).await;

        let mut session = repo.begin().await.unwrap();
        let result = SearchExecutor::new(&repo)
            .search(&mut session, "foo", 0, 10)
            .await
            .unwrap();
        assert_eq!(result.total_matches, 2);
        let mut pids: Vec<_> = result.rows.iter().map(|r| r.pid.clone()).collect();
        pids.sort();
        assert_eq!(pids, ["foo:1", "other:1"]);
    }
}
