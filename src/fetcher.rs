use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{Item, ItemId};
use crate::source::SourceHandle;

/// Fetches many items with a ceiling on outstanding requests.
#[derive(Clone)]
pub struct BatchFetcher {
    source: SourceHandle,
    max_concurrent: usize,
}

impl BatchFetcher {
    pub fn new(source: SourceHandle, max_concurrent: usize) -> Self {
        Self {
            source,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// One slot per input id, in input order. A failed fetch leaves its slot
    /// `None`; only cancellation fails the whole batch.
    pub async fn fetch_many(
        &self,
        ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Item>>, FetchError> {
        let results = self.fetch_each(ids, cancel).await?;
        Ok(results.into_iter().map(Result::ok).collect())
    }

    /// Like `fetch_many`, but each slot keeps its own error so callers can
    /// tell a deleted item from an outage.
    pub async fn fetch_each(
        &self,
        ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<Item, FetchError>>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let source = &self.source;
        // `buffered` yields in input order however completions interleave
        let batch = stream::iter(ids.iter().copied())
            .map(|id| async move {
                let result = source.fetch_item(id).await;
                if let Err(e) = &result {
                    debug!(item_id = id, error = %e, "Item fetch failed in batch");
                }
                result
            })
            .buffered(self.max_concurrent)
            .collect::<Vec<_>>();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            results = batch => Ok(results),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use std::sync::Arc;
    use std::time::Duration;

    fn source_with(ids: &[ItemId]) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        for &id in ids {
            source.insert_item(Item::story(id, "a", &format!("story {}", id)));
        }
        source
    }

    #[tokio::test]
    async fn results_follow_input_order_despite_completion_order() {
        let source = source_with(&[1, 2, 3]);
        source.set_delay(1, Duration::from_millis(40));
        source.set_delay(2, Duration::from_millis(20));
        let fetcher = BatchFetcher::new(source.clone(), 10);

        let results = fetcher.fetch_many(&[1, 2, 3], &CancellationToken::new()).await.unwrap();
        let ids: Vec<Option<ItemId>> = results.iter().map(|r| r.as_ref().map(|i| i.id)).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn failed_item_leaves_a_hole() {
        let source = source_with(&[1, 2, 3]);
        source.fail_item(2, true);
        let fetcher = BatchFetcher::new(source.clone(), 10);

        let results = fetcher.fetch_many(&[1, 2, 3, 4], &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
        assert!(results[3].is_none());
    }

    #[tokio::test]
    async fn duplicates_are_fetched_independently() {
        let source = source_with(&[7]);
        let fetcher = BatchFetcher::new(source.clone(), 4);

        let results = fetcher.fetch_many(&[7, 7, 7], &CancellationToken::new()).await.unwrap();
        assert!(results.iter().all(|r| r.as_ref().map(|i| i.id) == Some(7)));
        assert_eq!(source.item_calls(), 3);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_ceiling() {
        let ids: Vec<ItemId> = (1..=25).collect();
        let source = source_with(&ids);
        for &id in &ids {
            source.set_delay(id, Duration::from_millis(5));
        }
        let fetcher = BatchFetcher::new(source.clone(), 3);

        let results = fetcher.fetch_many(&ids, &CancellationToken::new()).await.unwrap();
        assert_eq!(results.len(), 25);
        assert!(source.peak_in_flight() <= 3);
        assert!(source.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn cancellation_fails_the_batch() {
        let source = source_with(&[1, 2]);
        source.set_delay(1, Duration::from_secs(30));
        let fetcher = BatchFetcher::new(source.clone(), 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetcher.fetch_many(&[1, 2], &cancel).await;
        assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_running_batch_returns_promptly() {
        let source = source_with(&[1, 2, 3]);
        source.set_delay(1, Duration::from_secs(30));
        let fetcher = BatchFetcher::new(source.clone(), 2);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), fetcher.fetch_many(&[1, 2, 3], &cancel))
            .await
            .expect("batch kept running after cancel");
        assert_eq!(result.unwrap_err(), FetchError::Cancelled);
        // 2 finished but is held behind 1, so 3 never started
        assert_eq!(source.item_calls(), 2);
    }

    #[tokio::test]
    async fn per_slot_errors_keep_their_kind() {
        let source = source_with(&[1]);
        source.fail_item(2, true);
        let fetcher = BatchFetcher::new(source.clone(), 4);

        let results = fetcher.fetch_each(&[1, 2, 3], &CancellationToken::new()).await.unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(FetchError::Transient(_))));
        assert!(matches!(results[2], Err(FetchError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let source = source_with(&[]);
        let fetcher = BatchFetcher::new(source.clone(), 2);
        assert!(fetcher.fetch_many(&[], &CancellationToken::new()).await.unwrap().is_empty());
        assert_eq!(source.item_calls(), 0);
    }
}
