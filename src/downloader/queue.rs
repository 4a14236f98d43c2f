//! Ordered work queue of download requests with a rate-limited dequeue.

use std::collections::VecDeque;
use std::time::Duration;

use crate::downloader::errors::QueueError;
use crate::downloader::timer::RateLimiter;
use crate::models::DownloadRequest;

/// FIFO queue of [`DownloadRequest`]s.
///
/// Every dequeue waits on the shared [`RateLimiter`] first, so no two requests
/// leave the queue closer together than the configured interval.
#[derive(Debug)]
pub struct FetchQueue {
    pending: VecDeque<DownloadRequest>,
    limiter: RateLimiter,
}

impl FetchQueue {
    pub fn new(interval: Duration) -> Self {
        Self::with_limiter(RateLimiter::new(interval))
    }

    pub fn with_limiter(limiter: RateLimiter) -> Self {
        Self {
            pending: VecDeque::new(),
            limiter,
        }
    }

    pub fn enqueue<I>(&mut self, requests: I)
    where
        I: IntoIterator<Item = DownloadRequest>,
    {
        self.pending.extend(requests);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Pop the oldest request once the rate limit allows it.
    pub async fn dequeue_rate_limited(&mut self) -> Result<DownloadRequest, QueueError> {
        if self.pending.is_empty() {
            return Err(QueueError::Empty);
        }
        self.limiter.await_elapsed().await;
        let request = self.pending.pop_front().ok_or(QueueError::Empty)?;
        self.limiter.reset();
        Ok(request)
    }

    /// Pop the most recently enqueued request once the rate limit allows it.
    pub async fn dequeue_newest_rate_limited(&mut self) -> Result<DownloadRequest, QueueError> {
        if self.pending.is_empty() {
            return Err(QueueError::Empty);
        }
        self.limiter.await_elapsed().await;
        let request = self.pending.pop_back().ok_or(QueueError::Empty)?;
        self.limiter.reset();
        Ok(request)
    }

    /// Wait for the rate limit, then claim the slot for a request made outside the queue.
    pub async fn wait_turn(&mut self) {
        self.limiter.await_elapsed().await;
        self.limiter.reset();
    }

    /// Drop every pending request without fetching it.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn request(n: usize) -> DownloadRequest {
        DownloadRequest::new(format!("https://example.com/{n}.txt"), format!("{n}.txt"))
    }

    #[tokio::test]
    async fn test_dequeue_preserves_insertion_order() {
        let mut queue = FetchQueue::new(Duration::ZERO);
        queue.enqueue((0..3).map(request));

        assert_eq!(queue.len(), 3);
        for n in 0..3 {
            assert_eq!(queue.dequeue_rate_limited().await.unwrap(), request(n));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_newest_pops_tail() {
        let mut queue = FetchQueue::new(Duration::ZERO);
        queue.enqueue((0..3).map(request));

        assert_eq!(queue.dequeue_newest_rate_limited().await.unwrap(), request(2));
        assert_eq!(queue.dequeue_rate_limited().await.unwrap(), request(0));
    }

    #[tokio::test]
    async fn test_empty_queue_reports_empty() {
        let mut queue = FetchQueue::new(Duration::from_secs(60));
        assert_eq!(queue.dequeue_rate_limited().await, Err(QueueError::Empty));
        assert_eq!(queue.dequeue_newest_rate_limited().await, Err(QueueError::Empty));
    }

    #[tokio::test]
    async fn test_consecutive_dequeues_respect_interval() {
        let interval = Duration::from_millis(60);
        let mut queue = FetchQueue::new(interval);
        queue.enqueue((0..3).map(request));

        let mut stamps = Vec::new();
        while queue.dequeue_rate_limited().await.is_ok() {
            stamps.push(Instant::now());
        }

        assert_eq!(stamps.len(), 3);
        let slack = Duration::from_millis(5);
        for pair in stamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) + slack >= interval);
        }
    }

    #[tokio::test]
    async fn test_wait_turn_shares_interval_with_dequeue() {
        let interval = Duration::from_millis(60);
        let mut queue = FetchQueue::new(interval);
        queue.enqueue([request(0)]);

        let started = Instant::now();
        queue.wait_turn().await;
        assert!(started.elapsed() < interval);

        queue.dequeue_rate_limited().await.unwrap();
        queue.wait_turn().await;
        assert!(started.elapsed() + Duration::from_millis(5) >= interval * 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_clear_discards_pending() {
        let mut queue = FetchQueue::new(Duration::ZERO);
        queue.enqueue((0..5).map(request));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue_rate_limited().await, Err(QueueError::Empty));
    }
}
