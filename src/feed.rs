//! Incremental pagination for the image feed.
//!
//! [`FeedController`] is the single writer of the feed state. The UI feeds it
//! scroll metrics; when the viewport nears the bottom it hands back the next
//! [`PageRequest`] to dispatch, and the fetch result is applied with
//! [`FeedController::complete`].

use std::time::{Duration, Instant};

use crate::serving::Post;

pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Distance from the bottom of the document, in pixels, at which the next
/// page starts loading.
pub const DEFAULT_PREFETCH_MARGIN: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to load page {page}: {error:#}")]
    Transport { page: u32, error: anyhow::Error },
    #[error("no page request is in flight")]
    NoFetchInFlight,
}

/// Scroll geometry of the rendered feed, all in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollMetrics {
    pub scroll_height: u32,
    pub scroll_top: u32,
    pub viewport_height: u32,
}

impl ScrollMetrics {
    /// Pixels left below the viewport. Negative when overscrolled.
    pub fn distance_to_bottom(&self) -> i64 {
        i64::from(self.scroll_height)
            - (i64::from(self.scroll_top) + i64::from(self.viewport_height))
    }

    pub fn is_near_bottom(&self, margin: u32) -> bool {
        self.distance_to_bottom() < i64::from(margin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching { page: u32 },
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    pub page: u32,
    pub received: usize,
    pub ended: bool,
}

#[derive(Debug)]
pub struct FeedController {
    items: Vec<Post>,
    cursor: u32,
    page_size: usize,
    prefetch_margin: u32,
    phase: Phase,
    fetch_started: Option<Instant>,
}

impl FeedController {
    /// Starts a session already fetching page 1; dispatch
    /// [`FeedController::pending_request`] to perform the initial load.
    pub fn new(page_size: usize, prefetch_margin: u32) -> Self {
        Self {
            items: Vec::new(),
            cursor: 1,
            page_size: page_size.max(1),
            prefetch_margin,
            phase: Phase::Fetching { page: 1 },
            fetch_started: Some(Instant::now()),
        }
    }

    pub fn items(&self) -> &[Post] {
        &self.items
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.phase, Phase::Fetching { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.phase, Phase::Ended)
    }

    /// The request belonging to the fetch currently in flight, if any.
    pub fn pending_request(&self) -> Option<PageRequest> {
        match self.phase {
            Phase::Fetching { page } => Some(PageRequest {
                page,
                limit: self.page_size,
            }),
            _ => None,
        }
    }

    /// Reacts to a scroll event. Returns the page to fetch when the viewport
    /// is within the prefetch margin of the bottom and the feed is idle;
    /// otherwise does nothing.
    pub fn request_next_page_if_needed(&mut self, metrics: ScrollMetrics) -> Option<PageRequest> {
        if self.phase != Phase::Idle {
            return None;
        }
        if !metrics.is_near_bottom(self.prefetch_margin) {
            return None;
        }
        self.phase = Phase::Fetching { page: self.cursor };
        self.fetch_started = Some(Instant::now());
        self.pending_request()
    }

    /// Applies the result of the in-flight fetch.
    ///
    /// On success the posts are appended, the cursor advances and the feed
    /// ends if the page came back short. On failure only the fetching state
    /// is cleared, so the same page is asked for again on a later scroll.
    pub fn complete(&mut self, result: anyhow::Result<Vec<Post>>) -> Result<PageOutcome, FeedError> {
        let Phase::Fetching { page } = self.phase else {
            return Err(FeedError::NoFetchInFlight);
        };
        self.fetch_started = None;

        match result {
            Ok(posts) => {
                let received = posts.len();
                let ended = received < self.page_size;
                self.items.extend(posts);
                self.cursor += 1;
                self.phase = if ended { Phase::Ended } else { Phase::Idle };
                Ok(PageOutcome {
                    page,
                    received,
                    ended,
                })
            }
            Err(error) => {
                self.phase = Phase::Idle;
                Err(FeedError::Transport { page, error })
            }
        }
    }

    /// Whether the in-flight fetch has been outstanding longer than `limit`.
    pub fn is_stalled(&self, now: Instant, limit: Duration) -> bool {
        match (self.phase, self.fetch_started) {
            (Phase::Fetching { .. }, Some(started)) => now.saturating_duration_since(started) > limit,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn posts(start: i64, count: usize) -> Vec<Post> {
        (0..count as i64)
            .map(|offset| Post {
                id: start + offset,
                image_url: format!("http://img/{}.jpg", start + offset),
                name: String::new(),
                description: String::new(),
                author_id: 0,
                created_timestamp: 0,
            })
            .collect()
    }

    fn near_bottom() -> ScrollMetrics {
        ScrollMetrics {
            scroll_height: 1000,
            scroll_top: 450,
            viewport_height: 500,
        }
    }

    fn far_from_bottom() -> ScrollMetrics {
        ScrollMetrics {
            scroll_height: 5000,
            scroll_top: 0,
            viewport_height: 500,
        }
    }

    #[test]
    fn starts_fetching_first_page() {
        let feed = FeedController::new(DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_MARGIN);
        assert!(feed.is_fetching());
        assert!(!feed.is_ended());
        assert_eq!(feed.cursor(), 1);
        assert!(feed.items().is_empty());
        assert_eq!(
            feed.pending_request(),
            Some(PageRequest { page: 1, limit: 20 })
        );
    }

    #[test]
    fn full_page_advances_cursor() {
        let mut feed = FeedController::new(20, 100);
        let outcome = feed.complete(Ok(posts(1, 20))).unwrap();
        assert_eq!(
            outcome,
            PageOutcome {
                page: 1,
                received: 20,
                ended: false
            }
        );
        assert_eq!(feed.cursor(), 2);
        assert_eq!(feed.items().len(), 20);
        assert!(!feed.is_ended());
        assert_eq!(feed.phase(), Phase::Idle);
    }

    #[test]
    fn short_page_ends_feed_for_good() {
        let mut feed = FeedController::new(20, 100);
        feed.complete(Ok(posts(1, 20))).unwrap();
        assert!(feed.request_next_page_if_needed(near_bottom()).is_some());
        let outcome = feed.complete(Ok(posts(21, 7))).unwrap();
        assert!(outcome.ended);
        assert!(feed.is_ended());

        for _ in 0..5 {
            assert_eq!(feed.request_next_page_if_needed(near_bottom()), None);
        }
        assert_eq!(feed.items().len(), 27);
        assert_eq!(feed.cursor(), 3);
        assert!(feed.is_ended());
    }

    #[test]
    fn empty_first_page_ends_feed() {
        let mut feed = FeedController::new(20, 100);
        let outcome = feed.complete(Ok(Vec::new())).unwrap();
        assert!(outcome.ended);
        assert_eq!(feed.phase(), Phase::Ended);
        assert_eq!(feed.cursor(), 2);
    }

    #[test]
    fn transport_error_only_clears_fetching() {
        let mut feed = FeedController::new(20, 100);
        feed.complete(Ok(posts(1, 20))).unwrap();
        feed.request_next_page_if_needed(near_bottom()).unwrap();

        let err = feed.complete(Err(anyhow!("connection refused"))).unwrap_err();
        assert!(matches!(err, FeedError::Transport { page: 2, .. }));
        assert!(!feed.is_fetching());
        assert!(!feed.is_ended());
        assert_eq!(feed.cursor(), 2);
        assert_eq!(feed.items().len(), 20);

        // The same page is requested again on the next qualifying scroll.
        assert_eq!(
            feed.request_next_page_if_needed(near_bottom()),
            Some(PageRequest { page: 2, limit: 20 })
        );
    }

    #[test]
    fn scroll_events_while_fetching_are_ignored() {
        let mut feed = FeedController::new(20, 100);
        for _ in 0..10 {
            assert_eq!(feed.request_next_page_if_needed(near_bottom()), None);
        }
        feed.complete(Ok(posts(1, 20))).unwrap();
        assert!(feed.request_next_page_if_needed(near_bottom()).is_some());
        for _ in 0..10 {
            assert_eq!(feed.request_next_page_if_needed(near_bottom()), None);
        }
        assert_eq!(feed.pending_request(), Some(PageRequest { page: 2, limit: 20 }));
    }

    #[test]
    fn scroll_far_from_bottom_does_not_fetch() {
        let mut feed = FeedController::new(20, 100);
        feed.complete(Ok(posts(1, 20))).unwrap();
        assert_eq!(feed.request_next_page_if_needed(far_from_bottom()), None);
        assert_eq!(feed.phase(), Phase::Idle);
    }

    #[test]
    fn margin_is_exclusive() {
        let exactly_margin = ScrollMetrics {
            scroll_height: 1000,
            scroll_top: 400,
            viewport_height: 500,
        };
        assert_eq!(exactly_margin.distance_to_bottom(), 100);
        assert!(!exactly_margin.is_near_bottom(100));
        assert!(exactly_margin.is_near_bottom(101));

        let overscrolled = ScrollMetrics {
            scroll_height: 100,
            scroll_top: 0,
            viewport_height: 500,
        };
        assert!(overscrolled.distance_to_bottom() < 0);
        assert!(overscrolled.is_near_bottom(0));
    }

    #[test]
    fn items_are_concatenated_in_arrival_order() {
        let mut feed = FeedController::new(3, 100);
        let mut expected = Vec::new();
        for page in 0..4 {
            if page > 0 {
                feed.request_next_page_if_needed(near_bottom()).unwrap();
            }
            let batch = posts(page * 10, 3);
            expected.extend(batch.iter().map(|post| post.id));
            let before = feed.cursor();
            feed.complete(Ok(batch)).unwrap();
            assert_eq!(feed.cursor(), before + 1);
        }
        let ids: Vec<i64> = feed.items().iter().map(|post| post.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn completion_without_fetch_is_rejected() {
        let mut feed = FeedController::new(20, 100);
        feed.complete(Ok(posts(1, 20))).unwrap();
        let err = feed.complete(Ok(posts(21, 20))).unwrap_err();
        assert!(matches!(err, FeedError::NoFetchInFlight));
        assert_eq!(feed.items().len(), 20);
        assert_eq!(feed.cursor(), 2);
    }

    #[test]
    fn stall_detection_only_while_fetching() {
        let mut feed = FeedController::new(20, 100);
        let later = Instant::now() + Duration::from_secs(60);
        assert!(feed.is_stalled(later, Duration::from_secs(30)));
        assert!(!feed.is_stalled(Instant::now(), Duration::from_secs(30)));
        feed.complete(Ok(posts(1, 20))).unwrap();
        assert!(!feed.is_stalled(later, Duration::from_secs(30)));
    }
}
