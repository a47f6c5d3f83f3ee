use std::sync::Arc;

use anyhow::{Context, Result};

use crate::serving::{self, Post, SearchQuery, User};

/// Where a feed session pulls its pages from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FeedSource {
    #[default]
    Latest,
    Search(SearchQuery),
}

impl FeedSource {
    pub fn label(&self) -> String {
        match self {
            FeedSource::Latest => "latest posts".to_string(),
            FeedSource::Search(query) => format!("search {}", query.label()),
        }
    }
}

pub trait FeedService: Send + Sync {
    fn load_page(&self, source: &FeedSource, page: u32, limit: usize) -> Result<Vec<Post>>;
}

/// A post together with its author, for the details popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    pub post: Post,
    pub author: Option<User>,
}

pub trait PostService: Send + Sync {
    fn load_post(&self, post_id: i64) -> Result<PostDetail>;
}

pub struct ServingFeedService {
    client: Arc<serving::Client>,
}

impl ServingFeedService {
    pub fn new(client: Arc<serving::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ServingFeedService {
    fn load_page(&self, source: &FeedSource, page: u32, limit: usize) -> Result<Vec<Post>> {
        match source {
            FeedSource::Latest => self
                .client
                .request_feed(page, limit)
                .context("fetch feed page"),
            FeedSource::Search(query) => self
                .client
                .search_posts(query, page, limit)
                .context("fetch search page"),
        }
    }
}

pub struct ServingPostService {
    client: Arc<serving::Client>,
}

impl ServingPostService {
    pub fn new(client: Arc<serving::Client>) -> Self {
        Self { client }
    }
}

impl PostService for ServingPostService {
    fn load_post(&self, post_id: i64) -> Result<PostDetail> {
        let post = self.client.request_post(post_id).context("fetch post")?;
        // Posts may outlive their author; a missing user is not an error here.
        let author = if post.author_id > 0 {
            self.client.request_user(post.author_id).ok()
        } else {
            None
        };
        Ok(PostDetail { post, author })
    }
}

/// Serves a finite, generated feed. Used by tests and offline runs.
pub struct MockFeedService {
    total: usize,
}

impl MockFeedService {
    pub fn new(total: usize) -> Self {
        Self { total }
    }
}

impl Default for MockFeedService {
    fn default() -> Self {
        Self::new(47)
    }
}

impl FeedService for MockFeedService {
    fn load_page(&self, source: &FeedSource, page: u32, limit: usize) -> Result<Vec<Post>> {
        let start = limit.saturating_mul(page.saturating_sub(1) as usize);
        // Filter before slicing so only the last page of matches comes back short.
        let posts = (1..=self.total as i64)
            .map(mock_post)
            .filter(|post| match source {
                FeedSource::Latest => true,
                FeedSource::Search(query) => matches_query(post, query),
            })
            .skip(start)
            .take(limit)
            .collect();
        Ok(posts)
    }
}

fn matches_query(post: &Post, query: &SearchQuery) -> bool {
    let contains = |field: &str, needle: &str| {
        let needle = needle.trim();
        needle.is_empty() || field.to_lowercase().contains(&needle.to_lowercase())
    };
    contains(&post.name, &query.name)
        && contains(&post.description, &query.description)
        && query
            .author_id
            .filter(|id| *id != 0)
            .map_or(true, |id| post.author_id == id)
}

#[derive(Default)]
pub struct MockPostService;

impl PostService for MockPostService {
    fn load_post(&self, post_id: i64) -> Result<PostDetail> {
        let post = mock_post(post_id);
        Ok(PostDetail {
            author: Some(User {
                id: post.author_id,
                name: format!("sample author {}", post.author_id),
                bio: "Sample author for offline browsing.".into(),
                avatar_url: String::new(),
            }),
            post,
        })
    }
}

const MOCK_AUTHORS: i64 = 5;

fn mock_post(id: i64) -> Post {
    Post {
        id,
        image_url: format!("https://picsum.photos/id/{id}/600/800"),
        name: format!("Sample post {id}"),
        description: "Sample content provided for offline browsing.".into(),
        author_id: (id - 1) % MOCK_AUTHORS + 1,
        created_timestamp: 1_700_000_000 + id * 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_feed_pages_through_total() {
        let service = MockFeedService::new(45);
        let source = FeedSource::Latest;
        assert_eq!(service.load_page(&source, 1, 20).unwrap().len(), 20);
        let second = service.load_page(&source, 2, 20).unwrap();
        assert_eq!(second.first().map(|post| post.id), Some(21));
        assert_eq!(service.load_page(&source, 3, 20).unwrap().len(), 5);
        assert!(service.load_page(&source, 4, 20).unwrap().is_empty());
    }

    #[test]
    fn mock_search_pages_over_all_matches() {
        let service = MockFeedService::new(100);
        let source = FeedSource::Search(SearchQuery::parse("post 1"));
        // Posts 1, 10..=19 and 100.
        let first = service.load_page(&source, 1, 5).unwrap();
        assert_eq!(
            first.iter().map(|post| post.id).collect::<Vec<_>>(),
            vec![1, 10, 11, 12, 13]
        );
        assert_eq!(service.load_page(&source, 2, 5).unwrap().len(), 5);
        let last = service.load_page(&source, 3, 5).unwrap();
        assert_eq!(
            last.iter().map(|post| post.id).collect::<Vec<_>>(),
            vec![19, 100]
        );
        assert!(service.load_page(&source, 4, 5).unwrap().is_empty());
    }

    #[test]
    fn mock_search_filters_by_author() {
        let service = MockFeedService::new(100);
        let source = FeedSource::Search(SearchQuery::parse("@2"));
        let first = service.load_page(&source, 1, 20).unwrap();
        assert_eq!(first.len(), 20);
        assert!(first.iter().all(|post| post.author_id == 2));
        assert!(service.load_page(&source, 2, 20).unwrap().is_empty());

        let detail = MockPostService.load_post(first[0].id).unwrap();
        assert_eq!(detail.author.map(|user| user.id), Some(2));
    }

    #[test]
    fn source_labels() {
        assert_eq!(FeedSource::Latest.label(), "latest posts");
        let search = FeedSource::Search(SearchQuery::parse("cats"));
        assert_eq!(search.label(), "search \"cats\"");
    }
}
