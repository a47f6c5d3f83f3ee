use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost/serving";
/// Largest `limit` the serving API accepts for feed and search pages.
pub const MAX_PAGE_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ServingError {
    #[error("serving API returned status {status} for {endpoint}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("search needs at least one of name, description or author")]
    MissingSearchFilter,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub image_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author_id: i64,
    #[serde(default)]
    pub created_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// Filters for `searchPosts`. Empty fields are left out of the query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SearchQuery {
    pub name: String,
    pub description: String,
    pub author_id: Option<i64>,
}

impl SearchQuery {
    /// Builds a query from free text typed in the search prompt. `@123`
    /// searches by author id, anything else matches post names.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix('@') {
            if let Ok(author_id) = rest.trim().parse::<i64>() {
                return Self {
                    author_id: Some(author_id),
                    ..Default::default()
                };
            }
        }
        Self {
            name: input.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty()
            && self.description.trim().is_empty()
            && self.author_id.unwrap_or(0) == 0
    }

    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if !self.name.trim().is_empty() {
            parts.push(format!("\"{}\"", self.name.trim()));
        }
        if !self.description.trim().is_empty() {
            parts.push(format!("description \"{}\"", self.description.trim()));
        }
        if let Some(author_id) = self.author_id.filter(|id| *id != 0) {
            parts.push(format!("author {author_id}"));
        }
        parts.join(", ")
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("serving client user agent required");
        }
        let raw_base = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL
        } else {
            config.base_url.trim()
        };
        let base_url = parse_base_url(raw_base)?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("serving: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn request_feed(&self, page: u32, limit: usize) -> Result<Vec<Post>> {
        let mut url = self.endpoint("requestFeed")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_json("requestFeed", url)
    }

    pub fn search_posts(&self, query: &SearchQuery, page: u32, limit: usize) -> Result<Vec<Post>> {
        if query.is_empty() {
            bail!(ServingError::MissingSearchFilter);
        }
        let mut url = self.endpoint("searchPosts")?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.name.trim().is_empty() {
                pairs.append_pair("name", query.name.trim());
            }
            if !query.description.trim().is_empty() {
                pairs.append_pair("description", query.description.trim());
            }
            if let Some(author_id) = query.author_id.filter(|id| *id != 0) {
                pairs.append_pair("author_id", &author_id.to_string());
            }
            pairs
                .append_pair("page", &page.to_string())
                .append_pair("limit", &limit.to_string());
        }
        self.get_json("searchPosts", url)
    }

    pub fn request_post(&self, post_id: i64) -> Result<Post> {
        let mut url = self.endpoint("requestPost")?;
        url.query_pairs_mut()
            .append_pair("post_id", &post_id.to_string());
        self.get_json("requestPost", url)
    }

    pub fn request_user(&self, user_id: i64) -> Result<User> {
        let mut url = self.endpoint("requestUser")?;
        url.query_pairs_mut()
            .append_pair("user_id", &user_id.to_string());
        self.get_json("requestUser", url)
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(name)
            .with_context(|| format!("serving: build {name} url"))
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &'static str, url: Url) -> Result<T> {
        debug!(%url, "serving request");
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("serving: request {endpoint}"))?;
        let response = ensure_success(endpoint, response)?;
        response
            .json()
            .with_context(|| format!("serving: decode {endpoint} response"))
    }
}

fn ensure_success(endpoint: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        bail!(ServingError::Status { endpoint, status });
    }
    Ok(response)
}

/// Parses the API root, forcing a trailing slash so endpoints join under it
/// instead of replacing its last segment.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).with_context(|| format!("invalid base url {raw:?}"))?;
    if url.cannot_be_a_base() {
        bail!("base url {raw:?} cannot hold endpoint paths");
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use tiny_http::{Header, Response as HttpResponse, Server};

    /// Serves `count` requests, answering each with `status` and `body`, and
    /// hands back the request URLs it saw.
    fn serve(
        count: usize,
        status: u16,
        body: &'static str,
    ) -> (String, thread::JoinHandle<Vec<String>>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..count {
                let request = server.recv().unwrap();
                seen.push(request.url().to_string());
                let header =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let _ = request.respond(
                    HttpResponse::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
            seen
        });
        (format!("http://{addr}/serving"), handle)
    }

    fn client(base_url: String) -> Client {
        Client::new(ClientConfig {
            base_url,
            user_agent: "pinfeed-test".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn request_feed_sends_page_and_limit() {
        let body = r#"[{"id":7,"image_url":"http://img/7.png","name":"seven"},{"id":8,"image_url":"http://img/8.png"}]"#;
        let (base, handle) = serve(1, 200, body);
        let posts = client(base).request_feed(3, 20).unwrap();
        let seen = handle.join().unwrap();

        assert_eq!(seen, vec!["/serving/requestFeed?page=3&limit=20".to_string()]);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, 7);
        assert_eq!(posts[0].name, "seven");
        assert_eq!(posts[1].image_url, "http://img/8.png");
        assert_eq!(posts[1].author_id, 0);
    }

    #[test]
    fn non_success_status_is_an_error() {
        let (base, handle) = serve(1, 400, r#"{"detail":"bad"}"#);
        let err = client(base).request_feed(1, 20).unwrap_err();
        handle.join().unwrap();
        let status = err.downcast_ref::<ServingError>();
        assert!(
            matches!(status, Some(ServingError::Status { endpoint: "requestFeed", .. })),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn search_skips_empty_filters() {
        let (base, handle) = serve(1, 200, "[]");
        let query = SearchQuery {
            name: "cats".into(),
            ..Default::default()
        };
        let posts = client(base).search_posts(&query, 2, 10).unwrap();
        let seen = handle.join().unwrap();
        assert!(posts.is_empty());
        assert_eq!(
            seen,
            vec!["/serving/searchPosts?name=cats&page=2&limit=10".to_string()]
        );
    }

    #[test]
    fn empty_search_is_rejected_before_sending() {
        let client = client("http://127.0.0.1:9/serving".into());
        let err = client
            .search_posts(&SearchQuery::default(), 1, 20)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServingError>(),
            Some(ServingError::MissingSearchFilter)
        ));
    }

    #[test]
    fn request_post_and_user() {
        let (base, handle) = serve(
            2,
            200,
            r#"{"id":5,"image_url":"u","name":"n","bio":"b","avatar_url":"a"}"#,
        );
        let client = client(base);
        let post = client.request_post(5).unwrap();
        let user = client.request_user(5).unwrap();
        let seen = handle.join().unwrap();
        assert_eq!(post.id, 5);
        assert_eq!(user.bio, "b");
        assert_eq!(
            seen,
            vec![
                "/serving/requestPost?post_id=5".to_string(),
                "/serving/requestUser?user_id=5".to_string()
            ]
        );
    }

    #[test]
    fn base_url_keeps_its_path() {
        let url = parse_base_url("http://localhost/serving").unwrap();
        assert_eq!(url.join("requestFeed").unwrap().path(), "/serving/requestFeed");
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn search_query_parsing() {
        assert_eq!(SearchQuery::parse("  sunsets ").name, "sunsets");
        let by_author = SearchQuery::parse("@42");
        assert_eq!(by_author.author_id, Some(42));
        assert!(by_author.name.is_empty());
        assert_eq!(SearchQuery::parse("@bob").name, "@bob");
        assert!(SearchQuery::parse("   ").is_empty());
    }
}
