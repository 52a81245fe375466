//! `Link` header cursor and the page accumulator.

use crate::client::{ApiRequest, ServiceClient};
use crate::error::{Error, Result};
use crate::query::Query;
use reqwest::header::{HeaderMap, LINK};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Navigation targets advertised by a paginated response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// First page
    pub first: Option<String>,
    /// Previous page
    pub prev: Option<String>,
    /// Next page; absent on the final page
    pub next: Option<String>,
    /// Last page
    pub last: Option<String>,
}

impl PageCursor {
    /// Parses a `Link` header value such as
    /// `<https://x/api/projects/?page=2>; rel="next", <https://x/api/projects/?page=5>; rel="last"`.
    ///
    /// Entries are located by their angle brackets, so commas inside a URL do
    /// not split an entry. Entries without a recognised `rel` are ignored.
    #[must_use]
    pub fn parse(header: &str) -> Self {
        let mut cursor = Self::default();
        let mut rest = header;

        while let Some(open) = rest.find('<') {
            let Some(close) = rest[open..].find('>').map(|i| open + i) else {
                break;
            };
            let target = rest[open + 1..close].trim().to_string();
            let params_end = rest[close..].find('<').map_or(rest.len(), |i| close + i);
            let params = &rest[close + 1..params_end];

            let rel = params
                .split(';')
                .filter_map(|param| param.trim().strip_prefix("rel="))
                .map(|value| value.trim().trim_end_matches(',').trim_matches('"'))
                .next();

            if let Some(rel) = rel {
                for name in rel.split_whitespace() {
                    let slot = match name {
                        "first" => &mut cursor.first,
                        "prev" | "previous" => &mut cursor.prev,
                        "next" => &mut cursor.next,
                        "last" => &mut cursor.last,
                        _ => continue,
                    };
                    if slot.is_none() {
                        *slot = Some(target.clone());
                    }
                }
            }

            rest = &rest[params_end..];
        }

        cursor
    }

    /// Reads the cursor from response headers; `None` when there is no
    /// `Link` header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(Self::parse)
    }

    /// Returns true when no further page is advertised.
    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

fn append_records(records: &mut Vec<Value>, page: Option<Value>) {
    match page {
        Some(Value::Array(items)) => records.extend(items),
        Some(Value::Null) | None => {}
        Some(other) => records.push(other),
    }
}

impl ServiceClient {
    /// Reads every page of a collection into one ordered sequence.
    ///
    /// The first page carries `query`; later pages are fetched from the
    /// `next` URL verbatim, since it already embeds the filters. A `next`
    /// link that is malformed or names a page already read ends the read
    /// with the records gathered so far.
    ///
    /// # Errors
    ///
    /// Any page failing with a transport error or a non-200 status fails the
    /// whole read.
    pub async fn get_all(&self, url: &Url, query: &Query) -> Result<Vec<Value>> {
        let first = self
            .execute(ApiRequest::new(Method::GET, url.clone()).with_query(query.clone()))
            .await?;

        let mut cursor = PageCursor::from_headers(&first.headers);
        let mut records = Vec::new();
        append_records(&mut records, first.body);

        let mut current = url.clone();
        if !query.is_empty() {
            current.query_pairs_mut().extend_pairs(query.pairs());
        }
        let mut visited = HashSet::from([current.clone()]);

        while let Some(next) = cursor.as_ref().and_then(|c| c.next.clone()) {
            let next_url = match Url::parse(&next).or_else(|_| current.join(&next)) {
                Ok(next_url) => next_url,
                Err(err) => {
                    debug!("Stopping pagination on malformed next link `{next}`: {err}");
                    break;
                }
            };
            if !visited.insert(next_url.clone()) {
                debug!(next = %next_url, "Stopping pagination: next link revisits a page");
                break;
            }

            let page = self
                .execute(ApiRequest::new(Method::GET, next_url.clone()))
                .await?;
            debug!(
                pages = visited.len(),
                records = records.len(),
                "Fetched Waldur page"
            );

            cursor = PageCursor::from_headers(&page.headers);
            append_records(&mut records, page.body);
            current = next_url;
        }

        Ok(records)
    }

    /// Reads every page and decodes each record into `T`.
    ///
    /// # Errors
    ///
    /// See [`ServiceClient::get_all`]; [`Error::Parse`] if a record does not
    /// match `T`.
    pub async fn get_all_as<T>(&self, url: &Url, query: &Query) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.get_all(url, query)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::poll::RecordingSleeper;
    use crate::types::{Endpoint, Resource};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parse_first_page_header() {
        let cursor = PageCursor::parse(
            "<https://x/api/projects/?page=1>; rel=\"first\", \
             <https://x/api/projects/?page=2>; rel=\"next\", \
             <https://x/api/projects/?page=3>; rel=\"last\"",
        );
        assert_eq!(cursor.first.as_deref(), Some("https://x/api/projects/?page=1"));
        assert_eq!(cursor.next.as_deref(), Some("https://x/api/projects/?page=2"));
        assert_eq!(cursor.last.as_deref(), Some("https://x/api/projects/?page=3"));
        assert!(cursor.prev.is_none());
    }

    #[test]
    fn parse_tolerates_commas_in_urls_and_order() {
        let cursor = PageCursor::parse(
            "<https://x/api/projects/?page=3&state=OK,Erred>; rel=\"next\", \
             <https://x/api/projects/?page=1&state=OK,Erred>; rel=\"prev\"",
        );
        assert_eq!(
            cursor.next.as_deref(),
            Some("https://x/api/projects/?page=3&state=OK,Erred")
        );
        assert_eq!(
            cursor.prev.as_deref(),
            Some("https://x/api/projects/?page=1&state=OK,Erred")
        );
    }

    #[test]
    fn parse_final_page_has_no_next() {
        let cursor = PageCursor::parse("<https://x/api/projects/?page=1>; rel=\"first\"");
        assert!(cursor.is_last());
        assert!(PageCursor::parse("garbage").is_last());
    }

    fn test_client(server: &MockServer) -> ServiceClient {
        let config = ClientConfig::new(format!("{}/api/", server.uri()), "secret").unwrap();
        ServiceClient::builder(config)
            .with_sleeper(RecordingSleeper::default())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn follows_next_links_in_order() {
        let server = MockServer::start().await;
        let base = format!("{}/api/customers/", server.uri());

        Mock::given(method("GET"))
            .and(path("/api/customers/"))
            .and(query_param("page_size", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        format!("<{base}?page=1>; rel=\"first\", <{base}?page=2>; rel=\"next\", <{base}?page=3>; rel=\"last\"")
                            .as_str(),
                    )
                    .set_body_json(json!([{"name": "a"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/customers/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        format!("<{base}?page=1>; rel=\"first\", <{base}?page=1>; rel=\"prev\", <{base}?page=3>; rel=\"next\", <{base}?page=3>; rel=\"last\"")
                            .as_str(),
                    )
                    .set_body_json(json!([{"name": "b"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/customers/"))
            .and(query_param("page", "3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(
                        "Link",
                        format!("<{base}?page=1>; rel=\"first\", <{base}?page=2>; rel=\"prev\", <{base}?page=3>; rel=\"last\"")
                            .as_str(),
                    )
                    .set_body_json(json!([{"name": "c"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Customers).unwrap();
        let records: Vec<Resource> = client
            .get_all_as(&url, &Query::with("page_size", 1))
            .await
            .unwrap();
        let names: Vec<_> = records.iter().filter_map(Resource::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn single_page_without_link_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"uuid": "1"}, {"uuid": "2"}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let records = client.get_all(&url, &Query::new()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn self_referencing_next_stops() {
        let server = MockServer::start().await;
        let base = format!("{}/api/projects/", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "2"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page_size", "200"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "1"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let records = client
            .get_all(&url, &Query::with("page_size", 200))
            .await
            .unwrap();
        assert_eq!(records, vec![json!({"uuid": "1"}), json!({"uuid": "2"})]);
    }

    #[tokio::test]
    async fn failing_page_fails_the_read() {
        let server = MockServer::start().await;
        let base = format!("{}/api/projects/", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page_size", "200"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "1"}])),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let err = client
            .get_all(&url, &Query::with("page_size", 200))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }

    #[tokio::test]
    async fn cyclic_next_links_stop_after_each_page_once() {
        let server = MockServer::start().await;
        let base = format!("{}/api/projects/", server.uri());
        for (page, next, uuid) in [("2", "3", "2"), ("3", "2", "3")] {
            Mock::given(method("GET"))
                .and(path("/api/projects/"))
                .and(query_param("page", page))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("Link", format!("<{base}?page={next}>; rel=\"next\"").as_str())
                        .set_body_json(json!([{"uuid": uuid}])),
                )
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page_size", "200"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "1"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let records = client
            .get_all(&url, &Query::with("page_size", 200))
            .await
            .unwrap();
        assert_eq!(
            records,
            vec![json!({"uuid": "1"}), json!({"uuid": "2"}), json!({"uuid": "3"})]
        );
    }

    #[tokio::test]
    async fn next_link_back_to_first_page_stops() {
        let server = MockServer::start().await;
        let base = format!("{}/api/projects/", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page_size=200>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "2"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page_size", "200"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "1"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let records = client
            .get_all(&url, &Query::with("page_size", 200))
            .await
            .unwrap();
        assert_eq!(records, vec![json!({"uuid": "1"}), json!({"uuid": "2"})]);
    }

    #[tokio::test]
    async fn malformed_next_link_keeps_pages_read() {
        let server = MockServer::start().await;
        let base = format!("{}/api/projects/", server.uri());
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", "<http://[bad>; rel=\"next\"")
                    .set_body_json(json!([{"uuid": "2"}])),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/projects/"))
            .and(query_param("page_size", "200"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", format!("<{base}?page=2>; rel=\"next\"").as_str())
                    .set_body_json(json!([{"uuid": "1"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.url_for(Endpoint::Projects).unwrap();
        let records = client
            .get_all(&url, &Query::with("page_size", 200))
            .await
            .unwrap();
        assert_eq!(records, vec![json!({"uuid": "1"}), json!({"uuid": "2"})]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
