//! Integration tests for the Platform API client using wiremock
//!
//! These tests verify token caching, pagination and the API-backed resource
//! source against mocked endpoints.

use gcexport::cache::{DataSourceCache, DataSourceCacheSet};
use gcexport::genesys::auth::{ClientCredentials, StaticToken, TokenSource};
use gcexport::genesys::client::ApiClient;
use gcexport::genesys::source::{self, ApiResourceSource};
use gcexport::resource::enumerate::ResourceSource;
use gcexport::resource::registry::builtin_definitions;
use gcexport::resource::value::AttrValue;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{basic_auth, bearer_token, body_string_contains, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUEUES_PATH: &str = "/api/v2/routing/queues";

fn client_for(server: &MockServer) -> Arc<ApiClient> {
    Arc::new(
        ApiClient::new(&server.uri(), Arc::new(StaticToken("test-token".to_string())))
            .unwrap()
            .with_page_size(2),
    )
}

fn queue_source(server: &MockServer) -> ApiResourceSource {
    let def = &builtin_definitions().unwrap()["genesyscloud_routing_queue"];
    ApiResourceSource::from_def(client_for(server), "genesyscloud_routing_queue", def).unwrap()
}

async fn mount_queue_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(QUEUES_PATH))
        .and(query_param("pageNumber", "1"))
        .and(query_param_is_missing("name"))
        .and(bearer_token("test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [
                {"id": "q-1", "name": "Sales", "selfUri": "/api/v2/routing/queues/q-1",
                 "division": {"id": "div-1", "name": "Home", "selfUri": "/api/v2/authorization/divisions/div-1"}},
                {"id": "q-2", "name": "Support"}
            ],
            "pageSize": 2,
            "pageNumber": 1,
            "pageCount": 2
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(QUEUES_PATH))
        .and(query_param("pageNumber", "2"))
        .and(query_param_is_missing("name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entities": [{"id": "q-3", "name": "Sales & Service"}],
            "pageSize": 2,
            "pageNumber": 2,
            "pageCount": 2
        })))
        .expect(1)
        .mount(server)
        .await;
}

mod client_tests {
    use super::*;
    use gcexport::genesys::http::api_status;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out a stale token until refreshed
    #[derive(Default)]
    struct RotatingToken {
        refreshes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenSource for RotatingToken {
        async fn token(&self) -> anyhow::Result<String> {
            Ok("stale-token".to_string())
        }

        async fn refresh(&self) -> anyhow::Result<String> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok("fresh-token".to_string())
        }
    }

    fn rotating_client(server: &MockServer, token: &Arc<RotatingToken>) -> ApiClient {
        ApiClient::new(&server.uri(), Arc::clone(token) as Arc<dyn TokenSource>).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_token_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues/q-1"))
            .and(bearer_token("stale-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues/q-1"))
            .and(bearer_token("fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "q-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = Arc::new(RotatingToken::default());
        let queue = rotating_client(&server, &token)
            .get_by_id(QUEUES_PATH, "q-1")
            .await
            .unwrap();

        assert_eq!(queue["id"], "q-1");
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forbidden_does_not_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues/q-401"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let token = Arc::new(RotatingToken::default());
        let err = rotating_client(&server, &token)
            .get_by_id(QUEUES_PATH, "q-401")
            .await
            .unwrap_err();

        assert_eq!(api_status(&err), Some(StatusCode::FORBIDDEN));
        assert_eq!(token.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_list_all_follows_pages() {
        let server = MockServer::start().await;
        mount_queue_pages(&server).await;

        let entities = client_for(&server)
            .list_all(QUEUES_PATH, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = entities.iter().filter_map(|e| e["id"].as_str()).collect();
        assert_eq!(ids, vec!["q-1", "q-2", "q-3"]);
    }

    #[tokio::test]
    async fn test_list_stops_on_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/flows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [],
                "pageCount": 10
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entities = client_for(&server)
            .list_all("/api/v2/flows", &CancellationToken::new())
            .await
            .unwrap();
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUEUES_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_all(QUEUES_PATH, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_cancelled_listing_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entities": []})))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(client_for(&server).list_all(QUEUES_PATH, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_get_by_id_encodes_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/routing/queues/a%20b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a b"})))
            .expect(1)
            .mount(&server)
            .await;

        let queue = client_for(&server).get_by_id(QUEUES_PATH, "a b").await.unwrap();
        assert_eq!(queue["id"], "a b");
    }
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_client_credentials_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(basic_auth("client-id", "client-secret"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "issued-token",
                "token_type": "bearer",
                "expires_in": 86400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = ClientCredentials::with_login_url(&server.uri(), "client-id", "client-secret").unwrap();
        assert_eq!(creds.token().await.unwrap(), "issued-token");
        assert_eq!(creds.token().await.unwrap(), "issued-token");
    }

    #[tokio::test]
    async fn test_refresh_fetches_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "issued-token",
                "expires_in": 86400
            })))
            .expect(2)
            .mount(&server)
            .await;

        let creds = ClientCredentials::with_login_url(&server.uri(), "id", "secret").unwrap();
        creds.token().await.unwrap();
        creds.refresh().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})))
            .mount(&server)
            .await;

        let creds = ClientCredentials::with_login_url(&server.uri(), "id", "wrong").unwrap();
        let err = creds.token().await.unwrap_err();
        assert!(format!("{:#}", err).contains("401"));
    }
}

mod source_tests {
    use super::*;

    #[tokio::test]
    async fn test_enumerate_builds_resource_metadata() {
        let server = MockServer::start().await;
        mount_queue_pages(&server).await;

        let source = queue_source(&server);
        let resources = source.enumerate(&CancellationToken::new()).await.unwrap();

        assert_eq!(resources.len(), 3);
        let sales = &resources["q-1"];
        assert_eq!(sales.original_label, "Sales");
        let attributes = sales.export_attributes.as_ref().unwrap();
        assert_eq!(attributes.get("division_id"), Some(&AttrValue::from("div-1")));
        assert!(!attributes.contains_key("self_uri"));

        // listed entities are served from the cache
        assert_eq!(source.cache().size(), 3);
        assert_eq!(source.get("q-2").await.unwrap()["name"], "Support");
    }

    #[tokio::test]
    async fn test_enumerate_applies_definition_id_prefix() {
        let server = MockServer::start().await;
        mount_queue_pages(&server).await;

        let mut def = builtin_definitions().unwrap()["genesyscloud_routing_queue"].clone();
        def.id_prefix = Some("queue/".to_string());
        let source = ApiResourceSource::from_def(client_for(&server), "genesyscloud_routing_queue", &def).unwrap();

        let resources = source.enumerate(&CancellationToken::new()).await.unwrap();
        assert_eq!(resources["q-2"].import_id("q-2"), "queue/q-2");
    }

    #[tokio::test]
    async fn test_enumerate_failure_is_user_readable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(QUEUES_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = queue_source(&server)
            .enumerate(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("temporarily unavailable"));
    }

    #[tokio::test]
    async fn test_data_source_cache_hydrates_then_looks_up() {
        let server = MockServer::start().await;
        mount_queue_pages(&server).await;
        Mock::given(method("GET"))
            .and(path(QUEUES_PATH))
            .and(query_param("name", "Escalations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"id": "q-9", "name": "Escalations"}],
                "pageCount": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = DataSourceCache::new("genesyscloud_routing_queue", Arc::new(queue_source(&server)));
        let cancel = CancellationToken::new();

        assert_eq!(cache.resolve("Sales & Service", &cancel).await.unwrap(), "q-3");
        assert_eq!(cache.resolve("Escalations", &cancel).await.unwrap(), "q-9");
        assert_eq!(cache.resolve("Escalations", &cancel).await.unwrap(), "q-9");
        assert_eq!(cache.len().await, 4);
    }

    #[tokio::test]
    async fn test_data_source_lookup_miss_is_a_diagnostic() {
        let server = MockServer::start().await;
        mount_queue_pages(&server).await;
        Mock::given(method("GET"))
            .and(path(QUEUES_PATH))
            .and(query_param("name", "Nowhere"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entities": [], "pageCount": 0})))
            .mount(&server)
            .await;

        let caches = DataSourceCacheSet::new();
        let cache = source::data_source_cache(&caches, client_for(&server), "genesyscloud_routing_queue").unwrap();
        let diagnostics = cache.resolve("Nowhere", &CancellationToken::new()).await.unwrap_err();

        assert!(diagnostics.has_errors());
        assert!(diagnostics.iter().any(|d| d.summary.contains("Nowhere")));
        assert!(cache.get("Nowhere").await.is_none());
    }

    #[tokio::test]
    async fn test_data_source_cache_is_created_once_per_type() {
        let server = MockServer::start().await;
        let caches = DataSourceCacheSet::new();

        let first = source::data_source_cache(&caches, client_for(&server), "genesyscloud_routing_queue").unwrap();
        let second = source::data_source_cache(&caches, client_for(&server), "genesyscloud_routing_queue").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(source::data_source_cache(&caches, client_for(&server), "genesyscloud_not_a_type").is_err());
    }

    #[test]
    fn test_live_registry_attaches_sources() {
        let client = Arc::new(
            ApiClient::new("https://api.mypurecloud.com", Arc::new(StaticToken(String::new()))).unwrap(),
        );
        let registry = source::live_registry(client).unwrap();
        assert_eq!(registry.len(), builtin_definitions().unwrap().len());
        let queue = registry.get("genesyscloud_routing_queue").unwrap();
        assert!(queue.source().is_some());
    }
}
