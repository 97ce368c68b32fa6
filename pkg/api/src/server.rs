use axum::{
    Json, Router, middleware,
    routing::{any, get, post, put},
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::AppState;
use crate::auth::auth_middleware;
use crate::handlers::{clusters, discovery, members, proxy, roles};
use crate::request_id::request_id_middleware;
use pkg_controllers::{ClusterLifecycle, LifecycleConfig};
use pkg_kube::ClientFactory;
use pkg_kube::http::HttpClientFactory;
use pkg_proxy::{Gateway, GatewayPolicy};
use pkg_state::client::StateStore;
use pkg_types::config::UserEntry;
use pkg_types::user::UserProfile;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub users: Vec<UserEntry>,
    pub lifecycle: LifecycleConfig,
    pub gateway: GatewayPolicy,
}

/// Wire the controllers and the gateway over one store and client factory.
pub fn build_state(
    store: StateStore,
    factory: Arc<dyn ClientFactory>,
    users: &[UserEntry],
    lifecycle: LifecycleConfig,
    gateway: GatewayPolicy,
) -> AppState {
    let tokens: HashMap<String, UserProfile> = users
        .iter()
        .map(|u| (u.token.clone(), UserProfile::new(u.name.clone())))
        .collect();
    AppState {
        lifecycle: ClusterLifecycle::new(store.clone(), factory.clone(), lifecycle),
        gateway: Gateway::new(store, factory, gateway),
        tokens: Arc::new(tokens),
    }
}

pub fn build_router(state: AppState) -> Router {
    // Protected API routes
    let api_routes = Router::new()
        .route(
            "/api/v1/clusters",
            post(clusters::register_cluster).get(clusters::list_clusters),
        )
        .route("/api/v1/clusters/search", post(clusters::search_clusters))
        .route(
            "/api/v1/clusters/{name}",
            get(clusters::get_cluster).delete(clusters::delete_cluster),
        )
        .route(
            "/api/v1/clusters/{name}/members",
            get(members::list_members).post(members::add_member),
        )
        .route(
            "/api/v1/clusters/{name}/members/{member}",
            get(members::get_member)
                .put(members::update_member)
                .delete(members::delete_member),
        )
        .route(
            "/api/v1/clusters/{name}/clusterroles",
            get(roles::list_cluster_roles).post(roles::create_cluster_role),
        )
        .route(
            "/api/v1/clusters/{name}/clusterroles/{role}",
            put(roles::update_cluster_role).delete(roles::delete_cluster_role),
        )
        .route(
            "/api/v1/clusters/{name}/apigroups",
            get(discovery::list_api_groups),
        )
        .route(
            "/api/v1/clusters/{name}/apigroups/{*group}",
            get(discovery::list_group_resources),
        )
        .route(
            "/api/v1/clusters/{name}/namespaces",
            get(discovery::list_namespaces),
        )
        .route(
            "/api/v1/proxy/{name}/k8s/{*path}",
            any(proxy::proxy_request),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data_dir).await?;
    let factory = Arc::new(HttpClientFactory {
        connect_timeout: config.gateway.connect_timeout,
    });

    if config.users.is_empty() {
        warn!("No users configured; every API call will be rejected");
    }
    if !config.gateway.verify_upstream_tls {
        warn!("Gateway does not verify downstream server certificates (gateway.verify-upstream-tls = false)");
    }

    let state = build_state(
        store.clone(),
        factory,
        &config.users,
        config.lifecycle,
        config.gateway,
    );
    let app = build_router(state);

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped, closing state store");
    store.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use pkg_kube::fake::FakeClientFactory;
    use pkg_task::RetryPolicy;
    use reqwest::Client;
    use serde_json::Value;
    use std::time::Duration;

    struct Harness {
        base: String,
        http: Client,
        factory: FakeClientFactory,
        downstream: String,
    }

    impl Harness {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
            let resp = self
                .http
                .get(self.url(path))
                .bearer_auth(token)
                .send()
                .await
                .unwrap();
            decode(resp).await
        }

        async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
            let resp = self
                .http
                .post(self.url(path))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .unwrap();
            decode(resp).await
        }

        async fn put(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
            let resp = self
                .http
                .put(self.url(path))
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .unwrap();
            decode(resp).await
        }

        async fn delete(&self, token: &str, path: &str) -> (StatusCode, Value) {
            let resp = self
                .http
                .delete(self.url(path))
                .bearer_auth(token)
                .send()
                .await
                .unwrap();
            decode(resp).await
        }

        async fn register(&self, name: &str) -> (StatusCode, Value) {
            let body = json!({
                "name": name,
                "spec": {
                    "connect": {"forward": {"apiServer": self.downstream}},
                    "authentication": {"mode": "bearer", "token": "admin-token"},
                },
            });
            self.post("t-alice", "/api/v1/clusters", body).await
        }

        async fn wait_for_phase(&self, name: &str, phase: &str) -> Value {
            for _ in 0..100 {
                let (status, view) = self.get("t-alice", &format!("/api/v1/clusters/{}", name)).await;
                assert_eq!(status, StatusCode::OK);
                if view["status"]["phase"] == phase {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("cluster {} never reached {}", name, phase);
        }
    }

    async fn decode(resp: reqwest::Response) -> (StatusCode, Value) {
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let bytes = resp.bytes().await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn namespaced_pods(Path(ns): Path<String>) -> Json<Value> {
        Json(json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": {},
            "items": [
                {"metadata": {"name": "web", "namespace": ns}},
                {"metadata": {"name": "db", "namespace": ns}},
            ],
        }))
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn harness() -> Harness {
        let downstream = serve(
            Router::new().route("/api/v1/namespaces/{ns}/pods", get(namespaced_pods)),
        )
        .await;

        let factory = FakeClientFactory::new();
        {
            let mut state = factory.state();
            state.namespaced.insert("pods".into());
            state.namespaces = vec!["team-b".into(), "team-a".into()];
            state
                .user_namespaces
                .insert("alice".into(), vec!["team-a".into(), "team-b".into()]);
        }

        let users = vec![
            UserEntry {
                name: "alice".into(),
                token: "t-alice".into(),
            },
            UserEntry {
                name: "bob".into(),
                token: "t-bob".into(),
            },
        ];
        let lifecycle = LifecycleConfig {
            provisioning: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(10),
            },
            ..LifecycleConfig::default()
        };
        let store = StateStore::in_memory().await.unwrap();
        let state = build_state(
            store,
            Arc::new(factory.clone()),
            &users,
            lifecycle,
            GatewayPolicy::default(),
        );
        let base = serve(build_router(state)).await;

        Harness {
            base,
            http: Client::new(),
            factory,
            downstream,
        }
    }

    #[tokio::test]
    async fn health_is_public_and_api_requires_a_token() {
        let h = harness().await;
        let resp = h.http.get(h.url("/healthz")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert!(resp.headers().contains_key("x-request-id"));

        let resp = h.http.get(h.url("/api/v1/clusters")).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 401);
        assert!(resp.headers().contains_key("x-request-id"));

        let (status, body) = h.get("wrong", "/api/v1/clusters").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "invalid token");
    }

    #[tokio::test]
    async fn register_then_provision_then_delete() {
        let h = harness().await;
        let (status, view) = h.register("prod").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view["name"], "prod");
        assert_eq!(view["status"]["phase"], "Saved");
        assert!(view.get("privateKey").is_none());

        let view = h.wait_for_phase("prod", "Completed").await;
        assert_eq!(view["status"]["version"], "v1.30.0");
        assert_eq!(view["accessible"], true);

        let (_, list) = h.get("t-bob", "/api/v1/clusters").await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["accessible"], false);

        let (status, body) = h.register("prod").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "cluster prod already exists");

        let (status, body) = h.delete("t-alice", "/api/v1/clusters/prod").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bindingsRemoved"], 1);
        assert!(body.get("warning").is_none());
        assert_eq!(h.factory.state().count("cleanup:"), 1);

        let (status, _) = h.get("t-alice", "/api/v1/clusters/prod").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registration_failures_map_to_status_codes() {
        let h = harness().await;
        let (status, _) = h.register("Not_Valid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        h.factory
            .state()
            .denied
            .insert(("rolebindings".into(), "delete".into()));
        let (status, body) = h.register("prod").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "missing required permission: rolebindings-delete");

        let (_, list) = h.get("t-alice", "/api/v1/clusters").await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_filters_and_paginates() {
        let h = harness().await;
        for name in ["prod-a", "prod-b", "prod-c", "staging"] {
            h.register(name).await;
            h.wait_for_phase(name, "Completed").await;
        }

        let (status, page) = h
            .post(
                "t-alice",
                "/api/v1/clusters/search?pageNum=2&pageSize=2",
                json!({"name": "prod"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["items"].as_array().unwrap().len(), 1);

        let (_, page) = h
            .post(
                "t-alice",
                "/api/v1/clusters/search",
                json!({"phase": "Failed"}),
            )
            .await;
        assert_eq!(page["total"], 0);

        let (status, _) = h
            .post(
                "t-alice",
                "/api/v1/clusters/search?pageNum=0&pageSize=2",
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn member_endpoints() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let (status, member) = h
            .post(
                "t-alice",
                "/api/v1/clusters/prod/members",
                json!({"name": "bob", "clusterRoles": ["view-cluster"]}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(member["name"], "bob");
        assert_eq!(member["bindingName"], "prod-bob-cluster-binding");

        let (_, members) = h.get("t-alice", "/api/v1/clusters/prod/members").await;
        assert_eq!(members.as_array().unwrap().len(), 2);

        let (status, _) = h
            .post(
                "t-alice",
                "/api/v1/clusters/prod/members",
                json!({"name": "bob"}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = h.get("t-alice", "/api/v1/clusters/prod/members/bob").await;
        assert_eq!(status, StatusCode::OK);

        let (status, member) = h
            .put(
                "t-alice",
                "/api/v1/clusters/prod/members/bob",
                json!({"namespaceRoles": [{"namespace": "team-a", "role": "manage-namespace"}]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(member["clusterRoles"], json!([]));
        assert_eq!(member["namespaceRoles"][0]["namespace"], "team-a");
        let (status, _) = h
            .put("t-alice", "/api/v1/clusters/prod/members/bob", json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h.delete("t-alice", "/api/v1/clusters/prod/members/bob").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = h.get("t-alice", "/api/v1/clusters/prod/members/bob").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h.get("t-alice", "/api/v1/clusters/nope/members").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn proxy_fans_out_for_restricted_user() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let (status, list) = h
            .get("t-alice", "/api/v1/proxy/prod/k8s/api/v1/pods")
            .await;
        assert_eq!(status, StatusCode::OK);
        let namespaces: Vec<&str> = list["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["metadata"]["namespace"].as_str().unwrap())
            .collect();
        assert_eq!(namespaces, vec!["team-a", "team-a", "team-b", "team-b"]);

        let (status, page) = h
            .get(
                "t-alice",
                "/api/v1/proxy/prod/k8s/api/v1/pods?pageNum=2&pageSize=3",
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 4);
        assert_eq!(page["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn proxy_error_mapping() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let (status, _) = h
            .get("t-alice", "/api/v1/proxy/missing/k8s/api/v1/pods")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // bob holds no binding for prod
        let (status, body) = h.get("t-bob", "/api/v1/proxy/prod/k8s/api/v1/pods").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "user bob has no access to cluster prod");

        let (status, _) = h
            .get("t-alice", "/api/v1/proxy/prod/k8s/api/v1/pods?pageNum=1")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn only_cluster_admins_change_a_cluster() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let (status, body) = h.delete("t-bob", "/api/v1/clusters/prod").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "user bob may not manage cluster prod");
        let (status, _) = h
            .post(
                "t-bob",
                "/api/v1/clusters/prod/members",
                json!({"name": "bob", "clusterRoles": ["admin-cluster"]}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h.get("t-bob", "/api/v1/clusters/prod/namespaces").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h.get("t-bob", "/api/v1/clusters/prod/members").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = h.get("t-alice", "/api/v1/clusters/prod").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = h.delete("t-alice", "/api/v1/clusters/prod").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn cluster_role_endpoints() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let role = json!({
            "name": "pod-reader",
            "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list"]}],
        });
        let (status, created) = h
            .post("t-alice", "/api/v1/clusters/prod/clusterroles", role.clone())
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], "pod-reader");
        let (status, _) = h
            .post("t-alice", "/api/v1/clusters/prod/clusterroles", role)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, roles) = h.get("t-alice", "/api/v1/clusters/prod/clusterroles").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            roles
                .as_array()
                .unwrap()
                .iter()
                .any(|r| r["name"] == "pod-reader")
        );

        let (status, updated) = h
            .put(
                "t-alice",
                "/api/v1/clusters/prod/clusterroles/pod-reader",
                json!({"rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["rules"][0]["verbs"], json!(["get"]));

        let (status, _) = h
            .delete("t-alice", "/api/v1/clusters/prod/clusterroles/admin-cluster")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = h
            .delete("t-bob", "/api/v1/clusters/prod/clusterroles/pod-reader")
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = h
            .delete("t-alice", "/api/v1/clusters/prod/clusterroles/pod-reader")
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = h
            .delete("t-alice", "/api/v1/clusters/prod/clusterroles/pod-reader")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn discovery_endpoints() {
        let h = harness().await;
        h.register("prod").await;
        h.wait_for_phase("prod", "Completed").await;

        let (status, groups) = h.get("t-alice", "/api/v1/clusters/prod/apigroups").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(groups[1]["name"], "apps");
        assert_eq!(groups[1]["preferredVersion"], "apps/v1");

        let (status, resources) = h
            .get("t-alice", "/api/v1/clusters/prod/apigroups/v1")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resources[0]["name"], "pods");
        assert_eq!(resources[0]["namespaced"], true);

        let (status, _) = h
            .get("t-alice", "/api/v1/clusters/prod/apigroups/batch/v1")
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, namespaces) = h.get("t-alice", "/api/v1/clusters/prod/namespaces").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(namespaces, json!(["team-a", "team-b"]));
    }

}
