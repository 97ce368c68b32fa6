use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio::task::JoinError;
use tracing::{debug, error, info};

use pkg_constants::gateway::{DEFAULT_FANOUT_LIMIT, MERGE_PATCH_CONTENT_TYPE};
use pkg_constants::network::DEFAULT_CONNECT_TIMEOUT_SECS;
use pkg_kube::transport::{Transport, user_transport};
use pkg_kube::{ClientFactory, ClusterClient};
use pkg_state::client::StateStore;
use pkg_state::repo;
use pkg_task::TaskGroup;
use pkg_types::cluster::Cluster;
use pkg_types::user::UserProfile;

use crate::error::GatewayError;
use crate::merge::merge_lists;
use crate::page::{paginate_body, paginate_value};
use crate::path::{GatewayQuery, ResourcePath};

const JSON_CONTENT_TYPE: &str = "application/json";

/// A namespace subtask that died fails the whole list; dropping the
/// group on return cancels the rest.
fn namespace_result<T>(joined: Result<T, JoinError>) -> Result<T, GatewayError> {
    joined.map_err(|e| {
        error!("Namespace request task failed: {}", e);
        GatewayError::Transport(format!("namespace request task failed: {}", e))
    })
}

/// Knobs for how the gateway talks to clusters and reports failures.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPolicy {
    /// Report a downstream 403 on a single forwarded call as 500.
    pub remap_forbidden: bool,
    /// Verify the downstream server certificate against the cluster's CA.
    pub verify_upstream_tls: bool,
    /// Ceiling on concurrent per-namespace requests of one fan-out.
    pub fanout_limit: usize,
    pub connect_timeout: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            remap_forbidden: true,
            verify_upstream_tls: false,
            fanout_limit: DEFAULT_FANOUT_LIMIT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// One inbound proxied call.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub cluster: String,
    pub caller: UserProfile,
    pub method: Method,
    /// Downstream API path, e.g. `/api/v1/pods`.
    pub path: String,
    pub query: GatewayQuery,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Cancelled when the inbound call goes away.
    pub cancel: CancellationToken,
}

/// A downstream answer, or the gateway's own rendition of one.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn json(status: u16, value: &impl Serialize) -> Result<Self, GatewayError> {
        let body = serde_json::to_vec(value).map_err(|e| GatewayError::Upstream(e.to_string()))?;
        Ok(Self {
            status,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            body: Bytes::from(body),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

async fn send(request: RequestBuilder) -> Result<ProxyResponse, GatewayError> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    Ok(ProxyResponse {
        status,
        content_type,
        body,
    })
}

/// Proxies calls to managed clusters as the calling user.
#[derive(Clone)]
pub struct Gateway {
    store: StateStore,
    factory: Arc<dyn ClientFactory>,
    policy: GatewayPolicy,
}

impl Gateway {
    pub fn new(store: StateStore, factory: Arc<dyn ClientFactory>, policy: GatewayPolicy) -> Self {
        Self {
            store,
            factory,
            policy,
        }
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    pub async fn proxy(&self, ctx: ProxyContext) -> Result<ProxyResponse, GatewayError> {
        let cluster = repo::get_cluster(&self.store, &ctx.cluster)
            .await
            .map_err(|e| GatewayError::Persistence(format!("{:#}", e)))?
            .ok_or_else(|| GatewayError::ClusterNotFound(ctx.cluster.clone()))?;
        let binding = repo::get_binding(&self.store, &ctx.cluster, &ctx.caller.name)
            .await
            .map_err(|e| GatewayError::Persistence(format!("{:#}", e)))?
            .ok_or_else(|| GatewayError::NoBinding {
                cluster: ctx.cluster.clone(),
                user: ctx.caller.name.clone(),
            })?;
        let transport = user_transport(
            &cluster,
            &binding.certificate,
            self.policy.verify_upstream_tls,
            self.policy.connect_timeout,
        )
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let mut path = ctx.path.clone();
        if ctx.method == Method::GET {
            if let Some(resource) = ResourcePath::parse(&ctx.path) {
                if resource.namespace.is_none() {
                    let admin = self.admin_client(&cluster)?;
                    let namespaced = admin
                        .is_namespaced_resource(&resource.resource)
                        .await
                        .map_err(|e| GatewayError::Upstream(e.to_string()))?;
                    if namespaced {
                        if let Some(ns) = &ctx.query.namespace {
                            path = resource.with_namespace(ns);
                        } else if resource.is_collection() {
                            let all = admin
                                .can_visit_all_namespace(&ctx.caller.name)
                                .await
                                .map_err(|e| GatewayError::Upstream(e.to_string()))?;
                            if !all {
                                let namespaces = admin
                                    .get_user_namespace_names(&ctx.caller.name)
                                    .await
                                    .map_err(|e| GatewayError::Upstream(e.to_string()))?;
                                return self.fan_out(&transport, &resource, namespaces, &ctx).await;
                            }
                        }
                    }
                }
            }
        }

        self.forward(&transport, &ctx, &path).await
    }

    fn admin_client(&self, cluster: &Cluster) -> Result<Arc<dyn ClusterClient>, GatewayError> {
        self.factory
            .for_cluster(cluster)
            .map_err(|e| GatewayError::Upstream(e.to_string()))
    }

    /// List `resource` in each of `namespaces` and merge the results.
    async fn fan_out(
        &self,
        transport: &Transport,
        resource: &ResourcePath,
        namespaces: Vec<String>,
        ctx: &ProxyContext,
    ) -> Result<ProxyResponse, GatewayError> {
        info!(
            "Fanning out {} {} for {} over {} namespace(s)",
            ctx.cluster,
            resource.resource,
            ctx.caller.name,
            namespaces.len()
        );

        let mut group = TaskGroup::new(self.policy.fanout_limit, &ctx.cancel);
        for (index, namespace) in namespaces.iter().enumerate() {
            let url = ctx
                .query
                .url_for(&transport.base, &resource.with_namespace(namespace));
            let request = transport.client.get(url);
            group.spawn(async move { (index, send(request).await) });
        }

        let mut finished = Vec::with_capacity(namespaces.len());
        while let Some(joined) = group.next().await {
            finished.push(namespace_result(joined)?);
        }
        if finished.len() < namespaces.len() {
            return Err(GatewayError::Transport("request cancelled".into()));
        }
        finished.sort_by_key(|(index, _)| *index);

        let results = finished
            .into_iter()
            .map(|(index, result)| (namespaces[index].clone(), result))
            .collect();
        let merged = merge_lists(results)?;

        match ctx.query.page {
            Some(window) => ProxyResponse::json(200, &paginate_value(merged, window)),
            None => ProxyResponse::json(200, &merged),
        }
    }

    /// Send the call on as-is, apart from the gateway's own query keys.
    async fn forward(
        &self,
        transport: &Transport,
        ctx: &ProxyContext,
        path: &str,
    ) -> Result<ProxyResponse, GatewayError> {
        let url = ctx.query.url_for(&transport.base, path);
        debug!("Forwarding {} {} for {}", ctx.method, url, ctx.caller.name);

        let mut request = transport.client.request(ctx.method.clone(), &url);
        let content_type = if ctx.method == Method::PATCH {
            Some(MERGE_PATCH_CONTENT_TYPE.to_string())
        } else {
            ctx.content_type.clone()
        };
        if let Some(ct) = content_type {
            request = request.header(CONTENT_TYPE, ct);
        }
        if !ctx.body.is_empty() {
            request = request.body(ctx.body.clone());
        }

        let mut response = send(request).await?;
        if response.status == 403 && self.policy.remap_forbidden {
            debug!("Remapping downstream 403 on {} to 500", url);
            response.status = 500;
        }
        if let Some(window) = ctx.query.page {
            if response.is_success() {
                response.body = Bytes::from(paginate_body(&response.body, window)?);
                response.content_type = Some(JSON_CONTENT_TYPE.to_string());
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::Utc;
    use pkg_kube::fake::FakeClientFactory;
    use pkg_pki::key::ClusterKey;
    use pkg_types::cluster::{
        Authentication, ClusterBinding, ClusterSpec, ClusterStatus, ConnectSpec, ForwardSpec,
    };
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Downstream {
        seen: Mutex<Vec<String>>,
    }

    impl Downstream {
        fn record(&self, uri: &Uri) {
            self.seen.lock().unwrap().push(uri.to_string());
        }
    }

    fn pods(ns: &str, n: usize) -> Value {
        let items: Vec<Value> = (0..n)
            .map(|i| json!({"metadata": {"name": format!("pod-{}", i), "namespace": ns}}))
            .collect();
        json!({"apiVersion": "v1", "kind": "PodList", "metadata": {}, "items": items})
    }

    async fn namespaced_pods(
        State(s): State<Arc<Downstream>>,
        Path(ns): Path<String>,
        uri: Uri,
    ) -> (StatusCode, Json<Value>) {
        s.record(&uri);
        match ns.as_str() {
            "locked" => (StatusCode::FORBIDDEN, Json(json!({"kind": "Status"}))),
            "broken" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "etcd down"})),
            ),
            _ => (StatusCode::OK, Json(pods(&ns, 2))),
        }
    }

    async fn all_pods(State(s): State<Arc<Downstream>>, uri: Uri) -> Json<Value> {
        s.record(&uri);
        Json(pods("everywhere", 5))
    }

    async fn get_pod(
        State(s): State<Arc<Downstream>>,
        Path((_ns, name)): Path<(String, String)>,
        uri: Uri,
    ) -> (StatusCode, Json<Value>) {
        s.record(&uri);
        if name == "secret" {
            (StatusCode::FORBIDDEN, Json(json!({"reason": "Forbidden"})))
        } else {
            (StatusCode::OK, Json(json!({"metadata": {"name": name}})))
        }
    }

    async fn patch_pod(headers: HeaderMap, body: String) -> Json<Value> {
        let ct = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Json(json!({"contentType": ct, "body": body}))
    }

    struct Fixture {
        gateway: Gateway,
        factory: FakeClientFactory,
        downstream: Arc<Downstream>,
    }

    async fn fixture(policy: GatewayPolicy) -> Fixture {
        let downstream = Arc::new(Downstream::default());
        let app = Router::new()
            .route("/api/v1/pods", get(all_pods))
            .route("/api/v1/namespaces/{ns}/pods", get(namespaced_pods))
            .route(
                "/api/v1/namespaces/{ns}/pods/{name}",
                get(get_pod).patch(patch_pod),
            )
            .with_state(downstream.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let key_pem = ClusterKey::generate("prod").unwrap().to_pem();
        let cluster = Cluster {
            name: "prod".into(),
            spec: ClusterSpec {
                connect: ConnectSpec {
                    forward: ForwardSpec {
                        api_server: format!("http://{}", addr),
                    },
                    insecure_skip_tls_verify: false,
                },
                authentication: Authentication::Bearer { token: "t".into() },
                ca_data: None,
            },
            private_key: key_pem.clone(),
            status: ClusterStatus::default(),
            created_by: "alice".into(),
            created_at: Utc::now(),
        };

        let store = StateStore::in_memory().await.unwrap();
        let mut tx = store.begin().await;
        repo::put_cluster(&mut tx, &cluster).unwrap();
        let key = rcgen::KeyPair::from_pem(&key_pem).unwrap();
        for user in ["alice", "bob", "carol", "dave", "root"] {
            let cert = rcgen::CertificateParams::new(vec![user.to_string()])
                .unwrap()
                .self_signed(&key)
                .unwrap()
                .pem();
            repo::put_binding(&mut tx, &ClusterBinding::new("prod", user, cert)).unwrap();
        }
        tx.commit().await.unwrap();

        let factory = FakeClientFactory::new();
        {
            let mut state = factory.state();
            state.namespaced.insert("pods".into());
            state.all_namespace_users.insert("root".into());
            let ns = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            state
                .user_namespaces
                .insert("alice".into(), ns(&["team-a", "team-b", "team-c"]));
            state.user_namespaces.insert("bob".into(), ns(&["locked"]));
            state
                .user_namespaces
                .insert("carol".into(), ns(&["team-a", "broken"]));
            state
                .user_namespaces
                .insert("dave".into(), ns(&["locked", "team-b"]));
        }

        Fixture {
            gateway: Gateway::new(store, Arc::new(factory.clone()), policy),
            factory,
            downstream,
        }
    }

    fn ctx(user: &str, method: Method, path: &str, query: Option<&str>) -> ProxyContext {
        ProxyContext {
            cluster: "prod".into(),
            caller: UserProfile::new(user),
            method,
            path: path.into(),
            query: GatewayQuery::parse(query).unwrap(),
            body: Bytes::new(),
            content_type: None,
            cancel: CancellationToken::new(),
        }
    }

    fn body(resp: &ProxyResponse) -> Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[tokio::test]
    async fn restricted_list_fans_out_and_merges() {
        let f = fixture(GatewayPolicy::default()).await;
        let resp = f
            .gateway
            .proxy(ctx("alice", Method::GET, "/api/v1/pods", Some("limit=50")))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        let v = body(&resp);
        let namespaces: Vec<&str> = v["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["metadata"]["namespace"].as_str().unwrap())
            .collect();
        assert_eq!(
            namespaces,
            vec!["team-a", "team-a", "team-b", "team-b", "team-c", "team-c"]
        );
        assert_eq!(v["kind"], "PodList");

        let mut seen = f.downstream.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "/api/v1/namespaces/team-a/pods?limit=50",
                "/api/v1/namespaces/team-b/pods?limit=50",
                "/api/v1/namespaces/team-c/pods?limit=50",
            ]
        );
    }

    #[tokio::test]
    async fn fanned_out_list_is_paginated() {
        let f = fixture(GatewayPolicy::default()).await;
        let resp = f
            .gateway
            .proxy(ctx(
                "alice",
                Method::GET,
                "/api/v1/pods",
                Some("pageNum=2&pageSize=4"),
            ))
            .await
            .unwrap();
        let v = body(&resp);
        assert_eq!(v["total"], 6);
        assert_eq!(v["items"].as_array().unwrap().len(), 2);
        assert_eq!(v["items"][0]["metadata"]["namespace"], "team-c");
    }

    #[tokio::test]
    async fn explicit_namespace_rewrites_path_and_is_not_forwarded() {
        let f = fixture(GatewayPolicy::default()).await;
        let resp = f
            .gateway
            .proxy(ctx(
                "alice",
                Method::GET,
                "/api/v1/pods",
                Some("namespace=team-b&watch=false"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(
            *f.downstream.seen.lock().unwrap(),
            vec!["/api/v1/namespaces/team-b/pods?watch=false"]
        );
        assert_eq!(f.factory.state().count("user-ns:"), 0);
    }

    #[tokio::test]
    async fn unrestricted_user_is_forwarded_unmodified() {
        let f = fixture(GatewayPolicy::default()).await;
        let resp = f
            .gateway
            .proxy(ctx("root", Method::GET, "/api/v1/pods", None))
            .await
            .unwrap();
        assert_eq!(body(&resp)["items"].as_array().unwrap().len(), 5);
        assert_eq!(*f.downstream.seen.lock().unwrap(), vec!["/api/v1/pods"]);
    }

    #[tokio::test]
    async fn single_forbidden_namespace_is_an_error() {
        let f = fixture(GatewayPolicy::default()).await;
        let err = f
            .gateway
            .proxy(ctx("bob", Method::GET, "/api/v1/pods", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(ns) if ns == "locked"));
    }

    #[tokio::test]
    async fn forbidden_namespace_among_others_is_skipped() {
        let f = fixture(GatewayPolicy::default()).await;
        let resp = f
            .gateway
            .proxy(ctx("dave", Method::GET, "/api/v1/pods", None))
            .await
            .unwrap();
        let v = body(&resp);
        assert_eq!(v["items"].as_array().unwrap().len(), 2);
        assert_eq!(v["items"][0]["metadata"]["namespace"], "team-b");
    }

    #[tokio::test]
    async fn failing_namespace_aborts_merge() {
        let f = fixture(GatewayPolicy::default()).await;
        let err = f
            .gateway
            .proxy(ctx("carol", Method::GET, "/api/v1/pods", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MergeAbort { status: 500, .. }));
    }

    #[tokio::test]
    async fn no_namespaces_means_empty_list() {
        let f = fixture(GatewayPolicy::default()).await;
        f.factory.state().user_namespaces.remove("alice");
        let resp = f
            .gateway
            .proxy(ctx("alice", Method::GET, "/api/v1/pods", None))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert!(body(&resp)["items"].as_array().unwrap().is_empty());
        assert!(f.downstream.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forbidden_single_forward_is_remapped_by_default() {
        let f = fixture(GatewayPolicy::default()).await;
        let path = "/api/v1/namespaces/team-a/pods/secret";
        let resp = f
            .gateway
            .proxy(ctx("alice", Method::GET, path, None))
            .await
            .unwrap();
        assert_eq!(resp.status, 500);

        let f = fixture(GatewayPolicy {
            remap_forbidden: false,
            ..GatewayPolicy::default()
        })
        .await;
        let resp = f
            .gateway
            .proxy(ctx("alice", Method::GET, path, None))
            .await
            .unwrap();
        assert_eq!(resp.status, 403);
    }

    #[tokio::test]
    async fn patch_uses_merge_patch_content_type() {
        let f = fixture(GatewayPolicy::default()).await;
        let mut call = ctx(
            "alice",
            Method::PATCH,
            "/api/v1/namespaces/team-a/pods/web",
            None,
        );
        call.content_type = Some("application/json".into());
        call.body = Bytes::from_static(br#"{"metadata":{"labels":{"a":"b"}}}"#);
        let resp = f.gateway.proxy(call).await.unwrap();
        let v = body(&resp);
        assert_eq!(v["contentType"], MERGE_PATCH_CONTENT_TYPE);
        assert_eq!(v["body"], r#"{"metadata":{"labels":{"a":"b"}}}"#);
    }

    #[tokio::test]
    async fn unknown_cluster_and_missing_binding() {
        let f = fixture(GatewayPolicy::default()).await;
        let mut call = ctx("alice", Method::GET, "/api/v1/pods", None);
        call.cluster = "nope".into();
        assert!(matches!(
            f.gateway.proxy(call).await,
            Err(GatewayError::ClusterNotFound(_))
        ));
        assert!(matches!(
            f.gateway
                .proxy(ctx("mallory", Method::GET, "/api/v1/pods", None))
                .await,
            Err(GatewayError::NoBinding { .. })
        ));
    }

    #[tokio::test]
    async fn dead_namespace_task_fails_the_list() {
        let died = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        match namespace_result::<()>(Err(died)) {
            Err(GatewayError::Transport(msg)) => {
                assert!(msg.contains("namespace request task failed"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(namespace_result(Ok(7)).unwrap(), 7);
    }

}
