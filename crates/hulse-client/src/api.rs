//! REST client for account-level endpoints (clusters, ping).

use hulse_core::Cluster;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;
use crate::settings::{auth_header, Endpoints};

#[derive(Deserialize)]
struct ClustersEnvelope {
    clusters: Vec<Cluster>,
}

#[derive(Deserialize)]
struct ClusterEnvelope {
    cluster: Cluster,
}

#[derive(Serialize)]
struct ClusterBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// HTTP client for the Hulse REST API.
pub struct ApiClient {
    inner: reqwest::Client,
    endpoints: Endpoints,
    credential: String,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(endpoints: Endpoints, credential: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            endpoints,
            credential: credential.into(),
        }
    }

    /// Check that the API is reachable and accepts the key.
    pub async fn ping(&self) -> Result<bool, ClientError> {
        let url = self.endpoints.api_url("ping/");
        debug!(url = %url, "Pinging API");

        let response = self
            .inner
            .get(&url)
            .header(AUTHORIZATION, auth_header(&self.credential))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    /// List clusters the account can see.
    pub async fn clusters(&self) -> Result<Vec<Cluster>, ClientError> {
        let envelope: ClustersEnvelope = self.get_json("clusters/").await?;
        Ok(envelope.clusters)
    }

    /// Create a cluster.
    pub async fn create_cluster(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Cluster, ClientError> {
        let body = ClusterBody {
            id: None,
            name: Some(name),
            description,
        };
        let envelope: ClusterEnvelope = self.post_json("cluster/create/", &body).await?;
        Ok(envelope.cluster)
    }

    /// Join an existing cluster.
    pub async fn join_cluster(&self, id: i64) -> Result<Cluster, ClientError> {
        let envelope: ClusterEnvelope = self.post_json("cluster/join/", &Self::by_id(id)).await?;
        Ok(envelope.cluster)
    }

    /// Leave a cluster.
    pub async fn leave_cluster(&self, id: i64) -> Result<(), ClientError> {
        self.post("cluster/leave/", &Self::by_id(id)).await?;
        Ok(())
    }

    /// Rename a cluster or change its description.
    pub async fn edit_cluster(
        &self,
        id: i64,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Cluster, ClientError> {
        let body = ClusterBody {
            id: Some(id),
            name,
            description,
        };
        let envelope: ClusterEnvelope = self.post_json("cluster/edit/", &body).await?;
        Ok(envelope.cluster)
    }

    /// Delete a cluster.
    pub async fn delete_cluster(&self, id: i64) -> Result<(), ClientError> {
        self.post("cluster/delete/", &Self::by_id(id)).await?;
        Ok(())
    }

    fn by_id(id: i64) -> ClusterBody<'static> {
        ClusterBody {
            id: Some(id),
            name: None,
            description: None,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.endpoints.api_url(path);
        debug!(url = %url, "GET request");

        let response = self
            .inner
            .get(&url)
            .header(AUTHORIZATION, auth_header(&self.credential))
            .send()
            .await?;
        Self::check(&response)?;
        Ok(response.json().await?)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, ClientError> {
        let url = self.endpoints.api_url(path);
        debug!(url = %url, "POST request");

        let response = self
            .inner
            .post(&url)
            .header(AUTHORIZATION, auth_header(&self.credential))
            .json(body)
            .send()
            .await?;
        Self::check(&response)?;
        Ok(response)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        Ok(self.post(path, body).await?.json().await?)
    }

    fn check(response: &reqwest::Response) -> Result<(), ClientError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Server {
                status: response.status().as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Token secret")
    }

    async fn stub_api() -> Endpoints {
        let app = Router::new()
            .route(
                "/ping/",
                get(|headers: HeaderMap| async move {
                    if authorized(&headers) {
                        StatusCode::OK
                    } else {
                        StatusCode::UNAUTHORIZED
                    }
                }),
            )
            .route(
                "/clusters/",
                get(|| async {
                    Json(json!({ "clusters": [
                        { "id": 1, "name": "home", "description": "gpu box" },
                        { "id": 2, "name": "lab" }
                    ]}))
                }),
            )
            .route(
                "/cluster/create/",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "cluster": {
                        "id": 3,
                        "name": body["name"],
                        "description": body.get("description").cloned().unwrap_or(json!(""))
                    }}))
                }),
            )
            .route(
                "/cluster/delete/",
                post(|Json(body): Json<Value>| async move {
                    if body["id"] == 404 {
                        StatusCode::NOT_FOUND
                    } else {
                        StatusCode::NO_CONTENT
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Endpoints::single(&format!("http://{addr}"))
    }

    #[tokio::test]
    async fn test_ping_uses_token() {
        let endpoints = stub_api().await;
        assert!(ApiClient::new(endpoints.clone(), "secret").ping().await.unwrap());
        assert!(!ApiClient::new(endpoints, "wrong").ping().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_clusters() {
        let api = ApiClient::new(stub_api().await, "secret");
        let clusters = api.clusters().await.unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].description, "gpu box");
        assert_eq!(clusters[1].name, "lab");
    }

    #[tokio::test]
    async fn test_create_cluster() {
        let api = ApiClient::new(stub_api().await, "secret");
        let cluster = api.create_cluster("new", Some("desc")).await.unwrap();
        assert_eq!(cluster.id, 3);
        assert_eq!(cluster.name, "new");
        assert_eq!(cluster.description, "desc");
    }

    #[tokio::test]
    async fn test_delete_cluster_status() {
        let api = ApiClient::new(stub_api().await, "secret");
        api.delete_cluster(1).await.unwrap();
        let err = api.delete_cluster(404).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 404 }));
    }
}
