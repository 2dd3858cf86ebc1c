use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use uuid::Uuid;

use super::error::ApiError;
use super::response::{list, ApiResponse};
use super::AppState;
use crate::domain::VariantInfo;
use crate::repo::TombstoneRow;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/networks", get(list_networks))
        .route("/networks/:network_id/variants", get(list_variants))
        .route(
            "/networks/:network_id/variants/:variant_num/tombstones/equipments",
            get(tombstoned_equipments),
        )
        .route(
            "/networks/:network_id/variants/:variant_num/tombstones/attributes",
            get(tombstoned_attributes),
        )
}

/// GET /v1/networks
pub async fn list_networks(State(st): State<AppState>) -> Result<ApiResponse<Vec<Uuid>>, ApiError> {
    Ok(list(st.store.networks().await?))
}

/// GET /v1/networks/:network_id/variants
pub async fn list_variants(
    State(st): State<AppState>,
    Path(network_id): Path<Uuid>,
) -> Result<ApiResponse<Vec<VariantInfo>>, ApiError> {
    Ok(list(st.store.variants(network_id).await?))
}

/// GET /v1/networks/:network_id/variants/:variant_num/tombstones/equipments
pub async fn tombstoned_equipments(
    State(st): State<AppState>,
    Path((network_id, variant_num)): Path<(Uuid, i32)>,
) -> Result<ApiResponse<Vec<String>>, ApiError> {
    Ok(list(st.store.tombstoned_equipment_ids(network_id, variant_num).await?))
}

/// GET /v1/networks/:network_id/variants/:variant_num/tombstones/attributes
pub async fn tombstoned_attributes(
    State(st): State<AppState>,
    Path((network_id, variant_num)): Path<(Uuid, i32)>,
) -> Result<ApiResponse<Vec<TombstoneRow>>, ApiError> {
    Ok(list(st.store.tombstoned_attribute_keys(network_id, variant_num).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ServerConfig, StoreConfig};
    use crate::domain::ResourceType;
    use crate::engine::{CloneTarget, NetworkStore, OwnerKey};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                request_timeout_secs: 5,
            },
            store: StoreConfig::default(),
        }
    }

    async fn get_json(store: &NetworkStore, uri: &str) -> (StatusCode, Value) {
        let app = crate::api::router(AppState::new(store.clone()), &test_config());
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let store = NetworkStore::in_memory();
        let (status, body) = get_json(&store, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_variants_and_tombstones() {
        let store = NetworkStore::in_memory();
        let network = Uuid::new_v4();
        store.create_network(network).await.unwrap();
        let load = OwnerKey::equipment("LOAD", ResourceType::Load);
        store
            .equipments()
            .put(network, 0, &load, &json!({"p0": 600.0}))
            .await
            .unwrap();
        store
            .clone_variant(network, 0, &CloneTarget::partial(1, "variant_1"))
            .await
            .unwrap();
        store.equipments().tombstone(network, 1, &load).await.unwrap();

        let (status, body) = get_json(&store, "/v1/networks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([network]));

        let (_, body) = get_json(&store, &format!("/v1/networks/{network}/variants")).await;
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["data"][1]["mode"], "PARTIAL");
        assert_eq!(body["data"][1]["baseline_num"], 0);

        let (_, body) = get_json(&store, &format!("/v1/networks/{network}/variants/1/tombstones/equipments")).await;
        assert_eq!(body["data"], json!(["LOAD"]));

        let (_, body) = get_json(&store, &format!("/v1/networks/{network}/variants/1/tombstones/attributes")).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_variant_is_404() {
        let store = NetworkStore::in_memory();
        let network = Uuid::new_v4();
        store.create_network(network).await.unwrap();

        let (status, body) = get_json(&store, &format!("/v1/networks/{network}/variants/7/tombstones/equipments")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NotFound");

        let (status, _) = get_json(&store, &format!("/v1/networks/{}/variants", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
