//! Resource fetchers over the Ocado API.
//!
//! One fetcher per polled endpoint, all sharing one [`OcadoClient`]. A 401
//! from any endpoint maps to [`FetchError::Unauthorized`] so the poll
//! coordinator can resolve it with a single shared session refresh.

use std::sync::Arc;

use async_trait::async_trait;
use ocado_api::{
    ApiError, Cart, DeliverySlot, DeliverySubscription, OcadoClient, RecentOrders, UserProfile,
};
use serde::Serialize;

use crate::poll::{FetchError, ResourceFetcher};

/// Data produced by one resource fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum ResourceData {
    User(UserProfile),
    Orders(RecentOrders),
    OrderCount(u64),
    Cart(Cart),
    NextSlot(Option<DeliverySlot>),
    Subscription(Option<DeliverySubscription>),
}

fn map_api_error(err: ApiError) -> FetchError {
    if err.is_unauthorized() {
        FetchError::Unauthorized
    } else {
        FetchError::Failed(err.to_string())
    }
}

macro_rules! fetcher {
    ($name:ident, $id:literal, $client:ident, $token:ident => $body:expr) => {
        pub struct $name {
            client: Arc<OcadoClient>,
        }

        impl $name {
            pub fn new(client: Arc<OcadoClient>) -> Self {
                Self { client }
            }
        }

        #[async_trait]
        impl ResourceFetcher<ResourceData> for $name {
            fn resource_id(&self) -> &'static str {
                $id
            }

            async fn fetch(&self, $token: &str) -> Result<ResourceData, FetchError> {
                let $client = &self.client;
                ($body).map_err(map_api_error)
            }
        }
    };
}

fetcher!(UserFetcher, "user", client, token => {
    client.current_user(token).await.map(ResourceData::User)
});

fetcher!(OrdersFetcher, "orders", client, token => {
    client.recent_orders(token).await.map(ResourceData::Orders)
});

fetcher!(OrderCountFetcher, "order-count", client, token => {
    client
        .active_order_count(token)
        .await
        .map(ResourceData::OrderCount)
});

fetcher!(CartFetcher, "cart", client, token => {
    client.active_cart(token).await.map(ResourceData::Cart)
});

fetcher!(NextSlotFetcher, "next-slot", client, token => {
    client
        .next_available_slot(token)
        .await
        .map(ResourceData::NextSlot)
});

fetcher!(SubscriptionFetcher, "subscription", client, token => {
    client
        .delivery_subscription(token)
        .await
        .map(ResourceData::Subscription)
});

/// The full fetcher set the agent polls by default.
pub fn default_fetchers(
    client: Arc<OcadoClient>,
) -> Vec<Arc<dyn ResourceFetcher<ResourceData>>> {
    vec![
        Arc::new(UserFetcher::new(client.clone())),
        Arc::new(OrdersFetcher::new(client.clone())),
        Arc::new(OrderCountFetcher::new(client.clone())),
        Arc::new(CartFetcher::new(client.clone())),
        Arc::new(NextSlotFetcher::new(client.clone())),
        Arc::new(SubscriptionFetcher::new(client)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fetcher_ids_are_distinct() {
        let client = Arc::new(OcadoClient::new().unwrap());
        let fetchers = default_fetchers(client);

        let mut ids: Vec<_> = fetchers.iter().map(|f| f.resource_id()).collect();
        assert_eq!(ids.len(), 6);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_unauthorized_maps_to_shared_refresh_signal() {
        assert!(matches!(
            map_api_error(ApiError::Unauthorized),
            FetchError::Unauthorized
        ));
        assert!(matches!(
            map_api_error(ApiError::Parse("bad".to_string())),
            FetchError::Failed(_)
        ));
    }
}
