//! REST client for the collaborator chat endpoints.
//!
//! The core treats these as opaque request/response calls and owns only
//! the in-memory cache built from their results. Endpoints mirror the
//! backend: room creation/lookup by participants, paged room lists per
//! role, and paged room history (newest first).

use reqwest::Response;
use serde::de::DeserializeOwned;

use super::dto::{PageResponse, RoomDto};
use crate::domain::{OrderId, RoomId, ShopId, UserId};
use crate::error::ChatError;
use crate::transport::frame::MessageFrame;

/// Client for the chat REST interface.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
}

impl ChatApi {
    /// Creates a client for the API rooted at `base_url`
    /// (e.g. `http://localhost:8080/api`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Looks up or creates the room between a buyer and a shop,
    /// optionally tied to an order.
    ///
    /// # Errors
    ///
    /// [`ChatError::Http`] on connection failure, [`ChatError::Api`] on
    /// a non-success status.
    pub async fn get_or_create_room(
        &self,
        buyer_id: UserId,
        shop_id: ShopId,
        order_id: Option<OrderId>,
    ) -> Result<RoomDto, ChatError> {
        let mut query = vec![
            ("buyerId", buyer_id.get().to_string()),
            ("shopId", shop_id.get().to_string()),
        ];
        if let Some(order_id) = order_id {
            query.push(("orderId", order_id.get().to_string()));
        }
        let response = self
            .http
            .post(format!("{}/chat/rooms", self.base_url))
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }

    /// Fetches one page of the buyer's rooms.
    ///
    /// # Errors
    ///
    /// [`ChatError::Http`] on connection failure, [`ChatError::Api`] on
    /// a non-success status.
    pub async fn rooms_for_buyer(
        &self,
        buyer_id: UserId,
        page: u32,
        size: u32,
    ) -> Result<PageResponse<RoomDto>, ChatError> {
        let response = self
            .http
            .get(format!("{}/chat/rooms/buyer", self.base_url))
            .query(&[
                ("buyerId", buyer_id.get().to_string()),
                ("page", page.to_string()),
                ("size", size.to_string()),
            ])
            .send()
            .await?;
        decode(response).await
    }

    /// Fetches one page of a shop's rooms.
    ///
    /// # Errors
    ///
    /// [`ChatError::Http`] on connection failure, [`ChatError::Api`] on
    /// a non-success status.
    pub async fn rooms_for_seller(
        &self,
        shop_id: ShopId,
        page: u32,
        size: u32,
    ) -> Result<PageResponse<RoomDto>, ChatError> {
        let response = self
            .http
            .get(format!("{}/chat/rooms/seller", self.base_url))
            .query(&[
                ("shopId", shop_id.get().to_string()),
                ("page", page.to_string()),
                ("size", size.to_string()),
            ])
            .send()
            .await?;
        decode(response).await
    }

    /// Fetches one page of a room's history, newest first.
    ///
    /// # Errors
    ///
    /// [`ChatError::Http`] on connection failure, [`ChatError::Api`] on
    /// a non-success status.
    pub async fn messages(
        &self,
        room_id: RoomId,
        page: u32,
        size: u32,
    ) -> Result<PageResponse<MessageFrame>, ChatError> {
        let response = self
            .http
            .get(format!("{}/chat/rooms/{room_id}/messages", self.base_url))
            .query(&[("page", page.to_string()), ("size", size.to_string())])
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ChatError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json::<T>().await?)
}
