//! Collaborator REST interface tests against a mock HTTP server.

#![allow(clippy::panic)]

mod support;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marketplace_chat::api::ChatApi;
use marketplace_chat::domain::{
    ChatEvent, ChatIdentity, ConnectionState, OrderId, RoomId, ShopId, UserId,
};
use marketplace_chat::error::ChatError;
use marketplace_chat::{ChatClient, ChatConfig};

use support::{ScriptedTransport, init_tracing, wait_event};

fn page(content: serde_json::Value, total: u64) -> serde_json::Value {
    json!({
        "content": content,
        "totalPages": 1,
        "totalElements": total,
        "size": 20,
        "number": 0
    })
}

#[tokio::test]
async fn get_or_create_room_passes_participants() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/rooms"))
        .and(query_param("buyerId", "1"))
        .and(query_param("shopId", "3"))
        .and(query_param("orderId", "12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "buyerUserId": 1,
            "shopId": 3,
            "orderId": 12,
            "createdAt": "2024-05-01T10:00:00Z"
        })))
        .mount(&server)
        .await;

    let api = ChatApi::new(server.uri());
    let dto = api
        .get_or_create_room(UserId::new(1), ShopId::new(3), Some(OrderId::new(12)))
        .await?;
    assert_eq!(dto.id, RoomId::new(7));
    assert_eq!(dto.order_id, Some(OrderId::new(12)));
    Ok(())
}

#[tokio::test]
async fn rooms_for_buyer_deserializes_page_envelope() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rooms/buyer"))
        .and(query_param("buyerId", "1"))
        .and(query_param("page", "0"))
        .and(query_param("size", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            json!([{
                "id": 7,
                "buyerUserId": 1,
                "shopId": 3,
                "createdAt": "2024-05-01T10:00:00Z",
                "unreadCount": 2
            }]),
            1,
        )))
        .mount(&server)
        .await;

    let api = ChatApi::new(server.uri());
    let result = api.rooms_for_buyer(UserId::new(1), 0, 20).await?;
    assert_eq!(result.content.len(), 1);
    assert!(!result.has_more());
    assert_eq!(
        result.content.first().map(|r| r.unread_count),
        Some(Some(2))
    );
    Ok(())
}

#[tokio::test]
async fn non_success_status_surfaces_as_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rooms/7/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let api = ChatApi::new(server.uri());
    let result = api.messages(RoomId::new(7), 0, 50).await;
    let Err(ChatError::Api { status, message }) = result else {
        panic!("expected api error, got {result:?}");
    };
    assert_eq!(status, 500);
    assert_eq!(message, "boom");
    assert!(ChatError::Api { status, message }.is_recoverable());
}

#[tokio::test]
async fn history_load_sorts_newest_first_page_ascending() {
    let server = MockServer::start().await;
    // The backend returns history newest first.
    Mock::given(method("GET"))
        .and(path("/chat/rooms/7/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            json!([
                {
                    "id": 3,
                    "roomId": 7,
                    "senderUserId": 2,
                    "senderRole": "SELLER",
                    "content": "third",
                    "createdAt": "2024-05-01T10:02:00Z"
                },
                {
                    "id": 2,
                    "roomId": 7,
                    "senderUserId": 1,
                    "senderRole": "BUYER",
                    "content": "second",
                    "createdAt": "2024-05-01T10:01:00Z"
                },
                {
                    "id": 1,
                    "roomId": 7,
                    "senderUserId": 2,
                    "senderRole": "SELLER",
                    "content": "first",
                    "createdAt": "2024-05-01T10:00:00Z"
                }
            ]),
            3,
        )))
        .mount(&server)
        .await;

    let transport = ScriptedTransport::new();
    let config = ChatConfig {
        api_base_url: server.uri(),
        ..ChatConfig::default()
    };
    let api = ChatApi::new(config.api_base_url.clone());
    let client = ChatClient::with_parts(
        config,
        ChatIdentity::buyer(UserId::new(1)),
        Arc::new(transport),
        api,
    );
    let mut events = client.subscribe();

    client.load_messages(RoomId::new(7));
    let _ = wait_event(&mut events, |e| {
        matches!(e, ChatEvent::MessagesUpdated { .. })
    })
    .await;

    let messages = client.messages(RoomId::new(7)).await;
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    // The buyer's unread badge counts only the seller's messages.
    let rooms = client.rooms().await;
    assert_eq!(rooms.first().map(|r| r.unread_count), Some(2));
}

#[tokio::test]
async fn room_list_load_failure_keeps_client_usable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/rooms/buyer"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let transport = ScriptedTransport::new();
    let config = ChatConfig {
        api_base_url: server.uri(),
        ..ChatConfig::default()
    };
    let api = ChatApi::new(config.api_base_url.clone());
    let client = ChatClient::with_parts(
        config,
        ChatIdentity::buyer(UserId::new(1)),
        Arc::new(transport),
        api,
    );
    let mut events = client.subscribe();

    client.load_rooms();
    let event = wait_event(&mut events, |e| {
        matches!(e, ChatEvent::RoomsLoadFailed { .. })
    })
    .await;
    let ChatEvent::RoomsLoadFailed { error } = event else {
        panic!("expected rooms load failure");
    };
    assert!(error.contains("503"));

    // The failure is non-fatal; the client still answers snapshots.
    assert!(client.rooms().await.is_empty());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}
