mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use common::{ALICE, BOB, CAROL, TestApp, app, app_with, token};
use parley_api::Limits;
use parley_gateway::GatewayConfig;
use parley_types::models::ReceiptStatus;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, user_id: i64) -> Socket {
    let url = format!("ws://{addr}/gateway?token={}", token(user_id));
    let (mut ws, _) = connect_async(url).await.unwrap();
    let ready = next_of(&mut ws, "ready").await;
    assert_eq!(ready["data"]["user_id"], user_id);
    ws
}

/// Next envelope of the given type, skipping any others.
async fn next_of(ws: &mut Socket, kind: &str) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            let env: Value = serde_json::from_str(text.as_str()).unwrap();
            if env["type"] == kind {
                return env;
            }
        }
    }
}

async fn post(addr: SocketAddr, user_id: i64, path: &str, body: Value) -> Value {
    let res = reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .bearer_auth(token(user_id))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success(), "{}", res.status());
    res.json().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_requires_a_token() {
    let app = app().await;
    let addr = serve(&app).await;

    assert!(connect_async(format!("ws://{addr}/gateway")).await.is_err());
    assert!(connect_async(format!("ws://{addr}/gateway?token=garbage")).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_clients_are_pinged_then_dropped() {
    let gateway = GatewayConfig {
        ping_interval: Duration::from_millis(100),
        read_deadline: Duration::from_millis(400),
        ..GatewayConfig::default()
    };
    let app = app_with(Limits::default(), gateway).await;
    let addr = serve(&app).await;
    let mut ws = connect(addr, BOB).await;

    // Reading answers each ping, which keeps the connection past the deadline
    let mut pings = 0;
    while pings < 6 {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no ping within the interval")
            .expect("socket closed")
            .unwrap();
        if let Message::Ping(_) = frame {
            pings += 1;
        }
    }
    assert_eq!(app.state.dispatcher.connection_count(BOB).await, 1);

    // Stop reading: no more pongs go back
    let dropped = timeout(Duration::from_secs(3), async {
        while app.state.dispatcher.connection_count(BOB).await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(dropped.is_ok(), "silent connection is still registered");
    drop(ws);
}

#[tokio::test(flavor = "multi_thread")]
async fn message_reaches_every_device_of_every_member() {
    let app = app().await;
    let addr = serve(&app).await;
    let room = app.state.db.create_group_room("team", ALICE, &[BOB]).unwrap().id;

    let mut phone = connect(addr, BOB).await;
    let mut laptop = connect(addr, BOB).await;
    let mut sender = connect(addr, ALICE).await;
    let mut outsider = connect(addr, CAROL).await;

    let sent = post(addr, ALICE, &format!("/rooms/{room}/messages"), json!({ "content": "standup?" })).await;
    let id = sent["id"].as_i64().unwrap();

    for ws in [&mut phone, &mut laptop, &mut sender] {
        // The day separator goes out first
        let separator = next_of(ws, "message_created").await;
        assert_eq!(separator["data"]["message"]["message_type"], "system");

        let created = next_of(ws, "message_created").await;
        assert_eq!(created["room_id"], room);
        assert_eq!(created["data"]["message"]["id"], id);
        assert_eq!(created["data"]["room"]["name"], "team");
    }

    let unread = next_of(&mut phone, "room_unread_update").await;
    assert_eq!(unread["data"]["user_id"], BOB);
    assert_eq!(unread["data"]["unread_count"], 1);
    assert_eq!(unread["data"]["last_message"]["id"], id);

    // Written before the unread update went out
    let (status, _) = app.state.db.receipt(id, BOB).unwrap().unwrap();
    assert_eq!(status, ReceiptStatus::Delivered);

    let nothing = timeout(Duration::from_millis(300), async {
        loop {
            if let Some(Ok(Message::Text(_))) = outsider.next().await {
                return;
            }
        }
    })
    .await;
    assert!(nothing.is_err(), "outsider received a room event");
}

#[tokio::test(flavor = "multi_thread")]
async fn seen_and_reaction_updates_are_broadcast() {
    let app = app().await;
    let addr = serve(&app).await;
    let room = app.state.db.create_group_room("team", ALICE, &[BOB]).unwrap().id;

    let mut alice = connect(addr, ALICE).await;
    let mut bob = connect(addr, BOB).await;

    let id = post(addr, ALICE, &format!("/rooms/{room}/messages"), json!({ "content": "done" })).await["id"]
        .as_i64()
        .unwrap();

    post(addr, BOB, &format!("/rooms/{room}/seen"), json!({ "up_to_message_id": id })).await;
    let seen = next_of(&mut alice, "room_seen_update").await;
    assert_eq!(seen["data"]["user_id"], BOB);
    assert_eq!(seen["data"]["display_name"], "bob");
    assert_eq!(seen["data"]["last_seen_message_id"], id);

    // The reader's own devices hear about it too
    let own = next_of(&mut bob, "room_seen_update").await;
    assert_eq!(own["data"]["up_to_message_id"], id);

    post(addr, BOB, &format!("/messages/{id}/reactions"), json!({ "reaction": "🔥" })).await;
    let reaction = next_of(&mut alice, "reaction_updated").await;
    assert_eq!(reaction["data"]["message_id"], id);
    assert_eq!(reaction["data"]["actor_id"], BOB);
    assert_eq!(reaction["data"]["reactions"][0]["count"], 1);
    assert_eq!(reaction["data"]["reactions"][0]["reacted_by_me"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn room_lifecycle_events() {
    let app = app().await;
    let addr = serve(&app).await;

    let mut alice = connect(addr, ALICE).await;
    let mut carol = connect(addr, CAROL).await;

    let created = post(addr, ALICE, "/rooms/group", json!({ "name": "ops" })).await;
    let room = created["room"]["id"].as_i64().unwrap();

    post(addr, ALICE, &format!("/rooms/{room}/members"), json!({ "user_ids": [CAROL] })).await;
    let added = next_of(&mut alice, "room.member_added").await;
    assert_eq!(added["data"]["user_ids"], json!([CAROL]));
    assert_eq!(added["data"]["added_by"], ALICE);

    let joined = next_of(&mut carol, "room.joined").await;
    assert_eq!(joined["data"]["room"]["id"], room);
    assert_eq!(joined["data"]["room"]["name"], "ops");

    let res = reqwest::Client::new()
        .delete(format!("http://{addr}/rooms/{room}"))
        .bearer_auth(token(ALICE))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NO_CONTENT);

    let deleted = next_of(&mut carol, "room.deleted").await;
    assert_eq!(deleted["room_id"], room);
    assert_eq!(deleted["data"]["deleted_by"], ALICE);
}
