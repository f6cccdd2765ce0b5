use crate::blockchain::client::{ChainEndpoint, ClientError, HeadSubscription, JsonRpcClient};
use crate::blockchain::gateway::{ConcurrencyGates, Lane};
use crate::blockchain::models::BlockTag;
use crate::tests::common::block_hash;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted JSON-RPC node: block 6 exists, every other block is `null`, and
/// unknown methods answer with a JSON-RPC error object.
#[derive(Default)]
struct ScriptedNode {
    head: AtomicU64,
    head_polls: AtomicUsize,
}

async fn rpc(State(node): State<Arc<ScriptedNode>>, Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    let mut reply = match request["method"].as_str() {
        Some("eth_blockNumber") => {
            node.head_polls.fetch_add(1, Ordering::SeqCst);
            json!({ "result": format!("0x{:x}", node.head.load(Ordering::SeqCst)) })
        }
        Some("eth_getBlockByNumber") if request["params"][0] == "0x6" => json!({
            "result": {
                "number": "0x6",
                "hash": format!("{:#x}", block_hash(6)),
                "parentHash": format!("{:#x}", block_hash(5)),
                "timestamp": "0x6553f100",
                "transactions": [],
            }
        }),
        Some("eth_getBlockByNumber") => json!({ "result": null }),
        _ => json!({ "error": { "code": -32601, "message": "method not found" } }),
    };

    reply["jsonrpc"] = json!("2.0");
    reply["id"] = id;
    Json(reply)
}

async fn serve(head: u64) -> (Arc<ScriptedNode>, String) {
    let node = Arc::new(ScriptedNode::default());
    node.head.store(head, Ordering::SeqCst);

    let app = Router::new().route("/", post(rpc)).with_state(node.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (node, url)
}

fn client(url: &str) -> JsonRpcClient {
    JsonRpcClient::new(url, Duration::from_secs(5), Duration::from_millis(10)).unwrap()
}

async fn next_head(subscription: &mut HeadSubscription) -> u64 {
    tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .expect("head within five seconds")
        .expect("subscription open")
}

#[tokio::test]
async fn decodes_a_block() {
    let (_node, url) = serve(6).await;

    let block = client(&url).get_block(BlockTag::Number(6), false).await.unwrap();

    assert_eq!(block.number, 6);
    assert_eq!(block.hash, block_hash(6));
    assert_eq!(block.timestamp, 0x6553f100);
    assert!(block.transactions.is_empty());
}

#[tokio::test]
async fn null_result_is_not_found() {
    let (_node, url) = serve(6).await;

    let err = client(&url).get_block(BlockTag::Number(5), false).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(err, ClientError::NotFound(what) if what == "block 5"));
}

#[tokio::test]
async fn error_object_is_an_rpc_error() {
    let (_node, url) = serve(6).await;

    let err = client(&url)
        .get_block_receipts(BlockTag::Number(6))
        .await
        .unwrap_err();

    match err {
        ClientError::Rpc { code, message } => {
            assert_eq!(code, -32601);
            assert_eq!(message, "method not found");
        }
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn reads_the_head_height() {
    let (_node, url) = serve(0x1a2b).await;
    assert_eq!(client(&url).block_number().await.unwrap(), 0x1a2b);
}

#[tokio::test]
async fn head_poller_catches_up_at_most_64_heads() {
    let (node, url) = serve(100).await;
    let mut heads = client(&url).subscribe_new_heads().await.unwrap();

    node.head.store(300, Ordering::SeqCst);
    let mut seen = Vec::new();
    for _ in 0..64 {
        seen.push(next_head(&mut heads).await);
    }
    assert_eq!(seen, (237..=300).collect::<Vec<_>>());

    // An unchanged head emits nothing.
    let quiet = tokio::time::timeout(Duration::from_millis(100), heads.next()).await;
    assert!(quiet.is_err());

    node.head.store(301, Ordering::SeqCst);
    assert_eq!(next_head(&mut heads).await, 301);
}

#[tokio::test]
async fn head_polls_wait_for_the_live_gate() {
    let (node, url) = serve(10).await;
    let gates = ConcurrencyGates::new(1, 1, None);
    let mut heads = client(&url)
        .with_head_gates(gates.clone())
        .subscribe_new_heads()
        .await
        .unwrap();

    let held = gates.admit(Lane::Live).await;
    assert!(held.is_some());
    node.head.store(12, Ordering::SeqCst);

    let polls = node.head_polls.load(Ordering::SeqCst);
    let blocked = tokio::time::timeout(Duration::from_millis(100), heads.next()).await;
    assert!(blocked.is_err());
    assert_eq!(node.head_polls.load(Ordering::SeqCst), polls);

    drop(held);
    assert_eq!(next_head(&mut heads).await, 11);
    assert_eq!(next_head(&mut heads).await, 12);
}
