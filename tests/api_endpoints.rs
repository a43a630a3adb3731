//! Integration tests for the ForgeLedger HTTP API
//!
//! These tests drive the router in-process and check status codes and JSON
//! shapes for every route.

use axum_test::TestServer;
use forgeledger::api::build_api_router;
use forgeledger::blockchain::Block;
use forgeledger::config::Config;
use forgeledger::contract::samples::TRANSFER_CONTRACT;
use forgeledger::miner::{mine_block, now_millis};
use forgeledger::node::Node;
use serde_json::{json, Value};

fn test_config() -> Config {
    let mut config = Config::default();
    config.node.node_id = "api-test".to_string();
    config.node.genesis_balance = 500;
    config.mining.difficulty = 1;
    config.mining.reward = 25;
    config
}

fn test_server() -> (TestServer, Node) {
    let node = Node::ephemeral(test_config(), "node-owner".to_string())
        .expect("Failed to create node");
    let server =
        TestServer::new(build_api_router(node.clone())).expect("Failed to create test server");
    (server, node)
}

async fn mined_block(node: &Node) -> Block {
    let job = node
        .mining_job("miner", 10, now_millis())
        .await
        .expect("mining job");
    mine_block(job.block, job.difficulty, &job.used_nonces)
}

#[tokio::test]
async fn test_read_endpoints() {
    let (server, _node) = test_server();

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["node_id"], "api-test");
    assert!(json["timestamp"].is_string());

    let response = server.get("/chain").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["length"], 1);
    assert_eq!(json["total_blocks"], 1);
    assert_eq!(json["max_height"], 0);
    assert!(json["chain"].is_array());
    assert!(json["chain"][0]["hash"].is_string());

    let response = server.get("/balance/node-owner").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["address"], "node-owner");
    assert_eq!(json["balance"], 500);

    let response = server.get("/stats").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["chain_length"], 1);
    assert_eq!(json["difficulty"], 1);
    assert_eq!(json["pending_transactions"], 0);
    assert!(json["recent_blocks"].is_array());
    assert!(json["top_accounts"].is_array());
}

#[tokio::test]
async fn test_transaction_and_block_flow() {
    let (server, node) = test_server();

    let response = server
        .post("/transactions/new")
        .json(&json!({
            "type": "transfer",
            "from": "node-owner",
            "to": "bob",
            "value": 200,
            "timestamp": 1,
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert!(json["hash"].is_string());
    assert_eq!(node.pending_transactions().await.len(), 1);

    // Same transaction again is a duplicate.
    let response = server
        .post("/transactions/new")
        .json(&json!({
            "type": "transfer",
            "from": "node-owner",
            "to": "bob",
            "value": 200,
            "timestamp": 1,
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "duplicate_transaction");

    let block = mined_block(&node).await;
    let response = server.post("/blocks/new").json(&block).await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["height"], 1);
    assert_eq!(json["fork_adopted"], false);

    let json: Value = server.get("/balance/bob").await.json();
    assert_eq!(json["balance"], 200);
    let json: Value = server.get("/balance/miner").await.json();
    assert_eq!(json["balance"], 25);
    assert!(node.pending_transactions().await.is_empty());

    // Replaying the block is refused and changes nothing.
    let response = server.post("/blocks/new").json(&block).await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "block_already_exists");
    let json: Value = server.get("/chain").await.json();
    assert_eq!(json["length"], 2);
}

#[tokio::test]
async fn test_rejections() {
    let (server, node) = test_server();

    let response = server
        .post("/transactions/new")
        .json(&json!({ "type": "transfer", "from": "node-owner" }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "structural_error");
    assert!(json["message"].as_str().unwrap_or_default().contains("to"));

    let response = server
        .post("/transactions/new")
        .json(&json!({
            "from": "node-owner",
            "to": "bob",
            "value": 10_000,
            "timestamp": 2,
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "economic_error");

    let mut block = mined_block(&node).await;
    block.nonce = block.nonce.wrapping_add(1);
    let response = server.post("/blocks/new").json(&block).await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "consensus_error");
    assert!(json["message"]
        .as_str()
        .unwrap_or_default()
        .contains("Block hash mismatch"));

    let response = server.get("/contracts/does-not-exist").await;
    assert_eq!(response.status_code(), 404);
    let json: Value = response.json();
    assert_eq!(json["reason"], "contract_not_found");
}

#[tokio::test]
async fn test_contract_routes() {
    let (server, node) = test_server();

    let response = server
        .post("/contracts/deploy")
        .json(&json!({ "code": TRANSFER_CONTRACT }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["message"], "Missing fields: from, signature");

    let response = server
        .post("/contracts/deploy")
        .json(&json!({
            "code": TRANSFER_CONTRACT,
            "from": "node-owner",
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    let contract_id = json["contract_id"].as_str().unwrap_or_default().to_string();
    assert_eq!(contract_id.len(), 16);

    let block = mined_block(&node).await;
    server.post("/blocks/new").json(&block).await;

    let response = server.get(&format!("/contracts/{}", contract_id)).await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["owner"], "node-owner");
    assert_eq!(json["deployed_in_block"], 1);

    let response = server
        .post("/contracts/call")
        .json(&json!({
            "contract_id": contract_id,
            "from": "node-owner",
            "function": "deposit",
            "args": { "amount": 40 },
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["result"]["output"], "Deposited 40, new balance: 40");

    let response = server
        .post("/contracts/call")
        .json(&json!({
            "contract_id": contract_id,
            "from": "node-owner",
            "function": "no_such_function",
            "signature": ""
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["reason"], "contract_error");
}

#[tokio::test]
async fn test_accounts_and_peers() {
    let (server, _node) = test_server();

    let response = server
        .post("/accounts/create")
        .json(&json!({ "address": "carol" }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["balance"], 1000);

    let response = server
        .post("/accounts/create")
        .json(&json!({ "address": "carol", "initial_balance": 5 }))
        .await;
    let json: Value = response.json();
    assert_eq!(json["balance"], 1005);

    let response = server.post("/accounts/create").json(&json!({})).await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/peers")
        .json(&json!({ "nodes": ["127.0.0.1:5001", "127.0.0.1:5001", "127.0.0.1:5002"] }))
        .await;
    assert_eq!(response.status_code(), 201);
    let json: Value = response.json();
    assert_eq!(json["total_nodes"], json!(["127.0.0.1:5001", "127.0.0.1:5002"]));

    let response = server.post("/peers").json(&json!({})).await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert_eq!(json["message"], "Error: Please provide a valid list of nodes");
}
