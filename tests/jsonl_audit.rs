//! The file-backed store receives the same bytes the client saw.

use std::sync::Arc;

use capture_proxy::store::JsonlStore;
use capture_proxy::{Transaction, TransactionStore};

mod common;

#[tokio::test]
async fn test_transactions_appended_to_file() {
    let upstream = common::start_upstream(|req| {
        let status = if req.uri.starts_with("/refund") { 409 } else { 200 };
        (status, format!("seen {}", req.uri).into_bytes())
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transactions.jsonl");
    let store = Arc::new(JsonlStore::open(&path).await.unwrap());
    let proxy = common::start_proxy(&upstream.base_url(), store.clone(), 5).await;

    let client = common::client();
    let mut delivered = Vec::new();
    for path in ["/charge", "/refund"] {
        let res = client
            .post(proxy.url(path))
            .header("Api-Key", "file-key")
            .body(format!("payload for {path}"))
            .send()
            .await
            .unwrap();
        delivered.push((res.status().as_u16(), res.text().await.unwrap()));
    }

    proxy.stop().await;
    store.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let mut txs: Vec<Transaction> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    txs.sort_by(|a, b| a.url.cmp(&b.url));

    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].url, "/charge");
    assert_eq!(txs[0].status, delivered[0].0);
    assert_eq!(txs[0].response, delivered[0].1);
    assert_eq!(txs[0].request, "payload for /charge");
    assert_eq!(txs[1].url, "/refund");
    assert_eq!(txs[1].status, 409);
    assert_eq!(txs[1].response, delivered[1].1);
    assert!(txs.iter().all(|tx| tx.api_key == "file-key"));
}
