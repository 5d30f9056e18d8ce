use marketsync_core::{HistoryInterval, MarketError, Outcome, TradeQuery, TradeSource};
use marketsync_polymarket::{ClientConfig, PolymarketClient, TradeSchema};
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer, schema: TradeSchema) -> PolymarketClient {
    let config = ClientConfig::default()
        .with_base_url(&server.uri())
        .with_trade_schema(schema);
    assert_ok!(PolymarketClient::new(config))
}

#[tokio::test]
async fn test_prices_history_sorted_and_filtered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices-history"))
        .and(query_param("market", "tok-yes"))
        .and(query_param("interval", "1d"))
        .and(query_param("fidelity", "15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "history": [
                { "t": 1_700_003_600, "p": 0.55 },
                { "t": 1_700_000_000, "p": 0.40 },
                { "t": 1_700_000_000, "p": 0.41 },
                { "t": 1_700_007_200, "p": 1.7 }
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let points = assert_ok!(
        client
            .get_prices_history("tok-yes", HistoryInterval::OneDay, None)
            .await
    );

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].timestamp, 1_700_000_000);
    assert_eq!(points[1].timestamp, 1_700_003_600);
    assert!((points[1].price + points[1].complement_price - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_prices_history_unexpected_shape_is_schema_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices-history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "points": [] })))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let err = client
        .get_prices_history("tok-yes", HistoryInterval::Max, Some(60))
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::UpstreamSchema { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limited_response_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let err = client
        .trades(&TradeQuery::recent("inst-1", "0xcond", 500))
        .await
        .unwrap_err();

    assert!(matches!(err, MarketError::TransientNetwork(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_ledger_trades_skip_unparseable_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .and(query_param("market", "0xcond"))
        .and(query_param("limit", "500"))
        .and(query_param("start", "1700000000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "t-1",
                "outcomeIndex": 0,
                "amount": 12.5,
                "price": 0.4,
                "timestamp": 1_700_000_100,
                "counterparty": "0xabc",
                "txRef": "0xtx1"
            },
            {
                "id": "t-2",
                "outcomeIndex": 1,
                "amount": 3.0,
                "price": 0.65,
                "timestamp": 1_700_000_200_000i64
            },
            { "id": "t-3", "price": "not a number" }
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let query = TradeQuery::recent("inst-1", "0xcond", 500).since(1_700_000_000);
    let trades = assert_ok!(client.trades(&query).await);

    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].id, "t-1");
    assert_eq!(trades[0].outcome, Outcome::Primary);
    assert_eq!(trades[0].origin.as_deref(), Some("0xtx1"));
    assert_eq!(trades[1].outcome, Outcome::Complement);
    assert_eq!(trades[1].timestamp, 1_700_000_200);
    assert!(trades.iter().all(|t| t.instrument_id == "inst-1"));
}

#[tokio::test]
async fn test_data_api_schema_builds_ids_from_transaction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "side": "BUY",
                "asset": "tok-yes",
                "conditionId": "0xcond",
                "size": 10.0,
                "price": 0.52,
                "timestamp": 1_700_000_000,
                "outcomeIndex": 0,
                "transactionHash": "0xhash"
            }
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::DataApi).await;
    let trades = assert_ok!(
        client
            .trades(&TradeQuery::recent("inst-1", "0xcond", 500))
            .await
    );

    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id, "0xhash:tok-yes:0:BUY");
    assert_eq!(trades[0].amount, 10.0);
}

#[tokio::test]
async fn test_wrong_schema_version_is_schema_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "side": "SELL",
                "asset": "tok-no",
                "conditionId": "0xcond",
                "size": 1.0,
                "price": 0.3,
                "timestamp": 1_700_000_000,
                "outcomeIndex": 1,
                "transactionHash": "0xhash"
            }
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let err = client
        .trades(&TradeQuery::recent("inst-1", "0xcond", 500))
        .await
        .unwrap_err();

    match err {
        MarketError::UpstreamSchema { source_name, .. } => assert_eq!(source_name, "trades/ledger"),
        other => panic!("expected schema error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_trade_list_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let trades = assert_ok!(
        client
            .trades(&TradeQuery::recent("inst-1", "0xcond", 500))
            .await
    );
    assert!(trades.is_empty());
}

#[tokio::test]
async fn test_query_values_are_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices-history"))
        .and(query_param("market", "tok yes&side=1"))
        .and(query_param("interval", "max"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "history": [{ "t": 1_700_000_000, "p": 0.5 }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trades"))
        .and(query_param("market", "0xcond#1"))
        .and(query_param("limit", "500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server, TradeSchema::Ledger).await;
    let points = assert_ok!(
        client
            .get_prices_history("tok yes&side=1", HistoryInterval::Max, None)
            .await
    );
    assert_eq!(points.len(), 1);
    assert_ok!(
        client
            .trades(&TradeQuery::recent("inst-1", "0xcond#1", 500))
            .await
    );
}
