//! Process-wide client instance
//!
//! Kept to a single test: the instance is global to the test binary.

use brokerlink::client::{BrokerClient, Callback, ConnectionState};
use brokerlink::config::ClientConfig;
use brokerlink::error::ClientError;
use brokerlink::global;
use brokerlink::testing::MockFactory;
use bytes::Bytes;

#[tokio::test]
async fn test_global_instance_lifecycle() {
    // Nothing installed yet
    assert!(!global::is_installed().await);
    assert!(matches!(global::publish("a", "b"), Err(ClientError::NotInstalled)));
    assert!(matches!(global::tick().await, Err(ClientError::NotInstalled)));
    assert!(!global::shutdown().await);

    // Install
    let mut config = ClientConfig::default();
    config.connection.delay_ms = 0;
    let factory = MockFactory::new();
    let broker = factory.handle();
    global::create(BrokerClient::new(config.clone(), factory))
        .await
        .unwrap();
    assert!(global::is_installed().await);
    assert!(matches!(
        global::create(BrokerClient::new(config, MockFactory::new())).await,
        Err(ClientError::AlreadyInstalled)
    ));

    // A callback that answers through the global API while tick holds the instance
    global::subscribe(
        "cmd/ping",
        Callback::new(|_, payload| {
            global::publish("cmd/pong", payload).unwrap();
        }),
    )
    .unwrap();
    global::connect().unwrap();
    for _ in 0..4 {
        global::tick().await.unwrap();
    }
    assert_eq!(global::state().await.unwrap(), ConnectionState::Connected);

    assert!(broker.deliver("cmd/ping", "42"));
    let dispatched = global::tick().await.unwrap();

    assert_eq!(dispatched, 1);
    assert_eq!(
        broker.publishes(),
        vec![("cmd/pong".to_string(), Bytes::from_static(b"42"))]
    );
    assert_eq!(global::metrics().await.unwrap().publications_sent, 1);

    // Remove
    assert!(global::shutdown().await);
    assert!(!global::is_installed().await);
    assert!(!broker.is_connected());
    assert!(matches!(global::connect(), Err(ClientError::NotInstalled)));
    assert!(matches!(global::state().await, Err(ClientError::NotInstalled)));
}
