use isolation::pool::{PoolProvider, PoolSettings};
use isolation::{ErrorKind, Reference, TestContext};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_first_calls_share_one_pool() {
    init_test_tracing();
    let reference = Reference::shared().unwrap();

    TestContext::run_current(async |ctx| {
        let settings = PoolSettings {
            max_connections: 4,
            ..reference.pool_settings()
        };
        let provider = PoolProvider::register(reference.endpoint().clone(), settings, ctx)
            .await
            .unwrap();

        let (first, second, third, fourth) = tokio::join!(
            provider.pool(),
            provider.pool(),
            provider.pool(),
            provider.pool()
        );
        let pools = [
            first.unwrap(),
            second.unwrap(),
            third.unwrap(),
            fourth.unwrap(),
        ];

        assert_eq!(pools[0].size(), 1, "a single connection attempt was made");

        provider.close().await.unwrap();
        assert!(pools.iter().all(|pool| pool.is_closed()));

        let err = provider.pool().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    })
    .await;
}
