//! # gRPC-Web Flows
//!
//! One session per test over loopback HTTP: both wire formats, every way
//! a response can end, cancellation and deadlines.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::support::{spawn_proxy, MockProxy, Order, Script};
    use zb_block_stream::{
        BlockRangeApi, BlockRangeService, Credentials, GrpcWebClient, RpcCode, RpcStatus,
        StreamConfig, StreamError, StreamOutcome, WireFormat,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn service(url: String, format: WireFormat) -> BlockRangeService<GrpcWebClient> {
        let config = StreamConfig {
            lightwalletd_url: url,
            format,
            ..StreamConfig::for_testing()
        };
        let client = GrpcWebClient::new(&config.lightwalletd_url, None, config.client_options())
            .expect("client");
        BlockRangeService::new(config, client)
    }

    fn heights(outcome: &StreamOutcome) -> Vec<u64> {
        outcome
            .blocks()
            .map(|blocks| blocks.iter().map(|b| b.height).collect())
            .unwrap_or_default()
    }

    // =============================================================================
    // COMPLETION
    // =============================================================================

    #[tokio::test]
    async fn test_text_out_of_order_completes_sorted() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Interleaved))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        let outcome = svc.fetch_range(100, 103).await;

        assert_eq!(heights(&outcome), vec![100, 101, 102, 103]);
        assert_eq!(proxy.content_types(), vec!["application/grpc-web-text"]);
    }

    #[tokio::test]
    async fn test_binary_format_completes() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Reversed))).await;
        let svc = service(proxy.url(), WireFormat::Binary);

        let outcome = svc.fetch_range(1_687_104, 1_687_153).await;

        assert_eq!(heights(&outcome), (1_687_104..=1_687_153).collect::<Vec<_>>());
        assert_eq!(proxy.content_types(), vec!["application/grpc-web+proto"]);
    }

    #[tokio::test]
    async fn test_single_block_range() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        assert_eq!(heights(&svc.fetch_range(5, 5).await), vec![5]);
    }

    #[tokio::test]
    async fn test_trailing_slashes_on_endpoint() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let svc = service(format!("{}///", proxy.url()), WireFormat::Text);

        assert!(svc.fetch_range(10, 12).await.is_completed());
        assert_eq!(proxy.requests(), vec![(10, 12)]);
    }

    #[tokio::test]
    async fn test_body_without_trailers_but_complete() {
        let proxy = spawn_proxy(MockProxy::new(Script::NoTrailers)).await;
        let svc = service(proxy.url(), WireFormat::Text);

        assert_eq!(heights(&svc.fetch_range(7, 9).await), vec![7, 8, 9]);
    }

    // =============================================================================
    // FAILURE
    // =============================================================================

    #[tokio::test]
    async fn test_unavailable_after_two_blocks() {
        let proxy = spawn_proxy(MockProxy::new(Script::ErrorAfter {
            blocks: 2,
            status: RpcStatus::new(RpcCode::Unavailable, "upstream reset"),
        }))
        .await;
        let svc = service(proxy.url(), WireFormat::Text);

        let outcome = svc.fetch_range(100, 103).await;

        match outcome {
            StreamOutcome::Failed(StreamError::Transport { code, details }) => {
                assert_eq!(code, RpcCode::Unavailable);
                assert_eq!(details, "upstream reset");
            }
            other => panic!("expected transport failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_status_after_every_block_still_fails() {
        let proxy = spawn_proxy(MockProxy::new(Script::ErrorAfter {
            blocks: 4,
            status: RpcStatus::new(RpcCode::Internal, "late"),
        }))
        .await;
        let svc = service(proxy.url(), WireFormat::Binary);

        assert!(!svc.fetch_range(100, 103).await.is_completed());
    }

    #[tokio::test]
    async fn test_truncated_body_fails() {
        let proxy = spawn_proxy(MockProxy::new(Script::Truncated { blocks: 2 })).await;
        let svc = service(proxy.url(), WireFormat::Binary);

        let outcome = svc.fetch_range(1, 5).await;

        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamError::Transport { code: RpcCode::Internal, .. })
        ));
    }

    #[tokio::test]
    async fn test_beyond_tip_is_server_error() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending)).with_tip(50)).await;
        let svc = service(proxy.url(), WireFormat::Text);

        let outcome = svc.fetch_range(40, 60).await;

        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamError::Server { code: RpcCode::OutOfRange, .. })
        ));
    }

    #[tokio::test]
    async fn test_trailers_only_response() {
        let proxy = spawn_proxy(MockProxy::new(Script::TrailersOnly(RpcStatus::new(
            RpcCode::FailedPrecondition,
            "not synced",
        ))))
        .await;
        let svc = service(proxy.url(), WireFormat::Text);

        let outcome = svc.fetch_range(1, 2).await;

        assert!(matches!(
            outcome,
            StreamOutcome::Failed(StreamError::Server { code: RpcCode::FailedPrecondition, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_503_maps_to_unavailable() {
        let proxy = spawn_proxy(MockProxy::new(Script::Http(503))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        assert!(matches!(
            svc.fetch_range(1, 2).await,
            StreamOutcome::Failed(StreamError::Transport { code: RpcCode::Unavailable, .. })
        ));
    }

    #[tokio::test]
    async fn test_descending_range_never_reaches_proxy() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        let outcome = svc.fetch_range(2_419_904, 2_411_000).await;

        assert_eq!(
            outcome,
            StreamOutcome::Failed(StreamError::InvalidRange {
                start: 2_419_904,
                end: 2_411_000
            })
        );
        assert!(proxy.requests().is_empty());
    }

    // =============================================================================
    // CANCELLATION / DEADLINE
    // =============================================================================

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let proxy = spawn_proxy(MockProxy::new(Script::Slow(Duration::from_millis(50)))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        let session = svc.open_session(1, 100).await.expect("session");
        let cancel = session.cancel_handle();
        let progress = session.progress();
        let running = tokio::spawn(session.run());

        while progress.blocks_processed() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let outcome = running.await.expect("session task");
        assert_eq!(outcome, StreamOutcome::Failed(StreamError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let proxy = spawn_proxy(MockProxy::new(Script::Slow(Duration::from_millis(300)))).await;
        let mut config = StreamConfig {
            lightwalletd_url: proxy.url(),
            ..StreamConfig::for_testing()
        };
        config.deadline_secs = Some(1);
        let client = GrpcWebClient::new(&config.lightwalletd_url, None, config.client_options())
            .expect("client");
        let svc = BlockRangeService::new(config, client);

        let outcome = svc.fetch_range(1, 10).await;

        assert_eq!(outcome, StreamOutcome::Failed(StreamError::DeadlineExceeded));
    }

    // =============================================================================
    // CREDENTIALS
    // =============================================================================

    #[tokio::test]
    async fn test_bearer_token_reaches_proxy() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let config = StreamConfig {
            lightwalletd_url: proxy.url(),
            auth_token: Some("s3cret".to_string()),
            ..StreamConfig::for_testing()
        };
        let svc = BlockRangeService::new(config.clone(), config.connect().expect("client"));

        assert!(svc.fetch_range(1, 2).await.is_completed());
        assert_eq!(svc.latest_height().await.expect("tip"), 3_000_000);

        assert_eq!(
            proxy.header_values("authorization"),
            vec!["Bearer s3cret", "Bearer s3cret"]
        );
    }

    #[tokio::test]
    async fn test_metadata_headers_reach_proxy() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let metadata = [
            ("x-api-key".to_string(), "k1".to_string()),
            ("x-client-id".to_string(), "wallet-7".to_string()),
        ]
        .into_iter()
        .collect();
        let config = StreamConfig {
            lightwalletd_url: proxy.url(),
            ..StreamConfig::for_testing()
        };
        let client = GrpcWebClient::new(
            &config.lightwalletd_url,
            Some(Credentials::Metadata(metadata)),
            config.client_options(),
        )
        .expect("client");
        let svc = BlockRangeService::new(config, client);

        assert!(svc.fetch_range(1, 2).await.is_completed());

        assert_eq!(proxy.header_values("x-api-key"), vec!["k1"]);
        assert_eq!(proxy.header_values("x-client-id"), vec!["wallet-7"]);
        assert!(proxy.header_values("authorization").is_empty());
        assert_eq!(proxy.header_values("x-grpc-web"), vec!["1"]);
    }

    #[tokio::test]
    async fn test_invalid_metadata_never_reaches_proxy() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let mut config = StreamConfig {
            lightwalletd_url: proxy.url(),
            ..StreamConfig::for_testing()
        };
        config.metadata.insert("bad header".to_string(), "x".to_string());

        assert!(matches!(config.connect(), Err(StreamError::InvalidEndpoint(_))));
        assert!(proxy.requests().is_empty());
    }

    // =============================================================================
    // UNARY
    // =============================================================================

    #[tokio::test]
    async fn test_latest_height_both_formats() {
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending)).with_tip(2_500_123)).await;

        for format in [WireFormat::Text, WireFormat::Binary] {
            let svc = service(proxy.url(), format);
            assert_eq!(svc.latest_height().await.expect("tip"), 2_500_123);
        }
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        zb_telemetry::register_metrics().expect("metrics");
        let proxy = spawn_proxy(MockProxy::new(Script::Serve(Order::Ascending))).await;
        let svc = service(proxy.url(), WireFormat::Text);

        assert!(svc.fetch_range(1, 3).await.is_completed());

        let text = zb_telemetry::encode_metrics().expect("encode");
        assert!(text.contains("zb_stream_sessions_total{outcome=\"completed\"}"));
        assert!(text.contains("zb_stream_blocks_received_total"));
    }
}
