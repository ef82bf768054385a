//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 内存 transport 上的 e2e 测试（无需 ZeroMQ 对端）
//! - 控制面状态机与回滚

#[cfg(test)]
mod contract_tests {
    use contracts::RunState;

    #[test]
    fn test_contracts_compile() {
        assert_eq!(RunState::default(), RunState::Stopped);
        assert!(!RunState::Running.can_configure());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::io::Write;
    use std::time::Duration;

    use async_channel::Receiver;
    use bytes::Bytes;
    use contracts::{
        OutputConfig, OutputPattern, PolicyConfig, RepeaterConfig, RunState, UpstreamConfig,
        UpstreamPattern, WriterConfig, DEFAULT_EXPECTED_SOURCE,
    };
    use controller::{ConfigSource, ControlError, LoopTiming, Repeater};
    use transport::{MemoryConfig, MemoryTransport};

    /// How long an output must stay silent before collection ends
    const QUIET: Duration = Duration::from_millis(200);

    fn timing() -> LoopTiming {
        LoopTiming {
            connect_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            pop_timeout: Duration::from_millis(10),
            idle_interval: Duration::from_millis(1),
        }
    }

    fn output(name: &str, port: u16, policy: PolicyConfig) -> OutputConfig {
        OutputConfig {
            name: name.to_string(),
            port,
            pattern: OutputPattern::Push,
            policy,
            queue_capacity: 100,
            writer: None,
        }
    }

    fn repeater_config(outputs: Vec<OutputConfig>) -> RepeaterConfig {
        RepeaterConfig {
            upstream: UpstreamConfig {
                address: "tcp://127.0.0.1:9609".to_string(),
                pattern: UpstreamPattern::Pull,
                expected_source: DEFAULT_EXPECTED_SOURCE.to_string(),
            },
            outputs,
            block_size: 15,
            io_threads: 1,
        }
    }

    /// Upstream message as the detector sends it
    fn message(seq: u64) -> Vec<Bytes> {
        vec![
            Bytes::from(format!(
                r#"{{"frame": {seq}, "source": "gigafrost", "type": "uint16", "shape": [2, 2]}}"#
            )),
            Bytes::from(vec![seq as u8; 8]),
        ]
    }

    fn feed_range(transport: &MemoryTransport, seqs: impl IntoIterator<Item = u64>) {
        for seq in seqs {
            transport.feed(message(seq)).unwrap();
        }
    }

    fn metadata(parts: &[Bytes]) -> serde_json::Value {
        serde_json::from_slice(&parts[0]).unwrap()
    }

    /// Collect every message from an output until it stays quiet
    async fn drain(rx: &Receiver<Vec<Bytes>>) -> Vec<Vec<Bytes>> {
        let mut messages = Vec::new();
        while let Ok(Ok(parts)) = tokio::time::timeout(QUIET, rx.recv()).await {
            messages.push(parts);
        }
        messages
    }

    async fn drain_frames(rx: &Receiver<Vec<Bytes>>) -> Vec<u64> {
        drain(rx)
            .await
            .iter()
            .map(|parts| metadata(parts)["frame"].as_u64().unwrap())
            .collect()
    }

    async fn running(transport: &MemoryTransport, config: RepeaterConfig) -> Repeater<MemoryTransport> {
        let repeater = Repeater::new(transport.clone()).with_timing(timing());
        repeater.configure(config).await.into_result().unwrap();
        assert_eq!(repeater.start().await.into_result().unwrap(), RunState::Running);
        repeater
    }

    /// End-to-end: one upstream, three outputs with independent policies
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_fanout_policies() {
        let transport = MemoryTransport::new();
        let every_2 = transport.output(9901);
        let every_3 = transport.output(9902);
        let stride_3 = transport.output(9903);

        let repeater = running(
            &transport,
            repeater_config(vec![
                output("every-2", 9901, PolicyConfig::EveryNth { n: 2 }),
                output("every-3", 9902, PolicyConfig::EveryNth { n: 3 }),
                output("stride-3", 9903, PolicyConfig::Stride { n: 3 }),
            ]),
        )
        .await;

        // 11 is the last frame of a stride pause
        feed_range(&transport, 0..=11);

        assert_eq!(drain_frames(&every_2).await, vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(drain_frames(&every_3).await, vec![0, 3, 6, 9]);
        assert_eq!(drain_frames(&stride_3).await, vec![0, 1, 2, 6, 7, 8]);

        assert!(repeater.stop().await.is_ok());
        let stats = repeater.stats().await;
        assert_eq!(stats.ingest.unwrap().frames_received, 12);
        let sent: Vec<u64> = stats.outputs.iter().map(|o| o.sent_count).collect();
        assert_eq!(sent, vec![6, 4, 6]);
    }

    /// Payload and metadata pass through byte-for-byte
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_passthrough_unchanged() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9904);
        let repeater = running(
            &transport,
            repeater_config(vec![output("all", 9904, PolicyConfig::EveryNth { n: 1 })]),
        )
        .await;

        feed_range(&transport, 40..43);
        let received = drain(&rx).await;
        assert_eq!(received.len(), 3);
        for (parts, seq) in received.iter().zip(40..43) {
            assert_eq!(parts, &message(seq));
        }
        repeater.stop().await.into_result().unwrap();
    }

    /// Frames from another source and undecodable frames are skipped
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_rejects_bad_frames() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9905);
        let repeater = running(
            &transport,
            repeater_config(vec![output("all", 9905, PolicyConfig::EveryNth { n: 1 })]),
        )
        .await;

        transport.feed(message(0)).unwrap();
        transport
            .feed(vec![
                Bytes::from_static(br#"{"frame": 1, "source": "eiger"}"#),
                Bytes::from_static(b"x"),
            ])
            .unwrap();
        transport
            .feed(vec![Bytes::from_static(b"not json"), Bytes::from_static(b"x")])
            .unwrap();
        transport.feed(vec![Bytes::from_static(br#"{"frame": 3}"#)]).unwrap();
        transport.feed(message(4)).unwrap();

        assert_eq!(drain_frames(&rx).await, vec![0, 4]);
        repeater.stop().await.into_result().unwrap();

        let ingest = repeater.stats().await.ingest.unwrap();
        assert_eq!(ingest.frames_received, 5);
        assert_eq!(ingest.frames_rejected, 3);
        assert_eq!(repeater.state(), RunState::Stopped);
    }

    /// Writer outputs renumber frames and finish after `n_images`
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_writer_mode() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9906);
        let mut writer = output("writer", 9906, PolicyConfig::EveryNth { n: 2 });
        writer.writer = Some(WriterConfig {
            output_file: "/data/run_0007.h5".to_string(),
            run_id: 7,
            detector_name: "gigafrost".to_string(),
            n_images: 3,
        });
        let repeater = running(&transport, repeater_config(vec![writer])).await;

        feed_range(&transport, 0..11);
        let received = drain(&rx).await;
        assert_eq!(received.len(), 3);

        let statuses: Vec<_> = received
            .iter()
            .map(|parts| metadata(parts)["status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["writing", "writing", "finished"]);

        for (i, parts) in received.iter().enumerate() {
            let meta = metadata(parts);
            assert_eq!(meta["frame"], i as u64);
            assert_eq!(meta["i_image"], i as u64);
            assert_eq!(meta["image_attributes"]["image_number"], i as u64);
            assert_eq!(meta["run_id"], 7);
            assert_eq!(meta["output_file"], "/data/run_0007.h5");
            // payload of upstream frame 0, 2, 4
            assert_eq!(parts[1].as_ref(), &[(i * 2) as u8; 8]);
        }

        repeater.stop().await.into_result().unwrap();
        let stats = repeater.stats().await;
        assert_eq!(stats.outputs[0].sent_count, 3);
        assert_eq!(stats.outputs[0].dropped_count, 3);
    }

    /// Full lifecycle including the rejected transitions
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_state_machine() {
        let transport = MemoryTransport::new();
        let repeater = Repeater::new(transport.clone()).with_timing(timing());
        let config = repeater_config(vec![output("a", 9907, PolicyConfig::Throttle { seconds: 1 })]);

        let outcome = repeater.start().await;
        assert!(matches!(outcome.error(), Some(ControlError::Lifecycle { .. })));
        assert_eq!(repeater.state(), RunState::Stopped);

        let outcome = repeater.stop().await;
        assert_eq!(outcome.report().response, "error");

        assert_eq!(
            repeater.configure(config.clone()).await.into_result().unwrap(),
            RunState::Ready
        );
        assert!(repeater.stop().await.error().is_some());
        assert_eq!(repeater.state(), RunState::Ready);

        // Ready accepts a new configuration
        assert!(repeater.configure(config.clone()).await.is_ok());
        assert_eq!(repeater.start().await.report().response, "success");
        assert!(repeater.start().await.error().is_some());
        assert_eq!(repeater.state(), RunState::Running);

        assert_eq!(repeater.stop().await.into_result().unwrap(), RunState::Stopped);
        assert!(repeater.start().await.error().is_some());

        // an invalid configuration moves to Error, a valid one recovers
        let mut invalid = config.clone();
        invalid.outputs[0].port = 0;
        let outcome = repeater.configure(invalid).await;
        assert!(matches!(outcome.error(), Some(ControlError::Configuration(_))));
        assert_eq!(repeater.state(), RunState::Error);
        assert_eq!(repeater.config().await.config, Some(config.clone()));

        assert!(repeater.configure(config).await.is_ok());
        assert!(repeater.start().await.is_ok());
        assert!(repeater.stop().await.is_ok());
    }

    /// Bind failure on the last output releases every earlier socket
    #[tokio::test]
    async fn test_start_rollback_on_bind_failure() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            fail_bind_ports: vec![9912],
            ..Default::default()
        });
        let repeater = Repeater::new(transport.clone()).with_timing(timing());
        repeater
            .configure(repeater_config(vec![
                output("a", 9910, PolicyConfig::EveryNth { n: 1 }),
                output("b", 9911, PolicyConfig::EveryNth { n: 1 }),
                output("c", 9912, PolicyConfig::EveryNth { n: 1 }),
            ]))
            .await
            .into_result()
            .unwrap();

        let outcome = repeater.start().await;
        assert!(matches!(outcome.error(), Some(ControlError::Start { .. })));
        assert_eq!(outcome.state, RunState::Error);
        assert!(transport.bound_ports().is_empty());

        let report = outcome.report();
        assert_eq!(report.error_kind, Some("start"));
        assert!(report.error.unwrap().contains("9912"));
    }

    /// Losing the upstream socket moves a running repeater to Error
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_upstream_loss_moves_to_error() {
        let transport = MemoryTransport::new();
        let rx = transport.output(9913);
        let repeater = running(
            &transport,
            repeater_config(vec![output("a", 9913, PolicyConfig::EveryNth { n: 1 })]),
        )
        .await;
        let mut states = repeater.subscribe();

        feed_range(&transport, 0..3);
        assert_eq!(drain_frames(&rx).await, vec![0, 1, 2]);

        transport.close_upstream();
        tokio::time::timeout(
            Duration::from_secs(2),
            states.wait_for(|state| *state == RunState::Error),
        )
        .await
        .unwrap()
        .unwrap();

        // configure is allowed from Error and joins the failed run first
        let config = repeater_config(vec![output("a", 9913, PolicyConfig::EveryNth { n: 1 })]);
        assert!(repeater.configure(config).await.is_ok());
        assert!(transport.bound_ports().is_empty());
        assert_eq!(repeater.stats().await.outputs[0].sent_count, 3);
    }

    /// Configuration loaded from a TOML file through the control surface
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_configure_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
block_size = 2

[upstream]
address = "tcp://127.0.0.1:9609"
pattern = "PULL"

[[outputs]]
name = "blocks"
port = 9914
pattern = "Push"
policy = {{ kind = "block", n = 5 }}
"#
        )
        .unwrap();

        let transport = MemoryTransport::new();
        let rx = transport.output(9914);
        let repeater = Repeater::new(transport.clone()).with_timing(timing());
        let outcome = repeater
            .configure(ConfigSource::File(file.path().to_path_buf()))
            .await;
        assert_eq!(outcome.into_result().unwrap(), RunState::Ready);

        let snapshot = repeater.config().await;
        assert_eq!(snapshot.config.as_ref().unwrap().block_size, 2);

        repeater.start().await.into_result().unwrap();
        feed_range(&transport, 0..11);
        assert_eq!(drain_frames(&rx).await, vec![0, 1, 5, 6, 10]);
        repeater.stop().await.into_result().unwrap();

        let missing = repeater
            .configure(ConfigSource::File("/nonexistent/repstream.toml".into()))
            .await;
        assert_eq!(missing.state, RunState::Error);
        assert_eq!(missing.report().error_kind, Some("configuration"));
    }
}
