//! Coordinator Module Tests
//!
//! Drives real storage nodes and a real coordinator over loopback TCP through
//! [`ClientSession`](crate::client::ClientSession).
//!
//! ## Test Scopes
//! - **Placement**: partition counts, lengths and capacity filtering.
//! - **Round Trips**: byte-identical downloads for every node count and size.
//! - **Failure Handling**: empty pools, failed partition writes, evicted owners,
//!   damaged partitions and streams cut short.
//! - **Lifecycle**: deletes, re-uploads, concurrent uploads and shutdown.

#[cfg(test)]
mod tests {
    use crate::catalog::types::{FileCatalogEntry, PartitionOwner, PartitionRecord};
    use crate::client::{ClientSession, DownloadOutcome};
    use crate::config::Config;
    use crate::coordinator::placement::{partition_lengths, plan_for};
    use crate::coordinator::service::Coordinator;
    use crate::error::PartitionStoreError;
    use crate::events::EventBus;
    use crate::membership::types::StorageNode;
    use crate::protocol::codec::WireStream;
    use crate::protocol::types::PartitionId;
    use crate::storage::service::StorageNodeService;
    use rand::Rng;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct TestCluster {
        coordinator: Arc<Coordinator>,
        nodes: Vec<Arc<StorageNodeService>>,
        _dirs: Vec<TempDir>,
        session: ClientSession,
    }

    impl TestCluster {
        async fn start(node_count: usize) -> Self {
            let config = Config {
                bind_addr: "127.0.0.1".parse().unwrap(),
                client_port: 0,
                broadcast_port: 0,
                discovery_probe: false,
                io_timeout: TIMEOUT,
                ..Config::default()
            };
            let coordinator = Coordinator::bind(config, EventBus::new()).await.unwrap();
            coordinator.clone().start().await.unwrap();

            let session = ClientSession::new(coordinator.local_addr(), TIMEOUT, 8192);
            let mut cluster = Self {
                coordinator,
                nodes: Vec::new(),
                _dirs: Vec::new(),
                session,
            };
            for _ in 0..node_count {
                cluster.add_node().await;
            }
            cluster
        }

        async fn add_node(&mut self) -> SocketAddr {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                bind_addr: "127.0.0.1".parse().unwrap(),
                node_port: 0,
                data_dir: dir.path().to_path_buf(),
                io_timeout: TIMEOUT,
                ..Config::default()
            };
            let node = StorageNodeService::bind(&config, EventBus::new()).await.unwrap();
            node.clone().start().await;

            let addr = node.local_addr();
            self.coordinator.registry().register_or_refresh(addr, 0);
            self.nodes.push(node);
            self._dirs.push(dir);
            addr
        }

        fn node(&self, addr: SocketAddr) -> &StorageNodeService {
            self.nodes
                .iter()
                .find(|node| node.local_addr() == addr)
                .expect("unknown node")
        }

        async fn upload(&self, name: &str, data: &[u8]) {
            self.session
                .upload(name, data.len() as u64, &mut &data[..])
                .await
                .unwrap();
        }

        async fn download(&self, name: &str) -> (DownloadOutcome, Vec<u8>) {
            let mut sink = Vec::new();
            let outcome = self.session.download(name, &mut sink).await.unwrap();
            (outcome, sink)
        }
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill(&mut data[..]);
        data
    }

    /// A node that reports `size` bytes for any partition but closes after
    /// sending only `sent` of them.
    async fn spawn_truncating_node(size: u64, sent: usize) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut wire = WireStream::new(stream, TIMEOUT);
                let command = wire.read_string().await.unwrap();
                wire.read_string().await.unwrap();
                wire.read_index().await.unwrap();

                match command.as_str() {
                    "GET_PARTITION_SIZE" => wire.write_i64(size as i64).await.unwrap(),
                    "RETRIEVE_PARTITION" => {
                        wire.write_bool(true).await.unwrap();
                        wire.write_size(size).await.unwrap();
                        wire.get_mut().write_all(&vec![7u8; sent]).await.unwrap();
                    }
                    other => panic!("unexpected command {}", other),
                }
                wire.flush().await.unwrap();
                wire.shutdown().await.unwrap();
            }
        });

        addr
    }

    /// Starts a raw upload and sends only the first `sent` bytes of `data`.
    async fn start_partial_upload(
        cluster: &TestCluster,
        name: &str,
        data: &[u8],
        sent: usize,
    ) -> WireStream<TcpStream> {
        let mut wire = WireStream::connect(cluster.coordinator.local_addr(), TIMEOUT)
            .await
            .unwrap();
        wire.write_string("UPLOAD").await.unwrap();
        wire.write_string(name).await.unwrap();
        wire.write_size(data.len() as u64).await.unwrap();
        wire.get_mut().write_all(&data[..sent]).await.unwrap();
        wire.flush().await.unwrap();

        // Long enough for the coordinator to store the partitions covered so far
        tokio::time::sleep(Duration::from_millis(300)).await;
        wire
    }

    fn node_with_space(port: u16, free_space: Option<u64>) -> StorageNode {
        let mut node = StorageNode::new(SocketAddr::from(([10, 0, 0, 1], port)), 0);
        node.free_space = free_space;
        node
    }

    // ============================================================
    // PLACEMENT TESTS
    // ============================================================

    #[test]
    fn test_partition_lengths() {
        assert_eq!(partition_lengths(9000, 3), vec![3000, 3000, 3000]);
        assert_eq!(partition_lengths(10, 3), vec![3, 3, 4]);
        assert_eq!(partition_lengths(7, 1), vec![7]);
        assert!(partition_lengths(7, 0).is_empty());
    }

    #[test]
    fn test_plan_orders_by_address_and_caps_count() {
        let nodes = vec![
            node_with_space(3, None),
            node_with_space(1, None),
            node_with_space(2, None),
        ];

        let plan = plan_for(&nodes, 9000).unwrap();
        let ports: Vec<u16> = plan.iter().map(|a| a.node.port()).collect();
        assert_eq!(ports, vec![1, 2, 3]);
        assert_eq!(plan.iter().map(|a| a.index).collect::<Vec<_>>(), vec![1, 2, 3]);

        // Fewer bytes than nodes: no partition is ever empty
        let plan = plan_for(&nodes, 2).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|a| a.len == 1));

        assert!(plan_for(&nodes, 0).unwrap().is_empty());
    }

    #[test]
    fn test_plan_without_nodes() {
        assert!(matches!(
            plan_for(&[], 100),
            Err(PartitionStoreError::NoStorageAvailable)
        ));
        assert!(matches!(
            plan_for(&[], 0),
            Err(PartitionStoreError::NoStorageAvailable)
        ));
    }

    #[test]
    fn test_plan_skips_nodes_without_space() {
        let nodes = vec![
            node_with_space(1, Some(10_000)),
            node_with_space(2, Some(100)),
            node_with_space(3, None),
        ];

        let plan = plan_for(&nodes, 9000).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].node.port(), 1);
        assert_eq!(plan[1].node.port(), 3);
        assert_eq!(plan[0].len + plan[1].len, 9000);

        let full = vec![node_with_space(1, Some(0))];
        assert!(matches!(
            plan_for(&full, 10),
            Err(PartitionStoreError::NoStorageAvailable)
        ));
    }

    // ============================================================
    // ROUND TRIP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_three_nodes_nine_thousand_bytes() {
        let cluster = TestCluster::start(3).await;
        let data = random_bytes(9000);

        cluster.upload("a.bin", &data).await;

        let entry = cluster.coordinator.catalog().get("a.bin").unwrap();
        assert_eq!(entry.total_partitions(), 3);
        let mut owners = Vec::new();
        for record in &entry.partitions {
            assert_eq!(record.size, 3000);
            let owner = record.owner.addr().unwrap();
            owners.push(owner);

            let id = PartitionId::new("a.bin", record.index);
            let on_disk = cluster.node(owner).store().size(&id).await.unwrap();
            assert_eq!(on_disk, Some(3000));
        }
        owners.sort();
        owners.dedup();
        assert_eq!(owners.len(), 3, "one partition per node");

        assert_eq!(cluster.session.list_files().await.unwrap(), vec!["a.bin"]);

        let (outcome, bytes) = cluster.download("a.bin").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(9000));
        assert_eq!(bytes, data);
    }

    #[tokio::test]
    async fn test_round_trip_sizes_and_node_counts() {
        for node_count in 1..=3 {
            let cluster = TestCluster::start(node_count).await;

            for size in [0usize, 1, 2, 5, 8192, 8193, 20_000] {
                let name = format!("file-{}.bin", size);
                let data = random_bytes(size);
                cluster.upload(&name, &data).await;

                let (outcome, bytes) = cluster.download(&name).await;
                assert_eq!(
                    outcome,
                    DownloadOutcome::Downloaded(size as u64),
                    "{} bytes over {} nodes",
                    size,
                    node_count
                );
                assert_eq!(bytes, data);

                let partitions = cluster.coordinator.catalog().get(&name).unwrap().total_partitions();
                assert_eq!(partitions as usize, node_count.min(size));
            }
        }
    }

    #[tokio::test]
    async fn test_upload_file_from_disk() {
        let cluster = TestCluster::start(2).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let data = random_bytes(1234);
        tokio::fs::write(&path, &data).await.unwrap();

        let sent = cluster.session.upload_file(&path).await.unwrap();
        assert_eq!(sent, 1234);

        let (outcome, bytes) = cluster.download("notes.txt").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(1234));
        assert_eq!(bytes, data);
    }

    // ============================================================
    // FAILURE HANDLING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_upload_without_nodes_is_rejected() {
        let cluster = TestCluster::start(0).await;
        let data = random_bytes(100);

        let result = cluster.session.upload("a.bin", 100, &mut &data[..]).await;

        match result {
            Err(PartitionStoreError::Rejected(reason)) => {
                assert!(reason.contains("No storage node available"), "{}", reason)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(cluster.session.list_files().await.unwrap().is_empty());
        assert!(cluster.coordinator.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected() {
        let cluster = TestCluster::start(1).await;

        let result = cluster.session.upload("../escape", 3, &mut &b"abc"[..]).await;

        assert!(matches!(result, Err(PartitionStoreError::Rejected(_))));
        assert!(cluster.coordinator.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_evicted_owner_makes_file_unavailable() {
        let mut cluster = TestCluster::start(1).await;
        let first = cluster.nodes[0].local_addr();
        cluster.upload("b.bin", &random_bytes(100)).await;

        let evicted = cluster
            .coordinator
            .registry()
            .evict_stale(Instant::now() + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(evicted, vec![first]);

        let second = cluster.add_node().await;
        let data = random_bytes(50);
        cluster.upload("c.bin", &data).await;
        let c_entry = cluster.coordinator.catalog().get("c.bin").unwrap();
        assert_eq!(c_entry.partitions[0].owner.addr(), Some(second));

        // Never a short stream: the file is reported unavailable up front
        let (outcome, bytes) = cluster.download("b.bin").await;
        assert_eq!(outcome, DownloadOutcome::Unavailable);
        assert!(bytes.is_empty());

        let (outcome, bytes) = cluster.download("c.bin").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(50));
        assert_eq!(bytes, data);

        // b.bin stays listed even though it cannot be served
        assert_eq!(
            cluster.session.list_files().await.unwrap(),
            vec!["b.bin", "c.bin"]
        );
    }

    #[tokio::test]
    async fn test_missing_partition_on_disk_is_unavailable() {
        let cluster = TestCluster::start(2).await;
        cluster.upload("d.bin", &random_bytes(1000)).await;

        let entry = cluster.coordinator.catalog().get("d.bin").unwrap();
        let owner = entry.partitions[1].owner.addr().unwrap();
        let id = entry.partition_id(2);
        assert!(cluster.node(owner).store().delete(&id).await.unwrap());

        let (outcome, bytes) = cluster.download("d.bin").await;
        assert_eq!(outcome, DownloadOutcome::Unavailable);
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_file_download() {
        let cluster = TestCluster::start(1).await;

        let (outcome, _) = cluster.download("ghost.bin").await;
        assert_eq!(outcome, DownloadOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_upload_of_same_name_refused() {
        let cluster = TestCluster::start(1).await;

        // A client that announces 1000 bytes and then stalls
        let mut stalled = WireStream::connect(cluster.coordinator.local_addr(), TIMEOUT)
            .await
            .unwrap();
        stalled.write_string("UPLOAD").await.unwrap();
        stalled.write_string("e.bin").await.unwrap();
        stalled.write_size(1000).await.unwrap();
        stalled.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = cluster.session.upload("e.bin", 3, &mut &b"abc"[..]).await;
        match result {
            Err(PartitionStoreError::Rejected(reason)) => {
                assert!(reason.contains("already in progress"), "{}", reason)
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        // The stalled upload ends short and leaves nothing behind
        drop(stalled);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cluster.coordinator.catalog().contains("e.bin"));
        assert!(cluster.nodes[0].store().list().await.unwrap().is_empty());

        cluster.upload("e.bin", b"abc").await;
        assert!(cluster.coordinator.catalog().contains("e.bin"));
    }

    #[tokio::test]
    async fn test_failed_partition_write_rolls_back() {
        let cluster = TestCluster::start(1).await;
        let live = cluster.nodes[0].local_addr();
        let unreachable: SocketAddr = "127.0.0.255:1".parse().unwrap();
        assert!(unreachable > live, "unreachable node must receive the later partition");
        cluster.coordinator.registry().register_or_refresh(unreachable, 0);

        let data = random_bytes(100);
        let result = cluster.session.upload("r.bin", 100, &mut &data[..]).await;

        match result {
            Err(PartitionStoreError::Rejected(reason)) => {
                assert!(reason.contains("127.0.0.255:1"), "{}", reason)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(cluster.coordinator.catalog().is_empty());
        assert!(cluster.session.list_files().await.unwrap().is_empty());
        assert!(cluster.nodes[0].store().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_cut_short_mid_stream() {
        let cluster = TestCluster::start(0).await;
        let truncating = spawn_truncating_node(100, 40).await;
        cluster.coordinator.registry().register_or_refresh(truncating, 0);
        cluster.coordinator.catalog().insert(FileCatalogEntry::new(
            "cut.bin",
            100,
            vec![PartitionRecord::new(1, truncating, 100)],
        ));

        let mut sink = Vec::new();
        let result = cluster.session.download("cut.bin", &mut sink).await;

        // The size was already announced, so the client must see a short stream
        assert!(
            matches!(
                result,
                Err(PartitionStoreError::Integrity { expected: 100, .. })
            ),
            "{:?}",
            result
        );
        assert!(sink.len() < 100);
    }

    #[tokio::test]
    async fn test_upload_committed_after_owner_evicted_is_unowned() {
        let cluster = TestCluster::start(2).await;
        let data = random_bytes(200);

        let mut wire = start_partial_upload(&cluster, "late.bin", &data, 100).await;
        let evicted = cluster
            .coordinator
            .registry()
            .evict_stale(Instant::now() + Duration::from_secs(61), Duration::from_secs(60));
        assert_eq!(evicted.len(), 2);

        wire.get_mut().write_all(&data[100..]).await.unwrap();
        wire.flush().await.unwrap();
        assert_eq!(wire.read_string().await.unwrap(), "SUCCESS");

        let entry = cluster.coordinator.catalog().get("late.bin").unwrap();
        assert!(entry.partitions.iter().all(|r| r.owner == PartitionOwner::Unowned));
        let (outcome, _) = cluster.download("late.bin").await;
        assert_eq!(outcome, DownloadOutcome::Unavailable);

        // Returning nodes re-attach what they still hold
        for node in &cluster.nodes {
            let addr = node.local_addr();
            cluster.coordinator.registry().register_or_refresh(addr, 0);
            let held: Vec<PartitionId> = node
                .store()
                .list()
                .await
                .unwrap()
                .iter()
                .map(|name| PartitionId::parse(name).unwrap())
                .collect();
            cluster.coordinator.catalog().adopt(addr, &held);
        }
        let (outcome, bytes) = cluster.download("late.bin").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(200));
        assert_eq!(bytes, data);
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_file() {
        let cluster = TestCluster::start(2).await;
        cluster.upload("a.bin", &random_bytes(500)).await;
        cluster.upload("keep.bin", &random_bytes(10)).await;

        assert!(cluster.session.delete_file("a.bin").await.unwrap());
        assert!(!cluster.session.delete_file("a.bin").await.unwrap());

        assert_eq!(cluster.session.list_files().await.unwrap(), vec!["keep.bin"]);
        let (outcome, _) = cluster.download("a.bin").await;
        assert_eq!(outcome, DownloadOutcome::NotFound);

        for node in &cluster.nodes {
            let held = node.store().list().await.unwrap();
            assert!(held.iter().all(|name| name.starts_with("keep.bin")), "{:?}", held);
        }
    }

    #[tokio::test]
    async fn test_delete_refused_while_upload_in_flight() {
        let cluster = TestCluster::start(2).await;
        cluster.upload("x.bin", &random_bytes(200)).await;

        // The replacement has written its first partition and waits for more
        let replacement = random_bytes(200);
        let mut wire = start_partial_upload(&cluster, "x.bin", &replacement, 100).await;

        assert!(!cluster.session.delete_file("x.bin").await.unwrap());
        assert!(cluster.coordinator.catalog().contains("x.bin"));

        wire.get_mut().write_all(&replacement[100..]).await.unwrap();
        wire.flush().await.unwrap();
        assert_eq!(wire.read_string().await.unwrap(), "SUCCESS");

        let (outcome, bytes) = cluster.download("x.bin").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(200));
        assert_eq!(bytes, replacement);

        assert!(cluster.session.delete_file("x.bin").await.unwrap());
        for node in &cluster.nodes {
            assert!(node.store().list().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_delete_with_unreachable_owner_still_succeeds() {
        let cluster = TestCluster::start(1).await;
        cluster.upload("a.bin", &random_bytes(40)).await;
        cluster
            .coordinator
            .registry()
            .evict_stale(Instant::now() + Duration::from_secs(61), Duration::from_secs(60));

        assert!(cluster.session.delete_file("a.bin").await.unwrap());
        let (outcome, _) = cluster.download("a.bin").await;
        assert_eq!(outcome, DownloadOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_reupload_replaces_previous_version() {
        let cluster = TestCluster::start(3).await;
        cluster.upload("a.bin", &random_bytes(9000)).await;

        let replacement = random_bytes(2);
        cluster.upload("a.bin", &replacement).await;

        let entry = cluster.coordinator.catalog().get("a.bin").unwrap();
        assert_eq!(entry.total_partitions(), 2);

        let (outcome, bytes) = cluster.download("a.bin").await;
        assert_eq!(outcome, DownloadOutcome::Downloaded(2));
        assert_eq!(bytes, replacement);

        let mut held = Vec::new();
        for node in &cluster.nodes {
            held.extend(node.store().list().await.unwrap());
        }
        held.sort();
        assert_eq!(held, vec!["a.bin.part1", "a.bin.part2"]);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_distinct_files() {
        let cluster = TestCluster::start(3).await;

        let mut uploads = Vec::new();
        for i in 0..8usize {
            let session = cluster.session.clone();
            let data = random_bytes(1000 + i * 777);
            uploads.push(tokio::spawn(async move {
                let name = format!("parallel-{}.bin", i);
                session
                    .upload(&name, data.len() as u64, &mut &data[..])
                    .await
                    .unwrap();
                (name, data)
            }));
        }

        for upload in uploads {
            let (name, data) = upload.await.unwrap();
            let (outcome, bytes) = cluster.download(&name).await;
            assert_eq!(outcome, DownloadOutcome::Downloaded(data.len() as u64));
            assert_eq!(bytes, data);
        }
        assert_eq!(cluster.session.list_files().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_stop_forgets_nodes_and_files() {
        let cluster = TestCluster::start(2).await;
        cluster.upload("a.bin", &random_bytes(10)).await;

        cluster.coordinator.stop();

        assert!(cluster.coordinator.registry().is_empty());
        assert!(cluster.coordinator.catalog().is_empty());
    }
}
