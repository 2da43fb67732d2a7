//! End-to-end sync scenarios against a scripted JSON-RPC node.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use chainsync_core::checkpoint::Checkpoint;
use chainsync_core::metrics::RecordingMetrics;
use chainsync_core::source::{LogFilterCriteria, Source, SourceFilter};
use chainsync_core::store::{EventKind, RawEvent};
use chainsync_core::types::{parse_hex_u64, to_hex};
use chainsync_core::SyncError;
use chainsync_evm::{NetworkBuilder, SyncEvent, SyncService};
use chainsync_rpc::mock::MockTransport;
use chainsync_storage::MemorySyncStore;

const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";
const TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const HEAD: u64 = 10;
const LOG_BLOCK: u64 = 5;

fn timestamp(chain_id: u64, number: u64) -> u64 {
    // chain 10 lands one second after chain 1 at every height
    number * 12 + u64::from(chain_id != 1)
}

/// What the scripted node currently reports.
struct NodeState {
    head: u64,
    /// Blocks at or above this height come from fork `b`.
    fork_from: u64,
}

#[derive(Clone)]
struct Node {
    chain_id: u64,
    logs_per_block: u64,
    state: Arc<Mutex<NodeState>>,
}

impl Node {
    fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            logs_per_block: 1,
            state: Arc::new(Mutex::new(NodeState {
                head: HEAD,
                fork_from: u64::MAX,
            })),
        }
    }

    fn with_logs_per_block(mut self, logs: u64) -> Self {
        self.logs_per_block = logs;
        self
    }

    fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Replace every block from `number` up with fork `b`.
    fn fork_at(&self, number: u64) {
        self.state.lock().unwrap().fork_from = number;
    }

    fn hash(&self, number: u64) -> String {
        let fork = if number >= self.state.lock().unwrap().fork_from { "b" } else { "a" };
        format!("0x{}{fork}{number}", self.chain_id)
    }

    fn block_json(&self, number: u64) -> Value {
        json!({
            "hash": self.hash(number),
            "parentHash": self.hash(number.saturating_sub(1)),
            "number": to_hex(number),
            "timestamp": to_hex(timestamp(self.chain_id, number)),
            "logsBloom": "",
            "transactions": [{
                "hash": format!("0x{}t{number}", self.chain_id),
                "from": "0x00000000000000000000000000000000000000bb",
                "to": ADDRESS,
                "input": "0x",
                "transactionIndex": "0x0",
                "blockNumber": to_hex(number),
            }],
        })
    }

    fn log_json(&self, number: u64, index: u64) -> Value {
        json!({
            "address": ADDRESS,
            "topics": [TOPIC],
            "data": "0x",
            "blockNumber": to_hex(number),
            "blockHash": self.hash(number),
            "transactionHash": format!("0x{}t{number}", self.chain_id),
            "transactionIndex": "0x0",
            "logIndex": to_hex(index),
            "removed": false,
        })
    }

    /// A transport answering from this node, with matching logs only at
    /// [`LOG_BLOCK`].
    fn transport(&self) -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        let chain_hex = to_hex(self.chain_id);
        mock.on("eth_chainId", move |_| Ok(json!(chain_hex)));

        let node = self.clone();
        mock.on("eth_getBlockByNumber", move |params| {
            let number = match params[0].as_str() {
                Some("latest") => node.state.lock().unwrap().head,
                Some(tag) => parse_hex_u64(tag).unwrap_or_default(),
                None => 0,
            };
            Ok(node.block_json(number))
        });

        let node = self.clone();
        mock.on("eth_getBlockByHash", move |params| {
            let hash = params[0].as_str().unwrap_or_default().to_string();
            let head = node.state.lock().unwrap().head;
            let found = (0..=head).find(|n| node.hash(*n) == hash);
            Ok(found.map_or(Value::Null, |n| node.block_json(n)))
        });

        let node = self.clone();
        mock.on("eth_getLogs", move |params| {
            let filter = &params[0];
            if filter.get("blockHash").is_some() {
                return Ok(json!([]));
            }
            let bound = |key: &str| filter[key].as_str().and_then(parse_hex_u64).unwrap_or_default();
            let (from, to) = (bound("fromBlock"), bound("toBlock"));
            if (from..=to).contains(&LOG_BLOCK) {
                let logs: Vec<Value> = (0..node.logs_per_block)
                    .map(|i| node.log_json(LOG_BLOCK, i))
                    .collect();
                Ok(Value::Array(logs))
            } else {
                Ok(json!([]))
            }
        });
        mock
    }
}

fn transfers(id: &str, network: &str, chain_id: u64) -> Source {
    Source {
        id: id.into(),
        network_name: network.into(),
        chain_id,
        start_block: 0,
        end_block: None,
        filter: SourceFilter::Log(LogFilterCriteria {
            address: vec![ADDRESS.into()],
            topics: vec![vec![TOPIC.into()]],
            include_transaction_receipts: false,
        }),
    }
}

fn network(name: &str, chain_id: u64, node: &Node, sources: Vec<Source>) -> chainsync_evm::Network {
    NetworkBuilder::new(name, chain_id, "mock://")
        .finality_block_count(2)
        .polling_interval_ms(20)
        .transport(node.transport())
        .sources(sources)
        .build()
        .unwrap()
}

async fn next_event(rx: &mut mpsc::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a sync event")
        .expect("sync event stream closed early")
}

/// Collect `Events` until one carries `target`.
async fn events_until(rx: &mut mpsc::Receiver<SyncEvent>, target: Checkpoint) -> (Vec<RawEvent>, Vec<Checkpoint>) {
    let mut events = Vec::new();
    let mut checkpoints = Vec::new();
    while checkpoints.last() != Some(&target) {
        match next_event(rx).await {
            SyncEvent::Events { events: page, checkpoint } => {
                events.extend(page);
                checkpoints.push(checkpoint);
            }
            SyncEvent::Fatal { chain_id, message } => panic!("chain {chain_id} failed: {message}"),
            SyncEvent::Reorg { .. } | SyncEvent::Finalize { .. } => {}
        }
    }
    (events, checkpoints)
}

#[tokio::test]
async fn backfill_then_follow_head_across_two_chains() {
    let (mainnet, optimism) = (Node::new(1), Node::new(10));
    let networks = vec![
        network("mainnet", 1, &mainnet, vec![transfers("mainnet-transfers", "mainnet", 1)]),
        network("optimism", 10, &optimism, vec![transfers("optimism-transfers", "optimism", 10)]),
    ];
    let store = Arc::new(MemorySyncStore::new());
    let metrics = Arc::new(RecordingMetrics::new());

    let (service, mut rx) = SyncService::start(networks, store.clone(), metrics.clone())
        .await
        .unwrap();

    // realtime on both chains reaches HEAD; the global checkpoint follows the slower one
    let target = Checkpoint::block_end(timestamp(1, HEAD), 1, HEAD);
    let (events, checkpoints) = events_until(&mut rx, target).await;

    assert!(checkpoints.windows(2).all(|w| w[0] < w[1]), "checkpoints must increase");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == EventKind::Log));
    assert_eq!(
        events.iter().map(|e| e.chain_id).collect::<Vec<_>>(),
        vec![1, 10],
        "events are ordered by checkpoint across chains"
    );
    assert_eq!(events[0].source_id, "mainnet-transfers");
    assert!(events[0].checkpoint < events[1].checkpoint);

    // finalized block 8 was backfilled; 9 and 10 were followed in realtime
    let realtime_blocks = metrics.snapshot().realtime_blocks;
    assert!(realtime_blocks.contains(&9) && realtime_blocks.contains(&10));

    service.shutdown().await;
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "event stream closes after shutdown");
}

#[tokio::test]
async fn events_sharing_a_checkpoint_survive_paging() {
    // three identical sources over 400 logs: 1200 events, and the page
    // boundary at 1000 falls inside a run of equal checkpoints
    let node = Node::new(1).with_logs_per_block(400);
    let sources = ["a", "b", "c"]
        .iter()
        .map(|id| transfers(id, "mainnet", 1))
        .collect();
    let (service, mut rx) = SyncService::start(
        vec![network("mainnet", 1, &node, sources)],
        Arc::new(MemorySyncStore::new()),
        Arc::new(RecordingMetrics::new()),
    )
    .await
    .unwrap();

    let target = Checkpoint::block_end(timestamp(1, HEAD), 1, HEAD);
    let (events, checkpoints) = events_until(&mut rx, target).await;
    service.shutdown().await;

    assert!(checkpoints.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(events.len(), 1_200);
    let unique: HashSet<(String, String)> = events
        .iter()
        .map(|e| (e.checkpoint.clone(), e.source_id.clone()))
        .collect();
    assert_eq!(unique.len(), 1_200, "no event is emitted twice");
    assert!(events.windows(2).all(|w| w[0].checkpoint <= w[1].checkpoint));
}

#[tokio::test]
async fn finished_network_does_not_hold_back_finality() {
    let (mainnet, optimism) = (Node::new(1), Node::new(10));
    let mut ended = transfers("optimism-early", "optimism", 10);
    ended.end_block = Some(2);
    let networks = vec![
        network("mainnet", 1, &mainnet, vec![transfers("mainnet-transfers", "mainnet", 1)]),
        network("optimism", 10, &optimism, vec![ended]),
    ];
    let (service, mut rx) = SyncService::start(
        networks,
        Arc::new(MemorySyncStore::new()),
        Arc::new(RecordingMetrics::new()),
    )
    .await
    .unwrap();

    let target = Checkpoint::block_end(timestamp(1, HEAD), 1, HEAD);
    events_until(&mut rx, target).await;

    // mainnet moves on; blocks 10 and 12 become final
    mainnet.set_head(14);
    let mut finalized = Vec::new();
    while finalized.last().map_or(true, |c: &Checkpoint| c.block_number < 12) {
        match next_event(&mut rx).await {
            SyncEvent::Finalize { checkpoint } => finalized.push(checkpoint),
            SyncEvent::Fatal { chain_id, message } => panic!("chain {chain_id} failed: {message}"),
            _ => {}
        }
    }
    service.shutdown().await;

    assert!(finalized.iter().all(|c| c.chain_id == 1));
    assert!(finalized.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        finalized.last(),
        Some(&Checkpoint::block_end(timestamp(1, 12), 1, 12))
    );
}

#[tokio::test]
async fn reorg_is_forwarded_and_sync_resumes_on_new_fork() {
    let node = Node::new(1);
    let (service, mut rx) = SyncService::start(
        vec![network("mainnet", 1, &node, vec![transfers("transfers", "mainnet", 1)])],
        Arc::new(MemorySyncStore::new()),
        Arc::new(RecordingMetrics::new()),
    )
    .await
    .unwrap();

    let head = Checkpoint::block_end(timestamp(1, HEAD), 1, HEAD);
    events_until(&mut rx, head).await;

    // block 10 is replaced and 11 builds on the replacement
    node.fork_at(HEAD);
    node.set_head(HEAD + 1);

    let safe = Checkpoint::block_end(timestamp(1, HEAD - 1), 1, HEAD - 1);
    loop {
        match next_event(&mut rx).await {
            SyncEvent::Reorg { safe_checkpoint } => {
                assert_eq!(safe_checkpoint, safe);
                break;
            }
            SyncEvent::Events { checkpoint, .. } => {
                assert!(checkpoint <= head, "no progress is emitted from the stale fork");
            }
            SyncEvent::Fatal { chain_id, message } => panic!("chain {chain_id} failed: {message}"),
            SyncEvent::Finalize { .. } => {}
        }
    }

    let new_head = Checkpoint::block_end(timestamp(1, HEAD + 1), 1, HEAD + 1);
    let (_, checkpoints) = events_until(&mut rx, new_head).await;
    service.shutdown().await;

    assert!(checkpoints.iter().all(|c| *c > safe));
}

#[tokio::test]
async fn chain_id_mismatch_fails_at_start() {
    let network = NetworkBuilder::new("mainnet", 1, "mock://")
        .transport(Node::new(10).transport())
        .source(transfers("mainnet-transfers", "mainnet", 1))
        .build()
        .unwrap();

    let result = SyncService::start(
        vec![network],
        Arc::new(MemorySyncStore::new()),
        Arc::new(RecordingMetrics::new()),
    )
    .await;
    match result {
        Err(SyncError::Config(message)) => assert!(message.contains("chain id 1")),
        Err(other) => panic!("expected a config error, got {other}"),
        Ok(_) => panic!("start must fail on a chain id mismatch"),
    }
}

#[tokio::test]
async fn source_starting_after_head_fails_at_start() {
    let mut late = transfers("mainnet-transfers", "mainnet", 1);
    late.start_block = HEAD + 100;
    let network = NetworkBuilder::new("mainnet", 1, "mock://")
        .transport(Node::new(1).transport())
        .source(late)
        .build()
        .unwrap();

    let result = SyncService::start(
        vec![network],
        Arc::new(MemorySyncStore::new()),
        Arc::new(RecordingMetrics::new()),
    )
    .await;
    assert!(matches!(result, Err(SyncError::Config(_))));
}
