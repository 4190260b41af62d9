//! Fan-out behaviour of the load balancer over recording inner loaders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use retl_core::{AckCounter, Loader, Operator, Record};
use retl_io::LoadBalancer;

fn rec(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[derive(Clone, Default)]
struct RecordingLoader {
    batches: Arc<Mutex<Vec<Vec<Record>>>>,
    closes: Arc<AtomicUsize>,
}

impl RecordingLoader {
    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn row_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }

    fn batch_seqs(&self) -> Vec<u64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter_map(|batch| batch.first())
            .map(|r| r.get("batch").and_then(Value::as_u64).unwrap())
            .collect()
    }
}

impl Operator for RecordingLoader {
    fn name(&self) -> &str {
        "recording"
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    async fn load(&mut self, _job_id: &str, items: Vec<Record>, _last_call: bool) -> Result<()> {
        if !items.is_empty() {
            self.batches.lock().unwrap().push(items);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn balancer_with(slots: usize, buffer_size: usize) -> (LoadBalancer, Vec<RecordingLoader>) {
    let inners: Vec<RecordingLoader> = (0..slots).map(|_| RecordingLoader::default()).collect();
    let balancer = LoadBalancer::new(
        inners
            .iter()
            .map(|inner| (200, Box::new(inner.clone()) as Box<dyn Loader>))
            .collect(),
        buffer_size,
    )
    .unwrap();
    (balancer, inners)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batches_spread_round_robin_and_nothing_is_lost() {
    let (mut balancer, inners) = balancer_with(4, 3);

    for batch in 0..10u64 {
        let items: Vec<Record> = (0..3)
            .map(|i| rec(json!({"batch": batch, "i": i})))
            .collect();
        balancer.load("job", items, false).await.unwrap();
    }
    balancer.close().await.unwrap();

    let total: usize = inners.iter().map(RecordingLoader::row_count).sum();
    assert_eq!(total, 30);
    for inner in &inners {
        let count = inner.batch_count();
        assert!((2..=3).contains(&count), "slot got {count} batches");
        assert_eq!(inner.closes.load(Ordering::SeqCst), 1);
        // FIFO within the slot's own stream
        let seqs = inner.batch_seqs();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn records_buffer_until_the_threshold() {
    let (mut balancer, inners) = balancer_with(2, 100);

    balancer
        .load("job", vec![rec(json!({"batch": 0, "i": 0}))], false)
        .await
        .unwrap();
    assert!(balancer.has_buffered_data());
    assert_eq!(inners.iter().map(RecordingLoader::row_count).sum::<usize>(), 0);

    balancer.close().await.unwrap();
    assert!(!balancer.has_buffered_data());
    assert_eq!(inners.iter().map(RecordingLoader::row_count).sum::<usize>(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deferred_acks_settle_at_balance_time() {
    let (mut balancer, _inners) = balancer_with(2, 100);
    let ack = AckCounter::new();

    ack.add(2);
    balancer
        .load_with_ack(
            "job",
            vec![rec(json!({"batch": 0, "i": 0})), rec(json!({"batch": 0, "i": 1}))],
            &ack,
            false,
        )
        .await
        .unwrap();
    // still buffered: the balancer holds the ack until hand-over
    assert_eq!(ack.value(), 2);

    ack.add(1);
    balancer
        .load_with_ack("job", vec![rec(json!({"batch": 1, "i": 0}))], &ack, true)
        .await
        .unwrap();
    assert_eq!(ack.value(), 0);
    balancer.close().await.unwrap();
}

#[tokio::test]
async fn a_single_inner_loader_is_rejected() {
    let inner = RecordingLoader::default();
    let err = LoadBalancer::new(vec![(10, Box::new(inner) as Box<dyn Loader>)], 10)
        .err()
        .unwrap();
    assert!(err.to_string().contains("at least two loaders"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_is_idempotent() {
    let (mut balancer, inners) = balancer_with(2, 1);
    balancer
        .load("job", vec![rec(json!({"batch": 0, "i": 0}))], false)
        .await
        .unwrap();
    balancer.close().await.unwrap();
    balancer.close().await.unwrap();
    assert_eq!(inners[0].closes.load(Ordering::SeqCst) + inners[1].closes.load(Ordering::SeqCst), 2);
}
