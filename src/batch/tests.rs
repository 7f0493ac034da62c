//! Tests for batch building and the batch coordinator
//!
//! Coordinator tests run on a paused clock: sleeping in the test advances
//! time deterministically, and the finalize timer fires when the runtime
//! would otherwise idle.

#[cfg(test)]
mod tests {
    use crate::{
        AdmissionError, Block, BlockHeader, CoordinatorError, InitializationError, LedgerError,
        RawTransaction, SealError, Transaction,
        batch::{BatchBuilder, BatchCoordinator, CoordinatorStatus},
        config::{BatchConfig, EmptyBatchPolicy},
        feed::BlockFeed,
        ledger::{Ledger, MemoryLedger, SqliteLedger},
        state::ChainState,
    };
    use async_trait::async_trait;
    use ethers::types::{Bytes, H256};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(5);

    /// Input-less transaction creating one output tagged `tag`
    fn issue(tag: &str) -> Transaction {
        Transaction::new(RawTransaction {
            version: 1,
            runlimit: 100,
            min_time_ms: 0,
            max_time_ms: u64::MAX,
            inputs: vec![],
            outputs: vec![Bytes::from(tag.as_bytes().to_vec())],
        })
        .unwrap()
    }

    /// Transaction spending `input` into one output tagged `tag`
    fn spend(input: H256, tag: &str) -> Transaction {
        Transaction::new(RawTransaction {
            version: 1,
            runlimit: 100,
            min_time_ms: 0,
            max_time_ms: 0,
            inputs: vec![input],
            outputs: vec![Bytes::from(tag.as_bytes().to_vec())],
        })
        .unwrap()
    }

    fn coordinator(ledger: Arc<dyn Ledger>, empty_batches: EmptyBatchPolicy) -> BatchCoordinator {
        let config = BatchConfig {
            interval_ms: INTERVAL.as_millis() as u64,
            empty_batches,
            ..BatchConfig::default()
        };
        BatchCoordinator::new(ledger, Arc::new(BlockFeed::new()), config)
    }

    fn genesis_state() -> ChainState {
        let mut state = ChainState::default();
        state.apply_header(BlockHeader::genesis(1_000));
        state
    }

    fn ids(block: &Block) -> Vec<H256> {
        block.transactions.iter().map(|tx| tx.id()).collect()
    }

    /// Ledger whose commits always fail
    struct FailingLedger(MemoryLedger);

    #[async_trait]
    impl Ledger for FailingLedger {
        async fn current_state(&self) -> Result<ChainState, LedgerError> {
            self.0.current_state().await
        }
        async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError> {
            self.0.initialize_if_empty(genesis).await
        }
        async fn commit_block(&self, _: &Block, _: &ChainState) -> Result<(), LedgerError> {
            Err(LedgerError::Backend("disk full".to_string()))
        }
        async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
            self.0.block_at(height).await
        }
    }

    /// Ledger whose commits never complete
    struct StallingLedger(MemoryLedger);

    #[async_trait]
    impl Ledger for StallingLedger {
        async fn current_state(&self) -> Result<ChainState, LedgerError> {
            self.0.current_state().await
        }
        async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError> {
            self.0.initialize_if_empty(genesis).await
        }
        async fn commit_block(&self, _: &Block, _: &ChainState) -> Result<(), LedgerError> {
            std::future::pending().await
        }
        async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
            self.0.block_at(height).await
        }
    }

    /// Ledger whose first initialization fails
    struct FlakyInitLedger {
        inner: MemoryLedger,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl Ledger for FlakyInitLedger {
        async fn current_state(&self) -> Result<ChainState, LedgerError> {
            self.inner.current_state().await
        }
        async fn initialize_if_empty(&self, genesis: &BlockHeader) -> Result<(), LedgerError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(LedgerError::Backend("genesis unavailable".to_string()));
            }
            self.inner.initialize_if_empty(genesis).await
        }
        async fn commit_block(&self, block: &Block, state: &ChainState) -> Result<(), LedgerError> {
            self.inner.commit_block(block, state).await
        }
        async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
            self.inner.block_at(height).await
        }
    }

    // ---- BatchBuilder ----

    #[test]
    fn test_open_requires_header() {
        let err = BatchBuilder::open(&ChainState::default(), 2_000).err().unwrap();
        assert!(matches!(err, InitializationError::MissingHeader));
    }

    #[test]
    fn test_open_requires_advancing_timestamp() {
        let err = BatchBuilder::open(&genesis_state(), 1_000).err().unwrap();
        assert!(matches!(
            err,
            InitializationError::StaleTimestamp { timestamp_ms: 1_000, tip_ms: 1_000 }
        ));
    }

    #[test]
    fn test_seal_extends_parent() {
        let base = genesis_state();
        let t1 = issue("t1");
        let t2 = issue("t2");

        let mut builder = BatchBuilder::open(&base, 2_000).unwrap();
        assert_eq!(builder.add(t1.clone()).unwrap(), 0);
        assert_eq!(builder.add(t2.clone()).unwrap(), 1);
        let sealed = builder.seal().unwrap();

        let header = &sealed.block.header;
        assert_eq!(header.height, 1);
        assert_eq!(header.timestamp_ms, 2_000);
        assert_eq!(header.previous_block_id, base.header.as_ref().unwrap().id());
        assert_eq!(header.state_root, sealed.state.state_root());
        assert_eq!(sealed.block.transactions, vec![t1.clone(), t2.clone()]);
        assert_eq!(sealed.state.header.as_ref(), Some(header));

        // Same admissions, same block
        let mut again = BatchBuilder::open(&base, 2_000).unwrap();
        again.add(t1).unwrap();
        again.add(t2).unwrap();
        assert_eq!(again.seal().unwrap().block, sealed.block);
    }

    #[test]
    fn test_add_sees_earlier_admissions() {
        let mut builder = BatchBuilder::open(&genesis_state(), 2_000).unwrap();
        let coin = issue("coin");
        let coin_id = coin.output_ids().next().unwrap();

        builder.add(coin.clone()).unwrap();
        builder.add(spend(coin_id, "a")).unwrap();
        assert_eq!(
            builder.add(spend(coin_id, "b")),
            Err(AdmissionError::UnknownInput(coin_id))
        );
        assert_eq!(builder.add(coin.clone()), Err(AdmissionError::Duplicate(coin.id())));
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_add_checks_time_window_and_limit() {
        let mut builder = BatchBuilder::open(&genesis_state(), 2_000).unwrap().with_limit(1);

        let expired = Transaction::new(RawTransaction {
            version: 1,
            runlimit: 1,
            min_time_ms: 0,
            max_time_ms: 1_999,
            inputs: vec![],
            outputs: vec![Bytes::from(vec![1])],
        })
        .unwrap();
        assert!(matches!(builder.add(expired), Err(AdmissionError::Expired { .. })));

        let early = Transaction::new(RawTransaction {
            version: 1,
            runlimit: 1,
            min_time_ms: 2_001,
            max_time_ms: 3_000,
            inputs: vec![],
            outputs: vec![Bytes::from(vec![2])],
        })
        .unwrap();
        assert!(matches!(builder.add(early), Err(AdmissionError::TooEarly { .. })));

        builder.add(issue("fits")).unwrap();
        assert_eq!(builder.add(issue("over")), Err(AdmissionError::BatchFull { limit: 1 }));
    }

    #[test]
    fn test_seal_prunes_expired_nonces() {
        let short_lived = Transaction::new(RawTransaction {
            version: 1,
            runlimit: 1,
            min_time_ms: 0,
            max_time_ms: 2_500,
            inputs: vec![],
            outputs: vec![Bytes::from(vec![9])],
        })
        .unwrap();

        let mut builder = BatchBuilder::open(&genesis_state(), 2_000).unwrap();
        builder.add(short_lived.clone()).unwrap();
        let first = builder.seal().unwrap();
        assert!(first.state.has_nonce(&short_lived.id()));

        let second = BatchBuilder::open(&first.state, 3_000).unwrap().seal().unwrap();
        assert!(!second.state.has_nonce(&short_lived.id()));
    }

    #[test]
    fn test_seal_height_overflow() {
        let mut header = BlockHeader::genesis(1_000);
        header.height = u64::MAX;
        let mut base = ChainState::default();
        base.apply_header(header);

        let err = BatchBuilder::open(&base, 2_000).unwrap().seal().unwrap_err();
        assert!(matches!(err, SealError::HeightOverflow(u64::MAX)));
    }

    // ---- BatchCoordinator ----

    #[tokio::test(start_paused = true)]
    async fn test_single_transaction_committed_after_interval() {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = coordinator(ledger.clone(), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();

        let t1 = issue("t1");
        let admission = coordinator.admit(t1.clone()).await.unwrap();
        assert_eq!((admission.batch, admission.position), (1, 0));
        assert!(matches!(
            coordinator.status(),
            CoordinatorStatus::Open { batch: 1, pending: 1, .. }
        ));

        tokio::time::sleep(INTERVAL - Duration::from_millis(1)).await;
        assert!(reader.try_recv().is_none());

        let block = reader.recv().await.unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.transactions, vec![t1]);
        assert_eq!(coordinator.status(), CoordinatorStatus::Idle);
        assert_eq!(ledger.current_state().await.unwrap().height(), Some(1));
        assert_eq!(ledger.block_at(1).await.unwrap().as_ref(), Some(block.as_ref()));

        // Published exactly once
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(reader.try_recv().is_none());
        assert_eq!(coordinator.feed().written(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transactions_within_window_share_a_block() {
        let coordinator = coordinator(Arc::new(MemoryLedger::new()), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let (t1, t2) = (issue("t1"), issue("t2"));

        coordinator.admit(t1.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = coordinator.admit(t2.clone()).await.unwrap();
        assert_eq!((second.batch, second.position), (1, 1));

        let block = reader.recv().await.unwrap();
        assert_eq!(ids(&block), vec![t1.id(), t2.id()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_after_seal_starts_new_block() {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = coordinator(ledger.clone(), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let (t1, t2) = (issue("t1"), issue("t2"));

        coordinator.admit(t1.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let second = coordinator.admit(t2.clone()).await.unwrap();
        assert_eq!(second.batch, 2);

        let first_block = reader.recv().await.unwrap();
        let second_block = reader.recv().await.unwrap();
        assert_eq!(ids(&first_block), vec![t1.id()]);
        assert_eq!(ids(&second_block), vec![t2.id()]);
        assert_eq!(second_block.header.previous_block_id, first_block.id());
        assert!(second_block.header.timestamp_ms > first_block.header.timestamp_ms);
        assert_eq!(ledger.current_state().await.unwrap().height(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admissions_keep_admission_order() {
        let coordinator = coordinator(Arc::new(MemoryLedger::new()), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let coordinator = coordinator.clone();
                let admitted = admitted.clone();
                tokio::spawn(async move {
                    let admission = coordinator.admit(issue(&format!("tx-{i}"))).await.unwrap();
                    admitted.lock().unwrap().push(admission);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let block = reader.recv().await.unwrap();
        let admitted = admitted.lock().unwrap().clone();
        assert_eq!(block.transactions.len(), 50);
        assert!(admitted.iter().all(|a| a.batch == 1));
        assert_eq!(ids(&block), admitted.iter().map(|a| a.tx_id).collect::<Vec<_>>());
        for (position, admission) in admitted.iter().enumerate() {
            assert_eq!(admission.position, position);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_racing_deadline_lands_exactly_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = coordinator(ledger.clone(), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let (t1, t2) = (issue("t1"), issue("t2"));

        coordinator.admit(t1.clone()).await.unwrap();
        tokio::time::sleep(INTERVAL).await;
        coordinator.admit(t2.clone()).await.unwrap();

        let mut seen = Vec::new();
        let mut heights = Vec::new();
        while seen.len() < 2 {
            let block = reader.recv().await.unwrap();
            heights.push(block.height());
            seen.extend(ids(&block));
        }

        assert_eq!(seen, vec![t1.id(), t2.id()]);
        assert!(heights.windows(2).all(|w| w[1] == w[0] + 1));

        tokio::time::sleep(INTERVAL * 2).await;
        assert!(reader.try_recv().is_none());
        let tip = ledger.current_state().await.unwrap().height().unwrap();
        assert_eq!(coordinator.feed().written(), tip);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_transaction_leaves_batch_open() {
        let coordinator = coordinator(Arc::new(MemoryLedger::new()), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let (t1, t2) = (issue("t1"), issue("t2"));
        let unknown = H256::repeat_byte(0xab);

        coordinator.admit(t1.clone()).await.unwrap();
        let err = coordinator.admit(spend(unknown, "bad")).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Admission(AdmissionError::UnknownInput(id)) if id == unknown
        ));
        coordinator.admit(t2.clone()).await.unwrap();

        let block = reader.recv().await.unwrap();
        assert_eq!(ids(&block), vec![t1.id(), t2.id()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_issuance_cannot_be_replayed() {
        let coordinator = coordinator(Arc::new(MemoryLedger::new()), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();
        let coin = issue("coin");
        let coin_id = coin.output_ids().next().unwrap();

        coordinator.admit(coin.clone()).await.unwrap();
        reader.recv().await.unwrap();

        let err = coordinator.admit(coin.clone()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Admission(AdmissionError::Duplicate(_))));

        // The committed output is spendable in the next batch
        coordinator.admit(spend(coin_id, "paid")).await.unwrap();
        let block = reader.recv().await.unwrap();
        assert_eq!(block.height(), 2);
        assert_eq!(block.transactions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_committed_under_commit_policy() {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = coordinator(ledger.clone(), EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();

        let rejected = coordinator.admit(spend(H256::repeat_byte(1), "x")).await;
        assert!(rejected.is_err());

        let block = reader.recv().await.unwrap();
        assert_eq!(block.height(), 1);
        assert!(block.transactions.is_empty());
        assert_eq!(ledger.current_state().await.unwrap().height(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_dropped_under_skip_policy() {
        let ledger = Arc::new(MemoryLedger::new());
        let coordinator = coordinator(ledger.clone(), EmptyBatchPolicy::Skip);
        let mut reader = coordinator.feed().new_reader();

        let rejected = coordinator.admit(spend(H256::repeat_byte(1), "x")).await;
        assert!(rejected.is_err());

        tokio::time::sleep(INTERVAL * 2).await;
        assert!(reader.try_recv().is_none());
        assert_eq!(coordinator.status(), CoordinatorStatus::Idle);
        assert_eq!(ledger.current_state().await.unwrap().height(), Some(0));

        let admission = coordinator.admit(issue("t1")).await.unwrap();
        assert_eq!(admission.batch, 2);
        assert_eq!(reader.recv().await.unwrap().height(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_halts_without_publishing() {
        let coordinator = coordinator(
            Arc::new(FailingLedger(MemoryLedger::new())),
            EmptyBatchPolicy::Commit,
        );
        let mut reader = coordinator.feed().new_reader();

        coordinator.admit(issue("t1")).await.unwrap();
        let reason = coordinator.halted().await;
        assert!(reason.contains("disk full"));

        assert!(reader.try_recv().is_none());
        assert_eq!(coordinator.feed().written(), 0);
        assert!(matches!(coordinator.status(), CoordinatorStatus::Halted { .. }));
        assert!(matches!(
            coordinator.admit(issue("t2")).await,
            Err(CoordinatorError::Halted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_commit_times_out_and_halts() {
        let coordinator = coordinator(
            Arc::new(StallingLedger(MemoryLedger::new())),
            EmptyBatchPolicy::Commit,
        );
        let mut reader = coordinator.feed().new_reader();

        coordinator.admit(issue("t1")).await.unwrap();
        let reason = coordinator.halted().await;
        assert!(reason.contains("timed out"));
        assert!(reader.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_answers_while_commit_in_flight() {
        let coordinator = coordinator(
            Arc::new(StallingLedger(MemoryLedger::new())),
            EmptyBatchPolicy::Commit,
        );

        coordinator.admit(issue("t1")).await.unwrap();
        assert!(matches!(
            coordinator.status(),
            CoordinatorStatus::Open { batch: 1, pending: 1, .. }
        ));

        // Timer has fired and the commit is stalled, still inside its timeout
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(coordinator.status(), CoordinatorStatus::Sealing { batch: 1 });

        // Admission waits for the batch being sealed
        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            coordinator.admit(issue("t2")),
        )
        .await;
        assert!(blocked.is_err());

        coordinator.halted().await;
        assert!(matches!(coordinator.status(), CoordinatorStatus::Halted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_failure_stays_idle() {
        let ledger = Arc::new(FlakyInitLedger {
            inner: MemoryLedger::new(),
            failed_once: AtomicBool::new(false),
        });
        let coordinator = coordinator(ledger, EmptyBatchPolicy::Commit);
        let mut reader = coordinator.feed().new_reader();

        let err = coordinator.admit(issue("t1")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Initialization(_)));
        assert_eq!(coordinator.status(), CoordinatorStatus::Idle);

        let admission = coordinator.admit(issue("t1")).await.unwrap();
        assert_eq!(admission.batch, 1);
        assert_eq!(reader.recv().await.unwrap().height(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_commit_on_real_clock() {
        let ledger = Arc::new(SqliteLedger::connect("sqlite::memory:").await.unwrap());
        let config = BatchConfig {
            interval_ms: 50,
            ..BatchConfig::default()
        };
        let coordinator = BatchCoordinator::new(ledger.clone(), Arc::new(BlockFeed::new()), config);
        let mut reader = coordinator.feed().new_reader();

        let t1 = issue("t1");
        coordinator.admit(t1.clone()).await.unwrap();

        let block = tokio::time::timeout(Duration::from_secs(5), reader.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(ids(&block), vec![t1.id()]);
        assert_eq!(ledger.block_at(1).await.unwrap().as_ref(), Some(block.as_ref()));

        let state = ledger.current_state().await.unwrap();
        assert_eq!(state.height(), Some(1));
        assert!(state.is_unspent(&t1.output_ids().next().unwrap()));
        assert_eq!(coordinator.status(), CoordinatorStatus::Idle);
    }
}
