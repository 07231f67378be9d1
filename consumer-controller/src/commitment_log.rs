// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::LogScanConfig;
use crate::contracts::OutputOracle;
use crate::error::{ControllerError, ControllerResult};
use crate::rpc::ChainSession;
use crate::types::CommitmentEvent;
use tracing::debug;

/// Index of the first element whose key is `>= target`, or `None` when every
/// key is smaller. `items` must be sorted ascending by `key`.
pub fn first_at_or_above<T, K: Ord>(
    items: &[T],
    key: impl Fn(&T) -> K,
    target: K,
) -> Option<usize> {
    let index = items.partition_point(|item| key(item) < target);
    (index < items.len()).then_some(index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchKey {
    L2Block,
    L1Block,
}

impl SearchKey {
    fn of(self, event: &CommitmentEvent) -> u64 {
        match self {
            SearchKey::L2Block => event.l2_block_number,
            SearchKey::L1Block => event.l1_block_number,
        }
    }

    fn name(self) -> &'static str {
        match self {
            SearchKey::L2Block => "l2BlockNumber",
            SearchKey::L1Block => "l1BlockNumber",
        }
    }
}

/// Searches the `OutputProposed` log of the commitment oracle.
///
/// The scanned L1 range is cut into `log_query_range` windows. The oracle's
/// committed height never decreases from one L1 block to the next, so the
/// window holding the answer is located by bisecting over window indices,
/// reading `latestBlockNumber()` as of each probed window's last block. Only
/// then are logs fetched, starting at that window. Empty windows cost one
/// `eth_call` when probed and are never fetched.
#[derive(Debug)]
pub struct CommitmentLog<S> {
    oracle: OutputOracle<S>,
    scan: LogScanConfig,
}

impl<S> Clone for CommitmentLog<S> {
    fn clone(&self) -> Self {
        Self {
            oracle: self.oracle.clone(),
            scan: self.scan,
        }
    }
}

impl<S: ChainSession> CommitmentLog<S> {
    pub fn new(oracle: OutputOracle<S>, scan: LogScanConfig) -> Self {
        Self { oracle, scan }
    }

    /// First commitment covering `l2_height` or a later L2 block.
    pub async fn first_with_l2_at_or_above(
        &self,
        l2_height: u64,
    ) -> ControllerResult<CommitmentEvent> {
        self.find_first(self.scan.start_block, SearchKey::L2Block, l2_height)
            .await
    }

    /// First commitment logged at L1 block `l1_block` or later.
    pub async fn first_with_l1_at_or_above(
        &self,
        l1_block: u64,
    ) -> ControllerResult<CommitmentEvent> {
        // nothing before l1_block can match
        let from = self.scan.start_block.max(l1_block);
        self.find_first(from, SearchKey::L1Block, l1_block).await
    }

    async fn find_first(
        &self,
        from: u64,
        key: SearchKey,
        target: u64,
    ) -> ControllerResult<CommitmentEvent> {
        let session = self.oracle.session();
        let head = session
            .latest_block_number()
            .await
            .map_err(|e| e.context("read L1 head"))?;
        let not_found = || {
            ControllerError::EventNotFound(format!(
                "no OutputProposed event with {} >= {} in L1 blocks [{}, {}]",
                key.name(),
                target,
                from,
                head
            ))
        };

        let Some(first_window) = self
            .first_reaching_window(from, head, key, target)
            .await?
        else {
            debug!(
                "[{}] Oracle state at L1 block {} has no commitment with {} >= {}",
                session.chain_name(),
                head,
                key.name(),
                target
            );
            return Err(not_found());
        };

        // query may fail if range is too big
        let (window_from, _) = self.scan.window_at(from, head, first_window);
        for (window_from, window_to) in self.scan.windows(window_from, head) {
            let events = self.oracle.commitment_events(window_from, window_to).await?;
            if let Some(index) = first_at_or_above(&events, |e| key.of(e), target) {
                let event = events[index];
                debug!(
                    "[{}] First OutputProposed with {} >= {}: {:?}",
                    session.chain_name(),
                    key.name(),
                    target,
                    event
                );
                return Ok(event);
            }
        }
        Err(not_found())
    }

    /// Index of the first window of `windows(from, head)` by whose end the
    /// oracle recorded a commitment in the scanned range that satisfies the
    /// search, `None` when the state at `head` does not.
    async fn first_reaching_window(
        &self,
        from: u64,
        head: u64,
        key: SearchKey,
        target: u64,
    ) -> ControllerResult<Option<u64>> {
        let count = self.scan.window_count(from, head);
        if count == 0 {
            return Ok(None);
        }

        // Committed height just before the scanned range, any commitment
        // inside the range raises it
        let floor = match from.checked_sub(1) {
            Some(before) => self
                .oracle
                .latest_block_number_at(before)
                .await
                .map_err(|e| e.context("read committed height before the scan"))?,
            None => 0,
        };
        let reached = |committed: u64| {
            committed > floor && (key == SearchKey::L1Block || committed >= target)
        };

        let (mut low, mut high) = (0, count);
        while low < high {
            let mid = low + (high - low) / 2;
            let (_, window_end) = self.scan.window_at(from, head, mid);
            let committed = self
                .oracle
                .latest_block_number_at(window_end)
                .await
                .map_err(|e| e.context("bisect commitment windows"))?;
            if reached(committed) {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        Ok((low < count).then_some(low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_for_testing, output_proposed_log, MockChainSession};
    use ethers::types::Address as EthAddress;
    use std::sync::Arc;

    fn synthetic_events(n: u64) -> Vec<CommitmentEvent> {
        (0..n)
            .map(|i| CommitmentEvent {
                l1_block_number: 1000 + i * 10,
                l2_block_number: i * 120,
                output_index: i,
                timestamp: 1_700_000_000 + i,
            })
            .collect()
    }

    #[test]
    fn test_first_at_or_above_over_1000_events() {
        let events = synthetic_events(1000);
        let l2 = |e: &CommitmentEvent| e.l2_block_number;

        // start
        assert_eq!(first_at_or_above(&events, l2, 0), Some(0));
        // exact match returns that event, not the next one
        assert_eq!(first_at_or_above(&events, l2, 500 * 120), Some(500));
        // between two commitments picks the later one
        assert_eq!(first_at_or_above(&events, l2, 500 * 120 + 1), Some(501));
        // end
        assert_eq!(first_at_or_above(&events, l2, 999 * 120), Some(999));
        // absent
        assert_eq!(first_at_or_above(&events, l2, 999 * 120 + 1), None);
        assert_eq!(first_at_or_above(&events, l2, u64::MAX), None);

        assert_eq!(
            first_at_or_above(&events, |e| e.l1_block_number, 1005),
            Some(1)
        );
        assert_eq!(first_at_or_above(&[] as &[CommitmentEvent], l2, 0), None);
    }

    #[test]
    fn test_first_at_or_above_with_duplicate_keys() {
        let keys = [1u64, 3, 3, 3, 7];
        assert_eq!(first_at_or_above(&keys, |k| *k, 3), Some(1));
        assert_eq!(first_at_or_above(&keys, |k| *k, 4), Some(4));
    }

    fn commitment_log(window: u64) -> (MockChainSession, CommitmentLog<MockChainSession>) {
        let oracle_address = EthAddress::repeat_byte(1);
        let mock = MockChainSession::new("l1");
        mock.add_blocks(0..=100);
        for (i, (l1, l2)) in [(10, 100), (25, 200), (40, 300), (90, 400)].into_iter().enumerate() {
            mock.add_log(output_proposed_log(oracle_address, l1, l2, i as u64));
        }
        mock.derive_output_oracle_state(oracle_address);
        let oracle = OutputOracle::new(Arc::new(mock.clone()), oracle_address);
        let log = CommitmentLog::new(
            oracle,
            LogScanConfig {
                start_block: 5,
                window,
            },
        );
        (mock, log)
    }

    #[tokio::test]
    async fn test_search_fetches_only_the_matching_window() {
        init_for_testing();
        let (mock, log) = commitment_log(20);

        let event = log.first_with_l2_at_or_above(150).await.unwrap();
        assert_eq!(event.l2_block_number, 200);
        assert_eq!(event.l1_block_number, 25);
        assert_eq!(mock.log_queries(), vec![(Some(25), Some(44))]);

        // exact commitment height, in the first window
        let event = log.first_with_l2_at_or_above(100).await.unwrap();
        assert_eq!(event.l1_block_number, 10);
        let event = log.first_with_l2_at_or_above(301).await.unwrap();
        assert_eq!(event.l1_block_number, 90);
    }

    #[tokio::test]
    async fn test_scan_by_l1_block_starts_at_target() {
        init_for_testing();
        let (mock, log) = commitment_log(20);

        let event = log.first_with_l1_at_or_above(41).await.unwrap();
        assert_eq!(event.l2_block_number, 400);
        // the empty windows [41, 60] and [61, 80] are never fetched
        assert_eq!(mock.log_queries(), vec![(Some(81), Some(100))]);

        let event = log.first_with_l1_at_or_above(40).await.unwrap();
        assert_eq!(event.l2_block_number, 300);
    }

    #[tokio::test]
    async fn test_scan_exhausted_is_event_not_found() {
        init_for_testing();
        let (mock, log) = commitment_log(1000);

        assert!(matches!(
            log.first_with_l2_at_or_above(401).await,
            Err(ControllerError::EventNotFound(_))
        ));
        assert!(matches!(
            log.first_with_l1_at_or_above(91).await,
            Err(ControllerError::EventNotFound(_))
        ));
        // decided from the oracle state alone
        assert!(mock.log_queries().is_empty());

        let (mock, log) = commitment_log(20);
        assert!(matches!(
            log.first_with_l2_at_or_above(401).await,
            Err(ControllerError::EventNotFound(_))
        ));
        assert!(mock.log_queries().is_empty());
    }

    #[tokio::test]
    async fn test_scan_surfaces_rpc_failures() {
        init_for_testing();
        let (mock, log) = commitment_log(20);
        mock.fail_method(
            "eth_getLogs",
            ControllerError::Rpc("query returned more than 10000 results".to_string()),
        );

        let err = log.first_with_l2_at_or_above(150).await.unwrap_err();
        assert!(matches!(err, ControllerError::Rpc(_)));
        assert!(err.to_string().contains("scan OutputProposed events in [25, 44]"));

        // a node without the historical state cannot bisect
        mock.fail_method(
            "eth_call",
            ControllerError::ContractCall("missing trie node".to_string()),
        );
        let err = log.first_with_l2_at_or_above(150).await.unwrap_err();
        assert!(matches!(err, ControllerError::ContractCall(_)));
    }

    #[tokio::test]
    async fn test_search_cost_grows_with_log_of_range() {
        init_for_testing();
        let oracle_address = EthAddress::repeat_byte(1);

        for head in [200_000u64, 2_000_000, 20_000_000] {
            let mock = MockChainSession::new("l1");
            mock.add_blocks([head]);
            // a single commitment just below the head, every other window empty
            mock.add_log(output_proposed_log(oracle_address, head - 10, 5000, 0));
            mock.derive_output_oracle_state(oracle_address);
            let scan = LogScanConfig {
                start_block: 0,
                window: 10_000,
            };
            let log = CommitmentLog::new(
                OutputOracle::new(Arc::new(mock.clone()), oracle_address),
                scan,
            );

            let event = log.first_with_l2_at_or_above(4999).await.unwrap();
            assert_eq!(event.l1_block_number, head - 10);

            let windows = scan.window_count(0, head);
            let max_probes = (u64::BITS - windows.leading_zeros()) as usize;
            let probes = mock.call_count(oracle_address);
            assert!(
                probes <= max_probes,
                "{} state reads for {} windows",
                probes,
                windows
            );
            assert_eq!(mock.log_queries().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_search_before_deployment_reads_empty_state() {
        init_for_testing();
        let oracle_address = EthAddress::repeat_byte(1);
        let mock = MockChainSession::new("l1");
        mock.add_blocks(0..=100);
        mock.add_log(output_proposed_log(oracle_address, 70, 700, 0));
        mock.derive_output_oracle_state(oracle_address);
        // the oracle has no code before block 50
        for block in 0..50 {
            mock.add_call_response(
                oracle_address,
                ethers::utils::id("latestBlockNumber()").to_vec(),
                Some(crate::types::BlockTag::Number(block)),
                Ok(vec![]),
            );
        }
        let log = CommitmentLog::new(
            OutputOracle::new(Arc::new(mock.clone()), oracle_address),
            LogScanConfig {
                start_block: 0,
                window: 10,
            },
        );

        let event = log.first_with_l1_at_or_above(20).await.unwrap();
        assert_eq!(event.l2_block_number, 700);
        assert_eq!(mock.log_queries(), vec![(Some(70), Some(79))]);
    }
}
