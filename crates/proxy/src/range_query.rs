//! Token range scans.
//!
//! A scan is split at ring tokens so every sub-range has one replica set,
//! then the sub-ranges are read in token order a round at a time. The round
//! size starts from the schema's row estimate and is recomputed from the
//! rows actually seen. One deadline covers the whole scan; when it passes,
//! the completed prefix is returned.

use crate::error::ProxyError;
use crate::messaging::Messaging;
use crate::read_executor::{read_range, ReadContext};
use futures::stream::FuturesOrdered;
use futures::StreamExt;
use ringstore_common::{
    ConsistencyLevel, PartitionRange, QueryResult, ReadCommand, Schema, Token, TokenRange,
};
use tokio::time::Instant;

/// Headroom added to each round so a slightly sparse range does not force
/// another round.
pub const CONCURRENT_SUBREQUESTS_MARGIN: f64 = 0.10;

/// Split `range` at every ring token strictly inside it. The pieces are
/// contiguous, in token order, and cover `range` exactly.
pub fn get_restricted_ranges(range: &TokenRange, ring_tokens: &[Token]) -> Vec<TokenRange> {
    if range.is_empty() {
        return Vec::new();
    }
    let mut pieces = Vec::new();
    let mut rest = range.clone();
    for token in ring_tokens {
        if let Some((head, tail)) = rest.split_at(*token) {
            pieces.push(head);
            rest = tail;
        }
    }
    pieces.push(rest);
    pieces
}

/// Expected live rows in one sub-range, assuming partitions spread evenly
/// over `ring_len` ranges.
pub fn estimate_result_rows_per_range(schema: &Schema, ring_len: usize) -> f64 {
    let partitions_per_range = schema.estimated_partitions as f64 / ring_len.max(1) as f64;
    partitions_per_range * schema.mean_rows_per_partition
}

fn clamp_rounds(wanted: f64, max: usize) -> usize {
    if !wanted.is_finite() || wanted >= max as f64 {
        max
    } else {
        (wanted as usize).max(1).min(max)
    }
}

/// Sub-ranges to read in the first round.
pub fn initial_concurrency(limit: usize, rows_per_range: f64, ranges: usize) -> usize {
    if ranges == 0 {
        return 0;
    }
    if rows_per_range <= 0.0 {
        return 1;
    }
    clamp_rounds((limit as f64 / rows_per_range).ceil(), ranges)
}

/// Sub-ranges to read next, from the rows per range observed so far.
pub fn next_concurrency(remaining_rows: usize, rows_per_range: f64, remaining_ranges: usize) -> usize {
    if remaining_ranges == 0 {
        return 0;
    }
    if rows_per_range <= 0.0 {
        return remaining_ranges;
    }
    let wanted =
        (remaining_rows as f64 / rows_per_range * (1.0 + CONCURRENT_SUBREQUESTS_MARGIN)).ceil();
    clamp_rounds(wanted, remaining_ranges)
}

/// Scan `range` at `cl`, returning at most `cmd.row_limit` live rows.
pub async fn query_partition_key_range<M: Messaging>(
    ctx: &ReadContext<M>,
    schema: &Schema,
    cmd: &ReadCommand,
    range: TokenRange,
    cl: ConsistencyLevel,
) -> Result<QueryResult, ProxyError> {
    let _timer = ringstore_metrics::start_op_timer("range");
    ringstore_metrics::metrics().range_scans.inc();
    let deadline = Instant::now() + ctx.range_timeout;

    let ring = ctx.topology.ring_tokens();
    let ranges = get_restricted_ranges(&range, &ring);
    let limit = cmd.row_limit;

    let mut concurrency = initial_concurrency(
        limit,
        estimate_result_rows_per_range(schema, ring.len()),
        ranges.len(),
    );
    let mut parts = Vec::new();
    let mut rows = 0usize;
    let mut next = 0usize;

    'scan: while next < ranges.len() && rows < limit {
        let end = (next + concurrency).min(ranges.len());
        tracing::debug!(
            "range scan {}: reading sub-ranges {}..{} of {}",
            range,
            next,
            end,
            ranges.len()
        );
        let mut round: FuturesOrdered<_> = ranges[next..end]
            .iter()
            .map(|sub| {
                read_range(ctx, cmd, PartitionRange::Tokens(sub.clone()), cl, deadline)
            })
            .collect();
        next = end;

        loop {
            match tokio::time::timeout_at(deadline, round.next()).await {
                Ok(Some(Ok(data))) => {
                    let part = data.to_query_result(limit - rows);
                    rows += part.row_count();
                    parts.push(part);
                    if rows >= limit {
                        break 'scan;
                    }
                }
                Ok(Some(Err(e @ ProxyError::Unavailable { .. }))) => {
                    ctx.stats.record_range_slice_unavailable();
                    ringstore_metrics::metrics()
                        .unavailables
                        .with_label_values(&["range"])
                        .inc();
                    return Err(e);
                }
                Ok(Some(Err(ProxyError::ReadTimeout { .. }))) | Err(_) => {
                    ctx.stats.record_range_slice_timeout();
                    ringstore_metrics::metrics()
                        .timeouts
                        .with_label_values(&["range"])
                        .inc();
                    tracing::debug!(
                        "range scan {} hit its deadline after {} of {} sub-ranges",
                        range,
                        parts.len(),
                        ranges.len()
                    );
                    break 'scan;
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => break,
            }
        }

        concurrency = if rows == 0 {
            (concurrency * 2).min(ranges.len() - next)
        } else {
            next_concurrency(limit - rows, rows as f64 / parts.len() as f64, ranges.len() - next)
        };
    }

    let mut result = QueryResult::concat(parts);
    result.truncate(limit);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{put_token, TestNode};
    use ringstore_common::{DecoratedKey, Endpoint};
    use std::time::Duration;

    fn ep(port: u16) -> Endpoint {
        Endpoint::localhost(port)
    }

    fn reconstruct(pieces: &[TokenRange]) -> Option<TokenRange> {
        let first = pieces.first()?;
        for pair in pieces.windows(2) {
            if !pair[0].abuts(&pair[1]) {
                return None;
            }
        }
        Some(TokenRange {
            start: first.start,
            end: pieces.last()?.end,
        })
    }

    #[test]
    fn test_restricted_ranges_reconstruct_input() {
        let ring = [Token(100), Token(200), Token(300), Token(400)];
        let inputs = [
            TokenRange::full(),
            TokenRange::new(Token(0), Token(400)),
            TokenRange::new(Token(150), Token(350)),
            TokenRange::new(Token(100), Token(200)),
            TokenRange::new(Token(110), Token(120)),
            TokenRange::starting_at(Token(250)),
        ];
        for input in inputs {
            let pieces = get_restricted_ranges(&input, &ring);
            assert_eq!(reconstruct(&pieces), Some(input.clone()), "{input}");
            for piece in &pieces {
                assert!(!piece.is_empty());
                assert!(ring.iter().all(|t| piece.split_at(*t).is_none()));
            }
        }
    }

    #[test]
    fn test_restricted_ranges_split_points() {
        let ring = [Token(100), Token(200), Token(300)];
        let pieces = get_restricted_ranges(&TokenRange::new(Token(50), Token(250)), &ring);
        assert_eq!(
            pieces,
            vec![
                TokenRange::new(Token(50), Token(100)),
                TokenRange::new(Token(100), Token(200)),
                TokenRange::new(Token(200), Token(250)),
            ]
        );
        assert!(get_restricted_ranges(&TokenRange::new(Token(5), Token(5)), &ring).is_empty());
        assert_eq!(get_restricted_ranges(&TokenRange::full(), &[]).len(), 1);
    }

    #[test]
    fn test_concurrency_estimates() {
        let schema = Schema::new("ks", "t").with_estimates(1000, 2.0);
        assert_eq!(estimate_result_rows_per_range(&schema, 10), 200.0);
        assert_eq!(estimate_result_rows_per_range(&schema, 0), 2000.0);

        assert_eq!(initial_concurrency(100, 200.0, 10), 1);
        assert_eq!(initial_concurrency(1000, 200.0, 10), 5);
        assert_eq!(initial_concurrency(usize::MAX, 200.0, 10), 10);
        assert_eq!(initial_concurrency(100, 0.0, 10), 1);
        assert_eq!(initial_concurrency(100, 1.0, 0), 0);

        // 100 rows still wanted at 20 per range, plus the margin.
        assert_eq!(next_concurrency(100, 20.0, 50), 6);
        assert_eq!(next_concurrency(100, 10.0, 4), 4);
        assert_eq!(next_concurrency(1, 10.0, 4), 1);
        assert_eq!(next_concurrency(5, 0.0, 4), 4);
    }

    #[tokio::test]
    async fn test_scan_returns_rows_in_token_order() {
        let node = TestNode::four_ranges();
        for (port, token) in [(1, 50), (2, 150), (3, 250), (4, 350)] {
            let m = put_token(token, "v");
            if port == 1 {
                node.proxy.mutate_locally(&m).await.unwrap();
            } else {
                node.messaging.set_data(ep(port), vec![m]);
            }
        }

        let schema = Schema::new("ks", "t").with_estimates(4, 1.0);
        let result = query_partition_key_range(
            &node.proxy.read_context(),
            &schema,
            &ReadCommand::new("ks", "t"),
            TokenRange::new(Token(0), Token(400)),
            ConsistencyLevel::One,
        )
        .await
        .unwrap();
        let tokens: Vec<u64> = result.partitions.iter().map(|p| p.key.token.0).collect();
        assert_eq!(tokens, vec![50, 150, 250, 350]);
    }

    #[tokio::test]
    async fn test_scan_stops_at_limit() {
        let node = TestNode::four_ranges();
        node.proxy.mutate_locally(&put_token(50, "v")).await.unwrap();
        for (port, token) in [(2, 150), (3, 250), (4, 350)] {
            node.messaging.set_data(ep(port), vec![put_token(token, "v")]);
        }
        let schema = Schema::new("ks", "t").with_estimates(4, 1.0);
        let result = query_partition_key_range(
            &node.proxy.read_context(),
            &schema,
            &ReadCommand::new("ks", "t").with_limit(2),
            TokenRange::new(Token(0), Token(400)),
            ConsistencyLevel::One,
        )
        .await
        .unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(node.messaging.data_reads_to(ep(3)), 0);
        assert_eq!(node.messaging.data_reads_to(ep(4)), 0);
    }

    #[tokio::test]
    async fn test_deadline_returns_completed_prefix() {
        let node = TestNode::four_ranges_with_range_timeout(Duration::from_millis(100));
        node.proxy.mutate_locally(&put_token(50, "a")).await.unwrap();
        node.messaging.set_data(ep(2), vec![put_token(150, "b")]);
        node.messaging.set_data(ep(3), vec![put_token(250, "c")]);
        node.messaging.set_data(ep(4), vec![put_token(350, "d")]);
        node.messaging.delay(ep(3), Duration::from_secs(5));
        node.messaging.delay(ep(4), Duration::from_secs(5));

        let schema = Schema::new("ks", "t").with_estimates(4, 1.0);
        let result = query_partition_key_range(
            &node.proxy.read_context(),
            &schema,
            &ReadCommand::new("ks", "t"),
            TokenRange::new(Token(0), Token(400)),
            ConsistencyLevel::One,
        )
        .await
        .unwrap();

        let keys: Vec<&DecoratedKey> = result.partitions.iter().map(|p| &p.key).collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].token, Token(50));
        assert_eq!(keys[1].token, Token(150));
        assert_eq!(node.proxy.stats().range_slice_timeouts, 1);
    }

    #[tokio::test]
    async fn test_dead_owner_fails_scan() {
        let node = TestNode::four_ranges();
        node.ring.mark_down(ep(3));
        let err = query_partition_key_range(
            &node.proxy.read_context(),
            &Schema::new("ks", "t"),
            &ReadCommand::new("ks", "t"),
            TokenRange::new(Token(0), Token(400)),
            ConsistencyLevel::One,
        )
        .await
        .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(node.proxy.stats().range_slice_unavailables, 1);
    }
}
