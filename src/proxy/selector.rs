//! Least-recently-used proxy selection
//!
//! Picks the proxy that has been idle the longest, skipping identities the
//! current operation already tried. When every candidate is still cooling
//! down or inside its minimum spacing, the caller is suspended until the
//! soonest one frees up, within a bounded wait.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::pool::ProxyPool;
use crate::models::{ProxyEndpoint, ProxyId, ProxyUsageState};

/// Outcome of ranking a pool snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Use this proxy now
    Ready(ProxyEndpoint),
    /// Nothing is ready; this proxy frees up first, at the given instant
    WaitUntil(Instant, ProxyEndpoint),
    /// Every proxy is excluded
    Empty,
}

/// Rank the non-excluded proxies of a snapshot
///
/// Ordering is least-recently-used first (never-used before used), ties
/// broken by earliest cooldown end, then by pool order.
pub fn rank_candidates(
    snapshot: &[(ProxyEndpoint, ProxyUsageState)],
    excluded: &HashSet<ProxyId>,
    now: Instant,
    min_interval: Duration,
) -> Selection {
    let mut candidates: Vec<&(ProxyEndpoint, ProxyUsageState)> = snapshot
        .iter()
        .filter(|(endpoint, _)| !excluded.contains(&endpoint.id()))
        .collect();

    // Option orders None first, which puts never-used proxies on top
    candidates.sort_by_key(|(_, state)| (state.last_used_at, state.cooldown_until));

    if candidates.is_empty() {
        return Selection::Empty;
    }

    // First ready candidate in rank order keeps LRU among the ready ones
    if let Some((endpoint, _)) = candidates
        .iter()
        .find(|(_, state)| state.is_ready(now, min_interval))
    {
        return Selection::Ready(endpoint.clone());
    }

    // min_by_key keeps the first minimum, so rank order breaks ties
    let soonest = candidates
        .iter()
        .min_by_key(|(_, state)| state.ready_at(min_interval).unwrap_or(now));

    match soonest {
        Some((endpoint, state)) => match state.ready_at(min_interval) {
            Some(at) if at > now => Selection::WaitUntil(at, endpoint.clone()),
            _ => Selection::Ready(endpoint.clone()),
        },
        None => Selection::Empty,
    }
}

/// Chooses the next proxy for an attempt
#[derive(Debug, Clone)]
pub struct ProxySelector {
    max_wait: Duration,
}

impl ProxySelector {
    /// `max_wait` bounds how long one selection may suspend its caller
    pub fn new(max_wait: Duration) -> Self {
        Self { max_wait }
    }

    /// Select a proxy not in `excluded`
    ///
    /// Returns `None` when every proxy is excluded, or when the soonest
    /// available one would free up only after the wait budget.
    pub async fn select_next(
        &self,
        pool: &ProxyPool,
        excluded: &HashSet<ProxyId>,
    ) -> Option<ProxyEndpoint> {
        let deadline = Instant::now() + self.max_wait;

        loop {
            let now = Instant::now();
            match rank_candidates(&pool.snapshot(), excluded, now, pool.min_interval()) {
                Selection::Empty => return None,
                Selection::Ready(endpoint) => return Some(endpoint),
                Selection::WaitUntil(at, endpoint) => {
                    if at > deadline {
                        debug!(
                            "Soonest proxy {} frees up in {:?}, beyond wait budget",
                            endpoint,
                            at - now
                        );
                        return None;
                    }
                    debug!("All candidates busy, waiting {:?} for {}", at - now, endpoint);
                    // State may change while asleep, so re-rank afterwards
                    sleep_until(at).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> ProxyEndpoint {
        ProxyEndpoint::new(host, 8080, "user", "pw").unwrap()
    }

    fn state(last_used: Option<Instant>, cooldown: Option<Instant>) -> ProxyUsageState {
        ProxyUsageState {
            last_used_at: last_used,
            cooldown_until: cooldown,
            consecutive_failures: 0,
        }
    }

    fn hosts_of(selection: &Selection) -> &str {
        match selection {
            Selection::Ready(e) | Selection::WaitUntil(_, e) => &e.host,
            Selection::Empty => "",
        }
    }

    #[test]
    fn test_rank_prefers_never_used_then_oldest() {
        let now = Instant::now();
        let snapshot = vec![
            (endpoint("a"), state(Some(now - Duration::from_secs(5)), None)),
            (endpoint("b"), state(Some(now - Duration::from_secs(9)), None)),
            (endpoint("c"), state(None, None)),
        ];

        let selection = rank_candidates(&snapshot, &HashSet::new(), now, Duration::ZERO);
        assert_eq!(selection, Selection::Ready(endpoint("c")));

        let excluded: HashSet<_> = [endpoint("c").id()].into_iter().collect();
        let selection = rank_candidates(&snapshot, &excluded, now, Duration::ZERO);
        assert_eq!(hosts_of(&selection), "b");
    }

    #[test]
    fn test_rank_ties_broken_by_cooldown_then_order() {
        let now = Instant::now();
        let used = Some(now - Duration::from_secs(10));
        let snapshot = vec![
            (endpoint("a"), state(used, Some(now - Duration::from_secs(1)))),
            (endpoint("b"), state(used, Some(now - Duration::from_secs(2)))),
            (endpoint("c"), state(used, Some(now - Duration::from_secs(2)))),
        ];

        let selection = rank_candidates(&snapshot, &HashSet::new(), now, Duration::ZERO);
        assert_eq!(hosts_of(&selection), "b");
    }

    #[test]
    fn test_rank_never_returns_excluded() {
        let now = Instant::now();
        let snapshot = vec![
            (endpoint("a"), state(None, None)),
            (endpoint("b"), state(None, None)),
        ];
        let excluded: HashSet<_> = [endpoint("a").id(), endpoint("b").id()]
            .into_iter()
            .collect();
        assert_eq!(
            rank_candidates(&snapshot, &excluded, now, Duration::ZERO),
            Selection::Empty
        );
        assert_eq!(
            rank_candidates(&[], &HashSet::new(), now, Duration::ZERO),
            Selection::Empty
        );
    }

    #[test]
    fn test_rank_skips_cooling_top_for_ready_candidate() {
        let now = Instant::now();
        let snapshot = vec![
            // Least recently used, but cooling down
            (
                endpoint("a"),
                state(Some(now - Duration::from_secs(60)), Some(now + Duration::from_secs(30))),
            ),
            (endpoint("b"), state(Some(now - Duration::from_secs(5)), None)),
        ];

        let selection = rank_candidates(&snapshot, &HashSet::new(), now, Duration::from_secs(1));
        assert_eq!(selection, Selection::Ready(endpoint("b")));
    }

    #[test]
    fn test_rank_picks_least_recently_used_among_ready() {
        let now = Instant::now();
        let snapshot = vec![
            (
                endpoint("a"),
                state(Some(now - Duration::from_secs(60)), Some(now + Duration::from_secs(30))),
            ),
            (
                endpoint("b"),
                state(Some(now - Duration::from_secs(10)), Some(now - Duration::from_secs(1))),
            ),
            (endpoint("c"), state(Some(now - Duration::from_secs(5)), None)),
        ];

        let selection = rank_candidates(&snapshot, &HashSet::new(), now, Duration::from_secs(1));
        assert_eq!(selection, Selection::Ready(endpoint("b")));
    }

    #[test]
    fn test_rank_waits_for_soonest_when_all_busy() {
        let now = Instant::now();
        let snapshot = vec![
            (endpoint("a"), state(Some(now), Some(now + Duration::from_secs(30)))),
            (endpoint("b"), state(Some(now), Some(now + Duration::from_secs(3)))),
        ];

        let selection = rank_candidates(&snapshot, &HashSet::new(), now, Duration::from_secs(1));
        assert_eq!(
            selection,
            Selection::WaitUntil(now + Duration::from_secs(3), endpoint("b"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_next_empty_pool_returns_immediately() {
        let pool = ProxyPool::new(Vec::new(), Duration::ZERO);
        let selector = ProxySelector::new(Duration::from_secs(60));

        let start = Instant::now();
        assert!(selector.select_next(&pool, &HashSet::new()).await.is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_next_waits_out_cooldown() {
        let pool = ProxyPool::new(vec![endpoint("a")], Duration::ZERO);
        let selector = ProxySelector::new(Duration::from_secs(5));
        let start = Instant::now();
        pool.record_cooldown(&endpoint("a").id(), start + Duration::from_secs(2));

        let selected = selector.select_next(&pool, &HashSet::new()).await;
        assert_eq!(selected, Some(endpoint("a")));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_next_gives_up_beyond_wait_budget() {
        let pool = ProxyPool::new(vec![endpoint("a")], Duration::ZERO);
        let selector = ProxySelector::new(Duration::from_secs(1));
        let start = Instant::now();
        pool.record_cooldown(&endpoint("a").id(), start + Duration::from_secs(10));

        assert!(selector.select_next(&pool, &HashSet::new()).await.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_next_enforces_min_interval() {
        let pool = ProxyPool::new(vec![endpoint("a")], Duration::from_millis(500));
        let selector = ProxySelector::new(Duration::from_secs(5));
        let start = Instant::now();
        pool.record_use(&endpoint("a").id(), start);

        let selected = selector.select_next(&pool, &HashSet::new()).await;
        assert_eq!(selected, Some(endpoint("a")));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
