//! Shard planning
//!
//! The host engine caps the number of rules per compiled artifact. Oversized
//! collections are cut into consecutive chunks of blocking rules, and every
//! chunk gets the complete exception set appended so that an exception never
//! goes missing from a shard that could block what it exempts.

use log::{debug, warn};
use tg_core::types::Rule;

pub const DEFAULT_MAX_RULES_PER_SHARD: usize = 50_000;
pub const DEFAULT_MAX_SHARDS: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardPlan {
    pub shards: Vec<Vec<Rule>>,
    /// Blocking rules that did not fit into `max_shards` shards
    pub dropped_rules: usize,
}

impl ShardPlan {
    pub fn rule_count(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }
}

/// Split `rules` into at most `max_shards` shards of at most
/// `max_rules_per_shard` rules each.
///
/// When the exception set alone reaches the ceiling the chunk size is
/// clamped to one blocking rule, so shards may then exceed the ceiling.
pub fn plan_shards(rules: &[Rule], max_rules_per_shard: usize, max_shards: usize) -> ShardPlan {
    let (exceptions, blocking): (Vec<&Rule>, Vec<&Rule>) =
        rules.iter().partition(|rule| rule.is_exception());

    if blocking.is_empty() {
        let shards = if exceptions.is_empty() || max_shards == 0 {
            Vec::new()
        } else {
            vec![exceptions.into_iter().cloned().collect()]
        };
        return ShardPlan { shards, dropped_rules: 0 };
    }

    let chunk_size = max_rules_per_shard.saturating_sub(exceptions.len()).max(1);
    if exceptions.len() >= max_rules_per_shard {
        warn!(
            "{} exception rules reach the shard ceiling of {}; shards will exceed it",
            exceptions.len(),
            max_rules_per_shard
        );
    }

    let mut plan = ShardPlan::default();
    for (index, chunk) in blocking.chunks(chunk_size).enumerate() {
        if index >= max_shards {
            plan.dropped_rules += chunk.len();
            continue;
        }
        let mut shard = Vec::with_capacity(chunk.len() + exceptions.len());
        shard.extend(chunk.iter().map(|rule| (*rule).clone()));
        shard.extend(exceptions.iter().map(|rule| (*rule).clone()));
        plan.shards.push(shard);
    }

    if plan.dropped_rules > 0 {
        warn!(
            "shard limit of {} reached, dropped {} blocking rules",
            max_shards, plan.dropped_rules
        );
    }
    debug!(
        "planned {} shards ({} blocking, {} exceptions per shard)",
        plan.shards.len(),
        blocking.len() - plan.dropped_rules,
        exceptions.len()
    );

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::matcher::Matcher;
    use tg_core::types::{MatchDecision, RequestContext, ResourceType, Trigger};

    fn blocking(count: usize) -> Vec<Rule> {
        (0..count)
            .map(|i| Rule::block(Trigger::url(format!(".*host{i}\\.com.*"))))
            .collect()
    }

    fn exceptions(count: usize) -> Vec<Rule> {
        (0..count)
            .map(|i| {
                Rule::exception(Trigger {
                    if_domains: Some(vec![format!("*safe{i}.org")]),
                    ..Trigger::url(".*")
                })
            })
            .collect()
    }

    #[test]
    fn splits_large_collection_with_exceptions_in_every_shard() {
        let mut rules = blocking(60_000);
        rules.extend(exceptions(20));

        let plan = plan_shards(&rules, 25_000, 10);
        let sizes: Vec<usize> = plan.shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![25_000, 25_000, 10_060]);
        assert_eq!(plan.dropped_rules, 0);

        let blocking_sizes: Vec<usize> = plan
            .shards
            .iter()
            .map(|s| s.iter().filter(|r| !r.is_exception()).count())
            .collect();
        assert_eq!(blocking_sizes, vec![24_980, 24_980, 10_040]);

        for shard in &plan.shards {
            assert!(shard.len() <= 25_000);
            let tail = &shard[shard.len() - 20..];
            assert!(tail.iter().all(Rule::is_exception));
            assert_eq!(tail, &rules[60_000..]);
        }

        // blocking order is preserved across shards
        assert_eq!(plan.shards[0][0], rules[0]);
        assert_eq!(plan.shards[1][0], rules[24_980]);
        assert_eq!(plan.shards[2][0], rules[49_960]);
    }

    #[test]
    fn drops_chunks_beyond_shard_limit() {
        let plan = plan_shards(&blocking(100), 10, 3);
        assert_eq!(plan.shards.len(), 3);
        assert_eq!(plan.dropped_rules, 70);
        assert_eq!(plan.rule_count(), 30);
    }

    #[test]
    fn exceptions_only_yield_single_shard() {
        let plan = plan_shards(&exceptions(3), 10, 5);
        assert_eq!(plan.shards.len(), 1);
        assert_eq!(plan.shards[0].len(), 3);

        assert!(plan_shards(&[], 10, 5).shards.is_empty());
    }

    #[test]
    fn clamps_chunk_size_when_exceptions_fill_shard() {
        let mut rules = blocking(3);
        rules.extend(exceptions(5));
        let plan = plan_shards(&rules, 4, 10);
        assert_eq!(plan.shards.len(), 3);
        assert!(plan.shards.iter().all(|s| s.len() == 6));
    }

    #[test]
    fn exceptions_interleaved_in_input_move_to_the_tail() {
        let mut rules = blocking(2);
        rules.insert(1, exceptions(1).remove(0));
        let plan = plan_shards(&rules, 10, 1);
        assert_eq!(plan.shards[0].len(), 3);
        assert!(plan.shards[0][2].is_exception());
    }

    #[test]
    fn no_shard_blocks_a_domain_covered_by_an_exception() {
        let mut rules = blocking(500);
        rules.push(Rule::block(Trigger::url(".*")));
        rules.extend(exceptions(4));

        let plan = plan_shards(&rules, 60, 20);
        assert!(plan.shards.len() > 1);

        for shard in &plan.shards {
            assert!(shard.len() <= 60);
            let matcher = Matcher::new(shard).expect("compile shard");
            for i in 0..4 {
                let page = format!("www.safe{i}.org");
                for url in ["https://host7.com/a.js", "https://anything.example/"] {
                    let result = matcher.match_request(&RequestContext {
                        url,
                        page_host: &page,
                        resource_type: ResourceType::SCRIPT,
                    });
                    assert_eq!(result.decision, MatchDecision::Allow);
                }
            }
        }

        // the same request on an unprotected page is blocked by the last shard
        let last = Matcher::new(plan.shards.last().unwrap()).unwrap();
        let result = last.match_request(&RequestContext {
            url: "https://anything.example/",
            page_host: "plain.net",
            resource_type: ResourceType::SCRIPT,
        });
        assert_eq!(result.decision, MatchDecision::Block);
    }
}
