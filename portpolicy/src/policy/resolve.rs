//! One policy computation cycle: rules for an identity in, `L4Policy` out

use super::{L4Policy, L4PolicyMap};
use crate::error::Result;
use crate::filter::{build_filter, FilterInput, PolicyContext};
use crate::port::Direction;
use crate::rule::Rule;
use crate::selector::LabelSet;
use tracing::{debug, warn};

/// Compute the policy for an identity from the full rule set
///
/// Either direction failing rejects the whole computation; callers should
/// fall back to denying traffic rather than use a partial result.
pub fn resolve_policy(
    ctx: &PolicyContext<'_>,
    rules: &[Rule],
    identity: &LabelSet,
    revision: u64,
) -> Result<L4Policy> {
    let ingress = resolve_direction(ctx, rules, identity, Direction::Ingress);
    let egress = resolve_direction(ctx, rules, identity, Direction::Egress);

    match (ingress, egress) {
        (Ok(ingress), Ok(egress)) => {
            debug!(
                identity = %identity,
                revision,
                ingress = ingress.len(),
                egress = egress.len(),
                "Resolved policy"
            );
            Ok(L4Policy::new(ingress, egress, revision))
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(identity = %identity, revision, error = %e, "Policy computation rejected");
            Err(e)
        }
    }
}

fn resolve_direction(
    ctx: &PolicyContext<'_>,
    rules: &[Rule],
    identity: &LabelSet,
    direction: Direction,
) -> Result<L4PolicyMap> {
    let mut map = L4PolicyMap::new(direction);

    for rule in rules.iter().filter(|r| r.selects(identity)) {
        let origin = rule.origin();
        for peer_rule in rule.peer_rules(direction) {
            for port_rule in peer_rule.effective_port_rules() {
                for tuple in port_rule.effective_ports() {
                    let input = FilterInput::new(direction, &peer_rule.peers, &port_rule, tuple)
                        .with_origin(&origin)
                        .with_deny(peer_rule.deny);
                    map.insert(build_filter(ctx, input)?)?;
                }
            }
        }
    }

    Ok(map)
}
