//! Scenario: replayed lifecycles against a reference model
//!
//! # Invariants under test
//!
//! For arbitrary join/leave timelines over a handful of members and invites,
//! replayed sequentially:
//!
//! 1. Each inviter's count equals the number of present members credited to
//!    them (no double credit, no lost uncredit).
//! 2. Each member's `rejoin_count` equals the number of joins that arrived
//!    while the member was marked left.
//! 3. The engine's active-credit total equals the sum of all counts.
//! 4. A script written to disk replays identically to the in-memory steps.

use std::collections::HashMap;
use std::io::Write;

use invtrack_config::EngineConfig;
use invtrack_schemas::{GuildId, InviteRecord, UserId};
use invtrack_testkit::{load_replay_script, run_replay, ReplayReport, ReplayStep};
use proptest::prelude::*;

const G: GuildId = GuildId(1);
const CODES: [(&str, Option<u64>); 3] = [("a", Some(10)), ("b", Some(20)), ("vanity", None)];

#[derive(Clone, Debug)]
enum Act {
    Join { member: u64, code: usize },
    Leave { member: u64 },
}

fn arb_act() -> impl Strategy<Value = Act> {
    prop_oneof![
        3 => (0u64..5, 0usize..3).prop_map(|(member, code)| Act::Join { member, code }),
        2 => (0u64..5).prop_map(|member| Act::Leave { member }),
    ]
}

fn script(acts: &[Act]) -> Vec<ReplayStep> {
    let mut steps = vec![
        ReplayStep::Invites {
            guild_id: G,
            invites: CODES
                .iter()
                .map(|(c, inv)| InviteRecord::new(*c, 0, inv.map(UserId)))
                .collect(),
        },
        ReplayStep::Ready { guild_id: G },
    ];
    for act in acts {
        steps.push(match act {
            Act::Join { member, code } => ReplayStep::Join {
                guild_id: G,
                member_id: UserId(*member),
                via: Some(CODES[*code].0.to_string()),
            },
            Act::Leave { member } => ReplayStep::Leave {
                guild_id: G,
                member_id: UserId(*member),
            },
        });
    }
    steps
}

fn replay(steps: &[ReplayStep]) -> ReplayReport {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(run_replay(steps, EngineConfig::default()))
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn counts_and_rejoins_match_model(acts in prop::collection::vec(arb_act(), 0..40)) {
        let report = replay(&script(&acts));

        // member -> credited inviter, while present
        let mut active: HashMap<u64, u64> = HashMap::new();
        // member -> (left, rejoins)
        let mut life: HashMap<u64, (bool, u32)> = HashMap::new();

        for act in &acts {
            match act {
                Act::Join { member, code } => {
                    let e = life.entry(*member).or_insert((false, 0));
                    if e.0 {
                        e.1 += 1;
                    }
                    e.0 = false;
                    if let Some(inviter) = CODES[*code].1 {
                        active.entry(*member).or_insert(inviter);
                    }
                }
                Act::Leave { member } => {
                    if let Some(e) = life.get_mut(member) {
                        e.0 = true;
                    }
                    active.remove(member);
                }
            }
        }

        let mut total = 0u64;
        for (_, inviter) in CODES.iter() {
            let Some(inviter) = inviter else { continue };
            let want = active.values().filter(|v| *v == inviter).count() as u64;
            let got = report.count(G, UserId(*inviter));
            prop_assert_eq!(got, want, "inviter {}", inviter);
            total += got;
        }

        for (member, (left, rejoins)) in &life {
            let line = report.member(G, UserId(*member));
            prop_assert!(line.is_some());
            let line = line.unwrap();
            prop_assert_eq!(line.left, *left);
            prop_assert_eq!(line.rejoin_count, *rejoins);
        }

        if let Some(g) = report.guild(G) {
            prop_assert_eq!(g.summary.active_credits as u64, total);
        }
    }
}

#[tokio::test]
async fn script_on_disk_replays_like_in_memory() {
    let acts = vec![
        Act::Join { member: 1, code: 0 },
        Act::Join { member: 2, code: 1 },
        Act::Leave { member: 1 },
        Act::Join { member: 1, code: 1 },
        Act::Join { member: 3, code: 2 },
    ];
    let steps = script(&acts);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# generated").unwrap();
    for s in &steps {
        writeln!(file, "{}", serde_json::to_string(s).unwrap()).unwrap();
    }

    let from_disk = load_replay_script(file.path()).unwrap();
    assert_eq!(from_disk, steps);

    let a = run_replay(&from_disk, EngineConfig::default()).await.unwrap();
    let b = run_replay(&steps, EngineConfig::default()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.count(G, UserId(20)), 2);
    assert_eq!(a.count(G, UserId(10)), 0);
}
