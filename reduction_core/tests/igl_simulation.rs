//! News-recommendation simulation with implicit feedback.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reduction_core::{CbClass, CbLabel, Example, ExampleType, Label, LearnerConfig, Workspace};

const USERS: [&str; 2] = ["Tom", "Anna"];
const TIMES: [&str; 2] = ["morning", "afternoon"];
const ARTICLES: [&str; 7] = [
    "politics", "sports", "music", "food", "finance", "health", "camping",
];

fn preferred(user: &str, time: &str) -> &'static str {
    match (user, time) {
        ("Tom", "morning") => "politics",
        ("Tom", _) => "music",
        (_, "morning") => "sports",
        _ => "politics",
    }
}

fn workspace() -> Workspace {
    let mut config = LearnerConfig::from_str(
        r#"
[weights]
bits = 16
sparse = true

[features]
interactions = ["UA"]

[igl]
experimental_igl = true
negative_feedback = ["dislike", "skip"]

[igl.decoder]
interactions = ["AF"]
"#,
    )
    .expect("valid config");
    config.run.quiet = true;
    Workspace::new(config).expect("igl stack")
}

struct Round {
    lines: Vec<Example>,
    chosen: usize,
}

fn simulate(workspace: &Workspace, rng: &mut StdRng) -> Round {
    let user = USERS[rng.gen_range(0..USERS.len())];
    let time = TIMES[rng.gen_range(0..TIMES.len())];
    let chosen = rng.gen_range(0..ARTICLES.len());
    let probability = 1.0 / ARTICLES.len() as f32;

    let mut shared = Example::new().with_kind(ExampleType::Shared);
    workspace.add_feature(&mut shared, "User", &format!("user={user}"), 1.0);
    workspace.add_feature(&mut shared, "User", &format!("time_of_day={time}"), 1.0);

    let mut lines = vec![shared];
    for (action, article) in ARTICLES.iter().enumerate() {
        let mut ec = Example::new().with_kind(ExampleType::Action);
        workspace.add_feature(&mut ec, "Action", &format!("article={article}"), 1.0);
        let costs = if action == chosen {
            vec![CbClass::observed(0.0, action as u32, probability)]
        } else {
            Vec::new()
        };
        ec.label = Label::Cb(CbLabel { costs });
        lines.push(ec);
    }

    let liked = ARTICLES[chosen] == preferred(user, time);
    let token = match (liked, rng.gen_bool(0.5)) {
        (true, true) => "like",
        (true, false) => "click",
        (false, true) => "dislike",
        (false, false) => "skip",
    };
    let mut feedback = Example::new().with_kind(ExampleType::Feedback);
    workspace.add_feature(&mut feedback, "F", token, 1.0);
    lines.push(feedback);

    // shared line first, so action `a` sits at `a + 1`
    Round {
        lines,
        chosen: chosen + 1,
    }
}

#[test]
fn simulated_feedback_drives_primary_and_decoder() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut workspace = workspace();
    let rounds = 300u64;

    for _ in 0..rounds {
        let Round { mut lines, chosen } = simulate(&workspace, &mut rng);
        workspace.learn_multi(&mut lines).unwrap();

        let cost = lines[chosen].cb_label().and_then(|l| l.observed_cost()).unwrap().cost;
        assert!([0.0, -1.0, 2.0].contains(&cost), "unexpected cost {cost}");

        let scores = lines[0].action_scores().unwrap();
        assert_eq!(scores.len(), ARTICLES.len());
        assert!(scores.iter().all(|score| score.score.is_finite()));
        assert!(scores.windows(2).all(|pair| pair[0].score <= pair[1].score));
    }

    let igl = workspace.interaction_ground().unwrap().borrow();
    let counters = igl.counters();
    assert_eq!(counters.batches_learned, rounds);
    assert_eq!(counters.decoder_examples, rounds * (ARTICLES.len() as u64 + 1));
    assert!(counters.extreme_batches <= rounds);

    let indices = workspace.optimizer().borrow().weights().non_zero_indices();
    assert!(indices.iter().any(|index| index % 2 == 0));
    assert!(indices.iter().any(|index| index % 2 == 1));
}

#[test]
fn simulation_is_deterministic_for_a_seed() {
    let run = || {
        let mut rng = StdRng::seed_from_u64(7);
        let mut workspace = workspace();
        for _ in 0..50 {
            let Round { mut lines, .. } = simulate(&workspace, &mut rng);
            workspace.learn_multi(&mut lines).unwrap();
        }
        workspace.save_model().unwrap().into_bytes()
    };
    assert_eq!(run(), run());
}

#[test]
fn reductions_are_reported_bottom_up() {
    let workspace = workspace();
    let names = workspace.enabled_reductions();
    assert_eq!(names.first().map(String::as_str), Some("ftrl-Coin Betting"));
    assert_eq!(names.last().map(String::as_str), Some("interaction_ground"));
    assert!(names.iter().any(|name| name == "cb_adf"));
}
