use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reduction_core::{
    CbClass, CbLabel, Checkpointable, ConfigError, Example, ExampleType, Label, LearnerConfig,
    Workspace,
};

const USERS: [&str; 2] = ["Tom", "Anna"];
const TIMES: [&str; 2] = ["morning", "afternoon"];
const ARTICLES: [&str; 7] = [
    "politics", "sports", "music", "food", "finance", "health", "camping",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let mut workspace = Workspace::new(config)?;
    println!("Stack: {}", workspace.enabled_reductions().join(" -> "));

    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut liked = 0usize;
    let rounds = 2000;
    for round in 0..rounds {
        let user = USERS[rng.gen_range(0..USERS.len())];
        let time = TIMES[rng.gen_range(0..TIMES.len())];

        let mut batch = context_lines(&workspace, user, time);
        workspace.predict_multi(&mut batch)?;
        let best = batch[0]
            .action_scores()
            .and_then(|scores| scores.first())
            .map(|score| score.action as usize)
            .unwrap_or(0);

        // explore uniformly, as the logging policy
        let chosen = rng.gen_range(0..ARTICLES.len());
        if let Some(Label::Cb(label)) = batch.get_mut(chosen + 1).map(|ec| &mut ec.label) {
            *label = CbLabel {
                costs: vec![CbClass::observed(0.0, chosen as u32, 1.0 / ARTICLES.len() as f32)],
            };
        }

        let hit = ARTICLES[chosen] == preferred(user, time);
        let token = match (hit, rng.gen_bool(0.5)) {
            (true, true) => "like",
            (true, false) => "click",
            (false, true) => "dislike",
            (false, false) => "skip",
        };
        let mut feedback = Example::new().with_kind(ExampleType::Feedback);
        workspace.add_feature(&mut feedback, "F", token, 1.0);
        batch.push(feedback);
        workspace.learn_multi(&mut batch)?;

        if round >= rounds - 200 && ARTICLES[best] == preferred(user, time) {
            liked += 1;
        }
    }

    if let Some(igl) = workspace.interaction_ground() {
        let counters = igl.borrow().counters();
        println!(
            "Batches learned {} decoder examples {} confident batches {}",
            counters.batches_learned, counters.decoder_examples, counters.extreme_batches
        );
    }
    println!("Greedy choice matched preference in {liked} of the last 200 rounds");

    workspace.save_checkpoint("out/news_feed.ckpt")?;
    println!("Checkpoint written to out/news_feed.ckpt");
    Ok(())
}

fn preferred(user: &str, time: &str) -> &'static str {
    match (user, time) {
        ("Tom", "morning") => "politics",
        ("Tom", _) => "music",
        (_, "morning") => "sports",
        _ => "politics",
    }
}

fn context_lines(workspace: &Workspace, user: &str, time: &str) -> Vec<Example> {
    let mut shared = Example::new().with_kind(ExampleType::Shared);
    workspace.add_feature(&mut shared, "User", &format!("user={user}"), 1.0);
    workspace.add_feature(&mut shared, "User", &format!("time_of_day={time}"), 1.0);

    let mut lines = vec![shared];
    for article in ARTICLES {
        let mut ec = Example::new()
            .with_kind(ExampleType::Action)
            .with_label(Label::Cb(CbLabel::default()));
        workspace.add_feature(&mut ec, "Action", &format!("article={article}"), 1.0);
        lines.push(ec);
    }
    lines
}

fn load_config() -> Result<LearnerConfig, ConfigError> {
    LearnerConfig::load_from_file("config/learner.toml").or_else(|err| {
        eprintln!("Falling back to default config: {err}");
        let mut config = LearnerConfig::default();
        config.igl.experimental_igl = true;
        config.features.interactions = vec!["UA".to_string()];
        config.igl.decoder.interactions = Some(vec!["AF".to_string(), "UF".to_string()]);
        Ok(config)
    })
}
