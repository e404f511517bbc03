use std::fs;
use std::path::{Path, PathBuf};

use reduction_core::{
    CbClass, CbLabel, CheckpointError, Checkpointable, Example, ExampleType, Label, LearnerConfig,
    Workspace,
};
use uuid::Uuid;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("reduction-core-{}", Uuid::new_v4()))
}

fn igl_config() -> LearnerConfig {
    let mut config = LearnerConfig::from_str(
        r#"
[weights]
bits = 16
sparse = true

[features]
interactions = ["UA"]

[igl]
experimental_igl = true

[igl.decoder]
interactions = ["AF", "UF"]
"#,
    )
    .unwrap();
    config.run.quiet = true;
    config
}

fn trained(config: LearnerConfig) -> Workspace {
    let mut workspace = Workspace::new(config).unwrap();
    for round in 0..12usize {
        let mut shared = Example::new().with_kind(ExampleType::Shared);
        let user = if round % 2 == 0 { "Tom" } else { "Anna" };
        workspace.add_feature(&mut shared, "User", user, 1.0);
        let mut lines = vec![shared];
        for action in 0..4usize {
            let mut ec = Example::new().with_kind(ExampleType::Action);
            workspace.add_feature(&mut ec, "Action", &format!("article={action}"), 1.0);
            let costs = if action == round % 4 {
                vec![CbClass::observed(0.0, action as u32, 0.25)]
            } else {
                Vec::new()
            };
            ec.label = Label::Cb(CbLabel { costs });
            lines.push(ec);
        }
        let mut feedback = Example::new().with_kind(ExampleType::Feedback);
        let token = if round % 3 == 0 { "dislike" } else { "like" };
        workspace.add_feature(&mut feedback, "F", token, 1.0);
        lines.push(feedback);
        workspace.learn_multi(&mut lines).unwrap();
    }
    workspace
}

#[test]
fn saved_model_reloads_to_identical_bytes() {
    let original = trained(igl_config());
    let bytes = original.save_model().unwrap().into_bytes();

    let mut restored = Workspace::new(igl_config()).unwrap();
    restored.load_model(bytes.clone()).unwrap();

    assert_eq!(restored.save_model().unwrap().into_bytes(), bytes);
    assert_eq!(
        restored.interaction_ground().unwrap().borrow().counters(),
        original.interaction_ground().unwrap().borrow().counters()
    );
    assert_eq!(restored.context().stats, original.context().stats);
    assert_eq!(
        *restored.optimizer().borrow().weights(),
        *original.optimizer().borrow().weights()
    );
}

#[test]
fn model_without_resume_keeps_only_parameters() {
    let mut config = igl_config();
    config.run.save_resume = false;
    let original = trained(config.clone());
    let bytes = original.save_model().unwrap().into_bytes();

    let mut restored = Workspace::new(config).unwrap();
    restored.load_model(bytes).unwrap();

    let before = original.optimizer().borrow();
    let after = restored.optimizer().borrow();
    let indices = before.weights().non_zero_indices();
    assert!(!indices.is_empty());
    for index in indices {
        assert_eq!(after.weights().param(index), before.weights().param(index));
    }
    assert_eq!(restored.context().stats.example_number, 0);
}

#[test]
fn checkpoint_round_trip_restores_config_and_model() {
    let dir = scratch_dir();
    let path = dir.join("workspace.ckpt");
    let original = trained(igl_config());
    original.save_checkpoint(&path).unwrap();

    let restored = Workspace::load_checkpoint(&path).unwrap();
    assert_eq!(restored.config(), original.config());
    assert_eq!(
        restored.save_model().unwrap().into_bytes(),
        original.save_model().unwrap().into_bytes()
    );
    let _ = fs::remove_dir_all(dir);
}

struct FutureWorkspace;

impl Checkpointable for FutureWorkspace {
    const CHECKPOINT_VERSION: u32 = 2;

    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        Self::write_snapshot(&Vec::<u8>::new(), path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let _: Vec<u8> = Self::read_snapshot(path)?;
        Ok(FutureWorkspace)
    }
}

#[test]
fn checkpoint_version_mismatch_is_rejected() {
    let dir = scratch_dir();
    let path = dir.join("workspace.ckpt");
    trained(igl_config()).save_checkpoint(&path).unwrap();

    match FutureWorkspace::load_checkpoint(&path) {
        Err(CheckpointError::VersionMismatch { expected, found }) => {
            assert_eq!(expected, 2);
            assert_eq!(found, 1);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("version 1 file accepted as version 2"),
    }

    FutureWorkspace.save_checkpoint(&path).unwrap();
    assert!(matches!(
        Workspace::load_checkpoint(&path),
        Err(CheckpointError::VersionMismatch { expected: 1, found: 2 })
    ));
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn text_dump_names_every_field() {
    let workspace = trained(igl_config());
    let text = workspace.dump_text().unwrap();
    assert!(text.contains("igl.counters = "));
    assert!(text.contains("resume = true"));
    assert!(text.contains("shared_data = "));
    assert!(text.contains("weights.group = "));
}

#[test]
fn progress_journal_follows_the_workspace() {
    let dir = scratch_dir();
    let path = dir.join("progress.jsonl");
    let mut config = LearnerConfig::from_str("[weights]\nbits = 10\n").unwrap();
    config.run.quiet = true;
    config.run.progress_log = path.to_string_lossy().into_owned();

    let mut workspace = Workspace::new(config).unwrap();
    for step in 0..10 {
        let mut ec = Example::new().with_label(Label::Simple(Some(1.0)));
        workspace.add_feature(&mut ec, "x", &format!("f{}", step % 3), 1.0);
        workspace.learn(&mut ec).unwrap();
    }

    let numbers: Vec<u64> = workspace
        .progress()
        .unwrap()
        .entries()
        .iter()
        .map(|entry| entry.example_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 4, 8]);
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
    let _ = fs::remove_dir_all(dir);
}
