//! The master's working directory
//!
//! A cluster is administered from a directory holding the master key
//! (`.slicedb.master`), the editable draft (`draft.yaml`), and the
//! proposed/approved stage files. Everything is YAML so an operator
//! can inspect and version it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use slicedb_common::Identity;
use slicedb_spec::{Draft, DraftNode, Spec};

const MAIN_FILE_NAME: &str = ".slicedb.master";
const DRAFT_FILE_NAME: &str = "draft.yaml";

/// Spec stages kept by the master
pub const STAGE_PROPOSED: &str = "proposed";
pub const STAGE_APPROVED: &str = "approved";

fn stage_file_name(stage: &str) -> String {
    format!(".{stage}.conf")
}

#[derive(Serialize, Deserialize)]
struct MainFileData {
    key: String,
}

/// Manages the files of a cluster master
pub struct Model {
    dir: PathBuf,
    identity: Identity,
    draft: Draft,
}

impl Model {
    /// Create a fresh model with a newly generated master key
    pub fn create(dir: impl Into<PathBuf>, replicas: u32) -> Result<Self> {
        Ok(Self {
            dir: dir.into(),
            identity: Identity::generate(),
            draft: Draft::new(replicas)?,
        })
    }

    /// Load an existing model from `dir`
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let main_path = dir.join(MAIN_FILE_NAME);
        if !main_path.exists() {
            bail!("not a slicedb master directory: {}", dir.display());
        }

        let main: MainFileData = serde_yaml::from_str(
            &std::fs::read_to_string(&main_path).context("read master file")?,
        )
        .context("parse master file")?;
        let key = hex::decode(&main.key).context("decode master key")?;
        let identity = Identity::from_private_key(&key)?;

        let draft = Draft::from_yaml(
            &std::fs::read_to_string(dir.join(DRAFT_FILE_NAME)).context("read draft")?,
        )?;

        Ok(Self {
            dir,
            identity,
            draft,
        })
    }

    /// Load the model from the current working directory
    pub fn current() -> Result<Self> {
        Self::load(std::env::current_dir()?)
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Persist the master key (first save only) and the draft
    pub fn save(&self) -> Result<()> {
        let main_path = self.dir.join(MAIN_FILE_NAME);
        if !main_path.exists() {
            let main = MainFileData {
                key: hex::encode(self.identity.private_key()),
            };
            std::fs::write(&main_path, serde_yaml::to_string(&main)?)
                .context("write master file")?;
        }
        std::fs::write(self.dir.join(DRAFT_FILE_NAME), self.draft.to_yaml()?)
            .context("write draft")?;
        Ok(())
    }

    /// Draft node at `index`
    pub fn node(&self, index: usize) -> Result<&DraftNode> {
        self.draft
            .nodes
            .get(index)
            .with_context(|| format!("invalid index {index}"))
    }

    /// Append a node to the draft
    pub fn add_node(&mut self, node: DraftNode) -> Result<()> {
        self.draft.nodes.push(node);
        Ok(self.draft.validate()?)
    }

    /// Replace the node at `index`
    pub fn alter_node(&mut self, index: usize, node: DraftNode) -> Result<()> {
        if index >= self.draft.nodes.len() {
            bail!("invalid index {index}");
        }
        self.draft.nodes[index] = node;
        Ok(())
    }

    /// Remove the node at `index`
    pub fn remove_node(&mut self, index: usize) -> Result<()> {
        if index >= self.draft.nodes.len() {
            bail!("invalid index {index}");
        }
        self.draft.nodes.remove(index);
        Ok(())
    }

    /// Derive the next spec from the draft.
    ///
    /// An unchanged allocation re-proposes the previous revision; a
    /// changed one bumps it by one.
    pub fn build_spec(&self) -> Result<Spec> {
        let sat = self.draft.alloc()?;
        let mut revision = 0;
        if let Some(proposed) = self.load_spec(STAGE_PROPOSED)? {
            if serde_yaml::to_string(&sat)? == serde_yaml::to_string(&proposed.sat)? {
                revision = proposed.revision;
            } else {
                revision = proposed.revision + 1;
            }
        }
        Ok(Spec { revision, sat })
    }

    /// Persist a spec under a stage file
    pub fn save_spec(&self, stage: &str, spec: &Spec) -> Result<()> {
        let path = self.dir.join(stage_file_name(stage));
        std::fs::write(&path, serde_yaml::to_string(spec)?)
            .with_context(|| format!("write {stage} spec"))?;
        Ok(())
    }

    /// Load a spec from a stage file, if present
    pub fn load_spec(&self, stage: &str) -> Result<Option<Spec>> {
        let path = self.dir.join(stage_file_name(stage));
        if !path.exists() {
            return Ok(None);
        }
        let spec: Spec = serde_yaml::from_str(
            &std::fs::read_to_string(&path).with_context(|| format!("read {stage} spec"))?,
        )
        .with_context(|| format!("parse {stage} spec"))?;
        spec.validate()?;
        Ok(Some(spec))
    }
}

/// Resolve and normalize the directory for a new cluster, appending
/// the `.slicedb` suffix when missing
pub fn new_cluster_dir(path: &str) -> Result<PathBuf> {
    let mut dir = PathBuf::from(path);
    if !dir.is_absolute() {
        dir = std::env::current_dir()?.join(dir);
    }
    let base = dir
        .file_name()
        .and_then(|n| n.to_str())
        .context("invalid path")?
        .to_string();
    if !base.ends_with(".slicedb") {
        dir = dir.with_file_name(format!("{base}.slicedb"));
    }
    Ok(dir)
}
