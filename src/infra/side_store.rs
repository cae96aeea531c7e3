//! JSON-lines side store: the durable copy of published nodes regenerated by `rebuild`.
//!
//! One file per item kind (`document.jsonl`, `media.jsonl`, `member.jsonl`),
//! one node per line. Files are rewritten through a temporary file and an
//! atomic rename, so readers never see a partially written file.

use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::application::repos::{DurableCacheStore, RepoError};
use crate::cache::lock::mutex_lock;
use crate::domain::nodes::RawNode;
use crate::domain::types::ItemKind;

use super::error::InfraError;

const SOURCE: &str = "infra::side_store";

#[derive(Debug)]
pub struct JsonSideStore {
    root: PathBuf,
    writer: Mutex<()>,
}

impl JsonSideStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, InfraError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: ItemKind) -> PathBuf {
        self.root.join(format!("{}.jsonl", kind.as_str()))
    }

    /// Every stored node of `kind`; a missing file reads as empty.
    pub fn read(&self, kind: ItemKind) -> Result<Vec<RawNode>, InfraError> {
        let file = match fs::File::open(self.path_for(kind)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut nodes = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            nodes.push(serde_json::from_str(&line)?);
        }
        Ok(nodes)
    }

    fn write(&self, kind: ItemKind, nodes: &[RawNode]) -> Result<(), InfraError> {
        let path = self.path_for(kind);
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            for node in nodes {
                serde_json::to_writer(&mut file, node)?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl DurableCacheStore for JsonSideStore {
    fn clear(&self, kind: ItemKind) -> Result<(), RepoError> {
        let _writer = mutex_lock(&self.writer, SOURCE, "clear");
        match fs::remove_file(self.path_for(kind)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(InfraError::from(err).into()),
        }
        debug!(target_module = SOURCE, kind = %kind, "Side store cleared");
        Ok(())
    }

    fn replace(
        &self,
        kind: ItemKind,
        content_type_id: i32,
        nodes: &[RawNode],
    ) -> Result<usize, RepoError> {
        let _writer = mutex_lock(&self.writer, SOURCE, "replace");
        let mut stored = self.read(kind)?;
        stored.retain(|node| node.content_type_id != content_type_id);
        stored.extend(nodes.iter().cloned());
        stored.sort_by_key(|node| node.id);
        self.write(kind, &stored)?;
        debug!(
            target_module = SOURCE,
            kind = %kind,
            content_type_id,
            written = nodes.len(),
            total = stored.len(),
            "Side store content type replaced"
        );
        Ok(nodes.len())
    }
}
