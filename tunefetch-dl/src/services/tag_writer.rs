//! ID3v2 tag writer backed by lofty

use crate::models::TrackMetadata;
use crate::types::{TagError, TagWriter};
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{Tag, TagType};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagWriter;

/// Write artist/title/album into the file's ID3v2 tag, keeping other frames
pub fn write_id3_tags(path: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
    let mut tagged_file = Probe::open(path)
        .and_then(|probe| probe.read())
        .map_err(|e| TagError::Read(e.to_string()))?;

    let mut tag = tagged_file
        .tag(TagType::Id3v2)
        .cloned()
        .unwrap_or_else(|| Tag::new(TagType::Id3v2));

    tag.set_artist(metadata.artist.clone());
    tag.set_title(metadata.title.clone());
    match &metadata.album {
        Some(album) => tag.set_album(album.clone()),
        None => tag.remove_album(),
    }

    tagged_file.insert_tag(tag);
    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| TagError::Write(e.to_string()))
}

#[async_trait]
impl TagWriter for LoftyTagWriter {
    async fn write_tags(&self, file: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
        let path: PathBuf = file.to_path_buf();
        let metadata = metadata.clone();

        tokio::task::spawn_blocking(move || write_id3_tags(&path, &metadata))
            .await
            .map_err(|e| TagError::Write(format!("tagging task failed: {}", e)))?
    }
}
