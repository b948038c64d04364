// src/fetch/rank.rs

//! Order in which retrieval methods are tried
//!
//! Archives come before recipes, and among archives zip files come first.
//! Everything else keeps its original relative order (stable sort), so the
//! result is fully determined by the input list.

use super::model::RetrievalMethod;
use crate::archive::ArchiveFormat;

fn rank_key(method: &RetrievalMethod) -> u8 {
    match method {
        RetrievalMethod::Archive(archive) => {
            if archive.effective_mime_type() == Some(ArchiveFormat::Zip.mime_type()) {
                0
            } else {
                1
            }
        }
        RetrievalMethod::Recipe(_) => 2,
    }
}

/// Methods in the order they should be attempted
pub fn rank(methods: &[RetrievalMethod]) -> Vec<&RetrievalMethod> {
    let mut ranked: Vec<&RetrievalMethod> = methods.iter().collect();
    ranked.sort_by_key(|method| rank_key(method));
    ranked
}
