// src/filesystem/mod.rs

//! Filesystem operations for the implementation store
//!
//! This module provides:
//! - Lexical path checks for untrusted archive entries and symlink targets
//! - Tree copies, write protection and hard-link replacement used by stores

mod ops;
pub mod path;

pub use ops::{
    apply_flags_natively, copy_dir, has_native_permissions, not_regular, open_regular, remove_tree,
    replace_with_hardlink, same_file, set_write_protection,
};
