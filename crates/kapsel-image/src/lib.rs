//! # kapsel-image
//!
//! Images are plain tarballs stored under `<root>/image/<name>.tar`.
//!
//! - **Extract**: unpack an image, plain or gzip, into a container's lower
//!   directory.
//! - **Commit**: pack a container's merged root back into an image.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod commit;
