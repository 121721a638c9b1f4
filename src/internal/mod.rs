//! Internal building blocks (the canonical git object model) that power
//! the git-bare cooker's byte-for-byte reconstruction.

pub mod object;
