//! Git loose object model and codec

pub mod commit;
pub mod hash;
pub mod loose;
pub mod tree;

pub use commit::Commit;
pub use hash::ObjectHash;
pub use loose::{decode, decode_verified, encode, GitObject};
pub use tree::{EntryKind, Tree, TreeEntry};

pub use gix_object::Kind;
