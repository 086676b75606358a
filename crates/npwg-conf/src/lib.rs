//! WireGuard configuration codec for NexusPointWG.
//!
//! Parses and renders the INI-like `wg-quick` configuration format while
//! preserving operator-edited content. The service owns exactly one region
//! of the file, the *managed block*, delimited by two sentinel comments:
//!
//! ```text
//! # NexusPointWG BEGIN
//! # NPWG peer_id=<id> user_id=<uid> device=<name>
//! [Peer]
//! ...
//! # NexusPointWG END
//! ```
//!
//! Everything between the sentinels is regenerated from database state on
//! every write; everything outside them survives round-trips lexically
//! (modulo whitespace normalization and field ordering inside blocks).

mod client;
mod document;
pub mod error;
mod file;
mod parse;
mod render;

pub use client::{render_client_config, ClientConfig};
pub use document::{
    InterfaceSection, ManagedTag, PeerSection, ServerDocument, MANAGED_BEGIN, MANAGED_END,
    TAG_PREFIX,
};
pub use error::ConfError;
pub use file::ConfFile;
pub use parse::parse;
pub use render::render;
