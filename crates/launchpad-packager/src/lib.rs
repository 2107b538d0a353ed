//! Artifact packaging for Launchpad.
//!
//! Static builds get a hosting manifest next to their output. Dynamic builds
//! have their entry point rewritten for the function platform, an adapter
//! generated, and are split into a dependency layer and a code archive that
//! are uploaded to the artifact store.

pub mod adapter;
pub mod archive;
pub mod entry;
pub mod envfile;
pub mod manifest;
pub mod packager;
pub mod rewrite;
pub mod store;

pub use adapter::AdapterTemplate;
pub use entry::{EntryPoint, Language, ModuleSystem, discover_entry};
pub use manifest::PagesManifest;
pub use packager::{FunctionBundle, FunctionPackager, StaticBundle, package_static};
pub use store::ObjectArtifactStore;
