//! Provisioning reconcilers for Launchpad.
//!
//! Brings remote hosting resources to their desired state:
//! - Static sites: hosting project plus a branch deployment (Wrangler CLI)
//! - Dynamic apps: dependency layer, function, routing tree, invoke
//!   permission and stage deployment (AWS Lambda + API Gateway)
//!
//! Every create step degrades to an update or a no-op on an existing
//! resource, so a failed pass is repaired by running it again.

pub mod aws;
pub mod function;
pub mod static_site;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upsert;
pub mod wrangler;

pub use aws::AwsPlatform;
pub use function::{FunctionArtifacts, FunctionReconciler, FunctionSettings};
pub use static_site::StaticReconciler;
pub use upsert::{Recovery, Upserted, create_or_update};
pub use wrangler::WranglerHost;
