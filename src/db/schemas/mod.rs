//! Document and catalog shapes provisioned into the Abell database
//!
//! Users and role grants, the `assetinfo` metadata document, the `server`
//! asset collection and the indexes each collection carries.

mod asset_info;
mod index;
mod server;
mod user;

pub use asset_info::{AssetInfoDoc, ASSET_INFO_COLLECTION};
pub use index::{IndexInfo, IndexSpec, IntoIndexes};
pub use server::{ServerAsset, SERVER_COLLECTION};
pub use user::{RoleGrant, UserInfo, UserSpec};
