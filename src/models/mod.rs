pub mod community;
pub mod download;
pub mod link;
pub mod manifest;
pub mod provisioner;
pub mod registry;
pub mod report;

pub use community::CommunityDownloader;
pub use download::{DownloadClient, Fetched, HubDownloader, RegistryClient};
pub use link::{LinkCreator, SymlinkCreator};
pub use manifest::{CommunityModel, HubModel, Manifest};
pub use provisioner::{Mode, Provisioner};
pub use registry::{AppLayout, Target};
pub use report::ProvisionReport;
