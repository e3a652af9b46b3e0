//! Host-side navigation: tabs, history, and the relay that turns address-bar
//! input and in-frame messages into page loads.

pub mod loader;
pub mod relay;
pub mod tab;

pub use loader::LoadedPage;
pub use loader::PageContent;
pub use loader::PageLoader;
pub use loader::ServiceLoader;
pub use relay::NavigationRelay;
pub use tab::Surface;
pub use tab::Tab;
pub use tab::TabId;
pub use tab::TabState;
