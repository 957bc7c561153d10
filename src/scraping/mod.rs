// src/scraping/mod.rs
//! Everything that talks to job sites: discovery, the adaptive locator,
//! detail fetching, the browser and its saved session.

pub mod coordinator;
pub mod detail;
pub mod discovery;
pub mod locator;
pub mod renderer;
pub mod session;
pub mod sites;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Coordinator, FetchOutcome};
pub use detail::{DetailFetcher, DetailSelectors, DetailSettings};
pub use discovery::{discover_all, BrowserDiscoverer, CardParser, HttpDiscoverer, ListingDiscoverer};
pub use locator::{AdaptiveLocator, LocateStrategy, SelectorCascade};
pub use renderer::{BrowserPage, ChromePage, LazyRenderer, PageFactory, Renderer, RendererSettings};
pub use session::SessionState;
