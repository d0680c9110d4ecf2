//! Provider API clients
//!
//! This module provides:
//! - The `ProviderClient` trait every provider implements
//! - The shared HTTP transport with status mapping and token handling
//! - The injected `ProviderClients` lookup
//! - One client per supported provider

pub mod github;
pub mod http;
pub mod intercom;
pub mod notion;
pub mod registry;
pub mod slack;
pub mod trait_;
pub mod zendesk;

pub use github::GithubClient;
pub use http::{Fetched, ProviderHttp, parse_link_header};
pub use intercom::IntercomClient;
pub use notion::NotionClient;
pub use registry::{ProviderClients, RegistryError};
pub use slack::SlackClient;
pub use trait_::{ClientError, ConnectionRef, Page, ProviderClient, RemoteResource, ResourceRef};
pub use zendesk::ZendeskClient;
