//! Application state shared across handlers

use std::sync::Arc;

use gatehouse_dsync::DirectorySync;
use gatehouse_sso::{
    ConnectionRegistry, FederationController, OAuthController, SetupLinkController,
};

#[derive(Clone)]
pub struct AppState {
    pub oauth: Arc<OAuthController>,
    pub connections: ConnectionRegistry,
    pub setup_links: SetupLinkController,
    pub federation: FederationController,
    pub dsync: DirectorySync,
}

impl AppState {
    pub fn new(
        oauth: Arc<OAuthController>,
        connections: ConnectionRegistry,
        setup_links: SetupLinkController,
        federation: FederationController,
        dsync: DirectorySync,
    ) -> Self {
        Self {
            oauth,
            connections,
            setup_links,
            federation,
            dsync,
        }
    }
}
