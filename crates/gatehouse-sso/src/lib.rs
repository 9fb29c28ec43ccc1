//! SSO broker for Gatehouse
//!
//! Terminates SAML2 and OIDC flows behind an OAuth2 authorization-code
//! surface. The pieces fit together as: [`registry`] owns connection records,
//! [`oauth`] runs the authorize/callback/token/userinfo state machine against
//! them, [`federation`] re-enters that machinery with the broker acting as an
//! IdP, and [`setup_link`] hands out self-service onboarding tokens.

pub mod federation;
pub mod jwt;
pub mod oauth;
pub mod oidc;
pub mod registry;
pub mod saml;
pub mod setup_link;

pub use federation::FederationController;
pub use jwt::IdTokenService;
pub use oauth::{OAuthController, OAuthControllerConfig};
pub use registry::ConnectionRegistry;
pub use setup_link::SetupLinkController;
