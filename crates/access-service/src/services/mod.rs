pub mod certificate_authority;
pub mod directory;
pub mod key_management_service;
pub mod login_session_service;
pub mod oidc_service;
pub mod terminal;
