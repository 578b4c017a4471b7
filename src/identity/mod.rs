//! Identity: roles, session tokens, the per-request access gate and the
//! login/register/logout orchestration.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
pub mod token;
mod gate;
mod provider;

pub use principal::{Role, PrincipalSummary};
pub use token::{TokenCodec, TokenClaims, TokenDefect, IssuedToken};
pub use gate::{AccessGate, Allow, bearer_token};
pub use provider::{AuthProvider, LocalAuthProvider, LoginRequest, LoginResponse, RegisterRequest};
