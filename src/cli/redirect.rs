use std::fmt;

use uuid::Uuid;

use crate::identity::{PrincipalSummary, Role};

/// Where a freshly authenticated client lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingView {
    Dashboard,
    MemberHome(Uuid),
    UserHome(Uuid),
}

impl LandingView {
    pub fn path(&self) -> String {
        match self {
            LandingView::Dashboard => "/dashboard".to_string(),
            LandingView::MemberHome(id) => format!("/member/{}", id),
            LandingView::UserHome(id) => format!("/user/{}", id),
        }
    }
}

impl fmt::Display for LandingView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.path()) }
}

pub fn landing_view(principal: &PrincipalSummary) -> LandingView {
    match principal.role {
        Role::Admin => LandingView::Dashboard,
        Role::Member => LandingView::MemberHome(principal.id),
        Role::User => LandingView::UserHome(principal.id),
    }
}
