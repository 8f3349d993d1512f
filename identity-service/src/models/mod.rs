//! Domain models for identity-service.

pub mod credential;
pub mod membership;
pub mod organization;
pub mod principal;
pub mod role_request;

pub use credential::{CredentialRecord, IdentityEncoding, NewAdministrator, NewMember};
pub use membership::Membership;
pub use organization::Organization;
pub use principal::{roles, AccountKind, Affiliation, Principal, PrincipalView};
pub use role_request::{
    NewRoleRequest, Page, ReviewDecision, RoleRequest, RoleRequestQuery, RoleRequestStatus,
    TransitionError,
};
