//! The authenticated actor, recomputed on every request and never stored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Role names. Comparison is always on the lowercase form.
pub mod roles {
    /// Base role of every member account.
    pub const MEMBER: &str = "member";
    /// Granted while a member holds an active organization membership.
    pub const OFFICER: &str = "officer";
    /// The only role of administrator accounts.
    pub const ADMIN: &str = "admin";
}

/// Which credential relation an account lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Member,
    Administrator,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Member => "member",
            AccountKind::Administrator => "administrator",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "member" => Ok(AccountKind::Member),
            "administrator" | "admin" => Ok(AccountKind::Administrator),
            other => Err(format!("Unknown account kind: {}", other)),
        }
    }
}

/// Organization the principal currently acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Affiliation {
    pub organization_id: i64,
    pub position: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub kind: AccountKind,
    pub id: i64,
    pub identity: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub affiliation: Option<Affiliation>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Add `role` unless present. Keeps insertion order.
    pub fn grant(&mut self, role: &str) {
        if !self.has_role(role) {
            self.roles.push(role.to_lowercase());
        }
    }

    pub fn revoke(&mut self, role: &str) {
        self.roles.retain(|r| !r.eq_ignore_ascii_case(role));
    }

    pub fn view(&self) -> PrincipalView {
        PrincipalView::from(self)
    }
}

/// Lowercase, trim, and drop duplicate role names, keeping first occurrence.
pub fn normalize_roles<I, S>(roles: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for role in roles {
        let role = role.as_ref().trim().to_lowercase();
        if !role.is_empty() && !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

/// Principal as returned to clients. Carries no secret material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalView {
    pub kind: AccountKind,
    pub id: i64,
    #[schema(example = "202211223@wmsu.edu.ph")]
    pub identity: String,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
    pub organization: Option<Affiliation>,
}

impl From<&Principal> for PrincipalView {
    fn from(p: &Principal) -> Self {
        Self {
            kind: p.kind,
            id: p.id,
            identity: p.identity.clone(),
            display_name: p.display_name.clone(),
            roles: p.roles.clone(),
            organization: p.affiliation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Principal {
        Principal {
            kind: AccountKind::Member,
            id: 1,
            identity: "202211223@wmsu.edu.ph".to_string(),
            display_name: None,
            roles: vec![roles::MEMBER.to_string()],
            affiliation: None,
        }
    }

    #[test]
    fn normalize_roles_lowercases_and_dedups() {
        let roles = normalize_roles(["Member", " OFFICER", "member", "", "officer"]);
        assert_eq!(roles, vec!["member", "officer"]);
    }

    #[test]
    fn grant_and_revoke_are_case_insensitive() {
        let mut p = member();
        p.grant("Officer");
        p.grant("officer");
        assert_eq!(p.roles, vec!["member", "officer"]);
        p.revoke("OFFICER");
        assert_eq!(p.roles, vec!["member"]);
    }

    #[test]
    fn account_kind_parses_aliases() {
        assert_eq!("Administrator".parse::<AccountKind>(), Ok(AccountKind::Administrator));
        assert_eq!("member".parse::<AccountKind>(), Ok(AccountKind::Member));
        assert!("guest".parse::<AccountKind>().is_err());
    }
}
