use crate::error::DealError;
use crate::types::{Connection, UserId};
use serde::{Deserialize, Serialize};

/// Side of a connection an actor stands on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Founder,
    Investor,
}

impl Role {
    pub fn counterpart(self) -> Self {
        match self {
            Self::Founder => Self::Investor,
            Self::Investor => Self::Founder,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Founder => "founder",
            Self::Investor => "investor",
        }
    }
}

/// Actor resolved against one connection. Built once per request and threaded
/// through every transition instead of re-comparing user ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub user_id: UserId,
    pub role: Role,
}

impl Party {
    pub fn resolve(connection: &Connection, actor: &UserId) -> Result<Self, DealError> {
        let role = if *actor == connection.founder_id {
            Role::Founder
        } else if *actor == connection.investor_id {
            Role::Investor
        } else {
            return Err(DealError::NotAuthorized(format!(
                "'{}' is not a party to connection '{}'",
                actor, connection.id
            )));
        };

        Ok(Self {
            user_id: actor.clone(),
            role,
        })
    }

    /// Fail unless this party holds `role` on the connection.
    pub fn require(&self, role: Role, operation: &str) -> Result<(), DealError> {
        if self.role != role {
            return Err(DealError::NotAuthorized(format!(
                "{operation} must be performed by the {}, '{}' is the {}",
                role.as_str(),
                self.user_id,
                self.role.as_str()
            )));
        }
        Ok(())
    }

    pub fn counterpart_id<'a>(&self, connection: &'a Connection) -> &'a UserId {
        connection.party(self.role.counterpart())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Idea;

    fn connection() -> Connection {
        let idea = Idea::new(UserId::new("founder-1"), "solar kiosks");
        Connection::pending(&idea, UserId::new("investor-1"), None)
    }

    #[test]
    fn resolves_both_parties() {
        let conn = connection();
        let founder = Party::resolve(&conn, &UserId::new("founder-1")).unwrap();
        let investor = Party::resolve(&conn, &UserId::new("investor-1")).unwrap();
        assert_eq!(founder.role, Role::Founder);
        assert_eq!(investor.role, Role::Investor);
        assert_eq!(founder.counterpart_id(&conn), &UserId::new("investor-1"));
    }

    #[test]
    fn outsiders_are_not_authorized() {
        let conn = connection();
        let err = Party::resolve(&conn, &UserId::new("mallory")).unwrap_err();
        assert!(matches!(err, DealError::NotAuthorized(_)));
    }

    #[test]
    fn require_rejects_wrong_side() {
        let conn = connection();
        let investor = Party::resolve(&conn, &UserId::new("investor-1")).unwrap();
        assert!(investor.require(Role::Investor, "propose").is_ok());
        assert!(investor.require(Role::Founder, "accept_proposal").is_err());
    }
}
