use crate::error::DealError;
use crate::role::{Party, Role};
use crate::types::{Amount, Connection, ConnectionGuard, ConnectionStatus, DealStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Offer-level actions layered on an active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NegotiationAction {
    Propose { amount_minor: i64 },
    AcceptProposal,
    RejectProposal,
    RequestReinvestment { amount_minor: i64 },
    AcceptRequest,
    RejectRequest,
}

impl NegotiationAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Propose { .. } => "propose",
            Self::AcceptProposal => "accept_proposal",
            Self::RejectProposal => "reject_proposal",
            Self::RequestReinvestment { .. } => "request_reinvestment",
            Self::AcceptRequest => "accept_request",
            Self::RejectRequest => "reject_request",
        }
    }

    /// Only this side may perform the action.
    pub fn actor_role(self) -> Role {
        match self {
            Self::Propose { .. } | Self::AcceptRequest | Self::RejectRequest => Role::Investor,
            Self::AcceptProposal | Self::RejectProposal | Self::RequestReinvestment { .. } => {
                Role::Founder
            }
        }
    }
}

/// Counterpart alert produced by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

/// Result of applying an action to a connection snapshot.
///
/// The caller commits `next` conditionally on `expected`, together with the
/// audit message and, when `mint` is set, an investment ledger entry.
#[derive(Debug, Clone)]
pub struct Transition {
    pub action: NegotiationAction,
    pub expected: ConnectionGuard,
    pub next: Connection,
    pub audit: String,
    pub mint: Option<Amount>,
    pub notice: Notice,
}

/// Negotiation state machine.
///
/// `deal_status` moves `none|rejected -> proposed|requested -> none|rejected`;
/// at most one offer is outstanding at a time and nothing expires on its own.
#[derive(Debug, Clone)]
pub struct NegotiationMachine {
    currency: String,
}

impl NegotiationMachine {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    pub fn apply(
        &self,
        connection: &Connection,
        actor: &Party,
        action: NegotiationAction,
    ) -> Result<Transition, DealError> {
        actor.require(action.actor_role(), action.name())?;

        if !connection.status.is_active() {
            return Err(DealError::InvalidState(format!(
                "{} requires an accepted connection, connection '{}' is '{}'",
                action.name(),
                connection.id,
                connection.status.as_str()
            )));
        }

        let mut next = connection.clone();
        next.updated_at = Utc::now();

        let (audit, mint, notice) = match action {
            NegotiationAction::Propose { amount_minor } => {
                let amount = self.open_offer(connection, &mut next, amount_minor, DealStatus::Proposed)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Investment proposal: {shown}"),
                    None,
                    Notice {
                        title: "New investment proposal".to_string(),
                        body: format!("{} proposed to invest {shown}", actor.user_id),
                    },
                )
            }
            NegotiationAction::RequestReinvestment { amount_minor } => {
                let amount =
                    self.open_offer(connection, &mut next, amount_minor, DealStatus::Requested)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Reinvestment request: {shown}"),
                    None,
                    Notice {
                        title: "Reinvestment requested".to_string(),
                        body: format!("{} requested a reinvestment of {shown}", actor.user_id),
                    },
                )
            }
            NegotiationAction::AcceptProposal => {
                let amount = self.close_offer(connection, &mut next, action, DealStatus::Proposed, true)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Proposal accepted: {shown} recorded as investment"),
                    Some(amount),
                    Notice {
                        title: "Proposal accepted".to_string(),
                        body: format!("Your proposal of {shown} was accepted"),
                    },
                )
            }
            NegotiationAction::AcceptRequest => {
                let amount =
                    self.close_offer(connection, &mut next, action, DealStatus::Requested, true)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Reinvestment request accepted: {shown} recorded as investment"),
                    Some(amount),
                    Notice {
                        title: "Reinvestment accepted".to_string(),
                        body: format!("Your reinvestment request of {shown} was accepted"),
                    },
                )
            }
            NegotiationAction::RejectProposal => {
                let amount =
                    self.close_offer(connection, &mut next, action, DealStatus::Proposed, false)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Proposal of {shown} declined"),
                    None,
                    Notice {
                        title: "Proposal declined".to_string(),
                        body: format!("Your proposal of {shown} was declined"),
                    },
                )
            }
            NegotiationAction::RejectRequest => {
                let amount =
                    self.close_offer(connection, &mut next, action, DealStatus::Requested, false)?;
                let shown = amount.display(&self.currency);
                (
                    format!("Reinvestment request of {shown} declined"),
                    None,
                    Notice {
                        title: "Reinvestment declined".to_string(),
                        body: format!("Your reinvestment request of {shown} was declined"),
                    },
                )
            }
        };

        Ok(Transition {
            action,
            expected: connection.guard(),
            next,
            audit,
            mint,
            notice,
        })
    }

    fn open_offer(
        &self,
        connection: &Connection,
        next: &mut Connection,
        amount_minor: i64,
        opened: DealStatus,
    ) -> Result<Amount, DealError> {
        let amount = Amount::new(amount_minor)?;
        if connection.deal_status.is_outstanding() {
            return Err(DealError::AlreadyProposed(connection.id.to_string()));
        }

        next.deal_status = opened;
        next.status = ConnectionStatus::DealPendingInvestor;
        next.proposed_amount = Some(amount);
        Ok(amount)
    }

    fn close_offer(
        &self,
        connection: &Connection,
        next: &mut Connection,
        action: NegotiationAction,
        expected: DealStatus,
        accepted: bool,
    ) -> Result<Amount, DealError> {
        if connection.deal_status != expected {
            return Err(DealError::transition_violation(
                action.name(),
                expected.as_str(),
                connection.deal_status.as_str(),
            ));
        }
        let amount = connection.proposed_amount.ok_or_else(|| {
            DealError::InvalidState(format!(
                "connection '{}' has an outstanding offer without an amount",
                connection.id
            ))
        })?;

        if accepted {
            next.deal_status = DealStatus::None;
            next.status = ConnectionStatus::DealDone;
        } else {
            next.deal_status = DealStatus::Rejected;
            next.status = ConnectionStatus::Communicating;
        }
        next.proposed_amount = None;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Idea, UserId};
    use proptest::prelude::*;

    fn active_connection() -> Connection {
        let idea = Idea::new(UserId::new("founder-1"), "agri drones");
        let mut conn = Connection::pending(&idea, UserId::new("investor-1"), None);
        conn.status = ConnectionStatus::Accepted;
        conn
    }

    fn party(conn: &Connection, role: Role) -> Party {
        Party::resolve(conn, conn.party(role)).unwrap()
    }

    fn machine() -> NegotiationMachine {
        NegotiationMachine::new("INR")
    }

    #[test]
    fn propose_then_accept_mints_and_resets() {
        let conn = active_connection();
        let proposed = machine()
            .apply(
                &conn,
                &party(&conn, Role::Investor),
                NegotiationAction::Propose {
                    amount_minor: 5_000_000,
                },
            )
            .unwrap();
        assert_eq!(proposed.next.deal_status, DealStatus::Proposed);
        assert_eq!(proposed.next.status, ConnectionStatus::DealPendingInvestor);
        assert_eq!(proposed.next.proposed_amount, Amount::new(5_000_000).ok());
        assert_eq!(proposed.audit, "Investment proposal: INR 50,000.00");
        assert!(proposed.mint.is_none());

        let accepted = machine()
            .apply(
                &proposed.next,
                &party(&proposed.next, Role::Founder),
                NegotiationAction::AcceptProposal,
            )
            .unwrap();
        assert_eq!(accepted.mint, Amount::new(5_000_000).ok());
        assert_eq!(accepted.next.deal_status, DealStatus::None);
        assert_eq!(accepted.next.status, ConnectionStatus::DealDone);
        assert!(accepted.next.proposed_amount.is_none());
        assert_eq!(accepted.expected.deal_status, DealStatus::Proposed);
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let conn = active_connection();
        for amount_minor in [0, -100] {
            let err = machine()
                .apply(
                    &conn,
                    &party(&conn, Role::Investor),
                    NegotiationAction::Propose { amount_minor },
                )
                .unwrap_err();
            assert!(matches!(err, DealError::InvalidAmount(_)));
        }
    }

    #[test]
    fn request_while_proposal_outstanding_conflicts() {
        let mut conn = active_connection();
        conn.deal_status = DealStatus::Proposed;
        conn.proposed_amount = Amount::new(100).ok();

        let err = machine()
            .apply(
                &conn,
                &party(&conn, Role::Founder),
                NegotiationAction::RequestReinvestment {
                    amount_minor: 1_000_000,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DealError::AlreadyProposed(_)));
    }

    #[test]
    fn investor_cannot_accept_own_proposal() {
        let mut conn = active_connection();
        conn.deal_status = DealStatus::Proposed;
        conn.proposed_amount = Amount::new(100).ok();

        let err = machine()
            .apply(
                &conn,
                &party(&conn, Role::Investor),
                NegotiationAction::AcceptProposal,
            )
            .unwrap_err();
        assert!(matches!(err, DealError::NotAuthorized(_)));
    }

    #[test]
    fn reject_clears_amount_and_allows_new_offer() {
        let mut conn = active_connection();
        conn.deal_status = DealStatus::Requested;
        conn.proposed_amount = Amount::new(700).ok();

        let rejected = machine()
            .apply(
                &conn,
                &party(&conn, Role::Investor),
                NegotiationAction::RejectRequest,
            )
            .unwrap();
        assert_eq!(rejected.next.deal_status, DealStatus::Rejected);
        assert!(rejected.next.proposed_amount.is_none());

        let reopened = machine().apply(
            &rejected.next,
            &party(&rejected.next, Role::Investor),
            NegotiationAction::Propose { amount_minor: 900 },
        );
        assert!(reopened.is_ok());
    }

    #[test]
    fn pending_connection_cannot_negotiate() {
        let mut conn = active_connection();
        conn.status = ConnectionStatus::Pending;
        let err = machine()
            .apply(
                &conn,
                &party(&conn, Role::Investor),
                NegotiationAction::Propose { amount_minor: 100 },
            )
            .unwrap_err();
        assert!(matches!(err, DealError::InvalidState(_)));
    }

    fn action_strategy() -> impl Strategy<Value = (bool, NegotiationAction)> {
        (
            any::<bool>(),
            prop_oneof![
                (-10i64..10_000).prop_map(|amount_minor| NegotiationAction::Propose { amount_minor }),
                Just(NegotiationAction::AcceptProposal),
                Just(NegotiationAction::RejectProposal),
                (-10i64..10_000)
                    .prop_map(|amount_minor| NegotiationAction::RequestReinvestment { amount_minor }),
                Just(NegotiationAction::AcceptRequest),
                Just(NegotiationAction::RejectRequest),
            ],
        )
    }

    proptest! {
        #[test]
        fn property_offer_invariants_hold(ops in proptest::collection::vec(action_strategy(), 0..40)) {
            let machine = machine();
            let mut conn = active_connection();
            let mut minted = 0i64;
            let mut accepted_offers = 0i64;

            for (as_founder, action) in ops {
                let role = if as_founder { Role::Founder } else { Role::Investor };
                let actor = party(&conn, role);
                let offered = conn.proposed_amount;
                match machine.apply(&conn, &actor, action) {
                    Ok(transition) => {
                        if let Some(amount) = transition.mint {
                            minted += amount.minor();
                            accepted_offers += offered.map(Amount::minor).unwrap_or_default();
                        }
                        conn = transition.next;
                    }
                    Err(_) => {}
                }

                prop_assert_eq!(conn.deal_status.is_outstanding(), conn.proposed_amount.is_some());
                prop_assert!(conn.status.is_active());
            }

            prop_assert_eq!(minted, accepted_offers);
        }
    }
}
