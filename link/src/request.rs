use serde::{Deserialize, Serialize};

/// Which side of a request an endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Actively asks for pairs ([crate::LinkLayer::create_keep]).
    Create,
    /// Passively accepts pairs ([crate::LinkLayer::recv_keep]).
    Receive,
}

impl Role {
    /// Returns true if `self` and `other` can be matched against each other.
    pub fn complements(&self, other: &Role) -> bool {
        self != other
    }
}

/// An endpoint's ask for `number` entangled pairs with its peer.
///
/// The requesting node and its peer are implied by the link the request is submitted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Identifier of the request, unique among the live requests of the submitting endpoint.
    pub id: u64,

    /// Application-chosen tag distinguishing unrelated requests between the same endpoints.
    pub purpose: u32,

    /// Number of pairs requested.
    pub number: u32,

    pub role: Role,
}

impl Request {
    /// Returns true if `self` and `other` (submitted by opposite endpoints) describe the
    /// same generation.
    pub fn matches(&self, other: &Request) -> bool {
        self.purpose == other.purpose
            && self.number == other.number
            && self.role.complements(&other.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn request(purpose: u32, number: u32, role: Role) -> Request {
        Request {
            id: 0,
            purpose,
            number,
            role,
        }
    }

    #[test_case(request(0, 1, Role::Create), request(0, 1, Role::Receive), true; "compatible")]
    #[test_case(request(0, 3, Role::Create), request(0, 2, Role::Receive), false; "number")]
    #[test_case(request(0, 1, Role::Create), request(1, 1, Role::Receive), false; "purpose")]
    #[test_case(request(0, 1, Role::Create), request(0, 1, Role::Create), false; "role")]
    fn test_matches(a: Request, b: Request, expected: bool) {
        assert_eq!(a.matches(&b), expected);
        assert_eq!(b.matches(&a), expected);
    }
}
