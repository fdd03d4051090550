//! Property-based tests for conversation key derivation.
//!
//! Verifies:
//! 1. `between(a, b) == between(b, a)` for any identities.
//! 2. Distinct unordered pairs never share a key, including identities
//!    that contain the separator character.

use chatdock_proto::contact::ContactId;
use chatdock_proto::key::ConversationKey;
use proptest::prelude::*;

/// Strategy for identities, biased towards separators and shared prefixes.
fn arb_contact_id() -> impl Strategy<Value = ContactId> {
    prop_oneof![
        "[a-z0-9]{0,12}",
        "[a-c:]{0,6}",
        "[0-9]{1,3}:[a-z]{0,3}",
    ]
    .prop_map(ContactId::new)
}

fn unordered(a: &ContactId, b: &ContactId) -> (ContactId, ContactId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

proptest! {
    #[test]
    fn key_is_symmetric(a in arb_contact_id(), b in arb_contact_id()) {
        prop_assert_eq!(ConversationKey::between(&a, &b), ConversationKey::between(&b, &a));
    }

    #[test]
    fn key_differs_when_one_side_differs(
        a in arb_contact_id(),
        b in arb_contact_id(),
        c in arb_contact_id(),
    ) {
        prop_assume!(b != c);
        prop_assert_ne!(ConversationKey::between(&a, &b), ConversationKey::between(&a, &c));
    }

    #[test]
    fn key_is_injective_over_unordered_pairs(
        a in arb_contact_id(),
        b in arb_contact_id(),
        c in arb_contact_id(),
        d in arb_contact_id(),
    ) {
        let same_pair = unordered(&a, &b) == unordered(&c, &d);
        let same_key = ConversationKey::between(&a, &b) == ConversationKey::between(&c, &d);
        prop_assert_eq!(same_pair, same_key);
    }
}

#[test]
fn separator_in_identity_does_not_collide() {
    let left = ConversationKey::between(&ContactId::new("a:b"), &ContactId::new("c"));
    let right = ConversationKey::between(&ContactId::new("a"), &ContactId::new("b:c"));
    assert_ne!(left, right);
}
