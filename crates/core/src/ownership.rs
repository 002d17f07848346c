//! "My resources": the subset of a list owned by the current session.
//!
//! Owner shapes are already normalized at ingestion (see [`crate::resource`]), so
//! this is a plain key comparison.

#![forbid(unsafe_code)]

use crate::resource::Resource;
use crate::session::SessionContext;
use crate::OwnerId;

pub fn is_owned_by<R: Resource>(item: &R, user: &OwnerId) -> bool {
    item.owner_id() == Some(user)
}

/// Items whose owner equals the session's user id. Empty when signed out.
pub fn filter_owned<R: Resource>(list: &[R], session: &SessionContext) -> Vec<R> {
    let Some(user) = session.user_id() else { return Vec::new() };
    list.iter().filter(|r| is_owned_by(*r, &user)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Advertisement;
    use crate::session::{Role, Session};

    fn ads() -> Vec<Advertisement> {
        serde_json::from_value(serde_json::json!([
            { "id": 1, "ownerId": "u-1", "titre": "raw string" },
            { "id": 2, "owner": { "id": "u-1" }, "titre": "nested" },
            { "id": 3, "owner": 1, "titre": "numeric other" },
            { "id": 4, "owner": { "_id": "u-2" }, "titre": "someone else" },
            { "id": 5, "titre": "orphan" }
        ]))
        .unwrap()
    }

    #[test]
    fn filter_matches_both_encodings() {
        let ctx = SessionContext::signed_in(Session::new("u-1", Role::Member));
        let mine = filter_owned(&ads(), &ctx);
        let titles: Vec<_> = mine.iter().map(|a| a.titre.as_str()).collect();
        assert_eq!(titles, vec!["raw string", "nested"]);
    }

    #[test]
    fn numeric_owner_compares_as_text() {
        let ctx = SessionContext::signed_in(Session::new("1", Role::Member));
        let mine = filter_owned(&ads(), &ctx);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].titre, "numeric other");
    }

    #[test]
    fn signed_out_owns_nothing() {
        assert!(filter_owned(&ads(), &SessionContext::new()).is_empty());
    }
}
